use criterion::{black_box, criterion_group, criterion_main, Criterion};
use spxmesh_crypto::{Envelope, KeyPair};

fn address_of(public_key: &[u8; 32]) -> [u8; 20] {
    let h = spxmesh_crypto::hashing::blake3_32(public_key);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&h[..20]);
    addr
}

fn bench_sign(c: &mut Criterion) {
    let kp = KeyPair::generate();
    let msg = b"benchmark message payload";
    c.bench_function("ed25519_sign", |b| b.iter(|| kp.sign(black_box(msg))));
}

fn bench_envelope_round_trip(c: &mut Criterion) {
    let a = KeyPair::generate();
    let b = KeyPair::generate();
    let addr = address_of(&a.public_key());
    let plaintext = vec![0u8; 1024];

    c.bench_function("envelope_encrypt_for", |bencher| {
        bencher.iter(|| Envelope::encrypt_for(&a, addr, &b.public_key(), black_box(&plaintext)).unwrap())
    });

    let env = Envelope::encrypt_for(&a, addr, &b.public_key(), &plaintext).unwrap();
    c.bench_function("envelope_decrypt_from", |bencher| {
        bencher.iter(|| Envelope::decrypt_from(&b, black_box(&env)).unwrap())
    });
}

criterion_group!(benches, bench_sign, bench_envelope_round_trip);
criterion_main!(benches);
