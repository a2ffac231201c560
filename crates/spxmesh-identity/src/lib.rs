//! Node addresses and the XOR distance metric over the 160-bit address
//! space. Key material itself lives in `spxmesh-crypto`; this crate adds
//! the address derived from it.

pub mod address;
pub mod error;

pub use address::{Address, ADDRESS_LEN, ADDRESS_PREFIX};
pub use error::{IdentityError, Result};
pub use spxmesh_crypto::KeyPair;
