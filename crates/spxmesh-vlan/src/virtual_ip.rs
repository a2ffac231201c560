//! Deterministic `10.147.*.*` virtual IP assigned to a node in the VLAN
//! overlay, derived purely from its address so the mapping is stable
//! across restarts and agreed on by every peer without negotiation.

use spxmesh_identity::Address;

const VLAN_OCTET_0: u8 = 10;
const VLAN_OCTET_1: u8 = 147;

/// `10.147.h[0].(h[1] or 1)` where `h` is the address's leading bytes.
/// The third octet falling to zero is avoided by substituting 1, since
/// `x.y.0` is not a usable host suffix on a /16 the way `.1` is.
pub fn virtual_ip_for(address: &Address) -> [u8; 4] {
    let h0 = address.0[0];
    let h1 = if address.0[1] == 0 { 1 } else { address.0[1] };
    [VLAN_OCTET_0, VLAN_OCTET_1, h0, h1]
}

pub fn format_ip(ip: [u8; 4]) -> String {
    format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use spxmesh_crypto::KeyPair;

    #[test]
    fn is_pure_and_deterministic() {
        let key = KeyPair::generate();
        let address = Address::derive(&key.public_key());
        assert_eq!(virtual_ip_for(&address), virtual_ip_for(&address));
    }

    #[test]
    fn stays_in_10_147_range() {
        let address = Address([3u8; 20]);
        let ip = virtual_ip_for(&address);
        assert_eq!(ip[0], 10);
        assert_eq!(ip[1], 147);
    }

    #[test]
    fn never_assigns_zero_last_octet() {
        let mut bytes = [5u8; 20];
        bytes[1] = 0;
        let address = Address(bytes);
        assert_eq!(virtual_ip_for(&address)[3], 1);
    }
}
