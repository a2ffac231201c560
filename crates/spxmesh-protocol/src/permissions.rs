//! The permission set a peer can be authorized for.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const CONTACT: Permissions = Permissions(0b001);
    pub const FILE_TRANSFER: Permissions = Permissions(0b010);
    pub const VOICE_CALL: Permissions = Permissions(0b100);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Permissions(bits)
    }

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Permissions) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Permissions) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;
    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionKind {
    Contact,
    FileTransfer,
    VoiceCall,
}

impl From<PermissionKind> for Permissions {
    fn from(kind: PermissionKind) -> Self {
        match kind {
            PermissionKind::Contact => Permissions::CONTACT,
            PermissionKind::FileTransfer => Permissions::FILE_TRANSFER,
            PermissionKind::VoiceCall => Permissions::VOICE_CALL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_check() {
        let mut perms = Permissions::NONE;
        perms.insert(Permissions::CONTACT);
        perms.insert(Permissions::FILE_TRANSFER);
        assert!(perms.contains(Permissions::CONTACT));
        assert!(perms.contains(Permissions::FILE_TRANSFER));
        assert!(!perms.contains(Permissions::VOICE_CALL));
        perms.remove(Permissions::CONTACT);
        assert!(!perms.contains(Permissions::CONTACT));
    }
}
