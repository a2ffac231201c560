use spxmesh_identity::Address;
use spxmesh_protocol::{MessageBody, PermissionKind};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum PeerEvent {
    PeerConnected {
        peer: Address,
    },
    PeerDisconnected {
        peer: Address,
    },
    DataReceived {
        peer: Address,
        message: MessageBody,
    },
    PermissionRequested {
        peer: Address,
        request_id: Uuid,
        permission: PermissionKind,
        display_name: Option<String>,
    },
}
