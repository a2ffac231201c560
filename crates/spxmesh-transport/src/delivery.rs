/// How a connection should try to deliver an outgoing payload. TCP
/// ignores this entirely and always delivers reliably and in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Retried with exponential backoff until acked or the connection
    /// gives up and closes.
    Reliable,
    /// Fire-and-forget, no retry, no ordering guarantee beyond the
    /// sender's own monotone sequence.
    Unreliable,
    /// Like `Unreliable` but the receiver drops frames older than the
    /// newest sequence it has already seen (voice frames).
    Sequenced,
}
