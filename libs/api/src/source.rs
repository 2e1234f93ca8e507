use std::future::Future;
use std::pin::Pin;

/// One inbound publish as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl TransportMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

/// Subscribed message stream.
///
/// Implementations deal with reconnects themselves; the ingest loop only
/// sees messages in arrival order and the end of the stream.
pub trait MessageSource: Send {
    /// Next message. `None` = subscription closed, no more messages.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<TransportMessage>> + Send + '_>>;

    /// Release the transport connection.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
