use std::sync::Arc;
use std::sync::mpsc::Sender;

use crate::error::TransportError;

/// Delivered by a transport, in arrival order, on the channel it was opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A raw chunk, not aligned to message boundaries.
    Data(Vec<u8>),
    /// The link is gone. Sent at most once per opened link.
    Disconnected,
}

/// Write half of an open link.
pub trait Transport: Send + Sync {
    fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Ask the link to close. The transport answers with `LinkEvent::Disconnected`.
    fn close(&self);
}

/// Finds a device and opens a link to it.
pub trait Connector {
    /// Locate a device, returning its display name.
    fn discover(&mut self) -> Result<String, TransportError>;

    fn open(&mut self, events: Sender<LinkEvent>) -> Result<Arc<dyn Transport>, TransportError>;
}
