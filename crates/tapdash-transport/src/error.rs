/// Boxed source error from the underlying socket library.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listening socket failed.
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a TCP connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The peer connected but the WebSocket upgrade did not complete.
    #[error("handshake failed: {0}")]
    Handshake(#[source] BoxError),

    /// Writing a frame to the peer failed.
    #[error("send failed: {0}")]
    Send(#[source] BoxError),

    /// Reading a frame from the peer failed.
    #[error("receive failed: {0}")]
    Receive(#[source] BoxError),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}
