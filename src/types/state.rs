//! Connection state

/// Lifecycle state of a [`Record3DStream`](crate::Record3DStream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Streaming,
}

impl ConnectionState {
    pub fn is_streaming(self) -> bool {
        self == ConnectionState::Streaming
    }
}
