//! # Error Types
//!
//! Every call the runtime makes against the session layer resolves to a
//! [`ClientError`], generic over the error type of the underlying transport.
//! Each variant carries a stable numeric status code (see [`ClientError::code`])
//! so that failure diagnostics can be emitted as a `{step, code}` pair without
//! formatting machinery on the device.

use crate::transport;

/// The primary error enum for the client runtime.
///
/// It is generic over the transport error type `E`, allowing it to wrap
/// specific errors from the underlying channel (UDP socket, serial stream).
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientError<E> {
    /// An error occurred in the underlying transport layer.
    Transport(E),
    /// A bounded wait elapsed without the expected response.
    Timeout,
    /// The agent answered the session handshake with a non-zero status.
    AgentRefused(u8),
    /// The session has not been established (or has been closed).
    NotConnected,
    /// The buffer provided for an encode operation was too small.
    BufferTooSmall,
    /// The arena could not satisfy a buffer carve request.
    OutOfMemory,
    /// A node name or namespace failed validation.
    BadName,
    /// A configuration record failed validation.
    InvalidConfig,
    /// A registration hook had already been consumed.
    HookConsumed,
}

impl<E> ClientError<E> {
    /// Numeric status code, one per failure class. Emitted on the diagnostics
    /// boundary next to the identifier of the step that failed.
    pub fn code(&self) -> u8 {
        match self {
            ClientError::Transport(_) => 1,
            ClientError::Timeout => 2,
            ClientError::AgentRefused(_) => 3,
            ClientError::NotConnected => 4,
            ClientError::BufferTooSmall => 5,
            ClientError::OutOfMemory => 6,
            ClientError::BadName => 7,
            ClientError::InvalidConfig => 8,
            ClientError::HookConsumed => 9,
        }
    }
}

/// Allows automatic conversion of any transport error into a `ClientError`.
/// This is what lets the `?` operator work seamlessly on `Result`s coming
/// out of the transport layer.
impl<E: transport::TransportError> From<E> for ClientError<E> {
    fn from(err: E) -> Self {
        ClientError::Transport(err)
    }
}
