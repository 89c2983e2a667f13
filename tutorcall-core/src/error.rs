use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Microphone permission denied or no input hardware.
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("discarded late audio payload while {state}")]
    StalePlaybackPacket { state: &'static str },

    #[error("channel is not open; message not sent")]
    SendWhileDisconnected,

    #[error("playback failed: {0}")]
    Playback(String),

    #[error("capture failed: {0}")]
    Capture(String),
}
