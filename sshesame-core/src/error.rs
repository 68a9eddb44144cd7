use thiserror::Error;

/// Errors raised by the honeypot engine itself: malformed wire payloads,
/// channel bookkeeping faults, and I/O failures. Unsupported-but-well-formed
/// requests are not represented here — those are rejected politely (reply
/// false, log it) rather than raising an error.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("malformed request payload: {0}")]
    MalformedPayload(&'static str),
    #[error("ssh protocol error: {0}")]
    Ssh(#[from] russh::Error),
    #[error("channel {0} is not active")]
    ChannelNotActive(u32),
    #[error("event channel disconnected")]
    EventChannelClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
