// RowMon - Error Types
//
// Physics errors never leave the engine (noise is discarded in place).
// What remains are link-layer failures, impulse-queue conditions and replay
// input problems. Boot code wraps these in `anyhow`.

use thiserror::Error;

/// Failures reported by the wireless link layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("notification failed (err {0})")]
    NotifyFailed(i32),

    #[error("link congested, sample dropped")]
    Congested,

    #[error("advertising failed to start (err {0})")]
    AdvertisingFailed(i32),
}

/// Conditions on the impulse queue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ImpulseError {
    #[error("impulse queue full, event dropped")]
    QueueFull,

    #[error("physics worker has exited")]
    Disconnected,
}

/// Problems loading an impulse recording for replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read recording: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: '{text}' is not a time delta")]
    Parse { line: usize, text: String },

    #[error("recording contains no impulses")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_error_display_carries_code() {
        let err = LinkError::NotifyFailed(-12);
        assert!(err.to_string().contains("-12"));
    }

    #[test]
    fn replay_error_chains_io() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = ReplayError::from(io_err);
        assert!(err.source().is_some());
    }
}
