use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ScanError {
    /// Malformed corner file, degenerate region, naming collision or bad
    /// config values. Fatal before any stage motion.
    Config(String),
    /// Stage did not acknowledge arrival within its timeout. Per-cell.
    StageTimeout(String),
    /// Camera failed to deliver a frame. Per-cell.
    Camera(String),
    /// Every focus probe failed to capture. Per-cell, downgraded to a
    /// best-effort capture at the Z estimate.
    FocusUnavailable(String),
    /// The stage or camera connection is gone. Fatal to the sweep.
    ConnectionLost(String),
    Io(String),
    Image(String),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScanError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ScanError::StageTimeout(msg) => write!(f, "Stage timeout: {}", msg),
            ScanError::Camera(msg) => write!(f, "Camera error: {}", msg),
            ScanError::FocusUnavailable(msg) => write!(f, "Focus unavailable: {}", msg),
            ScanError::ConnectionLost(msg) => write!(f, "Hardware connection lost: {}", msg),
            ScanError::Io(msg) => write!(f, "IO error: {}", msg),
            ScanError::Image(msg) => write!(f, "Image error: {}", msg),
        }
    }
}

impl std::error::Error for ScanError {}

impl ScanError {
    /// Per-cell failures are downgraded to a skipped cell; only a lost
    /// connection (or a pre-motion config error) stops the whole sweep.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Config(_) | ScanError::ConnectionLost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::StageTimeout("move to (1.0, 2.0, 3.0)".to_string());
        assert!(err.to_string().contains("Stage timeout"));

        let err = ScanError::Config("degenerate quadrilateral".to_string());
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_fatality_classification() {
        assert!(ScanError::Config("x".into()).is_fatal());
        assert!(ScanError::ConnectionLost("x".into()).is_fatal());
        assert!(!ScanError::StageTimeout("x".into()).is_fatal());
        assert!(!ScanError::Camera("x".into()).is_fatal());
        assert!(!ScanError::FocusUnavailable("x".into()).is_fatal());
    }
}
