//! Session lifecycle state

/// Where a session is in its open/close lifecycle
///
/// ```text
/// NotConnected --open--> Connecting --ok--> ConnectedRead | ConnectedWrite
///      ^                     |                        |
///      +------ failure ------+-------- close ---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    NotConnected,
    /// `open` is running (or its future was dropped part-way)
    Connecting,
    /// Play session
    ConnectedRead,
    /// Publish session
    ConnectedWrite,
}

impl SessionMode {
    /// Mode reached by a successful open
    pub fn connected(publish_mode: bool) -> Self {
        if publish_mode {
            SessionMode::ConnectedWrite
        } else {
            SessionMode::ConnectedRead
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, SessionMode::ConnectedRead | SessionMode::ConnectedWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_modes() {
        assert_eq!(SessionMode::default(), SessionMode::NotConnected);
        assert_eq!(SessionMode::connected(true), SessionMode::ConnectedWrite);
        assert_eq!(SessionMode::connected(false), SessionMode::ConnectedRead);
        assert!(SessionMode::ConnectedRead.is_connected());
        assert!(!SessionMode::Connecting.is_connected());
        assert!(!SessionMode::NotConnected.is_connected());
    }
}
