use std::fmt;

/// Reason a session was terminated, sent as the WebSocket close code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Client closed the connection
    Normal,
    /// Server shutting down or the connection broke
    GoingAway,
    /// Malformed or unsupported frame
    Unsupported,
    /// Authorization header present but not `Bearer <token>`
    MissingAuthorization,
    /// Token failed verification
    Unauthorized,
    /// Channel list could not be resolved
    UnableToGetChannels,
    /// No heartbeat within the timeout
    Timeout,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::Unsupported => 1003,
            Self::MissingAuthorization => 4001,
            Self::Unauthorized => 4002,
            Self::UnableToGetChannels => 4003,
            Self::Timeout => 4004,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Normal => "normal closure",
            Self::GoingAway => "going away",
            Self::Unsupported => "unsupported frame",
            Self::MissingAuthorization => "missing or invalid authorization header",
            Self::Unauthorized => "unauthorized",
            Self::UnableToGetChannels => "unable to get channels",
            Self::Timeout => "heartbeat timeout",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.reason())
    }
}
