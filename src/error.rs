//! Error types for the RTSP server library.

use std::fmt;

/// Errors that can occur in the RTSP server library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound),
///   [`SessionNotPlaying`](Self::SessionNotPlaying),
///   [`TransportNotConfigured`](Self::TransportNotConfigured),
///   [`MethodNotValidInState`](Self::MethodNotValidInState).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Stream**: [`StreamNotFound`](Self::StreamNotFound),
///   [`MediaUnavailable`](Self::MediaUnavailable).
/// - **Transport negotiation**: [`UnsupportedTransport`](Self::UnsupportedTransport).
/// - **Authentication**: [`Unauthorized`](Self::Unauthorized).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session with the given ID exists in the [`SessionManager`](crate::session::SessionManager).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// SETUP has not been completed for this session (no transport negotiated).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// Attempted to send media to a session that is not in the Playing state.
    #[error("session not in playing state: {0}")]
    SessionNotPlaying(String),

    /// Method issued while the session was in a state that doesn't permit it (RFC 2326 §A.1).
    #[error("method not valid in this state: {0}")]
    MethodNotValidInState(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Server-side port allocation exhausted the configured range.
    #[error("port range exhausted")]
    PortRangeExhausted,

    /// No stream registered at the requested path.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// DESCRIBE requested before the stream's SPS/PPS have been learned from
    /// the first IDR access unit.
    #[error("media parameters not yet available for stream: {0}")]
    MediaUnavailable(String),

    /// SETUP requested a `Transport` header this server can't satisfy.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// Missing or invalid credentials; carries the challenge to send back.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl RtspError {
    /// Maps this error to the RTSP status code a handler should respond with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Parse { kind } if kind.is_too_large() => 414,
            Self::Parse { .. } => 400,
            Self::SessionNotFound(_) => 454,
            Self::MethodNotValidInState(_) => 455,
            Self::StreamNotFound(_) => 404,
            Self::UnsupportedTransport(_) => 461,
            Self::MediaUnavailable(_) => 503,
            Self::Unauthorized(_) => 401,
            Self::TransportNotConfigured(_) | Self::SessionNotPlaying(_) => 455,
            Self::PortRangeExhausted | Self::Io(_) => 500,
            Self::NotStarted | Self::AlreadyRunning => 500,
        }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Message (headers + declared body) exceeded the 16 KiB cap before a
    /// terminator was found.
    TooLarge,
}

impl ParseErrorKind {
    fn is_too_large(&self) -> bool {
        matches!(self, Self::TooLarge)
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TooLarge => write!(f, "request exceeds maximum size"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
