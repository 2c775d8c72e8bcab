//! Typed configuration accepted by [`Server`](crate::Server).
//!
//! This module defines plain data the embedding application populates
//! however it likes (from an INI file, environment, or hardcoded
//! defaults) — parsing any particular file format is out of scope for
//! this crate.

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port the RTSP control socket listens on.
    pub listen_port: u16,
    /// Streams published by this server, keyed internally by their `path`.
    pub streams: Vec<StreamConfig>,
    /// Authentication policy applied to every session.
    pub auth: AuthConfig,
    /// Seconds of inactivity before a session is reaped (RFC 2326 §12.37).
    pub session_timeout_secs: u64,
    /// Maximum RTP payload size before H.264 NALUs are FU-A fragmented.
    pub rtp_mtu: usize,
    /// Public host advertised in SDP `o=`/`c=` lines and published URIs.
    /// When `None`, inferred from the request URI or client address.
    pub public_host: Option<String>,
    /// Public RTSP port for published stream URIs. Defaults to `listen_port`.
    pub public_port: Option<u16>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// Maximum frames queued per session awaiting delivery before the
    /// encoder pump drops the oldest rather than blocking (backpressure).
    pub max_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: 554,
            streams: Vec::new(),
            auth: AuthConfig::default(),
            session_timeout_secs: 60,
            rtp_mtu: 1400,
            public_host: None,
            public_port: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            max_queue_depth: 64,
        }
    }
}

/// A single named stream endpoint, e.g. `/vs0` (main) or `/vs1` (sub).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// URL path this stream is keyed by, e.g. `/vs0`.
    pub path: String,
    /// Human-readable name used in the SDP `s=` line.
    pub name: String,
    /// Video codec parameters.
    pub video: VideoConfig,
    /// Optional audio track.
    pub audio: Option<AudioConfig>,
}

/// Video track parameters.
#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// RTP payload type for H.264 (dynamic range 96–127; 96 is conventional).
    pub payload_type: u8,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { payload_type: 96 }
    }
}

/// Audio codec selection and parameters.
#[derive(Debug, Clone)]
pub enum AudioCodec {
    /// G.711 companded PCM (RFC 3551 §4.5.14).
    G711 {
        /// Companding law.
        law: G711Law,
    },
    /// MPEG-4 AAC, AU-per-packet framing (RFC 3640).
    Aac {
        /// AAC profile, currently only LC (1024 samples/frame) is supported.
        frame_samples: u32,
    },
}

/// G.711 companding law.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Law {
    /// µ-law (RTP static payload type 0).
    MuLaw,
    /// A-law (RTP static payload type 8).
    ALaw,
}

/// Audio track parameters.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Codec and framing.
    pub codec: AudioCodec,
    /// Sample rate in Hz (8000 for G.711, typically 8000-48000 for AAC).
    pub sample_rate: u32,
    /// Channel count (1 = mono).
    pub channels: u8,
    /// RTP payload type. Static (0/8) for G.711; dynamic (96-127) for AAC.
    pub payload_type: u8,
}

/// Authentication policy.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Which scheme, if any, is required.
    pub mode: AuthMode,
    /// Realm advertised in the Digest challenge.
    pub realm: String,
    /// Valid credentials. Ignored when `mode == AuthMode::None`.
    pub users: Vec<User>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            realm: "RTSP Server".to_string(),
            users: Vec::new(),
        }
    }
}

/// Authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No authentication required.
    None,
    /// RFC 2617 Basic.
    Basic,
    /// RFC 2617 Digest, algorithm=MD5.
    Digest,
}

/// A single valid credential. The password store is plaintext-like for
/// legacy interop — comparisons happen in constant time.
#[derive(Debug, Clone)]
pub struct User {
    /// Login name.
    pub username: String,
    /// Plaintext password.
    pub password: String,
}
