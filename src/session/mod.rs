//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! An RTSP session is a server-side state object created during SETUP and
//! destroyed by TEARDOWN, timeout, or TCP disconnect. It tracks:
//!
//! - A unique session ID (hex string, returned in the `Session` header).
//! - The playback state machine (below).
//! - One [`transport::TransportDescriptor`] per enabled media kind,
//!   negotiated during SETUP.
//! - Authentication state scoped to the connection (current Digest
//!   nonce, consecutive-failure counter).
//! - Activity timestamps for the reaper thread.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! Init -> SETUP -> Ready -> PLAY -> Playing
//!                  Ready <- PAUSE <- Playing
//!                  Ready -> PLAY -> Playing
//! Ready/Playing/Paused -> TEARDOWN -> Closed
//! Closed -> TEARDOWN -> Closed (454, idempotent)
//! ```
//!
//! `Init` exists only conceptually, before the first successful SETUP —
//! OPTIONS/DESCRIBE issued before any SETUP are connection-scoped calls
//! that never allocate a [`Session`] at all.

pub mod transport;

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::{Result, RtspError};
pub use transport::{TransportDescriptor, TransportRequest};

/// A session's TCP control socket, shared between the connection's reader
/// thread (writing RTSP responses) and, for TCP-interleaved sessions, the
/// stream's encoder-pump thread (writing `$`-framed RTP). `Mutex` around
/// the stream itself is the serialization point:
/// whichever thread holds the lock gets to write a complete frame.
pub type SharedWriter = Arc<parking_lot::Mutex<TcpStream>>;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

const SERVER_PORT_MIN: u32 = 50000;
const SERVER_PORT_MAX: u32 = 60000;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session playback state (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created by SETUP, not yet playing.
    Ready,
    /// Media is being delivered.
    Playing,
    /// Delivery suspended; resumes via PLAY.
    Paused,
    /// Torn down; the id is retained briefly so a repeated TEARDOWN can
    /// be answered `454` instead of `455` (distilled "Idempotence" law).
    Closed,
}

/// A single RTSP session (RFC 2326 §3).
pub struct Session {
    /// Unique session identifier, printable ASCII, at least 8 characters
    /// (hex of a random u64).
    pub id: String,
    /// The presentation URI this session was created for: the first SETUP
    /// request's URI with any `/trackID=<n>` (or legacy `/trackN`) suffix
    /// stripped, so per-track `RTP-Info` URLs can be built by appending
    /// `/trackID=<n>` exactly once (RFC 2326 §12.33).
    pub uri: String,
    /// Stream path this session is subscribed to.
    pub stream_path: String,
    /// Negotiated video transport, set by the video SETUP.
    pub video_transport: RwLock<Option<TransportDescriptor>>,
    /// Negotiated audio transport, set by the audio SETUP (if the stream has audio).
    pub audio_transport: RwLock<Option<TransportDescriptor>>,
    /// Current playback state.
    state: RwLock<SessionState>,
    /// Session timeout in seconds (included in the `Session` response header).
    pub timeout_secs: u64,
    /// Authenticated principal, once this connection has passed a challenge.
    pub principal: RwLock<Option<String>>,
    /// Digest nonce most recently issued on this connection.
    pub nonce: RwLock<String>,
    /// Consecutive authentication failures on this connection (distilled
    /// spec §7: 3 closes the connection).
    pub auth_failures: AtomicU64,
    /// Consecutive RTP packets dropped because the video transport was
    /// backed up (full interleaved-write queue). Reset on every
    /// successful send; once it exceeds `ServerConfig.max_queue_depth`
    /// the encoder pump tears the session down (§5 backpressure).
    pub video_drops: AtomicU32,
    /// Same as [`video_drops`](Self::video_drops) but for the audio transport.
    pub audio_drops: AtomicU32,
    /// Shared control-socket writer, set on SETUP for TCP-interleaved
    /// sessions so the encoder pump can write framed RTP without racing
    /// the connection's own response writes. `None` for UDP sessions.
    control_writer: RwLock<Option<SharedWriter>>,
    created_at: Instant,
    last_activity: RwLock<Instant>,
}

impl Session {
    /// Create a new session with a random session id, for the given URI
    /// and resolved stream path.
    pub fn new(uri: &str, stream_path: &str) -> Self {
        let id = Self::generate_id();
        let now = Instant::now();
        Session {
            id,
            uri: uri.to_string(),
            stream_path: stream_path.to_string(),
            video_transport: RwLock::new(None),
            audio_transport: RwLock::new(None),
            state: RwLock::new(SessionState::Ready),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            principal: RwLock::new(None),
            nonce: RwLock::new(String::new()),
            auth_failures: AtomicU64::new(0),
            video_drops: AtomicU32::new(0),
            audio_drops: AtomicU32::new(0),
            control_writer: RwLock::new(None),
            created_at: now,
            last_activity: RwLock::new(now),
        }
    }

    /// Attach the connection's shared control-socket writer, for
    /// TCP-interleaved transport.
    pub fn set_control_writer(&self, writer: SharedWriter) {
        *self.control_writer.write() = Some(writer);
    }

    pub fn control_writer(&self) -> Option<SharedWriter> {
        self.control_writer.read().clone()
    }

    fn generate_id() -> String {
        use rand::RngCore;
        let mut bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut bytes);
        // Fold in the monotonic counter so two sessions created in the same
        // tick of the RNG (unlikely, but a test harness might reuse a seed)
        // still can't collide.
        let counter = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        format!("{}{:04x}", hex(&bytes), counter & 0xffff)
    }

    pub fn set_video_transport(&self, transport: TransportDescriptor) {
        tracing::debug!(session_id = %self.id, "video transport configured");
        *self.video_transport.write() = Some(transport);
    }

    pub fn set_audio_transport(&self, transport: TransportDescriptor) {
        tracing::debug!(session_id = %self.id, "audio transport configured");
        *self.audio_transport.write() = Some(transport);
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, old_state = ?*self.state.read(), new_state = ?state, "state transition");
        *self.state.write() = state;
    }

    pub fn get_state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_playing(&self) -> bool {
        self.get_state() == SessionState::Playing
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }

    /// Record activity, resetting the reaper's timeout clock.
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn seconds_since_activity(&self) -> u64 {
        self.last_activity.read().elapsed().as_secs()
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_activity.read().elapsed() > Duration::from_secs(self.timeout_secs)
    }

    /// Emit an RTCP BYE on every negotiated transport (RFC 3550 §6.3.7).
    /// Best-effort — I/O failures here are logged, not propagated, since
    /// the session is already on its way out and per-session errors must
    /// never block teardown.
    pub fn send_bye(&self) {
        for transport in [self.video_transport.read(), self.audio_transport.read()] {
            let Some(transport) = transport.as_ref() else {
                continue;
            };
            let bye = crate::media::rtcp::build_bye(transport.rtp_header().ssrc);
            match transport.send_rtcp(&bye) {
                Ok(Some(framed)) => {
                    if let Some(writer) = self.control_writer() {
                        use std::io::Write;
                        if let Err(e) = writer.lock().write_all(&framed) {
                            tracing::warn!(session_id = %self.id, error = %e, "failed to write BYE frame");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id = %self.id, error = %e, "failed to send RTCP BYE");
                }
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("stream_path", &self.stream_path)
            .field("state", &self.get_state())
            .finish()
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Thread-safe registry of active sessions.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    next_server_port: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_server_port: Arc::new(AtomicU64::new(SERVER_PORT_MIN as u64)),
        }
    }

    /// Create a new session for the given URI/stream path and register it.
    pub fn create_session(&self, uri: &str, stream_path: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(uri, stream_path));
        let id = session.id.clone();
        self.sessions.write().insert(id.clone(), session.clone());

        let total = self.sessions.read().len();
        tracing::debug!(session_id = %id, uri, total_sessions = total, "session created");

        session
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session by ID (used by TEARDOWN and the reaper).
    pub fn remove_session(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            let total = self.sessions.read().len();
            tracing::debug!(session_id = %id, total_sessions = total, "session removed");
        }
        removed
    }

    pub fn remove_sessions(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write();
        let mut removed = 0;
        for id in ids {
            if sessions.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "batch session cleanup");
        }
        removed
    }

    /// Allocate a pair of (RTP, RTCP) server ports from `[50000, 60000]`.
    /// RTP ports are even; RTCP = RTP + 1 (RFC 3550 §11). Wraps back to
    /// the start of the range when
    /// exhausted, returning [`RtspError::PortRangeExhausted`] if even the
    /// wrapped allocation falls outside the range (pathological only —
    /// the range is 5000 ports wide).
    pub fn allocate_server_ports(&self) -> Result<(u16, u16)> {
        let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);

        if rtp + 1 > SERVER_PORT_MAX as u64 {
            tracing::warn!(rtp, "port range exhausted, wrapping to {SERVER_PORT_MIN}");
            self.next_server_port
                .store(SERVER_PORT_MIN as u64 + 2, Ordering::SeqCst);
            let rtp = SERVER_PORT_MIN as u64;
            if rtp + 1 > SERVER_PORT_MAX as u64 {
                return Err(RtspError::PortRangeExhausted);
            }
            return Ok((rtp as u16, rtp as u16 + 1));
        }

        tracing::trace!(
            rtp_port = rtp,
            rtcp_port = rtp + 1,
            "allocated server ports"
        );
        Ok((rtp as u16, rtp as u16 + 1))
    }

    /// Returns all sessions currently in the [`SessionState::Playing`] state.
    pub fn get_playing_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_playing())
            .cloned()
            .collect()
    }

    /// Returns all sessions subscribed to a given stream path and currently playing.
    pub fn get_playing_sessions_for_stream(&self, stream_path: &str) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_playing() && s.stream_path == stream_path)
            .cloned()
            .collect()
    }

    /// Sweep for timed-out sessions and remove them (reaper thread, 1 Hz).
    /// Returns the removed sessions so the caller
    /// can unsubscribe them from their streams.
    pub fn reap_expired(&self) -> Vec<Arc<Session>> {
        let expired_ids: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_timed_out())
            .map(|s| s.id.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in &expired_ids {
            if let Some(session) = self.remove_session(id) {
                tracing::info!(session_id = %id, "session reaped (timeout)");
                expired.push(session);
            }
        }
        expired
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// All live sessions, regardless of state (graceful shutdown, §4.H).
    pub fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let mgr = SessionManager::new();
        let s1 = mgr.create_session("rtsp://h/s", "/s");
        let s2 = mgr.create_session("rtsp://h/s", "/s");
        assert_ne!(s1.id, s2.id);
    }

    #[test]
    fn session_id_is_at_least_8_chars() {
        let session = Session::new("rtsp://h/s", "/s");
        assert!(session.id.len() >= 8);
        assert!(session.id.chars().all(|c| c.is_ascii_graphic()));
    }

    #[test]
    fn new_session_is_ready() {
        let session = Session::new("rtsp://h/s", "/s");
        assert_eq!(session.get_state(), SessionState::Ready);
        assert!(!session.is_playing());
    }

    #[test]
    fn state_transitions() {
        let session = Session::new("rtsp://h/s", "/s");
        session.set_state(SessionState::Playing);
        assert!(session.is_playing());
        session.set_state(SessionState::Paused);
        assert!(!session.is_playing());
        session.set_state(SessionState::Closed);
        assert_eq!(session.get_state(), SessionState::Closed);
    }

    #[test]
    fn session_header_includes_timeout() {
        let session = Session::new("rtsp://h/s", "/s");
        assert!(session.session_header_value().contains(";timeout=60"));
    }

    #[test]
    fn touch_resets_activity_clock() {
        let session = Session::new("rtsp://h/s", "/s");
        assert!(!session.is_timed_out());
        session.touch();
        assert!(session.seconds_since_activity() < 1);
    }

    #[test]
    fn create_get_remove_session() {
        let mgr = SessionManager::new();
        let session = mgr.create_session("rtsp://h/s", "/s");
        assert!(mgr.get_session(&session.id).is_some());
        mgr.remove_session(&session.id);
        assert!(mgr.get_session(&session.id).is_none());
    }

    #[test]
    fn allocate_server_ports_even_rtp() {
        let mgr = SessionManager::new();
        let (rtp, rtcp) = mgr.allocate_server_ports().unwrap();
        assert_eq!(rtp % 2, 0);
        assert_eq!(rtcp, rtp + 1);
        assert!((50000..=60000).contains(&rtp));
    }

    #[test]
    fn allocate_server_ports_increments() {
        let mgr = SessionManager::new();
        let (rtp1, _) = mgr.allocate_server_ports().unwrap();
        let (rtp2, _) = mgr.allocate_server_ports().unwrap();
        assert_eq!(rtp2, rtp1 + 2);
    }

    #[test]
    fn get_playing_sessions_filters_by_state() {
        let mgr = SessionManager::new();
        let s1 = mgr.create_session("rtsp://h/s", "/s");
        let s2 = mgr.create_session("rtsp://h/s", "/s");
        s1.set_state(SessionState::Playing);

        let playing = mgr.get_playing_sessions();
        assert_eq!(playing.len(), 1);
        assert_eq!(playing[0].id, s1.id);
        let _ = s2;
    }

    #[test]
    fn get_playing_sessions_for_stream_filters_by_path() {
        let mgr = SessionManager::new();
        let s1 = mgr.create_session("rtsp://h/vs0", "/vs0");
        let s2 = mgr.create_session("rtsp://h/vs1", "/vs1");
        s1.set_state(SessionState::Playing);
        s2.set_state(SessionState::Playing);

        let playing = mgr.get_playing_sessions_for_stream("/vs0");
        assert_eq!(playing.len(), 1);
        assert_eq!(playing[0].id, s1.id);
    }

    #[test]
    fn all_sessions_lists_every_session_regardless_of_state() {
        let mgr = SessionManager::new();
        let s1 = mgr.create_session("rtsp://h/s", "/s");
        let s2 = mgr.create_session("rtsp://h/s", "/s");
        s1.set_state(SessionState::Playing);

        let all = mgr.all_sessions();
        assert_eq!(all.len(), 2);
        let _ = s2;
    }

    #[test]
    fn send_bye_without_transport_is_a_no_op() {
        let session = Session::new("rtsp://h/s", "/s");
        session.send_bye();
    }
}
