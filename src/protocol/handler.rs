use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::auth::{self, AuthOutcome};
use crate::config::{AuthMode, ServerConfig};
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::{self, DescribeOutcome};
use crate::session::transport::{TransportDescriptor, TransportRequest};
use crate::session::{Session, SessionManager, SessionState, SharedWriter};
use crate::stream::{StreamRegistry, strip_track_suffix};
use crate::transport::udp;

/// Handles RTSP method requests for a single TCP connection.
///
/// One `MethodHandler` lives per connection: it owns a thread, a
/// receive buffer, and — until the first successful SETUP — a
/// connection-scoped authentication nonce and failure counter; after
/// SETUP that state moves onto the [`Session`] itself, since a
/// connection can outlive any one session.
pub struct MethodHandler {
    session_manager: SessionManager,
    streams: StreamRegistry,
    client_addr: SocketAddr,
    config: Arc<ServerConfig>,
    /// This connection's control socket, shared so the encoder pump can
    /// write interleaved RTP without racing this handler's own response
    /// writes.
    control_writer: SharedWriter,
    /// Session IDs created during this connection, for cleanup on disconnect.
    session_ids: Vec<String>,
    /// Digest nonce issued before any session exists yet.
    pending_nonce: String,
    /// Consecutive auth failures before any session exists yet.
    pending_auth_failures: u32,
    /// Set once 3 consecutive auth failures have occurred; the owning
    /// connection loop checks this after each response and disconnects.
    close_after_response: bool,
}

impl MethodHandler {
    pub fn new(
        session_manager: SessionManager,
        client_addr: SocketAddr,
        streams: StreamRegistry,
        config: Arc<ServerConfig>,
        control_writer: SharedWriter,
    ) -> Self {
        MethodHandler {
            session_manager,
            streams,
            client_addr,
            config,
            control_writer,
            session_ids: Vec::new(),
            pending_nonce: String::new(),
            pending_auth_failures: 0,
            close_after_response: false,
        }
    }

    /// Returns session IDs owned by this connection (for cleanup on disconnect).
    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    /// Whether the connection should be closed after the response just
    /// produced (3 consecutive auth failures).
    pub fn should_close(&self) -> bool {
        self.close_after_response
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let Some(cseq) = request.cseq() else {
            tracing::warn!(method = %request.method, "request missing CSeq header");
            return RtspResponse::bad_request();
        };
        let cseq = cseq.to_string();

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(&cseq),
            "DESCRIBE" => self.handle_describe(&cseq, request),
            "SETUP" => self.handle_setup(&cseq, request),
            "PLAY" => self.handle_play(&cseq, request),
            "PAUSE" => self.handle_pause(&cseq, request),
            "TEARDOWN" => self.handle_teardown(&cseq, request),
            "GET_PARAMETER" => self.handle_get_parameter(&cseq, request),
            "SET_PARAMETER" => self.handle_set_parameter(&cseq, request),
            other => {
                tracing::warn!(method = other, %cseq, "unsupported RTSP method");
                RtspResponse::new(501, "Not Implemented").add_header("CSeq", &cseq)
            }
        }
    }

    /// Check this request's `Authorization` header against the configured
    /// policy. `OPTIONS` and `TEARDOWN` are never gated. Returns the
    /// authenticated principal, or the `401` response
    /// to send back (also bumping the failure counter and, past the
    /// threshold, flagging the connection for close).
    fn authorize(
        &mut self,
        method: &str,
        uri: &str,
        request: &RtspRequest,
        session: Option<&Session>,
    ) -> Result<String, RtspResponse> {
        let cseq = request.cseq().unwrap_or("0").to_string();

        if matches!(method, "OPTIONS" | "TEARDOWN") || self.config.auth.mode == AuthMode::None {
            return Ok(String::new());
        }

        let nonce = self.ensure_nonce(session);
        let header = request.get_header("Authorization");

        match auth::check_authorization(&self.config.auth, method, uri, header, &nonce) {
            AuthOutcome::Authorized(principal) => {
                if let Some(session) = session {
                    session.auth_failures.store(0, Ordering::SeqCst);
                    *session.principal.write() = Some(principal.clone());
                } else {
                    self.pending_auth_failures = 0;
                }
                Ok(principal)
            }
            AuthOutcome::Unauthorized { challenge } => {
                let failures = if let Some(session) = session {
                    session.auth_failures.fetch_add(1, Ordering::SeqCst) + 1
                } else {
                    self.pending_auth_failures += 1;
                    self.pending_auth_failures as u64
                };

                if failures >= auth::MAX_AUTH_FAILURES as u64 {
                    tracing::warn!(
                        peer = %self.client_addr,
                        failures,
                        "closing connection after repeated auth failures"
                    );
                    self.close_after_response = true;
                }

                Err(RtspResponse::new(401, "Unauthorized")
                    .add_header("CSeq", &cseq)
                    .add_header("WWW-Authenticate", &challenge))
            }
        }
    }

    fn ensure_nonce(&mut self, session: Option<&Session>) -> String {
        if self.config.auth.mode != AuthMode::Digest {
            return String::new();
        }

        if let Some(session) = session {
            let existing = session.nonce.read().clone();
            if !existing.is_empty() {
                return existing;
            }
            let nonce = auth::generate_nonce();
            *session.nonce.write() = nonce.clone();
            nonce
        } else {
            if !self.pending_nonce.is_empty() {
                return self.pending_nonce.clone();
            }
            let nonce = auth::generate_nonce();
            self.pending_nonce = nonce.clone();
            nonce
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        // Matches the literal OPTIONS response prefix (distilled spec §8
        // scenario 1) byte-for-byte. SET_PARAMETER is still dispatchable
        // (§4.A's method set includes it) even though it isn't advertised
        // here.
        RtspResponse::ok().add_header("CSeq", cseq).add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER",
        )
    }

    fn handle_describe(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::debug!(%cseq, uri = %request.uri, "DESCRIBE");

        if let Err(resp) = self.authorize("DESCRIBE", &request.uri, request, None) {
            return resp;
        }

        let stream = match self.streams.resolve_from_uri(&request.uri) {
            Some(s) => s,
            None => {
                tracing::warn!(uri = %request.uri, "DESCRIBE for unknown stream");
                return RtspResponse::not_found().add_header("CSeq", cseq);
            }
        };

        match sdp::describe(
            &stream,
            &self.config.sdp_session_id,
            &self.config.sdp_session_version,
            &self.config.sdp_username,
        ) {
            DescribeOutcome::Ready(body) => RtspResponse::ok()
                .add_header("CSeq", cseq)
                .add_header("Content-Type", "application/sdp")
                .add_header("Content-Base", &request.uri)
                .with_body(body),
            DescribeOutcome::NotReady => {
                tracing::debug!(stream = %stream.path(), "DESCRIBE before SPS/PPS learned");
                RtspResponse::new(503, "Service Unavailable")
                    .add_header("CSeq", cseq)
                    .add_header("Retry-After", "2")
            }
        }
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let existing_session = self.extract_session_id(request).and_then(|id| self.session_manager.get_session(&id));

        if let Err(resp) = self.authorize("SETUP", &request.uri, request, existing_session.as_deref()) {
            return resp;
        }

        let stream = match self.streams.resolve_from_uri(&request.uri) {
            Some(s) => s,
            None => {
                tracing::warn!(uri = %request.uri, "SETUP for unknown stream");
                return RtspResponse::not_found().add_header("CSeq", cseq);
            }
        };

        let transport_header = match request.get_header("Transport") {
            Some(t) => t,
            None => {
                tracing::warn!(%cseq, "SETUP missing Transport header");
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
        };

        let client_transport = match TransportRequest::parse(transport_header) {
            Some(t) => t,
            None => {
                tracing::warn!(%cseq, transport_header, "SETUP invalid Transport header");
                return RtspResponse::new(461, "Unsupported Transport").add_header("CSeq", cseq);
            }
        };

        let session = match &existing_session {
            Some(session) => {
                // Second track on an already-SETUP session: only valid from Ready.
                if session.get_state() != SessionState::Ready {
                    tracing::warn!(session_id = %session.id, state = ?session.get_state(), "SETUP in wrong state");
                    return RtspResponse::new(455, "Method Not Valid In This State")
                        .add_header("CSeq", cseq);
                }
                session.clone()
            }
            None => {
                let presentation_uri = strip_track_suffix(&request.uri);
                let session = self.session_manager.create_session(presentation_uri, stream.path());
                self.session_ids.push(session.id.clone());
                session
            }
        };

        let wants_audio = track_id_from_uri(&request.uri) == Some(1) && stream.has_audio();

        let payload_type = if wants_audio {
            stream.audio_payload_type().unwrap_or(0)
        } else {
            stream.video_payload_type()
        };

        let descriptor = match client_transport {
            TransportRequest::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let (server_rtp_port, server_rtcp_port) =
                    match self.session_manager.allocate_server_ports() {
                        Ok(ports) => ports,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to allocate server ports");
                            return RtspResponse::new(500, "Internal Server Error")
                                .add_header("CSeq", cseq);
                        }
                    };

                let (rtp_socket, rtcp_socket) =
                    match udp::bind_pair(server_rtp_port, server_rtcp_port) {
                        Ok(sockets) => sockets,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to bind UDP port pair");
                            return RtspResponse::new(500, "Internal Server Error")
                                .add_header("CSeq", cseq);
                        }
                    };

                TransportDescriptor::Udp {
                    client_rtp_addr: SocketAddr::new(self.client_addr.ip(), client_rtp_port),
                    client_rtcp_addr: SocketAddr::new(self.client_addr.ip(), client_rtcp_port),
                    server_rtp_port,
                    server_rtcp_port,
                    rtp_socket,
                    rtcp_socket,
                    rtp: crate::media::rtp::RtpHeader::with_random_ssrc(payload_type),
                    rtcp: crate::media::rtcp::RtcpStats::default(),
                }
            }
            TransportRequest::TcpInterleaved {
                rtp_channel,
                rtcp_channel,
            } => {
                session.set_control_writer(self.control_writer.clone());
                TransportDescriptor::TcpInterleaved {
                    rtp_channel,
                    rtcp_channel,
                    rtp: crate::media::rtp::RtpHeader::with_random_ssrc(payload_type),
                    rtcp: crate::media::rtcp::RtcpStats::default(),
                }
            }
        };

        let ssrc = descriptor.rtp_header().ssrc;
        let transport_response = format!("{};ssrc={:08x}", descriptor.response_transport_header(), ssrc);

        if wants_audio {
            session.set_audio_transport(descriptor);
        } else {
            session.set_video_transport(descriptor);
        }

        session.set_state(SessionState::Ready);
        session.touch();
        stream.subscribe(&session.id);

        tracing::info!(
            session_id = %session.id,
            stream = %stream.path(),
            uri = %request.uri,
            audio = wants_audio,
            "session configured via SETUP"
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport_response)
            .add_header("Session", &session.session_header_value())
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session = match self.lookup_session(cseq, request) {
            Ok(session) => session,
            Err(resp) => return resp,
        };

        if let Err(resp) = self.authorize("PLAY", &request.uri, request, Some(&session)) {
            return resp;
        }

        match session.get_state() {
            SessionState::Ready | SessionState::Paused => {}
            _ => {
                tracing::warn!(session_id = %session.id, state = ?session.get_state(), "PLAY in wrong state");
                return RtspResponse::new(455, "Method Not Valid In This State")
                    .add_header("CSeq", cseq);
            }
        }

        session.set_state(SessionState::Playing);
        session.touch();
        tracing::info!(session_id = %session.id, "session started playing");

        let mut resp = RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value())
            .add_header("Range", "npt=0.000-");

        let mut rtp_info_parts = Vec::new();
        if let Some(video) = session.video_transport.read().as_ref() {
            rtp_info_parts.push(format!(
                "url={}/trackID=0;seq={};rtptime={}",
                session.uri,
                video.rtp_header().sequence(),
                video.rtp_header().timestamp()
            ));
        }
        if let Some(audio) = session.audio_transport.read().as_ref() {
            rtp_info_parts.push(format!(
                "url={}/trackID=1;seq={};rtptime={}",
                session.uri,
                audio.rtp_header().sequence(),
                audio.rtp_header().timestamp()
            ));
        }
        if !rtp_info_parts.is_empty() {
            resp = resp.add_header("RTP-Info", &rtp_info_parts.join(","));
        }

        resp
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session = match self.lookup_session(cseq, request) {
            Ok(session) => session,
            Err(resp) => return resp,
        };

        if let Err(resp) = self.authorize("PAUSE", &request.uri, request, Some(&session)) {
            return resp;
        }

        match session.get_state() {
            SessionState::Playing | SessionState::Paused => {}
            _ => {
                tracing::warn!(session_id = %session.id, state = ?session.get_state(), "PAUSE in wrong state");
                return RtspResponse::new(455, "Method Not Valid In This State")
                    .add_header("CSeq", cseq);
            }
        }

        session.set_state(SessionState::Paused);
        session.touch();
        tracing::info!(session_id = %session.id, "session paused");

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value())
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session_id = match self.extract_session_id(request) {
            Some(id) => id,
            None => {
                tracing::warn!(%cseq, "TEARDOWN missing Session header");
                return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
            }
        };

        match self.session_manager.remove_session(&session_id) {
            Some(session) => {
                session.set_state(SessionState::Closed);
                session.send_bye();
                self.streams.unsubscribe_all(&session_id);
                self.session_ids.retain(|id| id != &session_id);
                tracing::info!(session_id, "session terminated via TEARDOWN");
                RtspResponse::ok().add_header("CSeq", cseq)
            }
            None => {
                tracing::warn!(session_id, "TEARDOWN for unknown or already-closed session");
                RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq)
            }
        }
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        let session = self
            .extract_session_id(request)
            .and_then(|id| self.session_manager.get_session(&id));

        if let Err(resp) = self.authorize("GET_PARAMETER", &request.uri, request, session.as_deref()) {
            return resp;
        }

        let mut resp = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(session) = session {
            session.touch();
            resp = resp.add_header("Session", &session.session_header_value());
        }
        resp
    }

    fn handle_set_parameter(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session = self
            .extract_session_id(request)
            .and_then(|id| self.session_manager.get_session(&id));

        if let Err(resp) = self.authorize("SET_PARAMETER", &request.uri, request, session.as_deref()) {
            return resp;
        }

        let mut resp = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(session) = session {
            session.touch();
            resp = resp.add_header("Session", &session.session_header_value());
        }
        resp
    }

    fn lookup_session(&self, cseq: &str, request: &RtspRequest) -> Result<Arc<Session>, RtspResponse> {
        let session_id = self.extract_session_id(request).ok_or_else(|| {
            tracing::warn!(%cseq, "request missing Session header");
            RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq)
        })?;

        self.session_manager.get_session(&session_id).ok_or_else(|| {
            tracing::warn!(session_id = %session_id, "request for unknown session");
            RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq)
        })
    }

    /// Extract session ID from the Session header.
    /// Handles timeout suffix: "SESSIONID;timeout=60" -> "SESSIONID"
    fn extract_session_id(&self, request: &RtspRequest) -> Option<String> {
        request
            .get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
    }
}

/// Extract the numeric trackID from a SETUP URI (`.../trackID=1` -> `Some(1)`).
fn track_id_from_uri(uri: &str) -> Option<u8> {
    let pos = uri.rfind("trackID=")?;
    let rest = &uri[pos + "trackID=".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
