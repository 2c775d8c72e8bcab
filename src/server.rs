//! Top-level server: owns the stream registry and session manager, and
//! drives the long-running activities described in the crate's module
//! documentation (accept loop, encoder pumps, reaper).

use std::collections::HashMap;
use std::io::Write;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::config::{AudioCodec, AudioConfig, ServerConfig, VideoConfig};
use crate::error::{Result, RtspError};
use crate::media::audio::{AacPacketizer, G711Packetizer};
use crate::media::h264::H264Packetizer;
use crate::media::{Packetizer, rtcp, scale_pts_to_rtp};
use crate::session::transport::TransportDescriptor;
use crate::session::{Session, SessionManager};
use crate::source::FrameSource;
use crate::stream::{Stream, StreamRegistry};
use crate::transport::tcp;

fn build_video_packetizer(video: &VideoConfig, mtu: usize) -> Box<dyn Packetizer> {
    Box::new(H264Packetizer::with_mtu(video.payload_type, mtu))
}

fn build_audio_packetizer(audio: &AudioConfig) -> Box<dyn Packetizer> {
    match &audio.codec {
        AudioCodec::G711 { law } => Box::new(G711Packetizer::new(audio.payload_type, *law)),
        AudioCodec::Aac { frame_samples } => Box::new(AacPacketizer::new(
            audio.payload_type,
            audio.sample_rate,
            audio.channels,
            *frame_samples,
        )),
    }
}

/// A published stream's externally reachable address (RFC 2326 §C.1.1
/// session description considerations).
#[derive(Debug, Clone)]
pub struct StreamUri {
    /// Full `rtsp://host:port/path` a client should connect to.
    pub uri: String,
    /// Recommended session timeout a client should plan around.
    pub timeout_secs: u64,
    /// Whether the URI becomes invalid once the issuing connection closes.
    pub invalid_after_connect: bool,
    /// Whether the URI becomes invalid across a server restart.
    pub invalid_after_reboot: bool,
}

/// A currently-playing session, for diagnostics/admin surfaces.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub uri: String,
    pub stream_path: String,
}

/// An RTSP server bound to a single TCP port, publishing zero or more
/// named streams.
///
/// `Server` owns no media itself — frames are pulled from the
/// [`FrameSource`] supplied per stream at [`start`](Self::start) through
/// a dedicated encoder-pump thread, packetized, and pushed out to every
/// session currently playing that stream.
pub struct Server {
    session_manager: SessionManager,
    streams: StreamRegistry,
    running: Arc<AtomicBool>,
    config: Arc<ServerConfig>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Server {
    /// Build a server from its configuration, instantiating a packetizer
    /// pair for every configured stream. No sockets are opened and no
    /// threads are spawned until [`start`](Self::start).
    pub fn new(config: ServerConfig) -> Self {
        let streams = StreamRegistry::new();
        for stream_config in &config.streams {
            let video = build_video_packetizer(&stream_config.video, config.rtp_mtu);
            let audio = stream_config.audio.as_ref().map(build_audio_packetizer);
            streams.add(Stream::new(
                &stream_config.path,
                &stream_config.name,
                video,
                audio,
            ));
        }

        Server {
            session_manager: SessionManager::new(),
            streams,
            running: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
            threads: Vec::new(),
        }
    }

    /// Bind the listening socket and spawn the accept loop, reaper, and
    /// one encoder-pump thread per stream that has a [`FrameSource`]
    /// registered for it. Streams with no entry in `frame_sources` are
    /// still resolvable for DESCRIBE/SETUP but never reach `media_ready`.
    pub fn start(&mut self, mut frame_sources: HashMap<String, Box<dyn FrameSource>>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let bind_addr = format!("0.0.0.0:{}", self.config.listen_port);
        let listener = TcpListener::bind(&bind_addr)?;
        listener.set_nonblocking(true)?;

        tracing::info!(addr = %bind_addr, "RTSP server listening");

        let accept_running = self.running.clone();
        let accept_sessions = self.session_manager.clone();
        let accept_streams = self.streams.clone();
        let accept_config = self.config.clone();
        self.threads.push(thread::spawn(move || {
            tcp::accept_loop(listener, accept_sessions, accept_streams, accept_config, accept_running);
        }));

        let reaper_running = self.running.clone();
        let reaper_sessions = self.session_manager.clone();
        let reaper_streams = self.streams.clone();
        self.threads.push(thread::spawn(move || {
            run_reaper(reaper_sessions, reaper_streams, reaper_running);
        }));

        for path in self.streams.paths() {
            let Some(source) = frame_sources.remove(&path) else {
                tracing::debug!(path = %path, "no frame source registered, pump not started");
                continue;
            };
            let Some(stream) = self.streams.get(&path) else {
                continue;
            };
            let pump_running = self.running.clone();
            let pump_sessions = self.session_manager.clone();
            let max_queue_depth = self.config.max_queue_depth;
            self.threads.push(thread::spawn(move || {
                run_encoder_pump(stream, source, pump_sessions, pump_running, max_queue_depth);
            }));
        }

        Ok(())
    }

    /// Signal every long-running thread to exit, send an RTCP BYE to
    /// every live session, and join everything before returning.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        for session in self.session_manager.all_sessions() {
            session.send_bye();
        }

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }

        tracing::info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The externally reachable URI for a registered stream path, or
    /// `None` if no such stream was configured.
    pub fn stream_uri(&self, path: &str) -> Option<StreamUri> {
        self.streams.get(path)?;
        let host = self.config.public_host.as_deref().unwrap_or("0.0.0.0");
        let port = self.config.public_port.unwrap_or(self.config.listen_port);
        Some(StreamUri {
            uri: format!("rtsp://{host}:{port}{path}"),
            timeout_secs: self.config.session_timeout_secs,
            invalid_after_connect: false,
            invalid_after_reboot: false,
        })
    }

    /// All sessions currently in the Playing state, across every stream.
    pub fn get_viewers(&self) -> Vec<Viewer> {
        self.session_manager
            .get_playing_sessions()
            .into_iter()
            .map(|session| Viewer {
                session_id: session.id.clone(),
                uri: session.uri.clone(),
                stream_path: session.stream_path.clone(),
            })
            .collect()
    }
}

/// 1 Hz sweep that evicts timed-out sessions (RFC 2326 §12.37) and sends
/// them a best-effort BYE before dropping their transports.
fn run_reaper(session_manager: SessionManager, streams: StreamRegistry, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));
        for session in session_manager.reap_expired() {
            streams.unsubscribe_all(&session.id);
            tracing::info!(session_id = %session.id, "session reaped after timeout");
            session.send_bye();
        }
    }
    tracing::debug!("reaper exited");
}

/// Pull frames from a [`FrameSource`] for one stream, packetize, and
/// deliver to every session currently playing it. Runs on its own
/// thread for the lifetime of the stream — there is no shared state
/// with other streams' pumps beyond the session manager.
fn run_encoder_pump(
    stream: Arc<Stream>,
    mut source: Box<dyn FrameSource>,
    session_manager: SessionManager,
    running: Arc<AtomicBool>,
    max_queue_depth: usize,
) {
    while running.load(Ordering::SeqCst) {
        let mut did_work = false;

        if let Some(frame) = source.next_video_frame() {
            did_work = true;
            deliver_video_frame(&stream, frame.pts_ns, &frame.nalus, &session_manager, max_queue_depth);
        }

        if let Some(frame) = source.next_audio_frame() {
            did_work = true;
            deliver_audio_frame(&stream, &frame.payload, &session_manager, max_queue_depth);
        }

        send_due_sender_reports(&stream, &session_manager);

        if !did_work {
            thread::sleep(Duration::from_millis(5));
        }
    }
    tracing::debug!(path = %stream.path(), "encoder pump exited");
}

fn deliver_video_frame(
    stream: &Stream,
    pts_ns: u64,
    nalus: &[Vec<u8>],
    session_manager: &SessionManager,
    max_queue_depth: usize,
) {
    let mut annex_b = Vec::new();
    for nalu in nalus {
        annex_b.extend_from_slice(&[0, 0, 0, 1]);
        annex_b.extend_from_slice(nalu);
    }

    let fragments = stream.fragment_video(&annex_b);
    if fragments.is_empty() {
        return;
    }

    let rtp_ts = scale_pts_to_rtp(pts_ns, stream.video_clock_rate());
    let mut stale = Vec::new();

    for session in session_manager.get_playing_sessions_for_stream(stream.path()) {
        let mut guard = session.video_transport.write();
        let Some(transport) = guard.as_mut() else {
            continue;
        };
        transport.rtp_header_mut().set_timestamp(rtp_ts);

        let mut failed = false;
        for fragment in &fragments {
            let header = transport.rtp_header_mut().write(fragment.marker);
            let mut packet = Vec::with_capacity(12 + fragment.payload.len());
            packet.extend_from_slice(&header);
            packet.extend_from_slice(&fragment.payload);

            match send_rtp_packet(&session, transport, &packet) {
                SendOutcome::Sent => {
                    session.video_drops.store(0, Ordering::Relaxed);
                    transport.rtcp_stats_mut().record(fragment.payload.len());
                    stream.record_delivery(fragment.payload.len());
                }
                SendOutcome::Dropped => {
                    let drops = session.video_drops.fetch_add(1, Ordering::Relaxed) + 1;
                    if drops as usize >= max_queue_depth {
                        tracing::warn!(
                            session_id = %session.id,
                            drops,
                            max_queue_depth,
                            "video transport backlog exceeded max_queue_depth"
                        );
                        failed = true;
                        break;
                    }
                }
                SendOutcome::Failed => {
                    failed = true;
                    break;
                }
            }
        }
        drop(guard);

        if failed {
            stale.push(session.id.clone());
        }
    }

    for id in stale {
        tear_down_stale_session(stream, session_manager, &id);
    }
}

fn deliver_audio_frame(
    stream: &Stream,
    payload: &[u8],
    session_manager: &SessionManager,
    max_queue_depth: usize,
) {
    let fragments = stream.fragment_audio(payload);
    if fragments.is_empty() {
        return;
    }

    let increment = stream.audio_timestamp_increment().unwrap_or(0);
    let mut stale = Vec::new();

    for session in session_manager.get_playing_sessions_for_stream(stream.path()) {
        let mut guard = session.audio_transport.write();
        let Some(transport) = guard.as_mut() else {
            continue;
        };

        let mut failed = false;
        for fragment in &fragments {
            let header = transport.rtp_header_mut().write(fragment.marker);
            let mut packet = Vec::with_capacity(12 + fragment.payload.len());
            packet.extend_from_slice(&header);
            packet.extend_from_slice(&fragment.payload);

            match send_rtp_packet(&session, transport, &packet) {
                SendOutcome::Sent => {
                    session.audio_drops.store(0, Ordering::Relaxed);
                    transport.rtcp_stats_mut().record(fragment.payload.len());
                    stream.record_delivery(fragment.payload.len());
                    transport.rtp_header_mut().advance_timestamp(increment);
                }
                SendOutcome::Dropped => {
                    let drops = session.audio_drops.fetch_add(1, Ordering::Relaxed) + 1;
                    if drops as usize >= max_queue_depth {
                        tracing::warn!(
                            session_id = %session.id,
                            drops,
                            max_queue_depth,
                            "audio transport backlog exceeded max_queue_depth"
                        );
                        failed = true;
                        break;
                    }
                    transport.rtp_header_mut().advance_timestamp(increment);
                }
                SendOutcome::Failed => {
                    failed = true;
                    break;
                }
            }
        }
        drop(guard);

        if failed {
            stale.push(session.id.clone());
        }
    }

    for id in stale {
        tear_down_stale_session(stream, session_manager, &id);
    }
}

/// Outcome of attempting to send one RTP packet to a session.
enum SendOutcome {
    /// Delivered (UDP `sendto` succeeded, or the interleaved writer
    /// accepted the frame).
    Sent,
    /// The session's transport is momentarily backed up (interleaved
    /// writer busy, or UDP socket send buffer full); the packet was not
    /// sent but the session is not necessarily dead yet — see
    /// `max_queue_depth` at the call site.
    Dropped,
    /// The session's control connection is gone or a write/send failed
    /// outright; the caller should tear the session down.
    Failed,
}

/// Send one RTP packet over whichever transport the session negotiated.
///
/// A momentarily busy interleaved-TCP writer, or a UDP socket whose send
/// buffer is full (both sockets are non-blocking — see
/// `transport::udp::bind_pair`), is not immediately fatal: the caller
/// tracks consecutive drops per session and only tears down once they
/// exceed `ServerConfig.max_queue_depth` (distilled spec §5: "backpressure
/// does not stall other sessions").
fn send_rtp_packet(session: &Session, transport: &TransportDescriptor, packet: &[u8]) -> SendOutcome {
    match transport.send_rtp(packet) {
        Ok(None) => SendOutcome::Sent,
        Ok(Some(framed)) => {
            let Some(writer) = session.control_writer() else {
                return SendOutcome::Failed;
            };
            match writer.try_lock() {
                Some(mut guard) => match guard.write_all(&framed) {
                    Ok(()) => SendOutcome::Sent,
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, error = %e, "interleaved RTP write failed");
                        SendOutcome::Failed
                    }
                },
                None => {
                    tracing::trace!(session_id = %session.id, "dropped RTP packet: control socket busy");
                    SendOutcome::Dropped
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            tracing::trace!(session_id = %session.id, "dropped RTP packet: UDP socket send buffer full");
            SendOutcome::Dropped
        }
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "RTP send failed");
            SendOutcome::Failed
        }
    }
}

fn tear_down_stale_session(stream: &Stream, session_manager: &SessionManager, session_id: &str) {
    stream.unsubscribe(session_id);
    if let Some(session) = session_manager.remove_session(session_id) {
        tracing::warn!(session_id = %session_id, "session torn down after delivery failure");
        session.send_bye();
    }
}

fn send_due_sender_reports(stream: &Stream, session_manager: &SessionManager) {
    let now = Instant::now();
    let (unix_secs, unix_nanos) = unix_now();

    for session in session_manager.get_playing_sessions_for_stream(stream.path()) {
        send_sr_for_transport(&session, &session.video_transport, now, unix_secs, unix_nanos);
        send_sr_for_transport(&session, &session.audio_transport, now, unix_secs, unix_nanos);
    }
}

fn send_sr_for_transport(
    session: &Session,
    transport_lock: &RwLock<Option<TransportDescriptor>>,
    now: Instant,
    unix_secs: u64,
    unix_nanos: u32,
) {
    let framed = {
        let mut guard = transport_lock.write();
        let Some(transport) = guard.as_mut() else {
            return;
        };
        let stats = transport.rtcp_stats();
        if !stats.due_for_sr(now) {
            return;
        }

        let ssrc = transport.rtp_header().ssrc;
        let rtp_ts = transport.rtp_header().timestamp();
        let cname = format!("{}@rtsp-rs", session.id);
        let report = rtcp::build_sender_report(ssrc, unix_secs, unix_nanos, rtp_ts, stats, &cname);
        transport.rtcp_stats_mut().mark_sr_sent(now, unix_secs, unix_nanos);

        match transport.send_rtcp(&report) {
            Ok(framed) => framed,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "RTCP SR send failed");
                None
            }
        }
    };

    if let Some(framed) = framed {
        if let Some(writer) = session.control_writer() {
            if let Err(e) = writer.lock().write_all(&framed) {
                tracing::warn!(session_id = %session.id, error = %e, "failed to write RTCP SR frame");
            }
        }
    }
}

fn unix_now() -> (u64, u32) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs(), now.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtcp::RtcpStats;
    use crate::media::rtp::RtpHeader;
    use std::net::{TcpListener, TcpStream};

    fn tcp_interleaved_session() -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();

        let session = Session::new("rtsp://h/stream", "/stream");
        session.set_control_writer(Arc::new(parking_lot::Mutex::new(server_side)));
        *session.video_transport.write() = Some(TransportDescriptor::TcpInterleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
            rtp: RtpHeader::with_random_ssrc(96),
            rtcp: RtcpStats::default(),
        });
        (session, client)
    }

    #[test]
    fn send_rtp_packet_succeeds_when_writer_is_free() {
        let (session, _client) = tcp_interleaved_session();
        let mut guard = session.video_transport.write();
        let transport = guard.as_mut().unwrap();
        assert!(matches!(
            send_rtp_packet(&session, transport, b"abc"),
            SendOutcome::Sent
        ));
    }

    #[test]
    fn send_rtp_packet_drops_when_control_writer_is_busy() {
        let (session, _client) = tcp_interleaved_session();
        let writer = session.control_writer().unwrap();
        let _held = writer.lock();

        let mut guard = session.video_transport.write();
        let transport = guard.as_mut().unwrap();
        assert!(matches!(
            send_rtp_packet(&session, transport, b"abc"),
            SendOutcome::Dropped
        ));
    }

    #[test]
    fn send_rtp_packet_fails_with_no_control_writer() {
        let session = Session::new("rtsp://h/stream", "/stream");
        *session.video_transport.write() = Some(TransportDescriptor::TcpInterleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
            rtp: RtpHeader::with_random_ssrc(96),
            rtcp: RtcpStats::default(),
        });

        let mut guard = session.video_transport.write();
        let transport = guard.as_mut().unwrap();
        assert!(matches!(
            send_rtp_packet(&session, transport, b"abc"),
            SendOutcome::Failed
        ));
    }

    #[test]
    fn video_drops_counter_accumulates_then_resets_on_next_successful_delivery() {
        let registry = StreamRegistry::new();
        let video_pkt = build_video_packetizer(&VideoConfig::default(), 1400);
        let stream = registry.add(Stream::new("/stream", "Test", video_pkt, None));

        let session_manager = SessionManager::new();
        let session = session_manager.create_session("rtsp://h/stream", "/stream");
        session.set_state(crate::session::SessionState::Playing);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        let writer: crate::session::SharedWriter = Arc::new(parking_lot::Mutex::new(server_side));
        session.set_control_writer(writer.clone());
        *session.video_transport.write() = Some(TransportDescriptor::TcpInterleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
            rtp: RtpHeader::with_random_ssrc(96),
            rtcp: RtcpStats::default(),
        });

        let nalus = vec![
            vec![0x67, 0x42, 0x00, 0x1e],
            vec![0x68, 0xce, 0x38, 0x80],
            vec![0x65, 0x88, 0x00],
        ];

        // A generous max_queue_depth so the drops below never trip teardown.
        {
            let _held = writer.lock();
            deliver_video_frame(&stream, 0, &nalus, &session_manager, 1000);
        }
        let drops_while_busy = session.video_drops.load(Ordering::Relaxed);
        assert!(
            drops_while_busy > 0,
            "expected at least one dropped fragment while the writer was held"
        );

        deliver_video_frame(&stream, 1, &nalus, &session_manager, 1000);
        assert_eq!(
            session.video_drops.load(Ordering::Relaxed),
            0,
            "a successful delivery should reset the drop counter"
        );
    }

    #[test]
    fn deliver_video_frame_tears_down_session_on_dead_control_socket() {
        let registry = StreamRegistry::new();
        let video_pkt = build_video_packetizer(&VideoConfig::default(), 1400);
        let stream = registry.add(Stream::new("/stream", "Test", video_pkt, None));

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        // Shut the local send side down so the write below fails
        // deterministically, rather than depending on how quickly the
        // peer's close is observed over the loopback socket.
        server_side.shutdown(std::net::Shutdown::Both).unwrap();
        drop(client);

        let session_manager = SessionManager::new();
        let session = session_manager.create_session("rtsp://h/stream", "/stream");
        let session_id = session.id.clone();
        session.set_state(crate::session::SessionState::Playing);
        session.set_control_writer(Arc::new(parking_lot::Mutex::new(server_side)));
        *session.video_transport.write() = Some(TransportDescriptor::TcpInterleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
            rtp: RtpHeader::with_random_ssrc(96),
            rtcp: RtcpStats::default(),
        });

        let nalus = vec![
            vec![0x67, 0x42, 0x00, 0x1e],
            vec![0x68, 0xce, 0x38, 0x80],
            vec![0x65, 0x88, 0x00],
        ];
        deliver_video_frame(&stream, 0, &nalus, &session_manager, 64);

        assert!(
            session_manager.get_session(&session_id).is_none(),
            "session should have been torn down after a hard transport failure"
        );
    }
}
