use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::protocol::MethodHandler;
use crate::protocol::request::{ParseOutcome, parse_buffered};
use crate::protocol::response::RtspResponse;
use crate::session::SessionManager;
use crate::stream::StreamRegistry;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    session_manager: SessionManager,
    streams: StreamRegistry,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let sm = session_manager.clone();
                let r = running.clone();
                let s = streams.clone();
                let c = config.clone();
                thread::spawn(move || {
                    Connection::handle(stream, sm, s, c, r);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    stream: TcpStream,
    writer: crate::session::SharedWriter,
    handler: MethodHandler,
    peer_addr: SocketAddr,
    buf: Vec<u8>,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    pub fn handle(
        stream: TcpStream,
        session_manager: SessionManager,
        streams: StreamRegistry,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        let read_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };

        let writer: crate::session::SharedWriter = Arc::new(Mutex::new(stream));

        let handler = MethodHandler::new(
            session_manager.clone(),
            peer_addr,
            streams.clone(),
            config,
            writer.clone(),
        );

        let mut conn = Connection {
            stream: read_stream,
            writer,
            handler,
            peer_addr,
            buf: Vec::with_capacity(4096),
        };

        let reason = conn.run(&running);
        conn.cleanup(&session_manager, &streams);

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    ///
    /// Reads into a growing buffer and repeatedly tries
    /// [`parse_buffered`], which models RTSP's incremental-parse contract:
    /// a request only becomes `Complete` once its full header block, and
    /// any declared body, have arrived. A leading `$` byte marks an
    /// interleaved RTP/RTCP frame sent back by a pathological client;
    /// those are discarded outright (incoming RTCP is never parsed).
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        let mut read_buf = [0u8; 4096];

        while running.load(Ordering::SeqCst) {
            if self.handler.should_close() {
                return "auth failure threshold reached";
            }

            match self.drain_buffer() {
                DrainOutcome::Continue => continue,
                DrainOutcome::NeedMore => {}
                DrainOutcome::Close(reason) => return reason,
            }

            match self.stream.read(&mut read_buf) {
                Ok(0) => return "connection closed by client",
                Ok(n) => self.buf.extend_from_slice(&read_buf[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => return "read error",
            }
        }

        "server shutting down"
    }

    fn drain_buffer(&mut self) -> DrainOutcome {
        loop {
            if self.buf.first() == Some(&b'$') {
                if self.buf.len() < 4 {
                    return DrainOutcome::NeedMore;
                }
                let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
                if self.buf.len() < 4 + len {
                    return DrainOutcome::NeedMore;
                }
                self.buf.drain(0..4 + len);
                continue;
            }

            match parse_buffered(&self.buf) {
                ParseOutcome::NeedMore => return DrainOutcome::NeedMore,
                ParseOutcome::Complete(request, consumed) => {
                    self.buf.drain(0..consumed);

                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = %request.method,
                        uri = %request.uri,
                        "request"
                    );

                    let response = self.handler.handle(&request);

                    tracing::debug!(
                        peer = %self.peer_addr,
                        status = response.status_code,
                        "response"
                    );

                    let bytes = response.serialize();
                    if self.writer.lock().write_all(bytes.as_bytes()).is_err() {
                        return DrainOutcome::Close("write error");
                    }

                    if self.handler.should_close() {
                        return DrainOutcome::Close("auth failure threshold reached");
                    }

                    return DrainOutcome::Continue;
                }
                ParseOutcome::Malformed(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    self.buf.clear();

                    let status_code = e.status_code();
                    let status_text = if status_code == 414 {
                        "Request-URI Too Large"
                    } else {
                        "Bad Request"
                    };
                    let bytes = RtspResponse::new(status_code, status_text).serialize();
                    if self.writer.lock().write_all(bytes.as_bytes()).is_err() {
                        return DrainOutcome::Close("write error");
                    }

                    return DrainOutcome::Continue;
                }
            }
        }
    }

    /// Clean up sessions owned by this connection and unsubscribe from streams.
    fn cleanup(&self, session_manager: &SessionManager, streams: &StreamRegistry) {
        let orphaned = self.handler.session_ids().to_vec();
        if !orphaned.is_empty() {
            for id in &orphaned {
                streams.unsubscribe_all(id);
            }
            let removed = session_manager.remove_sessions(&orphaned);
            tracing::info!(peer = %self.peer_addr, removed, "cleaned up sessions on disconnect");
        }
    }
}

enum DrainOutcome {
    /// A response was just written (or a malformed request discarded);
    /// the caller should try draining again before blocking on a read.
    Continue,
    /// The buffer holds an incomplete request; block on the next read.
    NeedMore,
    /// The connection should be torn down.
    Close(&'static str),
}
