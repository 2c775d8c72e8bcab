//! Named stream endpoints and the registry that resolves URIs to them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::media::{MediaFragment, Packetizer};

/// A published stream endpoint (e.g. `/vs0`, `/camera1`).
///
/// Owns the video packetizer and an optional audio packetizer, tracks
/// which sessions currently subscribe to it, and accumulates delivery
/// counters. Media readiness (e.g. H.264 SPS/PPS having been learned
/// from the first IDR) is delegated to the packetizer itself via
/// [`Packetizer::media_ready`] rather than duplicated here.
pub struct Stream {
    path: String,
    name: String,
    video: Mutex<Box<dyn Packetizer>>,
    audio: Option<Mutex<Box<dyn Packetizer>>>,
    session_ids: RwLock<Vec<String>>,
    packets_sent: AtomicU64,
    octets_sent: AtomicU64,
}

impl Stream {
    pub fn new(path: &str, name: &str, video: Box<dyn Packetizer>, audio: Option<Box<dyn Packetizer>>) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            video: Mutex::new(video),
            audio: audio.map(Mutex::new),
            session_ids: RwLock::new(Vec::new()),
            packets_sent: AtomicU64::new(0),
            octets_sent: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Fragment one encoded video access unit. Also captures in-band
    /// SPS/PPS via the packetizer (RFC 6184 §8.1), which is then
    /// reflected in [`media_ready`](Self::media_ready)/SDP.
    pub fn fragment_video(&self, data: &[u8]) -> Vec<MediaFragment> {
        self.video.lock().fragment(data)
    }

    pub fn fragment_audio(&self, data: &[u8]) -> Vec<MediaFragment> {
        match &self.audio {
            Some(audio) => audio.lock().fragment(data),
            None => Vec::new(),
        }
    }

    pub fn video_payload_type(&self) -> u8 {
        self.video.lock().payload_type()
    }

    pub fn audio_payload_type(&self) -> Option<u8> {
        self.audio.as_ref().map(|a| a.lock().payload_type())
    }

    pub fn video_clock_rate(&self) -> u32 {
        self.video.lock().clock_rate()
    }

    pub fn audio_clock_rate(&self) -> Option<u32> {
        self.audio.as_ref().map(|a| a.lock().clock_rate())
    }

    pub fn video_timestamp_increment(&self) -> u32 {
        self.video.lock().timestamp_increment()
    }

    pub fn audio_timestamp_increment(&self) -> Option<u32> {
        self.audio.as_ref().map(|a| a.lock().timestamp_increment())
    }

    pub fn video_sdp_attributes(&self) -> Vec<String> {
        self.video.lock().sdp_attributes()
    }

    pub fn audio_sdp_attributes(&self) -> Option<Vec<String>> {
        self.audio.as_ref().map(|a| a.lock().sdp_attributes())
    }

    /// Whether the video track has learned the out-of-band parameters it
    /// needs to describe itself. DESCRIBE returns `503` until this is true.
    pub fn media_ready(&self) -> bool {
        self.video.lock().media_ready()
    }

    pub fn record_delivery(&self, payload_len: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.octets_sent
            .fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn octets_sent(&self) -> u64 {
        self.octets_sent.load(Ordering::Relaxed)
    }

    /// Subscribe a session to this stream (called on successful SETUP).
    pub fn subscribe(&self, session_id: &str) {
        let mut ids = self.session_ids.write();
        if !ids.iter().any(|id| id == session_id) {
            ids.push(session_id.to_string());
            tracing::debug!(stream = %self.path, session_id, "session subscribed");
        }
    }

    /// Unsubscribe a session from this stream (TEARDOWN or disconnect).
    pub fn unsubscribe(&self, session_id: &str) {
        let mut ids = self.session_ids.write();
        if let Some(pos) = ids.iter().position(|id| id == session_id) {
            ids.swap_remove(pos);
            tracing::debug!(stream = %self.path, session_id, "session unsubscribed");
        }
    }

    pub fn subscribed_session_ids(&self) -> Vec<String> {
        self.session_ids.read().clone()
    }
}

/// Registry of named stream endpoints, keyed by path.
///
/// Unlike the single-viewer prototype this crate grew from, there is no
/// "default stream" fallback: an unknown path is a `404`, since
/// multiple named streams keyed by real paths are the normal
/// configuration, not a single default.
#[derive(Clone)]
pub struct StreamRegistry {
    streams: Arc<RwLock<HashMap<String, Arc<Stream>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new stream. Replaces any existing stream at the same path.
    pub fn add(&self, stream: Stream) -> Arc<Stream> {
        let path = stream.path().to_string();
        let stream = Arc::new(stream);
        self.streams.write().insert(path.clone(), stream.clone());
        tracing::info!(path = %path, "stream registered");
        stream
    }

    /// Look up a stream by exact path.
    pub fn get(&self, path: &str) -> Option<Arc<Stream>> {
        self.streams.read().get(path).cloned()
    }

    /// Resolve a stream from an RTSP URI, stripping any trackID suffix.
    pub fn resolve_from_uri(&self, uri: &str) -> Option<Arc<Stream>> {
        self.get(extract_stream_path(uri))
    }

    /// Unsubscribe a session from every stream (disconnect cleanup).
    pub fn unsubscribe_all(&self, session_id: &str) {
        let streams = self.streams.read();
        for stream in streams.values() {
            stream.unsubscribe(session_id);
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.streams.read().keys().cloned().collect()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the stream path from an RTSP URI, stripping a trailing
/// `/trackID=<n>` or `/trackN` suffix.
///
/// `rtsp://host:8554/vs0/trackID=0` -> `/vs0`
/// `rtsp://host:8554/vs0`           -> `/vs0`
/// `rtsp://host:8554/`              -> `/`
/// `*`                               -> `` (no path; resolves to nothing)
pub fn extract_stream_path(uri: &str) -> &str {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        }
    } else if uri.starts_with('/') {
        uri
    } else {
        ""
    };

    if let Some(pos) = path.rfind("/trackID=") {
        &path[..pos]
    } else if let Some(pos) = path.rfind("/track") {
        &path[..pos]
    } else {
        path
    }
}

/// Strip a trailing `/trackID=<n>` or `/trackN` suffix from a full RTSP
/// URI, keeping its scheme and host intact (unlike [`extract_stream_path`],
/// which discards everything but the path).
///
/// `rtsp://host:8554/vs0/trackID=0` -> `rtsp://host:8554/vs0`
/// `rtsp://host:8554/vs0`           -> `rtsp://host:8554/vs0`
pub fn strip_track_suffix(uri: &str) -> &str {
    if let Some(pos) = uri.rfind("/trackID=") {
        &uri[..pos]
    } else if let Some(pos) = uri.rfind("/track") {
        &uri[..pos]
    } else {
        uri
    }
}
