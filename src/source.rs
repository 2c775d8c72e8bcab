//! The contract between this crate and the capture/encode pipeline it
//! does not implement.
//!
//! Everything upstream of "already-encoded access units" — camera
//! capture, H.264/AAC encoding, clock sync — is an external collaborator
//! this crate deliberately does not own. A [`FrameSource`] is the embedder's
//! bridge: the encoder-pump thread in [`crate::Server`] polls one per
//! stream and fans whatever it returns out to subscribed sessions.

/// One encoded video access unit, ready for RTP packetization.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation timestamp in nanoseconds, on whatever monotonic
    /// clock the embedder uses consistently for a given stream.
    pub pts_ns: u64,
    /// Whether this access unit is an IDR (keyframe). Used by callers
    /// that want to gate delivery on a keyframe boundary; this crate
    /// itself delivers frames as they arrive regardless.
    pub is_idr: bool,
    /// Annex-B NAL units making up this access unit, in wire order,
    /// each without a start code (`crate::media::h264::H264Packetizer`
    /// re-derives fragmentation boundaries from these directly).
    pub nalus: Vec<Vec<u8>>,
}

/// One encoded audio frame, ready for RTP packetization.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Presentation timestamp in nanoseconds, same clock as [`VideoFrame::pts_ns`].
    pub pts_ns: u64,
    /// Encoded payload: raw G.711 samples, or one AAC raw_data_block.
    pub payload: Vec<u8>,
}

/// A per-stream source of encoded frames, supplied by the embedder.
///
/// Implementations are polled from a single dedicated thread per stream
/// (`Server`'s encoder pump) and therefore never need to be `Sync`, only
/// [`Send`] to cross into that thread at construction.
pub trait FrameSource: Send {
    /// Pull the next encoded video access unit, if one is ready.
    /// `None` means "nothing new yet", not end-of-stream — the pump
    /// polls again on its next iteration.
    fn next_video_frame(&mut self) -> Option<VideoFrame>;

    /// Pull the next encoded audio frame, if the stream carries audio.
    /// Sources for video-only streams can use the default, which never
    /// produces audio.
    fn next_audio_frame(&mut self) -> Option<AudioFrame> {
        None
    }
}
