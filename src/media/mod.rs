//! Media codecs and RTP packetization.
//!
//! This module fragments encoder output into RTP payloads. Unlike the
//! single-viewer prototype this crate grew from, RTP header state
//! (sequence number, timestamp, SSRC) is **not** owned here — it lives on
//! each session's [`TransportDescriptor`](crate::session::transport::TransportDescriptor),
//! since RFC 3550 §8.1 requires SSRC (and therefore the whole header
//! state machine) to be unique per receiver, not shared across every
//! viewer of a stream. A [`Packetizer`] only turns one encoded frame into
//! an ordered list of [`MediaFragment`]s (payload bytes + marker bit);
//! the caller prepends a fresh 12-byte header per fragment, per session,
//! using that session's own [`rtp::RtpHeader`].
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded frame is split into one or more RTP packets. Every RTP
//! packet carries a 12-byte fixed header ([`rtp::RtpHeader`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping) — for reordering and loss detection.
//! - **Timestamp** (32-bit) — media clock, 90 kHz for H.264, codec-specific for audio.
//! - **SSRC** (32-bit) — randomly chosen per session to identify the sender.
//! - **Marker bit** — set on the last packet of an access unit (frame).
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Status |
//! |-------|--------|-----|--------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | Implemented |
//! | G.711 / AAC | [`audio`] | RFC 3551 / [RFC 3640](https://tools.ietf.org/html/rfc3640) | Implemented |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | Planned |
//! | MJPEG | [`mjpeg`] | [RFC 2435](https://tools.ietf.org/html/rfc2435) | Planned |

pub mod audio;
pub mod h264;
pub mod h265;
pub mod mjpeg;
pub mod rtcp;
pub mod rtp;

/// One RTP payload produced by a [`Packetizer`], ready for a 12-byte RTP
/// header to be prepended by the (session-scoped) caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFragment {
    /// Payload bytes, not including the RTP fixed header.
    pub payload: Vec<u8>,
    /// Whether the RTP marker bit should be set on this packet (RFC 3550 §5.1;
    /// for H.264, RFC 6184 §5.1 — last packet of an access unit).
    pub marker: bool,
}

/// Codec-specific frame-to-RTP-payload fragmenter.
///
/// Each supported codec implements this trait, providing:
/// - **Fragmentation**: splitting one encoded frame into RTP-sized payloads
/// - **SDP attributes**: codec parameters for the DESCRIBE response
/// - **RTP metadata**: payload type, clock rate
///
/// ## Implementing a new codec
///
/// 1. Create a new module (e.g. `media/opus.rs`)
/// 2. Implement `Packetizer` for your type
/// 3. Wire it into [`crate::stream::Stream`] via [`crate::config::StreamConfig`]
pub trait Packetizer: Send {
    /// Fragment one encoded frame (e.g. an H.264 Annex B access unit, or one
    /// audio frame) into RTP payloads, in wire order.
    fn fragment(&mut self, encoded_data: &[u8]) -> Vec<MediaFragment>;

    /// Codec name for the SDP `a=rtpmap` attribute (e.g. `"H264"`, `"PCMU"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz (RFC 3551).
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551). Dynamic types use 96–127.
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines for this codec, `a=`-prefixed.
    fn sdp_attributes(&self) -> Vec<String>;

    /// Fixed per-packet RTP timestamp advance for frame-periodic codecs
    /// (audio). Video codecs derive their timestamp directly from the
    /// frame's presentation time instead and return 0 here (unused).
    fn timestamp_increment(&self) -> u32 {
        0
    }

    /// Whether this codec has learned enough out-of-band parameters
    /// (e.g. H.264 SPS/PPS) to describe itself in SDP. Codecs with no
    /// such dependency (audio) are always ready.
    fn media_ready(&self) -> bool {
        true
    }
}

/// Scale a presentation timestamp (nanoseconds) to an RTP timestamp at the
/// given clock rate (`ts = pts_ns * clock_rate / 1e9`).
pub fn scale_pts_to_rtp(pts_ns: u64, clock_rate: u32) -> u32 {
    ((pts_ns as u128 * clock_rate as u128) / 1_000_000_000u128) as u32
}
