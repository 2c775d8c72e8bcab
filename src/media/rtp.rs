use rand::Rng;

/// Per-session RTP fixed header state (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// One instance lives per session per media kind (owned by that session's
/// [`TransportDescriptor`](crate::session::transport::TransportDescriptor)),
/// not shared across viewers — RFC 3550 §8.1 requires SSRC to be chosen
/// independently per receiver, and sequence/timestamp state follows it.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug, Clone)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    /// Create a new RTP header state with explicit SSRC and a random
    /// initial sequence number (RFC 3550 §8.1 recommends randomizing the
    /// starting sequence, same as SSRC, to harden against off-path attacks).
    pub fn new(pt: u8, ssrc: u32) -> Self {
        let sequence = rand::rng().random::<u16>();
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            sequence,
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            sequence,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1) and random initial sequence.
    pub fn with_random_ssrc(pt: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(pt, ssrc)
    }

    /// Current sequence number (before the next [`write`](Self::write) call).
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Current timestamp.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    ///
    /// The `marker` bit (RFC 3550 §5.1) signals the last packet of a frame.
    /// For H.264, it is set on the last RTP packet of an access unit
    /// (RFC 6184 §5.1).
    pub fn write(&mut self, marker: bool) -> [u8; 12] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((marker as u8) << 7) | self.pt;

        let mut header = [0u8; 12];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Set the timestamp directly (video: derived fresh per access unit
    /// from the frame's presentation time — not a running accumulator,
    /// since PTS already encodes absolute capture time).
    pub fn set_timestamp(&mut self, ts: u32) {
        self.timestamp = ts;
    }

    /// Advance the timestamp by a fixed per-packet increment (audio:
    /// G.711/AAC frames are period-locked, so the clock free-runs by frame
    /// size rather than being derived from a PTS each time).
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(96, 0xAABBCCDD)
    }

    #[test]
    fn version_is_2() {
        let mut h = make_header();
        let buf = h.write(false);
        assert_eq!(buf[0] >> 6, 2);
    }

    #[test]
    fn marker_bit() {
        let mut h = make_header();
        let no_marker = h.write(false);
        assert_eq!(no_marker[1] & 0x80, 0);

        let with_marker = h.write(true);
        assert_eq!(with_marker[1] & 0x80, 0x80);
    }

    #[test]
    fn payload_type() {
        let mut h = make_header();
        let buf = h.write(false);
        assert_eq!(buf[1] & 0x7f, 96);
    }

    #[test]
    fn sequence_increments() {
        let mut h = make_header();
        let b1 = h.write(false);
        let seq1 = u16::from_be_bytes([b1[2], b1[3]]);
        let b2 = h.write(false);
        let seq2 = u16::from_be_bytes([b2[2], b2[3]]);
        assert_eq!(seq2, seq1.wrapping_add(1));
    }

    #[test]
    fn sequence_wraps() {
        let mut h = make_header();
        h.sequence = u16::MAX;
        let buf = h.write(false);
        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        assert_eq!(seq, u16::MAX);
        assert_eq!(h.sequence(), 0);
    }

    #[test]
    fn ssrc_written() {
        let mut h = make_header();
        let buf = h.write(false);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        assert_eq!(ssrc, 0xAABBCCDD);
    }

    #[test]
    fn set_timestamp_is_absolute() {
        let mut h = make_header();
        h.set_timestamp(90_000);
        assert_eq!(h.timestamp(), 90_000);
        h.set_timestamp(45_000);
        assert_eq!(h.timestamp(), 45_000, "set_timestamp must not accumulate");
    }

    #[test]
    fn advance_timestamp_accumulates() {
        let mut h = make_header();
        h.advance_timestamp(160);
        assert_eq!(h.timestamp(), 160);
        h.advance_timestamp(160);
        assert_eq!(h.timestamp(), 320);
    }

    #[test]
    fn random_ssrc_differs() {
        let h1 = RtpHeader::with_random_ssrc(96);
        let h2 = RtpHeader::with_random_ssrc(96);
        assert_ne!(h1.ssrc, h2.ssrc);
    }
}
