//! RTCP Sender Reports, SDES, and BYE (RFC 3550 §6.4, §6.5, §6.6).
//!
//! The server only ever sends; it never needs to parse incoming RTCP
//! (Receiver Reports from viewers are ignored — out of scope). Each
//! session emits a compound SR+SDES packet on the
//! interval its transport dictates, and a BYE on TEARDOWN.

use std::time::{Duration, Instant};

/// Target interval between Sender Reports (one SR every `[4, 6]`
/// seconds while playing).
pub const SR_INTERVAL: Duration = Duration::from_secs(5);

/// Running counters a session accumulates per media stream, reported in
/// the next Sender Report (RFC 3550 §6.4.1).
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcpStats {
    pub packet_count: u32,
    pub octet_count: u32,
    /// When the last Sender Report was sent on this transport, if ever.
    last_sr_at: Option<Instant>,
    /// Wall-clock/RTP-clock pair captured the first time this transport
    /// sent a Sender Report, anchoring its RTP clock to wall time.
    ntp_anchor: Option<(u64, u32)>,
}

impl RtcpStats {
    pub fn record(&mut self, payload_len: usize) {
        self.packet_count = self.packet_count.wrapping_add(1);
        self.octet_count = self.octet_count.wrapping_add(payload_len as u32);
    }

    /// Whether it's time for another Sender Report. True immediately
    /// before the first one is sent.
    pub fn due_for_sr(&self, now: Instant) -> bool {
        match self.last_sr_at {
            Some(last) => now.duration_since(last) >= SR_INTERVAL,
            None => true,
        }
    }

    /// Record that a Sender Report was just sent, anchoring the NTP clock
    /// on the first call (write-once, matching the lock discipline
    /// applied elsewhere to shared per-transport state).
    pub fn mark_sr_sent(&mut self, now: Instant, unix_secs: u64, unix_nanos: u32) {
        self.last_sr_at = Some(now);
        if self.ntp_anchor.is_none() {
            self.ntp_anchor = Some((unix_secs, unix_nanos));
        }
    }
}

/// Convert a Unix epoch time (seconds, fractional seconds) into the 64-bit
/// NTP timestamp format RFC 3550 §4 requires for Sender Reports.
fn to_ntp_timestamp(unix_secs: u64, unix_nanos: u32) -> (u32, u32) {
    // NTP epoch is 1900-01-01; Unix epoch is 1970-01-01; the difference is
    // 70 years = 2,208,988,800 seconds.
    const NTP_UNIX_OFFSET: u64 = 2_208_988_800;
    let seconds = (unix_secs + NTP_UNIX_OFFSET) as u32;
    let fraction = ((unix_nanos as u64) << 32) / 1_000_000_000;
    (seconds, fraction as u32)
}

/// Build a compound RTCP packet: Sender Report (RFC 3550 §6.4.1) followed
/// by an SDES packet (RFC 3550 §6.5) carrying a single CNAME item.
///
/// `unix_secs`/`unix_nanos` is wall-clock time at the moment of sending
/// (for the NTP timestamp field); `rtp_timestamp` is the RTP-clock
/// timestamp corresponding to that same instant.
pub fn build_sender_report(
    ssrc: u32,
    unix_secs: u64,
    unix_nanos: u32,
    rtp_timestamp: u32,
    stats: RtcpStats,
    cname: &str,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(28 + 8 + cname.len());

    // --- Sender Report ---
    let (ntp_sec, ntp_frac) = to_ntp_timestamp(unix_secs, unix_nanos);
    let sr_length_words: u16 = 6; // (28 bytes / 4) - 1
    out.push((2 << 6) | 0); // V=2, P=0, RC=0
    out.push(200); // PT=200 (SR)
    out.extend_from_slice(&sr_length_words.to_be_bytes());
    out.extend_from_slice(&ssrc.to_be_bytes());
    out.extend_from_slice(&ntp_sec.to_be_bytes());
    out.extend_from_slice(&ntp_frac.to_be_bytes());
    out.extend_from_slice(&rtp_timestamp.to_be_bytes());
    out.extend_from_slice(&stats.packet_count.to_be_bytes());
    out.extend_from_slice(&stats.octet_count.to_be_bytes());

    // --- SDES ---
    let cname_bytes = cname.as_bytes();
    // item: type(1) + length(1) + text, then null terminator, padded to 32 bits.
    let mut sdes_body = Vec::with_capacity(4 + 2 + cname_bytes.len() + 1);
    sdes_body.extend_from_slice(&ssrc.to_be_bytes());
    sdes_body.push(1); // CNAME
    sdes_body.push(cname_bytes.len() as u8);
    sdes_body.extend_from_slice(cname_bytes);
    sdes_body.push(0); // item list terminator
    while sdes_body.len() % 4 != 0 {
        sdes_body.push(0);
    }
    let sdes_length_words = (sdes_body.len() / 4) as u16 - 1;
    out.push((2 << 6) | 1); // V=2, P=0, SC=1
    out.push(202); // PT=202 (SDES)
    out.extend_from_slice(&sdes_length_words.to_be_bytes());
    out.extend_from_slice(&sdes_body);

    out
}

/// Build an RTCP BYE packet (RFC 3550 §6.6), sent on TEARDOWN.
pub fn build_bye(ssrc: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.push((2 << 6) | 1); // V=2, P=0, SC=1
    out.push(203); // PT=203 (BYE)
    out.extend_from_slice(&1u16.to_be_bytes()); // length = 1 word
    out.extend_from_slice(&ssrc.to_be_bytes());
    out
}
