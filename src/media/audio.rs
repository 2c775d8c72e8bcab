//! Audio RTP packetizers: G.711 (RFC 3551) and AAC (RFC 3640).

use super::{MediaFragment, Packetizer};
use crate::config::G711Law;

/// G.711 PCM packetizer (RFC 3551 §4.5.14).
///
/// G.711 carries one octet per sample at 8 kHz, so the packetizer simply
/// emits each frame as a single RTP payload with the marker bit always
/// set (there's no multi-packet access unit to mark the end of). The
/// fixed 20 ms packetization interval at 8 kHz yields 160 samples, hence
/// [`timestamp_increment`](Packetizer::timestamp_increment) of 160.
#[derive(Debug)]
pub struct G711Packetizer {
    pt: u8,
    law: G711Law,
}

impl G711Packetizer {
    pub fn new(pt: u8, law: G711Law) -> Self {
        Self { pt, law }
    }
}

impl Packetizer for G711Packetizer {
    fn fragment(&mut self, encoded_data: &[u8]) -> Vec<MediaFragment> {
        if encoded_data.is_empty() {
            return Vec::new();
        }
        vec![MediaFragment {
            payload: encoded_data.to_vec(),
            marker: true,
        }]
    }

    fn codec_name(&self) -> &'static str {
        match self.law {
            G711Law::MuLaw => "PCMU",
            G711Law::ALaw => "PCMA",
        }
    }

    /// 8 kHz per RFC 3551 §4.5.14, fixed regardless of payload type.
    fn clock_rate(&self) -> u32 {
        8000
    }

    fn payload_type(&self) -> u8 {
        self.pt
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type(),
                self.codec_name(),
                self.clock_rate()
            ),
            "a=control:trackID=1".to_string(),
        ]
    }

    /// 20 ms at 8 kHz = 160 samples/packet (RFC 3551 §4.5.14 recommended interval).
    fn timestamp_increment(&self) -> u32 {
        160
    }
}

/// AAC packetizer, one Access Unit per RTP packet (RFC 3640 §3.2.1, the
/// simplest of the three RFC 3640 framing modes — no interleaving, no
/// fragmentation).
///
/// Each payload is prefixed with a 4-byte AU header section:
/// `AU-headers-length` (16 bits, here always `0x0010` = one 16-bit
/// AU-header) followed by one AU-header carrying the 13-bit AU-size and
/// 3-bit AU-Index/AU-Index-delta (here always 0, single AU per packet).
#[derive(Debug)]
pub struct AacPacketizer {
    pt: u8,
    sample_rate: u32,
    channels: u8,
    frame_samples: u32,
}

impl AacPacketizer {
    pub fn new(pt: u8, sample_rate: u32, channels: u8, frame_samples: u32) -> Self {
        Self {
            pt,
            sample_rate,
            channels,
            frame_samples,
        }
    }

    /// MPEG-4 `AudioSpecificConfig` bytes for SDP `config=` (RFC 3640 §4.1),
    /// assuming AAC-LC (object type 2) with the configured sample rate index
    /// and channel count, as a 2-byte hex string.
    ///
    /// Layout: `AAAAABBBBCCCC` — 5 bits object type, 4 bits sampling
    /// frequency index, 4 bits channel config, remaining bits zero.
    fn audio_specific_config(&self) -> String {
        let freq_index = sampling_frequency_index(self.sample_rate);
        let object_type: u16 = 2; // AAC-LC
        let config: u16 =
            (object_type << 11) | ((freq_index as u16) << 7) | ((self.channels as u16) << 3);
        format!("{:04x}", config)
    }
}

fn sampling_frequency_index(rate: u32) -> u8 {
    // RFC 3640 / ISO 14496-3 Table 1.6.3.4 sampling frequency index table.
    match rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        12000 => 9,
        11025 => 10,
        8000 => 11,
        7350 => 12,
        _ => 4, // default to 44.1 kHz index if unrecognized
    }
}

impl Packetizer for AacPacketizer {
    fn fragment(&mut self, encoded_data: &[u8]) -> Vec<MediaFragment> {
        if encoded_data.is_empty() {
            return Vec::new();
        }

        // AU-headers-length in bits (always 16: one AU-header).
        let au_headers_length: u16 = 16;
        // AU-header: 13-bit AU-size, 3-bit AU-Index (0 for the first/only AU).
        let au_size = (encoded_data.len() as u16).min(0x1fff);
        let au_header: u16 = au_size << 3;

        let mut payload = Vec::with_capacity(4 + encoded_data.len());
        payload.extend_from_slice(&au_headers_length.to_be_bytes());
        payload.extend_from_slice(&au_header.to_be_bytes());
        payload.extend_from_slice(encoded_data);

        vec![MediaFragment {
            payload,
            marker: true,
        }]
    }

    fn codec_name(&self) -> &'static str {
        "MPEG4-GENERIC"
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn payload_type(&self) -> u8 {
        self.pt
    }

    /// SDP attributes per RFC 3640 §4.1.
    fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!(
                "a=rtpmap:{} {}/{}/{}",
                self.payload_type(),
                self.codec_name(),
                self.clock_rate(),
                self.channels
            ),
            format!(
                "a=fmtp:{} streamtype=5; profile-level-id=1; mode=AAC-hbr; sizelength=13; indexlength=3; indexdeltalength=3; config={}",
                self.payload_type(),
                self.audio_specific_config()
            ),
            "a=control:trackID=1".to_string(),
        ]
    }

    fn timestamp_increment(&self) -> u32 {
        self.frame_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn g711_single_packet_with_marker() {
        let mut p = G711Packetizer::new(0, G711Law::MuLaw);
        let frags = p.fragment(&[1, 2, 3, 4]);
        assert_eq!(frags.len(), 1);
        assert!(frags[0].marker);
        assert_eq!(frags[0].payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn g711_empty_frame_no_fragments() {
        let mut p = G711Packetizer::new(0, G711Law::MuLaw);
        assert!(p.fragment(&[]).is_empty());
    }

    #[test]
    fn g711_codec_names() {
        assert_eq!(
            G711Packetizer::new(0, G711Law::MuLaw).codec_name(),
            "PCMU"
        );
        assert_eq!(G711Packetizer::new(8, G711Law::ALaw).codec_name(), "PCMA");
    }

    #[test]
    fn g711_timestamp_increment_is_160() {
        let p = G711Packetizer::new(0, G711Law::MuLaw);
        assert_eq!(p.timestamp_increment(), 160);
    }

    #[test]
    fn aac_frame_has_au_header_prefix() {
        let mut p = AacPacketizer::new(97, 44100, 2, 1024);
        let data = vec![0xAA; 50];
        let frags = p.fragment(&data);
        assert_eq!(frags.len(), 1);
        let payload = &frags[0].payload;
        assert_eq!(&payload[0..2], &[0x00, 0x10]); // AU-headers-length = 16 bits
        let au_size = u16::from_be_bytes([payload[2], payload[3]]) >> 3;
        assert_eq!(au_size as usize, data.len());
        assert_eq!(&payload[4..], data.as_slice());
    }

    #[test]
    fn aac_sdp_includes_config() {
        let p = AacPacketizer::new(97, 44100, 2, 1024);
        let attrs = p.sdp_attributes();
        assert!(attrs.iter().any(|a| a.contains("config=")));
        assert!(attrs.iter().any(|a| a.contains("MPEG4-GENERIC/44100/2")));
    }

    #[test]
    fn aac_timestamp_increment_matches_frame_samples() {
        let p = AacPacketizer::new(97, 48000, 1, 960);
        assert_eq!(p.timestamp_increment(), 960);
    }
}
