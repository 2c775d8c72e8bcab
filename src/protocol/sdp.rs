//! SDP (Session Description Protocol) generation (RFC 4566).
//!
//! Produces the SDP body returned by DESCRIBE responses.
//!
//! ```text
//! v=0
//! o=<user> <sess-id> <sess-ver> IN IP4 0.0.0.0
//! s=<stream name>
//! c=IN IP4 0.0.0.0
//! t=0 0
//! m=video 0 RTP/AVP 96
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1;...
//! a=control:trackID=0
//! m=audio 0 RTP/AVP 0
//! a=rtpmap:0 PCMU/8000
//! a=control:trackID=1
//! ```
//!
//! The session-level `c=` line is always `0.0.0.0` — the real
//! client-facing address is negotiated per-track at SETUP, not
//! advertised here. All origin fields come from
//! [`ServerConfig`](crate::config::ServerConfig) so nothing is hardcoded.

use crate::stream::Stream;

/// Result of attempting to describe a stream.
pub enum DescribeOutcome {
    /// SDP body, ready to return with a `200`.
    Ready(String),
    /// Video parameters (SPS/PPS) haven't been learned yet; DESCRIBE
    /// should respond `503` with `Retry-After: 2`.
    NotReady,
}

/// Generate an SDP session description for the given stream.
pub fn describe(
    stream: &Stream,
    session_id: &str,
    session_version: &str,
    username: &str,
) -> DescribeOutcome {
    if !stream.media_ready() {
        return DescribeOutcome::NotReady;
    }

    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} {} IN IP4 0.0.0.0",
        username, session_id, session_version
    ));
    sdp.push(format!("s={}", stream.name()));
    sdp.push("c=IN IP4 0.0.0.0".to_string());
    sdp.push("t=0 0".to_string());

    sdp.push(format!("m=video 0 RTP/AVP {}", stream.video_payload_type()));
    sdp.extend(stream.video_sdp_attributes());

    if let Some(pt) = stream.audio_payload_type() {
        sdp.push(format!("m=audio 0 RTP/AVP {}", pt));
        sdp.extend(stream.audio_sdp_attributes().unwrap_or_default());
    }

    tracing::debug!(stream = %stream.path(), "SDP generated");

    DescribeOutcome::Ready(format!("{}\r\n", sdp.join("\r\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::audio::G711Packetizer;
    use crate::media::h264::H264Packetizer;

    fn ready_video_stream() -> Stream {
        let mut packetizer = H264Packetizer::new(96);
        // Learn SPS/PPS the way the first IDR would.
        packetizer.fragment(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e, 0, 0, 0, 1, 0x68, 0xce]);
        Stream::new("/vs0", "Main Stream", Box::new(packetizer), None)
    }

    #[test]
    fn describe_not_ready_before_sps_pps() {
        let stream = Stream::new("/vs0", "Main Stream", Box::new(H264Packetizer::new(96)), None);
        match describe(&stream, "1234567890", "1", "-") {
            DescribeOutcome::NotReady => {}
            DescribeOutcome::Ready(_) => panic!("expected NotReady before SPS/PPS learned"),
        }
    }

    #[test]
    fn describe_ready_generates_expected_template() {
        let stream = ready_video_stream();
        let sdp = match describe(&stream, "1234567890", "1", "-") {
            DescribeOutcome::Ready(sdp) => sdp,
            DescribeOutcome::NotReady => panic!("expected Ready"),
        };

        assert!(sdp.contains("v=0\r\n"));
        assert!(sdp.contains("o=- 1234567890 1 IN IP4 0.0.0.0\r\n"));
        assert!(sdp.contains("s=Main Stream\r\n"));
        assert!(
            sdp.contains("c=IN IP4 0.0.0.0\r\n"),
            "session-level c= must be the wildcard address"
        );
        assert!(!sdp.contains("a=tool"), "a=tool must be dropped");
        assert!(!sdp.contains("a=sendonly"), "a=sendonly must be dropped");
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains("a=control:trackID=0\r\n"));
        assert!(sdp.ends_with("\r\n"));

        let rtpmap_idx = sdp.find("a=rtpmap").unwrap();
        let fmtp_idx = sdp.find("a=fmtp").unwrap();
        assert!(rtpmap_idx < fmtp_idx, "a=rtpmap must precede a=fmtp");
    }

    #[test]
    fn describe_includes_audio_track_when_configured() {
        let mut video = H264Packetizer::new(96);
        video.fragment(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e, 0, 0, 0, 1, 0x68, 0xce]);
        let audio = G711Packetizer::new(0, crate::config::G711Law::MuLaw);
        let stream = Stream::new("/vs0", "Main Stream", Box::new(video), Some(Box::new(audio)));

        let sdp = match describe(&stream, "1", "1", "-") {
            DescribeOutcome::Ready(sdp) => sdp,
            DescribeOutcome::NotReady => panic!("expected Ready"),
        };

        assert!(sdp.contains("m=audio 0 RTP/AVP 0\r\n"));
        assert!(sdp.contains("a=rtpmap:0 PCMU/8000\r\n"));
        assert!(sdp.contains("a=control:trackID=1\r\n"));

        let video_idx = sdp.find("m=video").unwrap();
        let audio_idx = sdp.find("m=audio").unwrap();
        assert!(video_idx < audio_idx, "video track must precede audio track");
    }
}
