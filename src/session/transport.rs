use std::net::{SocketAddr, UdpSocket};

use crate::media::rtcp::RtcpStats;
use crate::media::rtp::RtpHeader;

/// Negotiated RTP/RTCP transport for one media kind on one session (RFC
/// 2326 §12.39).
///
/// Embeds an [`RtpHeader`] directly rather than separate SSRC/sequence/
/// timestamp fields — RFC 3550 §8.1 requires that state to be owned and
/// mutated by exactly one writer (this session's delivery path), and
/// bundling it here makes that ownership explicit instead of implicit.
#[derive(Debug)]
pub enum TransportDescriptor {
    /// UDP unicast (RFC 2326 §12.39, `RTP/AVP;unicast`).
    Udp {
        /// Client's RTP receive address (`client_ip:client_rtp_port`).
        client_rtp_addr: SocketAddr,
        /// Client's RTCP receive address (`client_ip:client_rtcp_port`).
        client_rtcp_addr: SocketAddr,
        /// Server-side RTP port advertised to the client, bound by
        /// [`crate::transport::udp::bind_pair`].
        server_rtp_port: u16,
        /// Server-side RTCP port, `server_rtp_port + 1`.
        server_rtcp_port: u16,
        /// Socket bound to `server_rtp_port`; outbound RTP is sent from here.
        rtp_socket: UdpSocket,
        /// Socket bound to `server_rtcp_port`; outbound SR/BYE is sent from
        /// here, incoming RR is accepted (and ignored) here too.
        rtcp_socket: UdpSocket,
        rtp: RtpHeader,
        rtcp: RtcpStats,
    },
    /// TCP interleaved (RFC 2326 §10.12, `RTP/AVP/TCP;interleaved=`).
    TcpInterleaved {
        /// `$`-framed channel number carrying RTP packets (even).
        rtp_channel: u8,
        /// `$`-framed channel number carrying RTCP packets (`rtp_channel + 1`).
        rtcp_channel: u8,
        rtp: RtpHeader,
        rtcp: RtcpStats,
    },
}

impl TransportDescriptor {
    pub fn rtp_header_mut(&mut self) -> &mut RtpHeader {
        match self {
            Self::Udp { rtp, .. } => rtp,
            Self::TcpInterleaved { rtp, .. } => rtp,
        }
    }

    pub fn rtp_header(&self) -> &RtpHeader {
        match self {
            Self::Udp { rtp, .. } => rtp,
            Self::TcpInterleaved { rtp, .. } => rtp,
        }
    }

    pub fn rtcp_stats_mut(&mut self) -> &mut RtcpStats {
        match self {
            Self::Udp { rtcp, .. } => rtcp,
            Self::TcpInterleaved { rtcp, .. } => rtcp,
        }
    }

    pub fn rtcp_stats(&self) -> RtcpStats {
        match self {
            Self::Udp { rtcp, .. } => *rtcp,
            Self::TcpInterleaved { rtcp, .. } => *rtcp,
        }
    }

    /// Send one RTP packet for this transport: `sendto` the client's RTP
    /// address on UDP, or hand it back as `$`-framed bytes on TCP for the
    /// caller to write on the session's shared control-socket writer.
    pub fn send_rtp(&self, packet: &[u8]) -> std::io::Result<Option<Vec<u8>>> {
        match self {
            Self::Udp {
                rtp_socket,
                client_rtp_addr,
                ..
            } => {
                rtp_socket.send_to(packet, client_rtp_addr)?;
                Ok(None)
            }
            Self::TcpInterleaved { rtp_channel, .. } => Ok(Some(interleave_frame(*rtp_channel, packet))),
        }
    }

    /// Send one RTCP packet (Sender Report or BYE) for this transport.
    pub fn send_rtcp(&self, packet: &[u8]) -> std::io::Result<Option<Vec<u8>>> {
        match self {
            Self::Udp {
                rtcp_socket,
                client_rtcp_addr,
                ..
            } => {
                rtcp_socket.send_to(packet, client_rtcp_addr)?;
                Ok(None)
            }
            Self::TcpInterleaved { rtcp_channel, .. } => Ok(Some(interleave_frame(*rtcp_channel, packet))),
        }
    }

    /// `RTP-Info` / `Transport` response header value reflecting this
    /// descriptor's negotiated parameters (RFC 2326 §12.39).
    pub fn response_transport_header(&self) -> String {
        match self {
            Self::Udp {
                client_rtp_addr,
                client_rtcp_addr,
                server_rtp_port,
                server_rtcp_port,
                ..
            } => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                client_rtp_addr.port(),
                client_rtcp_addr.port(),
                server_rtp_port,
                server_rtcp_port
            ),
            Self::TcpInterleaved {
                rtp_channel,
                rtcp_channel,
                ..
            } => format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{}",
                rtp_channel, rtcp_channel
            ),
        }
    }
}

/// Parsed client-requested transport from the RTSP `Transport` header
/// (RFC 2326 §12.39), before server-side ports/channels are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRequest {
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
    TcpInterleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
}

impl TransportRequest {
    /// Parse a `Transport` header value. Recognizes `client_port=A-B`
    /// (UDP unicast) and `interleaved=A-B` (TCP interleaved); the first
    /// one found wins if a header pathologically specifies both.
    pub fn parse(header: &str) -> Option<Self> {
        for part in header.split(';') {
            let part = part.trim();

            if let Some(channels) = part.strip_prefix("interleaved=") {
                let nums: Vec<&str> = channels.split('-').collect();
                if nums.len() == 2 {
                    let rtp_channel: u8 = nums[0].parse().ok()?;
                    let rtcp_channel: u8 = nums[1].parse().ok()?;
                    return Some(Self::TcpInterleaved {
                        rtp_channel,
                        rtcp_channel,
                    });
                }
            }

            if let Some(ports) = part.strip_prefix("client_port=") {
                let nums: Vec<&str> = ports.split('-').collect();
                if nums.len() == 2 {
                    let client_rtp_port: u16 = nums[0].parse().ok()?;
                    let client_rtcp_port: u16 = nums[1].parse().ok()?;
                    return Some(Self::Udp {
                        client_rtp_port,
                        client_rtcp_port,
                    });
                }
            }
        }
        None
    }

    pub fn is_tcp_interleaved(&self) -> bool {
        matches!(self, Self::TcpInterleaved { .. })
    }
}

/// Frame a payload for TCP-interleaved delivery (RFC 2326 §10.12):
/// `$`, channel, 2-byte big-endian length, then the payload.
fn interleave_frame(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.push(b'$');
    out.push(channel);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_udp_transport() {
        let tr = TransportRequest::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(
            tr,
            TransportRequest::Udp {
                client_rtp_port: 5000,
                client_rtcp_port: 5001
            }
        );
    }

    #[test]
    fn parse_tcp_interleaved_transport() {
        let tr = TransportRequest::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
        assert_eq!(
            tr,
            TransportRequest::TcpInterleaved {
                rtp_channel: 0,
                rtcp_channel: 1
            }
        );
    }

    #[test]
    fn parse_no_recognized_params() {
        assert!(TransportRequest::parse("RTP/AVP;unicast").is_none());
    }

    #[test]
    fn response_header_roundtrips_udp() {
        use crate::media::rtp::RtpHeader;
        use std::net::SocketAddr;

        let rtp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let rtcp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let descriptor = TransportDescriptor::Udp {
            client_rtp_addr: "127.0.0.1:6000".parse::<SocketAddr>().unwrap(),
            client_rtcp_addr: "127.0.0.1:6001".parse::<SocketAddr>().unwrap(),
            server_rtp_port: 50000,
            server_rtcp_port: 50001,
            rtp_socket,
            rtcp_socket,
            rtp: RtpHeader::with_random_ssrc(96),
            rtcp: RtcpStats::default(),
        };
        let header = descriptor.response_transport_header();
        assert!(header.contains("client_port=6000-6001"));
        assert!(header.contains("server_port=50000-50001"));
    }

    #[test]
    fn send_rtp_over_udp_delivers_to_client_socket() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_nonblocking(true).unwrap();
        let client_addr = client.local_addr().unwrap();

        let rtp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let rtcp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let descriptor = TransportDescriptor::Udp {
            client_rtp_addr: client_addr,
            client_rtcp_addr: client_addr,
            server_rtp_port: rtp_socket.local_addr().unwrap().port(),
            server_rtcp_port: rtcp_socket.local_addr().unwrap().port(),
            rtp_socket,
            rtcp_socket,
            rtp: RtpHeader::with_random_ssrc(96),
            rtcp: RtcpStats::default(),
        };

        let framed = descriptor.send_rtp(b"payload").unwrap();
        assert!(framed.is_none(), "UDP send_rtp writes directly, no framing returned");

        let mut buf = [0u8; 16];
        std::thread::sleep(std::time::Duration::from_millis(20));
        let (n, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"payload");
    }

    #[test]
    fn send_rtp_over_tcp_interleaved_frames_with_channel() {
        let descriptor = TransportDescriptor::TcpInterleaved {
            rtp_channel: 4,
            rtcp_channel: 5,
            rtp: RtpHeader::with_random_ssrc(96),
            rtcp: RtcpStats::default(),
        };

        let framed = descriptor.send_rtp(b"xy").unwrap().expect("TCP returns framed bytes");
        assert_eq!(framed, vec![b'$', 4, 0, 2, b'x', b'y']);
    }

    #[test]
    fn response_header_roundtrips_tcp() {
        use crate::media::rtp::RtpHeader;

        let descriptor = TransportDescriptor::TcpInterleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
            rtp: RtpHeader::with_random_ssrc(96),
            rtcp: RtcpStats::default(),
        };
        let header = descriptor.response_transport_header();
        assert!(header.contains("interleaved=0-1"));
    }
}
