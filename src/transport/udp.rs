use std::net::UdpSocket;

use crate::error::Result;

/// Bind the server-side RTP/RTCP socket pair for one UDP-unicast session.
/// Each session owns its own sockets rather than
/// sharing one ephemeral socket across every viewer — that's what lets a
/// session's RTP stream carry a distinct source port per RFC 2326 §12.39's
/// `server_port=` semantics, and lets a session be torn down (socket
/// dropped) independently of every other session on the stream.
///
/// Both sockets are set non-blocking: the encoder pump is a single shared
/// thread, and a `send_to` that blocked on one slow receiver's full socket
/// buffer would stall delivery to every other session on the stream (§5
/// backpressure).
pub fn bind_pair(rtp_port: u16, rtcp_port: u16) -> Result<(UdpSocket, UdpSocket)> {
    let rtp_socket = UdpSocket::bind(("0.0.0.0", rtp_port))?;
    let rtcp_socket = UdpSocket::bind(("0.0.0.0", rtcp_port))?;
    rtp_socket.set_nonblocking(true)?;
    rtcp_socket.set_nonblocking(true)?;
    Ok((rtp_socket, rtcp_socket))
}
