//! Network transport layer for RTSP signaling and RTP/RTCP media delivery.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling on one
//!   connection per client, with a thread per connection. When a session
//!   negotiates `RTP/AVP/TCP` at SETUP, the same connection also carries
//!   `$`-framed RTP/RTCP (RFC 2326 §10.12), serialized against the
//!   connection's own response writes by [`crate::session::SharedWriter`].
//!
//! - **UDP** ([`udp`]): carries RTP/RTCP for sessions that negotiated
//!   `RTP/AVP;unicast` at SETUP. Each session owns its own bound server
//!   port pair (RFC 3550 §11: RTCP port is RTP port + 1), not a single
//!   shared ephemeral socket, so per-session teardown and per-session
//!   source ports both fall out naturally.

pub mod tcp;
pub mod udp;
