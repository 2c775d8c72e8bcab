//! # rtsp — RTSP server library for live media streaming
//!
//! A Rust library for publishing live media streams (H.264 + G.711/AAC
//! audio, with H.265 and MJPEG planned) over the Real-Time Streaming
//! Protocol (RTSP).
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 2617](https://tools.ietf.org/html/rfc2617) | HTTP Basic/Digest auth | `WWW-Authenticate` challenge/response |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet header format, SSRC generation, Sender Reports, BYE |
//! | [RFC 3551](https://tools.ietf.org/html/rfc3551) | RTP audio/video profile | G.711 payload framing |
//! | [RFC 3640](https://tools.ietf.org/html/rfc3640) | RTP AAC payload | AU-per-packet framing |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description generation for DESCRIBE responses |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | NAL unit packetization, FU-A fragmentation, SDP fmtp attributes |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Server         — public API, orchestrator│
//! │  StreamRegistry — named stream endpoints  │
//! ├──────────────────────────────────────────┤
//! │  Protocol       — RTSP parsing, SDP, etc. │
//! │  Session        — state machine, transport│
//! │  Auth           — Basic/Digest challenge  │
//! ├──────────────────────────────────────────┤
//! │  Transport      — TCP signaling, UDP data │
//! │  Media          — RTP header, packetizers │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use rtsp::{AudioCodec, AudioConfig, G711Law, Server, ServerConfig, StreamConfig, VideoConfig};
//!
//! let config = ServerConfig {
//!     listen_port: 8554,
//!     streams: vec![StreamConfig {
//!         path: "/live".to_string(),
//!         name: "Camera 1".to_string(),
//!         video: VideoConfig::default(),
//!         audio: Some(AudioConfig {
//!             codec: AudioCodec::G711 { law: G711Law::MuLaw },
//!             sample_rate: 8000,
//!             channels: 1,
//!             payload_type: 0,
//!         }),
//!     }],
//!     ..Default::default()
//! };
//!
//! let mut server = Server::new(config);
//! server.start(HashMap::new()).unwrap();
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — High-level [`Server`] orchestrator and [`StreamUri`].
//! - [`config`] — [`ServerConfig`] and the stream/audio/auth configuration it's built from.
//! - [`stream`] — [`stream::Stream`] (published endpoint) and [`stream::StreamRegistry`].
//! - [`source`] — [`FrameSource`], the trait callers implement to feed encoded media in.
//! - [`auth`] — RFC 2617 Basic/Digest challenge evaluation.
//! - [`protocol`] — RTSP request/response parsing, method handling, SDP generation.
//! - [`session`] — RTSP session state machine and transport negotiation.
//! - [`transport`] — TCP listener for RTSP signaling, UDP sender for RTP delivery.
//! - [`media`] — [`Packetizer`] trait, RTP/RTCP, codec implementations.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod source;
pub mod stream;
pub mod transport;

pub use config::{
    AudioCodec, AudioConfig, AuthConfig, AuthMode, G711Law, ServerConfig, StreamConfig, User,
    VideoConfig,
};
pub use error::{Result, RtspError};
pub use media::Packetizer;
pub use server::{Server, StreamUri, Viewer};
pub use source::{AudioFrame, FrameSource, VideoFrame};
pub use stream::{Stream, StreamRegistry};
