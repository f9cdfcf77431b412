//! # envivo: playlist-to-RTMP restreaming
//!
//! `envivo` keeps a single outbound RTMP connection continuously fed from an
//! operator-managed playlist of heterogeneous video sources: local files,
//! direct HTTP resources, HLS playlists, and streaming-site pages.
//!
//! The pipeline for one asset:
//! - [`ingest`]: normalize the source into an MPEG-TS feed, teeing the
//!   re-encoded stream into a local archive and a live tap.
//! - [`rtmp`]: the session-long output leg; one encoder, one connection,
//!   many clips.
//! - [`channel`]: pairs the two per session and drives the clip lifecycle.
//! - [`controller`]: serializes operator commands and feeds the channel
//!   from the [`playlist`].
//!
//! Everything communicates over bounded channels; each encoder process has
//! exactly one owner.

mod error;

pub mod channel;
pub mod controller;
pub mod download;
pub mod ffmpeg;
pub mod hls;
pub mod ingest;
pub mod playlist;
pub mod probe;
pub mod receiver;
pub mod resolve;
pub mod rtmp;

pub use channel::*;
pub use controller::*;
pub use error::*;
pub use ffmpeg::{Binaries, Preset};
pub use playlist::*;
pub use receiver::*;
