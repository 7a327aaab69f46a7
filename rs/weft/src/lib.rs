//! # weft: an HLS writer
//!
//! `weft` ingests coded media samples, groups them into segments and partial
//! segments across one or more variants and alternate renditions, and emits
//! the playlists and binary payloads needed for live, low-latency and VOD
//! HLS delivery.
//!
//! ## Overview
//!
//! - **Writer**: the single-threaded core driving everything below.
//! - **Variants & renditions**: each with its own tracks, muxer and playlist.
//! - **Containers**: CMAF/fMP4 (with optional partial segments) or MPEG-TS.
//! - **Storage**: a synchronous trait the host implements; a directory-backed
//!   implementation ships in the crate.
//!
//! Samples for a given track must arrive in decode order. Segment boundaries
//! land on sync samples of the lead (video) track; audio-only variants follow
//! the first variant that has one.
mod config;
mod error;
mod model;
mod mux;
mod playlist;
mod process;
mod queue;
mod storage;
mod variant;
mod writer;

pub mod codec;

pub use config::*;
pub use error::*;
pub use model::*;
pub use playlist::{Part, Segment};
pub use storage::*;
pub use variant::{RenditionConfig, VariantConfig};
pub use writer::*;
