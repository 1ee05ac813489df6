//! hls-relay-common: Shared types and utilities.
//!
//! This crate provides the pieces of hls-relay that sit between the HTTP
//! surface and the relay core:
//!
//! - **Typed path parameters**: [`ChannelId`] and [`SegmentName`], validated
//!   before they are interpolated into an upstream URL
//! - **Path Utilities**: Playlist/segment name helpers
//! - **Error Handling**: Common error type and result alias
//!
//! # Examples
//!
//! ```
//! use hls_relay_common::{ChannelId, SegmentName, Result};
//! use hls_relay_common::paths::is_playlist_name;
//!
//! fn parse() -> Result<(ChannelId, SegmentName)> {
//!     Ok((ChannelId::parse("stargoldhd")?, SegmentName::parse("seg001.ts")?))
//! }
//!
//! let (channel, segment) = parse().unwrap();
//! assert_eq!(channel.as_str(), "stargoldhd");
//! assert!(!is_playlist_name(segment.as_str()));
//! ```

pub mod error;
pub mod ids;
pub mod paths;

pub use error::{Error, Result};
pub use ids::*;
