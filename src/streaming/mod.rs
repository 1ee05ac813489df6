//! Live HLS relay.
//!
//! Fetches playlists and segments from the upstream origin, rewrites
//! playlists to point back at this server and caches segments in memory.
//!
//! # Routes
//!
//! - `GET /stream/{channel}.m3u8` - Default playlist of a channel
//! - `GET /stream/{channel}/{file}.m3u8` - Named playlist of a channel
//! - `GET /stream/{channel}/{file}` - Segment (older URL form)
//! - `GET /segment/{channel}/{file}` - Segment

mod flight;
mod hls;
mod relay;
mod segment_cache;
mod transfer;

pub use flight::{Flight, FlightGuard, InFlightRequests};
pub use hls::{channel_playlist, media_segment, stream_file, CACHE_STATUS_HEADER};
pub use relay::{
    CacheStatus, Manifest, Relay, RelayError, RelaySettings, SegmentBody, SegmentResponse,
};
pub use segment_cache::{start_sweep_task, CacheEntry, SegmentCache};

use axum::{routing::get, Router};

use crate::server::AppContext;

/// Create the playlist router (mounted at `/stream`).
pub fn stream_router() -> Router<AppContext> {
    Router::new()
        .route("/:channel_file", get(channel_playlist))
        .route("/:channel_id/:filename", get(stream_file))
}

/// Create the segment router (mounted at `/segment`).
pub fn segment_router() -> Router<AppContext> {
    Router::new().route("/:channel_id/:filename", get(media_segment))
}
