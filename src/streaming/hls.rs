//! HLS relay handlers.
//!
//! Parse path parameters, call into the [`Relay`](super::Relay) and turn its
//! results into HTTP responses. Relay errors become 400/502/504 through
//! `IntoResponse` in [`crate::server::error`].

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use hls_relay_common::paths::{is_playlist_name, strip_playlist_extension};
use hls_relay_common::{ChannelId, SegmentName};

use super::relay::{Manifest, RelayError, SegmentBody, SegmentResponse};
use crate::server::AppContext;

/// Response header reporting how a segment was served.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Serve `/stream/{channel}.m3u8`: the channel's default playlist, rewritten.
pub async fn channel_playlist(
    State(ctx): State<AppContext>,
    Path(channel_file): Path<String>,
) -> Result<Response, RelayError> {
    let channel = strip_playlist_extension(&channel_file)
        .ok_or_else(|| hls_relay_common::Error::invalid_file_name(channel_file.as_str()))?;
    let channel = ChannelId::parse(channel)?;

    let manifest = ctx.relay.serve_manifest(&channel).await?;
    Ok(manifest_response(manifest))
}

/// Serve `/stream/{channel}/{file}`.
///
/// Playlists are fetched and rewritten; any other file is relayed as a
/// segment, matching the older `/stream/...` segment URLs.
pub async fn stream_file(
    State(ctx): State<AppContext>,
    Path((channel_id, filename)): Path<(String, String)>,
) -> Result<Response, RelayError> {
    let channel = ChannelId::parse(&channel_id)?;
    let file = SegmentName::parse(&filename)?;

    if is_playlist_name(file.as_str()) {
        let manifest = ctx.relay.serve_manifest_file(&channel, &file).await?;
        return Ok(manifest_response(manifest));
    }

    let segment = ctx.relay.serve_segment(&channel, &file).await?;
    Ok(segment_response(segment, ctx.cache_max_age()))
}

/// Serve `/segment/{channel}/{file}`.
pub async fn media_segment(
    State(ctx): State<AppContext>,
    Path((channel_id, filename)): Path<(String, String)>,
) -> Result<Response, RelayError> {
    let channel = ChannelId::parse(&channel_id)?;
    let file = SegmentName::parse(&filename)?;

    let segment = ctx.relay.serve_segment(&channel, &file).await?;
    Ok(segment_response(segment, ctx.cache_max_age()))
}

fn manifest_response(manifest: Manifest) -> Response {
    (
        [
            (header::CONTENT_TYPE, manifest.content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        manifest.text,
    )
        .into_response()
}

fn segment_response(segment: SegmentResponse, max_age: u64) -> Response {
    let body = match segment.body {
        SegmentBody::Cached(bytes) => Body::from(bytes),
        SegmentBody::Streaming(stream) => Body::from_stream(stream),
    };

    (
        [
            (header::CONTENT_TYPE, segment.content_type),
            (header::CACHE_CONTROL, format!("public, max-age={max_age}")),
            (
                header::HeaderName::from_static(CACHE_STATUS_HEADER),
                segment.cache_status.as_str().to_string(),
            ),
        ],
        body,
    )
        .into_response()
}
