//! Streaming relay.
//!
//! Serves segments from the [`SegmentCache`] when possible. On a miss a
//! [`Transfer`] reads the upstream body in the background and forwards it to
//! every waiting client in fixed-size chunks. The capture is committed to the
//! cache only once upstream has delivered the whole body.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use hls_relay_common::{ChannelId, SegmentName};

use super::flight::{Flight, FlightGuard, InFlightRequests};
use super::segment_cache::{start_sweep_task, CacheEntry, SegmentCache};
use super::transfer::{Filler, Ready, Subscriber, Transfer};
use crate::config::Config;
use crate::manifest::{ManifestRewriter, SegmentRule};
use crate::upstream::{
    FetchError, UpstreamFetcher, UpstreamRequest, UpstreamSettings, MANIFEST_CONTENT_TYPE,
};

/// Errors surfaced by relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Bad channel id or file name in the request path.
    #[error("{0}")]
    InvalidRequest(#[from] hls_relay_common::Error),

    #[error("Upstream request timed out")]
    UpstreamTimeout,

    #[error("Upstream responded with status {0}")]
    UpstreamStatus(u16),

    #[error("Upstream connection failed: {0}")]
    Connection(String),

    #[error("Upstream manifest is not valid UTF-8: {0}")]
    InvalidManifest(String),
}

impl RelayError {
    /// HTTP status code to report to the client.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::UpstreamTimeout => 504,
            Self::UpstreamStatus(_) | Self::Connection(_) | Self::InvalidManifest(_) => 502,
        }
    }
}

impl From<FetchError> for RelayError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Timeout => Self::UpstreamTimeout,
            FetchError::UpstreamStatus(code) => Self::UpstreamStatus(code),
            FetchError::Connection(msg) | FetchError::Client(msg) => Self::Connection(msg),
        }
    }
}

/// Where a segment response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the cache without an upstream call.
    Hit,
    /// Streamed from an upstream fetch started by this request.
    Miss,
    /// Streamed from an upstream fetch another request had already started.
    Coalesced,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Coalesced => "COALESCED",
        }
    }
}

/// Body of a segment response.
pub enum SegmentBody {
    Cached(Bytes),
    Streaming(BoxStream<'static, io::Result<Bytes>>),
}

impl std::fmt::Debug for SegmentBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cached(bytes) => f.debug_tuple("Cached").field(&bytes.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

#[derive(Debug)]
pub struct SegmentResponse {
    pub content_type: String,
    pub cache_status: CacheStatus,
    pub body: SegmentBody,
}

impl SegmentResponse {
    fn from_entry(entry: &CacheEntry, cache_status: CacheStatus) -> Self {
        Self {
            content_type: entry.content_type.clone(),
            cache_status,
            body: SegmentBody::Cached(entry.payload.clone()),
        }
    }

    fn streaming(content_type: String, cache_status: CacheStatus, subscriber: Subscriber) -> Self {
        Self {
            content_type,
            cache_status,
            body: SegmentBody::Streaming(subscriber.into_stream()),
        }
    }
}

/// A rewritten playlist ready to serve.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub text: String,
    pub content_type: &'static str,
}

/// Tunables for [`Relay`].
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Size of chunks forwarded to the client on a miss.
    pub chunk_size: usize,
    /// Fallback content type for segments.
    pub segment_content_type: String,
    /// Upstream playlist requested for `/stream/{channel}.m3u8`.
    pub manifest_file: String,
    /// Share one upstream fetch between concurrent misses.
    pub coalesce: bool,
    pub segment_rule: SegmentRule,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.relay.chunk_size,
            segment_content_type: config.upstream.segment_content_type.clone(),
            manifest_file: config.upstream.manifest_file.clone(),
            coalesce: config.cache.coalesce,
            segment_rule: SegmentRule::new(config.relay.segment_extensions.iter().cloned()),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Manifest rewrite + segment cache + streaming relay pipeline.
#[derive(Debug)]
pub struct Relay {
    fetcher: UpstreamFetcher,
    cache: Arc<SegmentCache>,
    flights: Arc<InFlightRequests<Arc<Transfer>>>,
    rewriter: ManifestRewriter,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(fetcher: UpstreamFetcher, cache: Arc<SegmentCache>, settings: RelaySettings) -> Self {
        Self {
            fetcher,
            cache,
            flights: Arc::new(InFlightRequests::new()),
            rewriter: ManifestRewriter::new(settings.segment_rule.clone()),
            settings,
        }
    }

    /// Build the fetcher, cache and relay described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let fetcher = UpstreamFetcher::new(&UpstreamSettings::from(&config.upstream))?;
        let cache = SegmentCache::new(Duration::from_secs(config.cache.ttl_secs))
            .with_eager_expiry(config.cache.eager_expiry);
        Ok(Self::new(
            fetcher,
            Arc::new(cache),
            RelaySettings::from_config(config),
        ))
    }

    /// Start the periodic stale-entry sweep for this relay's cache.
    pub fn start_sweep(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        start_sweep_task(&self.cache, interval)
    }

    pub fn cache(&self) -> &Arc<SegmentCache> {
        &self.cache
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Canonical upstream URL (and cache key) for a channel file.
    pub fn upstream_url(&self, channel: &ChannelId, file: &SegmentName) -> String {
        self.fetcher.url_for(channel.as_str(), file.as_str())
    }

    /// Fetch the channel's default playlist and rewrite it.
    pub async fn serve_manifest(&self, channel: &ChannelId) -> Result<Manifest, RelayError> {
        let file = SegmentName::parse(&self.settings.manifest_file)?;
        self.serve_manifest_file(channel, &file).await
    }

    /// Fetch a named playlist of the channel and rewrite it. Never cached.
    pub async fn serve_manifest_file(
        &self,
        channel: &ChannelId,
        file: &SegmentName,
    ) -> Result<Manifest, RelayError> {
        let url = self.upstream_url(channel, file);
        let body = self
            .fetcher
            .fetch(&UpstreamRequest::manifest(&url))
            .await
            .map_err(|e| {
                tracing::warn!(channel = %channel, url = %url, error = %e, "Manifest fetch failed");
                RelayError::from(e)
            })?;

        let text = std::str::from_utf8(&body.bytes)
            .map_err(|e| RelayError::InvalidManifest(e.to_string()))?;

        Ok(Manifest {
            text: self.rewriter.rewrite(text, channel.as_str()),
            content_type: MANIFEST_CONTENT_TYPE,
        })
    }

    /// Serve a media segment, from cache or by streaming it from upstream.
    ///
    /// On a miss the upstream read runs on its own task. Concurrent misses
    /// for the same segment share that task and each replay its output.
    pub async fn serve_segment(
        &self,
        channel: &ChannelId,
        file: &SegmentName,
    ) -> Result<SegmentResponse, RelayError> {
        let url = self.upstream_url(channel, file);

        if let Some(entry) = self.cache.lookup(&url) {
            tracing::debug!(channel = %channel, url = %url, "Segment cache hit");
            return Ok(SegmentResponse::from_entry(&entry, CacheStatus::Hit));
        }

        if !self.settings.coalesce {
            let transfer = Transfer::new(url);
            let subscriber = transfer.subscribe();
            self.start_fill(transfer, None);
            return Self::respond(subscriber, CacheStatus::Miss).await;
        }

        let mut retried = false;
        loop {
            match self.flights.join(&url, || Transfer::new(url.as_str())) {
                Flight::Leader(guard) => {
                    // A previous leader may have committed between our lookup and join.
                    if let Some(entry) = self.cache.lookup(&url) {
                        return Ok(SegmentResponse::from_entry(&entry, CacheStatus::Hit));
                    }
                    let transfer = Arc::clone(guard.value());
                    let subscriber = transfer.subscribe();
                    self.start_fill(transfer, Some(guard));
                    return Self::respond(subscriber, CacheStatus::Miss).await;
                }
                Flight::Follower(transfer) => {
                    tracing::debug!(url = %url, "Joining in-flight fetch");
                    let mut subscriber = transfer.subscribe();
                    match subscriber.ready().await {
                        Ready::Streaming { content_type } => {
                            return Ok(SegmentResponse::streaming(
                                content_type,
                                CacheStatus::Coalesced,
                                subscriber,
                            ));
                        }
                        // The shared fetch is already unregistered; start over once.
                        Ready::Failed(_) | Ready::Abandoned if !retried => {
                            tracing::debug!(url = %url, "In-flight fetch ended without a body, retrying");
                            retried = true;
                        }
                        Ready::Failed(e) => return Err(e.into()),
                        Ready::Abandoned => return Err(abandoned()),
                    }
                }
            }
        }
    }

    /// Spawn the upstream read for `transfer`.
    fn start_fill(&self, transfer: Arc<Transfer>, guard: Option<FlightGuard<Arc<Transfer>>>) {
        tracing::debug!(url = %transfer.url(), "Segment cache miss");

        let request = UpstreamRequest::segment(transfer.url(), &self.settings.segment_content_type);
        let fetcher = self.fetcher.clone();
        let filler = Filler {
            transfer,
            cache: Arc::clone(&self.cache),
            chunk_size: self.settings.chunk_size.max(1),
            guard,
        };

        tokio::spawn(async move {
            let opened = fetcher.fetch_stream(&request);
            filler.run(opened).await;
        });
    }

    /// Wait for the transfer to produce a body or fail. Nothing has been sent
    /// to the client yet, so failures here still become gateway errors.
    async fn respond(
        mut subscriber: Subscriber,
        cache_status: CacheStatus,
    ) -> Result<SegmentResponse, RelayError> {
        match subscriber.ready().await {
            Ready::Streaming { content_type } => Ok(SegmentResponse::streaming(
                content_type,
                cache_status,
                subscriber,
            )),
            Ready::Failed(e) => Err(e.into()),
            Ready::Abandoned => Err(abandoned()),
        }
    }
}

fn abandoned() -> RelayError {
    RelayError::Connection("segment transfer abandoned".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn relay_for(base: &str) -> Relay {
        let mut config = Config::default();
        config.upstream.url_template = format!("{base}/live/{{channel}}/{{file}}");
        Relay::from_config(&config).unwrap()
    }

    #[test]
    fn test_fetch_errors_map_to_gateway_statuses() {
        assert_eq!(RelayError::from(FetchError::Timeout).http_status(), 504);
        assert_eq!(RelayError::from(FetchError::UpstreamStatus(503)).http_status(), 502);
        assert_matches!(
            RelayError::from(FetchError::UpstreamStatus(404)),
            RelayError::UpstreamStatus(404)
        );
        assert_eq!(
            RelayError::from(FetchError::Connection("refused".into())).http_status(),
            502
        );
        assert_eq!(
            RelayError::from(hls_relay_common::Error::invalid_channel("..")).http_status(),
            400
        );
    }

    #[test]
    fn test_upstream_url_is_cache_key() {
        let relay = relay_for("http://origin.local");
        let channel = ChannelId::parse("foo").unwrap();
        let file = SegmentName::parse("seg001.ts").unwrap();
        assert_eq!(
            relay.upstream_url(&channel, &file),
            "http://origin.local/live/foo/seg001.ts"
        );
    }

    #[tokio::test]
    async fn test_cached_segment_is_served_without_upstream() {
        // Port 9 (discard) on localhost: any upstream call would fail.
        let relay = relay_for("http://127.0.0.1:9");
        let channel = ChannelId::parse("foo").unwrap();
        let file = SegmentName::parse("seg001.ts").unwrap();
        let url = relay.upstream_url(&channel, &file);
        relay
            .cache()
            .insert(&url, Bytes::from_static(b"cached"), "video/mp2t");

        let response = relay.serve_segment(&channel, &file).await.unwrap();
        assert_eq!(response.cache_status, CacheStatus::Hit);
        assert_eq!(response.content_type, "video/mp2t");
        assert_matches!(response.body, SegmentBody::Cached(b) if b == Bytes::from_static(b"cached"));
    }

    #[tokio::test]
    async fn test_upstream_status_before_body_is_an_error() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let relay = relay_for(&server.uri());
        let channel = ChannelId::parse("foo").unwrap();
        let file = SegmentName::parse("gone.ts").unwrap();

        let err = relay.serve_segment(&channel, &file).await.unwrap_err();
        assert_matches!(err, RelayError::UpstreamStatus(404));
        assert!(relay.cache().is_empty());
        assert!(relay.flights.is_empty());
    }
}
