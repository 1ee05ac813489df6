//! Shared test harness for integration tests.
//!
//! Provides [`FakeOrigin`], a scriptable upstream HLS server, and
//! [`TestHarness`] which starts the relay on a random port pointed at it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode, Uri},
    response::Response,
    Router,
};
use bytes::Bytes;
use dashmap::DashMap;

use hls_relay::config::Config;
use hls_relay::server::{create_router, AppContext};

/// Scripted response for one origin path.
#[derive(Clone)]
pub enum Behavior {
    /// 200 with the body; no `Content-Type` header when `content_type` is `None`.
    Ok {
        body: Bytes,
        content_type: Option<&'static str>,
    },
    /// Bare status code with an empty body.
    Status(u16),
    /// Sleep before sending a 200 with the body.
    Delay(Duration, Bytes),
    /// Send the head, then abort the connection mid-body.
    Truncate(Bytes),
    /// Send `count` copies of `chunk`, `interval` apart.
    Slow {
        chunk: Bytes,
        count: usize,
        interval: Duration,
    },
}

#[derive(Clone, Default)]
struct OriginState {
    routes: Arc<DashMap<String, Behavior>>,
    hits: Arc<DashMap<String, usize>>,
}

/// Upstream HLS origin on a random local port.
pub struct FakeOrigin {
    pub addr: SocketAddr,
    state: OriginState,
}

impl FakeOrigin {
    pub async fn start() -> Self {
        let state = OriginState::default();
        let app = Router::new().fallback(respond).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Script the response for `path` (decoded form).
    pub fn set(&self, path: &str, behavior: Behavior) {
        self.state.routes.insert(path.to_string(), behavior);
    }

    /// Serve `body` as an MPEG-TS segment.
    pub fn segment(&self, path: &str, body: impl Into<Bytes>) {
        self.set(
            path,
            Behavior::Ok {
                body: body.into(),
                content_type: Some("video/MP2T"),
            },
        );
    }

    /// Serve `text` as a playlist.
    pub fn playlist(&self, path: &str, text: &str) {
        self.set(
            path,
            Behavior::Ok {
                body: Bytes::copy_from_slice(text.as_bytes()),
                content_type: Some("application/vnd.apple.mpegurl"),
            },
        );
    }

    /// Number of requests received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.get(path).map(|h| *h).unwrap_or(0)
    }
}

async fn respond(State(state): State<OriginState>, uri: Uri) -> Response {
    // Routes are scripted with decoded names.
    let path = urlencoding::decode(uri.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| uri.path().to_string());
    *state.hits.entry(path.clone()).or_insert(0) += 1;

    let Some(behavior) = state.routes.get(&path).map(|b| b.value().clone()) else {
        return status(StatusCode::NOT_FOUND);
    };

    match behavior {
        Behavior::Ok { body, content_type } => {
            let mut builder = Response::builder().status(StatusCode::OK);
            if let Some(ct) = content_type {
                builder = builder.header(header::CONTENT_TYPE, ct);
            }
            builder.body(Body::from(body)).unwrap()
        }
        Behavior::Status(code) => status(StatusCode::from_u16(code).unwrap()),
        Behavior::Delay(wait, body) => {
            tokio::time::sleep(wait).await;
            Response::builder()
                .header(header::CONTENT_TYPE, "video/MP2T")
                .body(Body::from(body))
                .unwrap()
        }
        Behavior::Truncate(head) => {
            let body = async_stream::stream! {
                yield Ok::<Bytes, std::io::Error>(head);
                tokio::time::sleep(Duration::from_millis(100)).await;
                yield Err(std::io::Error::other("origin went away"));
            };
            Response::builder()
                .header(header::CONTENT_TYPE, "video/MP2T")
                .body(Body::from_stream(body))
                .unwrap()
        }
        Behavior::Slow {
            chunk,
            count,
            interval,
        } => {
            let body = async_stream::stream! {
                for _ in 0..count {
                    yield Ok::<Bytes, std::io::Error>(chunk.clone());
                    tokio::time::sleep(interval).await;
                }
            };
            Response::builder()
                .header(header::CONTENT_TYPE, "video/MP2T")
                .body(Body::from_stream(body))
                .unwrap()
        }
    }
}

fn status(code: StatusCode) -> Response {
    Response::builder()
        .status(code)
        .body(Body::empty())
        .unwrap()
}

/// Relay server wired to a [`FakeOrigin`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub origin: FakeOrigin,
}

impl TestHarness {
    /// Relay with test defaults: 30s TTL, 5s upstream timeout, 1 KiB chunks.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Relay with test defaults adjusted by `configure`.
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let origin = FakeOrigin::start().await;

        let mut config = Config::default();
        config.upstream.url_template = format!("{}/live/{{channel}}/{{file}}", origin.base_url());
        config.upstream.timeout_secs = 5;
        config.cache.ttl_secs = 30;
        config.relay.chunk_size = 1024;
        configure(&mut config);

        let ctx = AppContext::new(config).expect("failed to build relay");
        let app = create_router(ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { ctx, addr, origin }
    }

    /// URL of a relay route.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Origin path the relay fetches for a channel file, before encoding.
    pub fn origin_path(channel: &str, file: &str) -> String {
        format!("/live/{channel}/{file}")
    }

    /// Cache key the relay uses for a channel file.
    pub fn cache_key(&self, channel: &str, file: &str) -> String {
        format!(
            "{}/live/{}/{}",
            self.origin.base_url(),
            urlencoding::encode(channel),
            urlencoding::encode(file)
        )
    }
}
