//! Shared segment transfers.
//!
//! A cache miss spawns a [`Filler`] that reads the upstream body on its own
//! task, cuts it into fixed-size pieces and publishes them through a `watch`
//! channel. Every client streaming that segment holds a [`Subscriber`] and
//! replays the pieces from the start at its own pace, so a slow client never
//! holds up the upstream read or the other clients.
//!
//! The capture is committed to the cache only when upstream delivers the whole
//! body. If every subscriber disconnects first, the fill is abandoned and
//! nothing is committed.

use std::future::Future;
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;

use super::flight::FlightGuard;
use super::segment_cache::SegmentCache;
use crate::upstream::{FetchError, UpstreamStream};

#[derive(Debug, Clone, Default)]
enum FillState {
    #[default]
    Running,
    Complete,
    Failed(FetchError),
    Abandoned,
}

#[derive(Debug, Default)]
struct Progress {
    /// Set once upstream answered with a success status.
    content_type: Option<String>,
    /// Upstream body bytes read so far.
    received: usize,
    pieces: Vec<Bytes>,
    state: FillState,
}

/// One upstream segment fetch shared by every client that asked for it.
#[derive(Debug)]
pub struct Transfer {
    url: String,
    progress: watch::Sender<Progress>,
}

impl Transfer {
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        let (progress, _) = watch::channel(Progress::default());
        Arc::new(Self {
            url: url.into(),
            progress,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Attach a client. The transfer is abandoned once no subscriber is left.
    pub fn subscribe(&self) -> Subscriber {
        Subscriber {
            rx: self.progress.subscribe(),
        }
    }
}

/// What a subscriber learns before any response header is sent.
#[derive(Debug)]
pub enum Ready {
    /// Upstream is delivering the body (or already finished it).
    Streaming { content_type: String },
    /// Upstream failed. Nothing has been sent to this client yet.
    Failed(FetchError),
    /// Every earlier client left and the fill was dropped.
    Abandoned,
}

/// A client's view of a [`Transfer`].
#[derive(Debug)]
pub struct Subscriber {
    rx: watch::Receiver<Progress>,
}

impl Subscriber {
    /// Wait for the first body bytes, the end of the body, or a failure.
    ///
    /// A failure seen here can still become a gateway error for the client.
    pub async fn ready(&mut self) -> Ready {
        loop {
            let decided = {
                let progress = self.rx.borrow_and_update();
                match (&progress.state, &progress.content_type) {
                    (FillState::Failed(e), _) => Some(Ready::Failed(e.clone())),
                    (FillState::Abandoned, _) => Some(Ready::Abandoned),
                    (FillState::Complete, Some(content_type)) => Some(Ready::Streaming {
                        content_type: content_type.clone(),
                    }),
                    (FillState::Running, Some(content_type)) if progress.received > 0 => {
                        Some(Ready::Streaming {
                            content_type: content_type.clone(),
                        })
                    }
                    _ => None,
                }
            };
            if let Some(ready) = decided {
                return ready;
            }
            if self.rx.changed().await.is_err() {
                return Ready::Abandoned;
            }
        }
    }

    /// Replay every piece from the first one, then follow the live transfer.
    ///
    /// Ends with an error item if upstream fails mid-body.
    pub fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        let mut rx = self.rx;

        let body = async_stream::stream! {
            let mut next = 0usize;
            loop {
                let (fresh, state) = {
                    let progress = rx.borrow_and_update();
                    (progress.pieces[next..].to_vec(), progress.state.clone())
                };
                next += fresh.len();
                for piece in fresh {
                    yield Ok::<Bytes, io::Error>(piece);
                }

                match state {
                    FillState::Running => {}
                    FillState::Complete => return,
                    FillState::Failed(e) => {
                        yield Err(io::Error::other(e));
                        return;
                    }
                    FillState::Abandoned => {
                        yield Err(io::Error::other("segment transfer abandoned"));
                        return;
                    }
                }

                if rx.changed().await.is_err() {
                    yield Err(io::Error::other("segment transfer ended early"));
                    return;
                }
            }
        };
        body.boxed()
    }
}

/// Body of the fill task for one [`Transfer`].
pub(crate) struct Filler {
    pub transfer: Arc<Transfer>,
    pub cache: Arc<SegmentCache>,
    pub chunk_size: usize,
    /// Coalescing registration, released before the outcome is published.
    pub guard: Option<FlightGuard<Arc<Transfer>>>,
}

struct Filled {
    content_type: String,
    tail: Bytes,
}

impl Filler {
    /// Drive the upstream response opened by `opened` to completion.
    pub(crate) async fn run<F>(self, opened: F)
    where
        F: Future<Output = Result<UpstreamStream, FetchError>>,
    {
        let outcome = tokio::select! {
            filled = self.pump(opened) => Some(filled),
            _ = self.transfer.progress.closed() => None,
        };

        let Filler {
            transfer,
            cache,
            guard,
            ..
        } = self;

        match outcome {
            Some(Ok(Filled { content_type, tail })) => {
                let payload = concat(&transfer.progress.borrow().pieces, &tail);
                tracing::debug!(url = %transfer.url, bytes = payload.len(), "Segment cached");
                cache.insert(&transfer.url, payload, &content_type);
                drop(guard);
                transfer.progress.send_modify(move |p| {
                    if !tail.is_empty() {
                        p.pieces.push(tail);
                    }
                    p.state = FillState::Complete;
                });
            }
            Some(Err(e)) => {
                let received = transfer.progress.borrow().received;
                tracing::warn!(
                    url = %transfer.url,
                    error = %e,
                    bytes_received = received,
                    "Segment fetch failed, discarding capture"
                );
                drop(guard);
                transfer
                    .progress
                    .send_modify(move |p| p.state = FillState::Failed(e));
            }
            None => {
                tracing::trace!(url = %transfer.url, "All clients disconnected mid-segment, capture discarded");
                drop(guard);
                transfer
                    .progress
                    .send_modify(|p| p.state = FillState::Abandoned);
            }
        }
    }

    async fn pump<F>(&self, opened: F) -> Result<Filled, FetchError>
    where
        F: Future<Output = Result<UpstreamStream, FetchError>>,
    {
        let UpstreamStream {
            content_type,
            mut body,
            ..
        } = opened.await?;

        let announced = content_type.clone();
        self.transfer
            .progress
            .send_modify(move |p| p.content_type = Some(announced));

        let mut staging = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let received = chunk.len();
            let pieces = rechunk(&mut staging, chunk, self.chunk_size);
            self.transfer.progress.send_modify(move |p| {
                p.received += received;
                p.pieces.extend(pieces);
            });
        }

        Ok(Filled {
            content_type,
            tail: staging.freeze(),
        })
    }
}

/// Cut `chunk` into `size`-byte pieces, carrying any remainder in `staging`.
///
/// Pieces that lie inside one upstream chunk are slices of it. Only bytes that
/// straddle two upstream chunks are copied.
fn rechunk(staging: &mut BytesMut, mut chunk: Bytes, size: usize) -> Vec<Bytes> {
    let mut pieces = Vec::new();

    if !staging.is_empty() {
        let take = (size - staging.len()).min(chunk.len());
        staging.extend_from_slice(&chunk.split_to(take));
        if staging.len() < size {
            return pieces;
        }
        pieces.push(staging.split().freeze());
    }

    while chunk.len() >= size {
        pieces.push(chunk.split_to(size));
    }
    if !chunk.is_empty() {
        staging.extend_from_slice(&chunk);
    }
    pieces
}

/// Join the published pieces and the tail into one contiguous payload.
fn concat(pieces: &[Bytes], tail: &Bytes) -> Bytes {
    match (pieces, tail.is_empty()) {
        ([], _) => tail.clone(),
        ([only], true) => only.clone(),
        _ => {
            let len = pieces.iter().map(Bytes::len).sum::<usize>() + tail.len();
            let mut payload = BytesMut::with_capacity(len);
            for piece in pieces {
                payload.extend_from_slice(piece);
            }
            payload.extend_from_slice(tail);
            payload.freeze()
        }
    }
}
