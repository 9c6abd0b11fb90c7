use async_trait::async_trait;
use futures_util::StreamExt;
use pkg_types::kv::{
    ErrorBody, GetResponse, KeepAliveResponse, LeaseGrant, LeaseGrantRequest, LeaseId,
    TxnPutRequest, TxnResponse, WatchEvent,
};
use reqwest::{Response, Url};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::client::{CoordinationStore, WatchStream};
use crate::error::{Result, StoreError};

/// HTTP client for a `leaderd-store` server.
///
/// Unary calls are bounded by `call_timeout`; watch streams are not, since
/// they block until the next change.
///
/// A server that is shutting down answers `Unavailable`: another server may
/// take its place. Only [`RemoteStore::close`] makes calls fail with `Closed`.
#[derive(Clone)]
pub struct RemoteStore {
    client: reqwest::Client,
    base: Url,
    call_timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl RemoteStore {
    pub fn new(endpoint: &str, call_timeout: Duration) -> Result<Self> {
        let base = Url::parse(endpoint)
            .map_err(|e| StoreError::InvalidArgument(format!("store endpoint {}: {}", endpoint, e)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(call_timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base,
            call_timeout,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.base.as_str()
    }

    /// Refuse further calls on this handle and its clones. Open watch
    /// streams yield `Closed` and end once they next wake.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidArgument(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_decode() {
        StoreError::Protocol(e.to_string())
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

/// Turn a non-2xx response into a `StoreError`.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match resp.json::<ErrorBody>().await {
        Ok(body) => match StoreError::from_body(body) {
            StoreError::Closed => Err(StoreError::Unavailable(
                "store server is shutting down".to_string(),
            )),
            e => Err(e),
        },
        Err(_) if status.is_server_error() => {
            Err(StoreError::Unavailable(format!("store returned {}", status)))
        }
        Err(_) => Err(StoreError::Protocol(format!("store returned {}", status))),
    }
}

#[async_trait]
impl CoordinationStore for RemoteStore {
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseGrant> {
        self.check_open()?;
        let resp = self
            .client
            .post(self.url(&["api", "v1", "leases"])?)
            .timeout(self.call_timeout)
            .json(&LeaseGrantRequest {
                ttl_seconds: ttl.as_secs(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        check(resp).await?.json().await.map_err(transport_error)
    }

    async fn put_if_version(
        &self,
        key: &str,
        expected_version: u64,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> Result<TxnResponse> {
        self.check_open()?;
        let req = TxnPutRequest {
            key: key.to_string(),
            expected_version,
            value: value.to_vec(),
            lease,
        };
        let resp = self
            .client
            .post(self.url(&["api", "v1", "txn", "put"])?)
            .timeout(self.call_timeout)
            .json(&req)
            .send()
            .await
            .map_err(transport_error)?;
        check(resp).await?.json().await.map_err(transport_error)
    }

    async fn get(&self, key: &str) -> Result<GetResponse> {
        self.check_open()?;
        let resp = self
            .client
            .get(self.url(&["api", "v1", "kv", key])?)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        check(resp).await?.json().await.map_err(transport_error)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveResponse> {
        self.check_open()?;
        let id = lease.to_string();
        let resp = self
            .client
            .put(self.url(&["api", "v1", "leases", &id, "keepalive"])?)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        check(resp).await?.json().await.map_err(transport_error)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        self.check_open()?;
        let id = lease.to_string();
        let resp = self
            .client
            .delete(self.url(&["api", "v1", "leases", &id])?)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        check(resp).await?;
        Ok(())
    }

    async fn watch(&self, key: &str, from_revision: Option<u64>) -> Result<WatchStream> {
        self.check_open()?;
        let mut url = self.url(&["api", "v1", "watch"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", key);
            if let Some(from) = from_revision {
                query.append_pair("from", &from.to_string());
            }
        }
        debug!("Opening watch stream {}", url);

        let resp = self.client.get(url).send().await.map_err(transport_error)?;
        let bytes = check(resp).await?.bytes_stream();
        let closed = self.closed.clone();

        let stream = futures_util::stream::unfold(
            Some((Box::pin(bytes), SseDecoder::default(), VecDeque::new())),
            move |state| {
                let closed = closed.clone();
                async move {
                    let (mut bytes, mut decoder, mut pending) = state?;
                    loop {
                        if closed.load(Ordering::SeqCst) {
                            return Some((Err(StoreError::Closed), None));
                        }
                        if let Some(item) = pending.pop_front() {
                            return Some((item, Some((bytes, decoder, pending))));
                        }
                        match bytes.next().await {
                            Some(Ok(chunk)) => {
                                for data in decoder.push(&chunk) {
                                    pending.push_back(
                                        serde_json::from_str::<WatchEvent>(&data).map_err(|e| {
                                            StoreError::Protocol(format!("bad watch event: {}", e))
                                        }),
                                    );
                                }
                            }
                            // A broken stream ends after reporting the failure.
                            Some(Err(e)) => return Some((Err(transport_error(e)), None)),
                            None => return None,
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }
}

/// Incremental decoder for `text/event-stream` bodies.
/// Yields the joined `data:` payload of every complete event.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
    // Offset below which `buf` is known to hold no event separator.
    scanned: usize,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(end) = find_event_end(&self.buf, self.scanned) {
            let block: Vec<u8> = self.buf.drain(..end.0).collect();
            self.buf.drain(..end.1);
            self.scanned = 0;
            let block = String::from_utf8_lossy(&block);
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            // Blocks without data are keep-alive comments.
            if !data.is_empty() {
                out.push(data.join("\n"));
            }
        }
        // A separator may straddle the next chunk: rescan the last three bytes.
        self.scanned = self.buf.len().saturating_sub(3);
        out
    }
}

/// Locate the blank line ending the first event, searching from `from`:
/// (block length, separator length).
fn find_event_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buf.len()).find_map(|i| {
        if buf[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if buf[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}
