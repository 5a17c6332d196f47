use camino::{Utf8Path, Utf8PathBuf};
use davcache_core::{DavPath, TransferProgress};
use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, Url};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("invalid remote url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("writing {path} failed: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transfer cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Transport hiccups and server-side errors are worth another attempt;
    /// client errors, local IO and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Request(_) => true,
            RemoteError::Status { status, .. } => *status >= 500 || *status == 429,
            RemoteError::InvalidUrl { .. } | RemoteError::Io { .. } | RemoteError::Cancelled => {
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub bytes_written: u64,
    /// `Content-Type` reported by the server, if any.
    pub content_type: Option<String>,
}

/// Byte source for one collection.
///
/// `fetch` writes the whole body of `remote_path` to `dest`, truncating
/// whatever is there; there is no resume. Implementations may stop early when
/// `cancel` fires but are not required to. Removing a partial `dest` after an
/// error is the caller's job. `on_progress` is invoked once per received
/// chunk and may borrow from the caller.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(
        &self,
        remote_path: &str,
        dest: &Utf8Path,
        on_progress: &(dyn Fn(TransferProgress) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, RemoteError>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub fn default_http_client() -> Result<Client, reqwest::Error> {
    http_client_with_agent(davcache_config::USER_AGENT)
}

pub fn http_client_with_agent(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(davcache_config::CONNECT_TIMEOUT_SECS))
        .build()
}

/// WebDAV file access over plain HTTP GET.
pub struct HttpRemoteStore {
    client: Client,
    base: Url,
    credentials: Option<Credentials>,
    attempts: u32,
    retry_delay: Duration,
    throttle: Option<Arc<Throttle>>,
}

/// Byte-rate cap. Governor refuses any single request larger than the burst,
/// so bigger chunks are paid for in burst-sized pieces.
struct Throttle {
    limiter: DirectLimiter,
    burst: NonZeroU32,
}

impl Throttle {
    fn per_second(bytes: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(bytes)),
            burst: bytes,
        }
    }

    async fn consume(&self, bytes: usize) {
        for n in burst_pieces(bytes, self.burst) {
            if let Err(e) = self.limiter.until_n_ready(n).await {
                warn!("rate limiter rejected {} bytes: {:?}", n, e);
                return;
            }
        }
    }
}

fn burst_pieces(len: usize, burst: NonZeroU32) -> impl Iterator<Item = NonZeroU32> {
    let step = burst.get() as usize;
    (0..len)
        .step_by(step)
        .filter_map(move |start| NonZeroU32::new((len - start).min(step) as u32))
}

/// Treat the collection URL as a directory so joining keeps its path.
pub(crate) fn normalize_base(base_url: &str) -> Result<Url, RemoteError> {
    let mut url = Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(RemoteError::InvalidUrl {
            url: base_url.to_string(),
            reason: "url cannot be a base".into(),
        });
    }
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}

impl HttpRemoteStore {
    pub fn new(client: Client, base_url: &str) -> Result<Self, RemoteError> {
        Ok(Self {
            client,
            base: normalize_base(base_url)?,
            credentials: None,
            attempts: davcache_config::DEFAULT_FETCH_ATTEMPTS,
            retry_delay: Duration::from_millis(davcache_config::RETRY_DELAY_MS),
            throttle: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_attempts(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = davcache_config::clamp_attempts(attempts);
        self.retry_delay = retry_delay;
        self
    }

    /// Caps throughput at `bytes_per_sec`. Zero disables the cap.
    pub fn with_rate_limit(mut self, bytes_per_sec: u64) -> Self {
        let capped = u32::try_from(bytes_per_sec).unwrap_or(u32::MAX);
        self.throttle = NonZeroU32::new(capped).map(|nz| Arc::new(Throttle::per_second(nz)));
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn file_url(&self, remote_path: &str) -> Result<Url, RemoteError> {
        let canonical = DavPath::canonicalize(remote_path).map_err(|e| RemoteError::InvalidUrl {
            url: remote_path.to_string(),
            reason: e.to_string(),
        })?;
        let mut url = self.base.clone();
        {
            let mut segs = url
                .path_segments_mut()
                .map_err(|_| RemoteError::InvalidUrl {
                    url: self.base.to_string(),
                    reason: "cannot mutate url segments".into(),
                })?;
            segs.pop_if_empty();
            for part in DavPath::segments(&canonical) {
                segs.push(part);
            }
        }
        Ok(url)
    }

    async fn fetch_once(
        &self,
        url: &Url,
        dest: &Utf8Path,
        on_progress: &(dyn Fn(TransferProgress) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, RemoteError> {
        let mut req = self.client.get(url.clone());
        if let Some(creds) = &self.credentials {
            req = req.basic_auth(&creds.username, creds.password.as_deref());
        }
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
            resp = req.send() => resp?,
        };
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total = resp.content_length();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let io_err = |source| RemoteError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = File::create(dest.as_std_path()).await.map_err(io_err)?;
        let mut stream = resp.bytes_stream();
        let mut received = 0u64;
        on_progress(TransferProgress::new(0, total));

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            if let Some(throttle) = &self.throttle {
                throttle.consume(chunk.len()).await;
            }
            file.write_all(&chunk).await.map_err(io_err)?;
            received += chunk.len() as u64;
            on_progress(TransferProgress::new(received, total));
        }

        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(FetchOutcome {
            bytes_written: received,
            content_type,
        })
    }
}

#[async_trait::async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch(
        &self,
        remote_path: &str,
        dest: &Utf8Path,
        on_progress: &(dyn Fn(TransferProgress) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, RemoteError> {
        let url = self.file_url(remote_path)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(RemoteError::Cancelled);
            }
            match self.fetch_once(&url, dest, on_progress, cancel).await {
                Ok(outcome) => {
                    debug!("fetched {} ({} bytes)", url, outcome.bytes_written);
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!("fetch {} attempt {} failed: {}", url, attempt, e);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
