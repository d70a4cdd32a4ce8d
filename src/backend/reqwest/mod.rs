//! Reqwest transport for cross-platform HTTP support

mod background;

use crate::backend::types::{Direction, Submission, TransportEvents, TransportHandle};
use crate::backend::{ProxyConfig, Transport, TransportConfig};
use crate::background::{BackgroundCompletion, ensure_directory};
use crate::cache::{CachedResponse, DEFAULT_CACHE_CAPACITY, Fingerprint, ResponseCache};
use crate::response::ResponseMetadata;
use crate::resume::ResumeData;
use crate::{Error, Request, Result};
use background::StagedTransfer;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::{HeaderValue, Method, StatusCode, header};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Size of the pieces a request body is streamed in; upload progress is reported per piece
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Interrupted background transfers kept for resuming; older ones are discarded
const MAX_RETAINED_TRANSFERS: usize = 16;

/// Transport backed by a shared `reqwest::Client`
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    client: reqwest::Client,
    runtime: tokio::runtime::Handle,
    error_for_status: bool,
    cache: Option<ResponseCache>,
    staging_directory: PathBuf,
    running: Mutex<HashMap<u64, Running>>,
    /// Staged background transfers that are running or can still be resumed
    staged: Mutex<HashMap<u64, Arc<StagedTransfer>>>,
}

struct Running {
    abort: tokio::task::AbortHandle,
    background: bool,
}

impl ReqwestTransport {
    /// Create a transport with default configuration.
    ///
    /// Must be called from within a tokio runtime; submissions run on it.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a transport builder
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }

    /// Create a new transport with configuration
    pub fn with_config(config: TransportConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// The response cache, when caching is enabled
    pub fn cache(&self) -> Option<&ResponseCache> {
        self.inner.cache.as_ref()
    }

    /// Get the underlying reqwest client
    pub fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    /// Number of staged background transfers, running or waiting to be resumed
    pub fn staged_transfers(&self) -> usize {
        self.inner.staged().len()
    }

    /// Number of background submissions still in flight
    pub fn outstanding_background_tasks(&self) -> usize {
        self.inner
            .running()
            .values()
            .filter(|running| running.background)
            .count()
    }
}

impl Transport for ReqwestTransport {
    fn submit(&self, submission: Submission) -> Result<TransportHandle> {
        let Submission {
            request,
            background,
            resume_data,
            events,
        } = submission;

        let handle = TransportHandle::next(background);
        let staged = if background {
            let directory = ensure_directory(&self.inner.staging_directory)?;
            let staged = Arc::new(StagedTransfer::prepare(
                &directory,
                &handle,
                request.url(),
                resume_data.as_ref(),
            ));
            tracing::debug!(%handle, path = %staged.path().display(), "Staging background transfer");
            self.inner.staged().insert(handle.id(), staged.clone());
            Some(staged)
        } else {
            None
        };

        let builder = match self.inner.request_builder(&request, staged.as_deref(), &events) {
            Ok(builder) => builder,
            Err(error) => {
                self.inner.staged().remove(&handle.id());
                return Err(error);
            }
        };

        tracing::debug!(%handle, method = %request.method(), url = %request.url(), "Submitting request");

        // Hold the registry lock while spawning so a fast completion cannot
        // retire the submission before it is registered.
        let mut running = self.inner.running();
        let inner = self.inner.clone();
        let id = handle.id();
        let join = self.inner.runtime.spawn(async move {
            let result = inner.perform(builder, &request, staged.as_deref(), &events).await;
            let succeeded = result.is_ok();
            events.on_complete(result);
            inner.retire(id, succeeded);
        });
        running.insert(
            id,
            Running {
                abort: join.abort_handle(),
                background,
            },
        );

        Ok(handle)
    }

    fn cancel(&self, handle: &TransportHandle) {
        let running = self.inner.running().remove(&handle.id());
        if let Some(running) = running {
            tracing::debug!(%handle, "Aborting request");
            running.abort.abort();
            if running.background {
                self.inner.settle_staged(handle.id(), false);
                self.inner.background_finished();
            }
        }
    }

    fn lookup_cache(&self, fingerprint: &Fingerprint) -> Option<CachedResponse> {
        self.inner.cache.as_ref()?.get(fingerprint)
    }

    fn staging_directory(&self) -> PathBuf {
        self.inner.staging_directory.clone()
    }

    /// Hands the staged transfer over to the caller; later calls return `None`
    fn resume_data(&self, handle: &TransportHandle) -> Option<ResumeData> {
        if self.inner.running().contains_key(&handle.id()) {
            return None;
        }
        self.inner.staged().remove(&handle.id())?.resume_data()
    }
}

impl TransportInner {
    fn running(&self) -> MutexGuard<'_, HashMap<u64, Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn staged(&self) -> MutexGuard<'_, HashMap<u64, Arc<StagedTransfer>>> {
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop bookkeeping for a submission that ran to the end
    fn retire(&self, id: u64, succeeded: bool) {
        let running = self.running().remove(&id);
        if let Some(running) = running {
            if running.background {
                self.settle_staged(id, succeeded);
                self.background_finished();
            }
        }
    }

    /// Decide what to keep of a background transfer that stopped.
    ///
    /// Finished transfers and ones with nothing on disk are dropped. Partial
    /// ones stay available to [`Transport::resume_data`] until more than
    /// [`MAX_RETAINED_TRANSFERS`] pile up; the oldest are then discarded
    /// together with their staged files.
    fn settle_staged(&self, id: u64, succeeded: bool) {
        let active: HashSet<u64> = self.running().keys().copied().collect();
        let mut discarded = Vec::new();
        {
            let mut staged = self.staged();
            if succeeded {
                staged.remove(&id);
            } else if let Some(transfer) = staged.get(&id).cloned() {
                if transfer.resume_data().is_none() {
                    staged.remove(&id);
                    discarded.push(transfer);
                }
            }

            let mut idle: Vec<u64> = staged
                .keys()
                .filter(|id| !active.contains(id))
                .copied()
                .collect();
            if idle.len() > MAX_RETAINED_TRANSFERS {
                idle.sort_unstable();
                for id in &idle[..idle.len() - MAX_RETAINED_TRANSFERS] {
                    discarded.extend(staged.remove(id));
                }
            }
        }

        for transfer in discarded {
            transfer.discard();
        }
    }

    /// Raise the delivery-complete event once no background submission is left
    fn background_finished(&self) {
        let remaining = self
            .running()
            .values()
            .filter(|running| running.background)
            .count();
        if remaining == 0 {
            tracing::debug!("All background transfers finished");
            BackgroundCompletion::shared().finish_events();
        }
    }

    fn request_builder(
        &self,
        request: &Request,
        staged: Option<&StagedTransfer>,
        events: &Arc<dyn TransportEvents>,
    ) -> Result<reqwest::RequestBuilder> {
        let mut headers = request.effective_headers();

        if let Some(staged) = staged.filter(|staged| staged.offset() > 0) {
            let range = HeaderValue::from_str(&format!("bytes={}-", staged.offset()))
                .map_err(|_| Error::InvalidHeader)?;
            headers.insert(header::RANGE, range);
            if let Some(validator) = staged.validator() {
                if let Ok(value) = HeaderValue::from_str(&validator) {
                    headers.insert(header::IF_RANGE, value);
                }
            }
        }

        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone());

        if let Some(timeout) = request.timeout() {
            builder = builder.timeout(timeout);
        }

        if let Some(body) = request.body().filter(|body| !body.is_empty()) {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
            builder = builder.body(upload_body(body.content().clone(), events.clone()));
        }

        Ok(builder.headers(headers))
    }

    async fn perform(
        &self,
        builder: reqwest::RequestBuilder,
        request: &Request,
        staged: Option<&StagedTransfer>,
        events: &Arc<dyn TransportEvents>,
    ) -> Result<()> {
        let response = builder.send().await.map_err(Error::from_reqwest)?;
        let status = response.status();

        // Decide where the body starts: a 206 continues the staged file,
        // anything else means the server sent the whole entity again.
        let start = match staged {
            Some(staged) if staged.offset() > 0 && status == StatusCode::PARTIAL_CONTENT => {
                staged.offset()
            }
            Some(staged) if staged.offset() > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE => {
                // Range not satisfiable - the staged file is already complete
                staged.offset()
            }
            _ => 0,
        };

        let total = if status == StatusCode::RANGE_NOT_SATISFIABLE && start > 0 {
            Some(start)
        } else {
            response.content_length().map(|len| len + start)
        };
        let metadata = ResponseMetadata::new(
            if start > 0 { StatusCode::OK } else { status },
            response.headers().clone(),
            response.url().clone(),
        )
        .with_expected_content_length(total);

        if let Some(staged) = staged {
            staged.set_validator(
                response
                    .headers()
                    .get(header::ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string),
            );
        }

        events.on_response(metadata.clone());

        if self.error_for_status && !status.is_success() && start == 0 {
            return Err(Error::Status(status));
        }

        let cache_key = self
            .cache
            .as_ref()
            .filter(|_| *request.method() == Method::GET && status.is_success())
            .map(|_| request.fingerprint());

        let body = match staged {
            Some(staged) => {
                let mut file = staged.open_at(start).await?;
                if status == StatusCode::RANGE_NOT_SATISFIABLE && start > 0 {
                    events.on_progress(Direction::Download, start, total);
                } else {
                    let mut stream = response.bytes_stream();
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk.map_err(Error::from_reqwest)?;
                        let written = staged.write(&mut file, &chunk).await?;
                        events.on_progress(Direction::Download, written, total);
                    }
                }
                let body = staged.finish(file).await?;
                events.on_data(body.clone());
                body
            }
            None => {
                let mut collected = BytesMut::new();
                let mut received = 0u64;
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(Error::from_reqwest)?;
                    received += chunk.len() as u64;
                    if cache_key.is_some() {
                        collected.extend_from_slice(&chunk);
                    }
                    events.on_data(chunk);
                    events.on_progress(Direction::Download, received, total);
                }
                collected.freeze()
            }
        };

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key) {
            tracing::trace!(fingerprint = %key, "Storing response in cache");
            cache.insert(key, CachedResponse::new(metadata, body));
        }

        Ok(())
    }
}

/// Stream `content` as the request body, reporting upload progress per chunk
fn upload_body(content: Bytes, events: Arc<dyn TransportEvents>) -> reqwest::Body {
    let total = content.len() as u64;
    let chunks: Vec<Bytes> = (0..content.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| content.slice(start..(start + UPLOAD_CHUNK_SIZE).min(content.len())))
        .collect();

    let mut sent = 0u64;
    let stream = futures_util::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        events.on_progress(Direction::Upload, sent, Some(total));
        Ok::<_, std::io::Error>(chunk)
    });
    reqwest::Body::wrap_stream(stream)
}

/// Builder for [`ReqwestTransport`]
#[derive(Debug, Default)]
pub struct ReqwestTransportBuilder {
    config: TransportConfig,
    no_proxy: bool,
    runtime: Option<tokio::runtime::Handle>,
}

impl ReqwestTransportBuilder {
    /// Create a new transport builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Set request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Add a default header
    pub fn header(mut self, name: impl TryInto<http::HeaderName>, value: &str) -> Result<Self> {
        let name = name.try_into().map_err(|_| Error::InvalidHeader)?;
        let value = HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader)?;
        self.config
            .default_headers
            .get_or_insert_with(http::HeaderMap::new)
            .insert(name, value);
        Ok(self)
    }

    /// Set HTTP proxy
    pub fn http_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.http_proxy = Some(proxy);
        self
    }

    /// Set HTTPS proxy
    pub fn https_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.https_proxy = Some(proxy);
        self
    }

    /// Ignore proxies configured through the environment
    pub fn no_proxy(mut self) -> Self {
        self.no_proxy = true;
        self
    }

    /// Deliver non-2xx responses as [`Error::Status`]
    pub fn error_for_status(mut self, enabled: bool) -> Self {
        self.config.error_for_status = enabled;
        self
    }

    /// Cache successful `GET` responses
    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.config.use_cache = enabled;
        self
    }

    /// Keep at most `capacity` cached responses
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = Some(capacity);
        self
    }

    /// Stage background payloads in `directory`
    pub fn staging_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.config.staging_directory = Some(directory.into());
        self
    }

    /// Run submissions on `runtime` instead of the current one
    pub fn runtime(mut self, runtime: tokio::runtime::Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the transport
    pub fn build(self) -> Result<ReqwestTransport> {
        let config = self.config;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => tokio::runtime::Handle::try_current().map_err(|_| {
                Error::Internal("ReqwestTransport must be built inside a tokio runtime".to_string())
            })?,
        };

        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        if let Some(default_headers) = config.default_headers {
            builder = builder.default_headers(default_headers);
        }

        if self.no_proxy {
            builder = builder.no_proxy();
        }

        if let Some(http_proxy) = config.http_proxy {
            let proxy_url = format!("http://{}:{}", http_proxy.host, http_proxy.port);
            let mut proxy = reqwest::Proxy::http(&proxy_url)
                .map_err(|e| Error::Internal(format!("Invalid HTTP proxy: {}", e)))?;

            if let (Some(username), Some(password)) = (&http_proxy.username, &http_proxy.password) {
                proxy = proxy.basic_auth(username, password);
            }
            builder = builder.proxy(proxy);
        }

        if let Some(https_proxy) = config.https_proxy {
            let proxy_url = format!("https://{}:{}", https_proxy.host, https_proxy.port);
            let mut proxy = reqwest::Proxy::https(&proxy_url)
                .map_err(|e| Error::Internal(format!("Invalid HTTPS proxy: {}", e)))?;

            if let (Some(username), Some(password)) = (&https_proxy.username, &https_proxy.password)
            {
                proxy = proxy.basic_auth(username, password);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create reqwest client: {}", e)))?;

        let staging_directory = config.staging_directory.unwrap_or_else(|| {
            crate::background::background_session_files_directory().to_path_buf()
        });

        Ok(ReqwestTransport {
            inner: Arc::new(TransportInner {
                client,
                runtime,
                error_for_status: config.error_for_status,
                cache: config.use_cache.then(|| {
                    ResponseCache::with_capacity(
                        config.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
                    )
                }),
                staging_directory,
                running: Mutex::new(HashMap::new()),
                staged: Mutex::new(HashMap::new()),
            }),
        })
    }
}
