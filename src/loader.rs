// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::LoadError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::progress::{LoadProgress, ProgressReporter};

/// HTTP cache hint sent with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Accept cached responses up to this much past their expiry
    MaxStale(Duration),
    /// Only answer from a cache, never from the origin
    OnlyIfCached,
}

impl CacheMode {
    fn header_value(self) -> Option<String> {
        match self {
            CacheMode::Default => None,
            CacheMode::MaxStale(stale) => Some(format!("max-stale={}", stale.as_secs())),
            CacheMode::OnlyIfCached => Some("only-if-cached".to_string()),
        }
    }
}

/// Per-request limits and cache behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchOptions {
    /// Abort once the response is known to exceed this many bytes
    pub max_bytes: Option<u64>,
    pub cache: CacheMode,
}

impl FetchOptions {
    pub fn limited(max_bytes: u64) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            cache: CacheMode::Default,
        }
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }
}

/// Cancellable, size-limited loader for feeds, logos and media files
#[derive(Clone)]
pub struct RemoteLoader {
    client: Arc<dyn HttpClient>,
}

/// Destination of a response body
enum BodySink<'a> {
    Memory(&'a mut BytesMut),
    File { file: File, path: PathBuf },
}

impl BodySink<'_> {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), LoadError> {
        match self {
            BodySink::Memory(buffer) => {
                buffer.extend_from_slice(chunk);
                Ok(())
            }
            BodySink::File { file, path } => {
                file.write_all(chunk).await.map_err(|e| LoadError::Io {
                    path: path.clone(),
                    source: e,
                })
            }
        }
    }
}

impl RemoteLoader {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// Load `url` into memory
    pub async fn fetch(
        &self,
        url: &Url,
        options: &FetchOptions,
        cancel: &CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<Bytes, LoadError> {
        let response = self.open(url, options, cancel, reporter).await?;
        let mut buffer = BytesMut::new();
        let mut sink = BodySink::Memory(&mut buffer);
        read_body(url, response, options, cancel, reporter, &mut sink).await?;
        drop(sink);

        Ok(buffer.freeze())
    }

    /// Stream `url` into the file at `path`
    ///
    /// The body is written to a `.partial` sibling which is renamed once
    /// complete and removed on any failure. Returns the byte count.
    pub async fn fetch_to_file(
        &self,
        url: &Url,
        path: &Path,
        options: &FetchOptions,
        cancel: &CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<u64, LoadError> {
        let response = self.open(url, options, cancel, reporter).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LoadError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let partial_path = partial_path_for(path);
        let file = File::create(&partial_path)
            .await
            .map_err(|e| LoadError::Io {
                path: partial_path.clone(),
                source: e,
            })?;
        let mut sink = BodySink::File {
            file,
            path: partial_path.clone(),
        };

        let result = async {
            let written = read_body(url, response, options, cancel, reporter, &mut sink).await?;
            if let BodySink::File { file, path } = &mut sink {
                file.flush().await.map_err(|e| LoadError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            }
            Ok::<u64, LoadError>(written)
        }
        .await;
        drop(sink);

        match result {
            Ok(written) => {
                tokio::fs::rename(&partial_path, path)
                    .await
                    .map_err(|e| LoadError::Io {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial_path).await;
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        url: &Url,
        options: &FetchOptions,
        cancel: &CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<HttpResponse, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        reporter.report(LoadProgress::Connecting);

        let request = HttpRequest {
            url: url.to_string(),
            cache_control: options.cache.header_value(),
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoadError::Cancelled),
            result = self.client.get_stream(&request) => result,
        };
        let response = result.map_err(|e| LoadError::Http {
            url: url.to_string(),
            source: e,
        })?;

        if response.status >= 400 {
            return Err(LoadError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        if let (Some(limit), Some(length)) = (options.max_bytes, response.content_length)
            && length > limit
        {
            return Err(LoadError::LimitExceeded {
                url: url.to_string(),
                limit,
            });
        }

        Ok(response)
    }
}

async fn read_body(
    url: &Url,
    response: HttpResponse,
    options: &FetchOptions,
    cancel: &CancellationToken,
    reporter: &dyn ProgressReporter,
    sink: &mut BodySink<'_>,
) -> Result<u64, LoadError> {
    let total = response.content_length;
    let mut stream = response.body;
    let mut received: u64 = 0;
    let mut last_percent = None;

    reporter.report(LoadProgress::Loading {
        percent: total.and_then(|t| LoadProgress::percent_of(0, t)),
    });

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%url, "Load cancelled");
                return Err(LoadError::Cancelled);
            }
            next = stream.next() => next,
        };

        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| LoadError::Http {
            url: url.to_string(),
            source: e,
        })?;

        received += chunk.len() as u64;
        if let Some(limit) = options.max_bytes
            && received > limit
        {
            return Err(LoadError::LimitExceeded {
                url: url.to_string(),
                limit,
            });
        }

        sink.write(&chunk).await?;

        if let Some(total) = total {
            let percent = LoadProgress::percent_of(received, total);
            if percent != last_percent {
                last_percent = percent;
                reporter.report(LoadProgress::Loading { percent });
            }
        }
    }

    Ok(received)
}

fn partial_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use crate::http::ByteStream;
    use crate::progress::NoopReporter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::sync::Notify;

    /// Canned responses keyed by URL, with a request log and an optional gate
    /// that holds every request open until released.
    #[derive(Default)]
    pub(crate) struct MockHttpClient {
        pub responses: Mutex<HashMap<String, (u16, Vec<u8>)>>,
        pub requests: Mutex<Vec<HttpRequest>>,
        pub calls: AtomicUsize,
        pub gate: Option<Arc<Notify>>,
        pub chunk_size: Option<usize>,
        pub hide_length: bool,
    }

    impl MockHttpClient {
        pub fn with(url: &str, status: u16, body: &[u8]) -> Self {
            let client = Self::default();
            client.respond(url, status, body);
            client
        }

        pub fn respond(&self, url: &str, status: u16, body: &[u8]) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), (status, body.to_vec()));
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_stream(&self, request: &HttpRequest) -> Result<HttpResponse, reqwest::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            let (status, data) = self
                .responses
                .lock()
                .unwrap()
                .get(&request.url)
                .cloned()
                .unwrap_or((404, Vec::new()));
            let len = data.len() as u64;

            let chunk_size = self.chunk_size.unwrap_or(data.len().max(1));
            let chunks: Vec<Result<Bytes, reqwest::Error>> = data
                .chunks(chunk_size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let stream: ByteStream = Box::pin(futures::stream::iter(chunks));

            Ok(HttpResponse {
                status,
                content_length: (!self.hide_length).then_some(len),
                body: stream,
            })
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn fetch_returns_body() {
        let client = Arc::new(MockHttpClient::with("https://example.com/a", 200, b"hello"));
        let loader = RemoteLoader::new(client.clone());

        let bytes = loader
            .fetch(
                &url("https://example.com/a"),
                &FetchOptions::default(),
                &CancellationToken::new(),
                &NoopReporter,
            )
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"hello");
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn fetch_sends_cache_hints() {
        let client = Arc::new(MockHttpClient::with("https://example.com/a", 200, b"x"));
        let loader = RemoteLoader::new(client.clone());
        let options = FetchOptions::default().with_cache(CacheMode::MaxStale(Duration::from_secs(60)));

        loader
            .fetch(
                &url("https://example.com/a"),
                &options,
                &CancellationToken::new(),
                &NoopReporter,
            )
            .await
            .unwrap();

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].cache_control.as_deref(), Some("max-stale=60"));
    }

    #[tokio::test]
    async fn declared_length_over_limit_aborts() {
        let client = Arc::new(MockHttpClient::with("https://example.com/a", 200, &[0u8; 100]));
        let loader = RemoteLoader::new(client);

        let result = loader
            .fetch(
                &url("https://example.com/a"),
                &FetchOptions::limited(10),
                &CancellationToken::new(),
                &NoopReporter,
            )
            .await;

        assert!(matches!(result, Err(LoadError::LimitExceeded { limit: 10, .. })));
    }

    #[tokio::test]
    async fn running_count_over_limit_aborts() {
        let client = MockHttpClient::with("https://example.com/a", 200, &[0u8; 100]);
        let client = Arc::new(MockHttpClient {
            hide_length: true,
            chunk_size: Some(8),
            ..client
        });
        let loader = RemoteLoader::new(client);

        let result = loader
            .fetch(
                &url("https://example.com/a"),
                &FetchOptions::limited(20),
                &CancellationToken::new(),
                &NoopReporter,
            )
            .await;

        assert!(matches!(result, Err(LoadError::LimitExceeded { .. })));
    }

    #[tokio::test]
    async fn http_errors_are_reported() {
        let client = Arc::new(MockHttpClient::with("https://example.com/a", 500, b"oops"));
        let loader = RemoteLoader::new(client);

        let result = loader
            .fetch(
                &url("https://example.com/a"),
                &FetchOptions::default(),
                &CancellationToken::new(),
                &NoopReporter,
            )
            .await;

        assert!(matches!(result, Err(LoadError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn cancelled_fetch_returns_no_data() {
        let client = Arc::new(MockHttpClient::with("https://example.com/a", 200, b"data"));
        let loader = RemoteLoader::new(client);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = loader
            .fetch(
                &url("https://example.com/a"),
                &FetchOptions::default(),
                &cancel,
                &NoopReporter,
            )
            .await;

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn progress_reports_lifecycle_and_percent() {
        let client = MockHttpClient::with("https://example.com/a", 200, &[1u8; 40]);
        let client = Arc::new(MockHttpClient {
            chunk_size: Some(10),
            ..client
        });
        let loader = RemoteLoader::new(client);
        let events = Mutex::new(Vec::new());
        let reporter = |event: LoadProgress| events.lock().unwrap().push(event);

        loader
            .fetch(
                &url("https://example.com/a"),
                &FetchOptions::default(),
                &CancellationToken::new(),
                &reporter,
            )
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events[0], LoadProgress::Connecting);
        assert_eq!(events[1], LoadProgress::Loading { percent: Some(0) });
        assert_eq!(
            events.last(),
            Some(&LoadProgress::Loading { percent: Some(100) })
        );
    }

    #[tokio::test]
    async fn fetch_to_file_writes_and_renames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("episode.mp3");
        let client = Arc::new(MockHttpClient::with("https://example.com/a.mp3", 200, b"audio"));
        let loader = RemoteLoader::new(client);

        let written = loader
            .fetch_to_file(
                &url("https://example.com/a.mp3"),
                &path,
                &FetchOptions::default(),
                &CancellationToken::new(),
                &NoopReporter,
            )
            .await
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"audio");
        assert!(!partial_path_for(&path).exists());
    }

    #[tokio::test]
    async fn failed_fetch_to_file_leaves_no_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.mp3");
        let client = MockHttpClient::with("https://example.com/a.mp3", 200, &[0u8; 64]);
        let client = Arc::new(MockHttpClient {
            hide_length: true,
            chunk_size: Some(16),
            ..client
        });
        let loader = RemoteLoader::new(client);

        let result = loader
            .fetch_to_file(
                &url("https://example.com/a.mp3"),
                &path,
                &FetchOptions::limited(20),
                &CancellationToken::new(),
                &NoopReporter,
            )
            .await;

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!partial_path_for(&path).exists());
    }
}
