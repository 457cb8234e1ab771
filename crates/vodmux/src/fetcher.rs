// Segment fetcher: downloads one segment (or manifest document) with a
// per-attempt timeout and backoff retry.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::config::FetcherConfig;
use crate::error::{Error, Result};
use crate::retry::{Backoff, retry};

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: Client,
    segment_timeout: Duration,
    backoff: Backoff,
}

impl SegmentFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        install_rustls_provider();

        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.segment_timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self::with_client(client, config))
    }

    /// Use an existing client (shared pools, custom proxies).
    pub fn with_client(client: Client, config: &FetcherConfig) -> Self {
        Self {
            client,
            segment_timeout: config.segment_timeout(),
            backoff: Backoff::from(config),
        }
    }

    /// Stream `url` into `dest`, retrying transient failures. `dest` is
    /// truncated at the start of every attempt. Returns the bytes written.
    #[instrument(skip(self, dest, token), fields(url = %url))]
    pub async fn fetch_to_file(
        &self,
        url: &Url,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<u64> {
        let written = retry(&self.backoff, token, |attempt| async move {
            trace!(attempt, "Fetching segment");
            self.bounded(url, token, self.stream_to_file(url, dest, token))
                .await
        })
        .await?;

        debug!(bytes = written, "Segment fetched");
        Ok(written)
    }

    /// Fetch a whole (small) document into memory.
    #[instrument(skip(self, token), fields(url = %url))]
    pub async fn fetch_bytes(&self, url: &Url, token: &CancellationToken) -> Result<Bytes> {
        retry(&self.backoff, token, |_| async move {
            self.bounded(url, token, async {
                let response = self.get(url).await?;
                Ok::<_, Error>(response.bytes().await?)
            })
            .await
        })
        .await
    }

    /// Open `url` as a byte stream. Retry covers obtaining the response only;
    /// the stream ends early when `token` is cancelled.
    #[instrument(skip(self, token), fields(url = %url))]
    pub async fn open_stream(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let response = retry(&self.backoff, token, |_| async move {
            self.bounded(url, token, self.get(url)).await
        })
        .await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from))
            .take_until(token.clone().cancelled_owned())
            .boxed())
    }

    async fn get(&self, url: &Url) -> Result<Response> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::http_status(status, url.as_str()));
        }
        Ok(response)
    }

    async fn stream_to_file(
        &self,
        url: &Url,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<u64> {
        let response = self.get(url).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        Ok(written)
    }

    /// Run one attempt under the segment timeout and the cancellation token.
    async fn bounded<T>(
        &self,
        url: &Url,
        token: &CancellationToken,
        attempt: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.segment_timeout, attempt) => {
                result.unwrap_or_else(|_| {
                    Err(Error::Timeout {
                        timeout: self.segment_timeout,
                        url: url.to_string(),
                    })
                })
            }
        }
    }
}
