//! HTTP image fetch with a streamed size cap, grounded on a 64KB chunked
//! read that aborts as soon as the configured byte budget is exceeded
//! rather than buffering the whole response first.

use bytes::Bytes;
use civisense_core::traits::ImageFetcher;
use civisense_core::{Error, Result};
use futures::StreamExt;
use image::RgbImage;
use reqwest::Client;
use std::time::Duration;

/// Fetches a complaint's attached image over HTTP, rejecting non-image
/// content types and oversized bodies before decode.
pub struct ReqwestImageFetcher {
    client: Client,
    max_bytes: u64,
}

impl ReqwestImageFetcher {
    /// Builds a fetcher with the given total request timeout and byte cap.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying `reqwest::Client` fails to build.
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Other(anyhow::anyhow!(err)))?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait::async_trait]
impl ImageFetcher for ReqwestImageFetcher {
    async fn fetch(&self, url: &str) -> Result<RgbImage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| Error::FetchFailed(err.to_string()))?
            .error_for_status()
            .map_err(|err| Error::FetchFailed(err.to_string()))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.contains("image") {
            return Err(Error::NotAnImage(if content_type.is_empty() {
                "unknown".to_string()
            } else {
                content_type
            }));
        }

        let bytes = read_capped(response, self.max_bytes).await?;
        decode_rgb(&bytes)
    }
}

async fn read_capped(response: reqwest::Response, max_bytes: u64) -> Result<Bytes> {
    let mut buffer = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| Error::FetchFailed(err.to_string()))?;
        buffer.extend_from_slice(&chunk);
        if buffer.len() as u64 > max_bytes {
            return Err(Error::TooLarge);
        }
    }
    Ok(Bytes::from(buffer))
}

fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).map_err(|err| Error::DecodeFailed(err.to_string()))?;
    Ok(image.to_rgb8())
}
