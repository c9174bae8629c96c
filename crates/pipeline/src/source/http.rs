//! [`ImageSource`] for generators that hand out image URLs over plain HTTP.

use super::ImageSource;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::time::Duration;

/// Calls `GET <endpoint>?generate=true`, which answers with the URL of a
/// freshly generated image as its body.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpImageSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .or_raise(|| ErrorKind::Source)?;
        Ok(Self { client, endpoint: endpoint.into() })
    }

    async fn get(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .or_raise(|| ErrorKind::Source)
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn generate_url(&self) -> Result<String> {
        let request = self.client.get(&self.endpoint).query(&[("generate", "true")]);
        let body = self.get(request).await?.text().await.or_raise(|| ErrorKind::Source)?;
        let url = body.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            tracing::warn!(endpoint = %self.endpoint, %url, "Generator answered with something that is not a URL");
            exn::bail!(ErrorKind::Source);
        }
        Ok(url.to_string())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(self.client.get(url)).await?;
        let bytes = response.bytes().await.or_raise(|| ErrorKind::Source)?;
        tracing::debug!(%url, bytes = bytes.len(), "Image downloaded");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let source = HttpImageSource::new("https://example.com/api", Duration::from_secs(5)).unwrap();
        assert_eq!(source.endpoint, "https://example.com/api");
    }
}
