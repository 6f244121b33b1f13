//! Image/description matcher client
//!
//! Sends the listing image and its description to the matcher service as a
//! multipart form. Remote images are downloaded first and forwarded as bytes.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::debug;

use super::{ensure_unit_interval, ImageMatcher, MatchResult};
use crate::types::{Result, VeritasError};

/// Configuration for the matcher client
#[derive(Debug, Clone)]
pub struct ImageMatcherConfig {
    /// Service base URL (e.g. "http://localhost:8001")
    pub base_url: String,
    /// Timeout covering the image download and the prediction call
    pub timeout: Duration,
}

impl Default for ImageMatcherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

/// HTTP client for the image/description matcher
pub struct HttpImageMatcher {
    config: ImageMatcherConfig,
    http_client: reqwest::Client,
}

impl HttpImageMatcher {
    pub fn new(config: ImageMatcherConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("veritas-worker/0.1")
            .build()
            .map_err(|e| VeritasError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn predict_url(&self) -> String {
        format!("{}/predict", self.config.base_url.trim_end_matches('/'))
    }

    /// Fetch image bytes from a URL or the local filesystem
    async fn load_image(&self, image_ref: &str) -> Result<Bytes> {
        if is_remote(image_ref) {
            debug!(image_ref = %image_ref, "Downloading image");
            let bytes = self
                .http_client
                .get(image_ref)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            Ok(bytes)
        } else {
            tokio::fs::read(image_ref).await.map(Bytes::from).map_err(|e| {
                VeritasError::MalformedJob(format!("image {} unreadable: {}", image_ref, e))
            })
        }
    }
}

#[async_trait]
impl ImageMatcher for HttpImageMatcher {
    async fn match_image(&self, image_ref: &str, description: &str) -> Result<MatchResult> {
        let image = self.load_image(image_ref).await?;

        let form = Form::new()
            .part(
                "image",
                Part::bytes(image.to_vec()).file_name(image_file_name(image_ref)),
            )
            .text("description", description.to_string());

        let result: MatchResult = self
            .http_client
            .post(self.predict_url())
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        ensure_unit_interval("score", result.score)?;

        debug!(
            label = ?result.label,
            score = result.score,
            "Image matcher responded"
        );
        Ok(result)
    }
}

fn is_remote(image_ref: &str) -> bool {
    let lower = image_ref.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Last path segment without query string, or "image"
fn image_file_name(image_ref: &str) -> String {
    let without_query = image_ref.split(['?', '#']).next().unwrap_or(image_ref);
    without_query
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("image")
        .to_string()
}
