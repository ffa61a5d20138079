use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::Result;

/// A cheap round-trip used to sample latency.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn probe(&self) -> Result<Duration>;
}

/// `HEAD` request against a known endpoint. Any HTTP status counts as a
/// completed round-trip; only transport failures count as loss.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(crate::transport::map_reqwest_error)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LatencyProbe for HttpProbe {
    async fn probe(&self) -> Result<Duration> {
        let start = Instant::now();
        self.client
            .head(&self.url)
            .send()
            .await
            .map_err(crate::transport::map_reqwest_error)?;
        Ok(start.elapsed())
    }
}
