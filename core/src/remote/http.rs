use async_trait::async_trait;
use mime::Mime;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};

use super::{Fetched, Fetcher, RemoteError, Result};

/// [`Fetcher`] over plain HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Fetched> {
        debug!("Fetching remote image");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::Network(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok());

        let data = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(Box::new(e)))?
            .to_vec();

        debug!(bytes = data.len(), "Remote image fetched");
        Ok(Fetched { data, content_type })
    }
}
