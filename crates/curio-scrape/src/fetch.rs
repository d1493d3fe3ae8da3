use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, Url};

use crate::guard::{check_url_target, GuardPolicy};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;
const MAX_REDIRECTS: usize = 5;
const USER_AGENT: &str = "Curio/1.0";

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}")]
    HttpStatus { status: u16 },
    #[error("page exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

/// Bounded page fetcher. The body is read incrementally and abandoned as soon
/// as it crosses the size cap; every redirect hop is re-checked against the
/// guard policy.
pub struct PageFetcher {
    client: Client,
    max_bytes: usize,
}

impl PageFetcher {
    pub fn new(policy: GuardPolicy) -> Self {
        let redirect_policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            match check_url_target(attempt.url(), &policy) {
                Ok(()) => attempt.follow(),
                Err(error) => attempt.error(error),
            }
        });
        let client = Client::builder()
            .connect_timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .redirect(redirect_policy)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            max_bytes: MAX_PAGE_BYTES,
        }
    }

    pub async fn fetch(&self, url: Url) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
            });
        }

        if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            let value = content_type.to_str().unwrap_or("").to_ascii_lowercase();
            if !is_texty(&value) {
                return Err(FetchError::UnsupportedContentType(value));
            }
        }

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Request(e.to_string()))?;
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn is_texty(content_type: &str) -> bool {
    content_type.is_empty()
        || content_type.starts_with("text/")
        || content_type.contains("html")
        || content_type.contains("xml")
}
