//! Extractor backed by a JSON-over-HTTP extraction service

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::extractor::{Extractor, StageOutput, StageRequest};
use crate::config::ExtractorConfig;
use crate::error::{Error, Result};

/// Calls `POST {base_url}/stages/{stage}` for every stage request
pub struct HttpExtractor {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpExtractor {
    /// Create a new HTTP extractor
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn stage_url(&self, request: &StageRequest) -> String {
        format!("{}/stages/{}", self.base_url, request.stage)
    }
}

/// Throttling, timeouts and server faults are worth retrying; other rejections are not
fn classify_status(status: StatusCode, body: &str) -> Error {
    let message = format!("extractor returned HTTP {}: {}", status, body.trim());
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Error::transient(message)
    } else {
        Error::terminal(message)
    }
}

fn classify_send_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::transient(format!("extractor request failed: {}", err))
    } else {
        Error::Http(err)
    }
}

/// A body cut short by a timeout or dropped connection can succeed on retry
fn classify_read_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_body() || err.is_connect() {
        Error::transient(format!("extractor response interrupted: {}", err))
    } else {
        Error::Http(err)
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn run_stage(&self, request: &StageRequest) -> Result<StageOutput> {
        let url = self.stage_url(request);
        tracing::debug!(
            job_id = %request.job_id,
            stage = %request.stage,
            section = ?request.section,
            attempt = request.attempt,
            "POST {}",
            url
        );

        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(classify_send_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body = response.bytes().await.map_err(classify_read_error)?;
        serde_json::from_slice::<StageOutput>(&body)
            .map_err(|e| Error::terminal(format!("malformed extractor response: {}", e)))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::StageKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn acquisition_request() -> StageRequest {
        StageRequest {
            job_id: uuid::Uuid::new_v4(),
            stage: StageKind::Acquisition,
            filename: "a.pdf".into(),
            mime_type: "application/pdf".into(),
            content_base64: Some("JVBERg==".into()),
            text: None,
            section: None,
            section_offset: None,
            attempt: 1,
        }
    }

    /// Serves one connection with `head` and then holds it open for `hold`
    async fn one_shot_server(head: &'static str, hold: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(hold).await;
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "bad pdf").is_retryable());
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY, "").is_retryable());
    }

    #[test]
    fn test_stage_url() {
        let config = ExtractorConfig {
            base_url: "http://extractor:9090/".to_string(),
            ..ExtractorConfig::default()
        };
        let extractor = HttpExtractor::new(&config).unwrap();
        let request = StageRequest {
            job_id: uuid::Uuid::new_v4(),
            stage: StageKind::Recognition,
            filename: "scan.png".into(),
            mime_type: "image/png".into(),
            content_base64: None,
            text: None,
            section: None,
            section_offset: None,
            attempt: 1,
        };
        assert_eq!(
            extractor.stage_url(&request),
            "http://extractor:9090/stages/recognition"
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let config = ExtractorConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            api_key: None,
        };
        let extractor = HttpExtractor::new(&config).unwrap();
        let err = extractor.run_stage(&acquisition_request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stalled_body_is_transient() {
        let base_url = one_shot_server(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{",
            Duration::from_secs(5),
        )
        .await;
        let config = ExtractorConfig {
            base_url,
            timeout_secs: 1,
            api_key: None,
        };
        let extractor = HttpExtractor::new(&config).unwrap();
        let err = extractor.run_stage(&acquisition_request()).await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_terminal() {
        let base_url = one_shot_server(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 8\r\nconnection: close\r\n\r\nnot json",
            Duration::from_millis(0),
        )
        .await;
        let config = ExtractorConfig {
            base_url,
            timeout_secs: 5,
            api_key: None,
        };
        let extractor = HttpExtractor::new(&config).unwrap();
        let err = extractor.run_stage(&acquisition_request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("malformed extractor response"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_retried() {
        let config = ExtractorConfig {
            base_url: "not a url".to_string(),
            timeout_secs: 1,
            api_key: None,
        };
        let extractor = HttpExtractor::new(&config).unwrap();
        let err = extractor.run_stage(&acquisition_request()).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
