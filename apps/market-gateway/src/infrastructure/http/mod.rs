//! HTTP transport (reqwest).
//!
//! One client per venue, rooted at the venue's REST base URL. Requests are
//! made once; failures surface to the caller as [`TransportError`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use crate::application::ports::{Pairs, RestTransport, TransportError};
use crate::domain::venue::VenueId;
use crate::infrastructure::metrics::{self, RequestOutcome};

/// Error bodies longer than this are cut before they reach error messages.
const MAX_ERROR_BODY: usize = 512;

/// Production [`RestTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    venue: VenueId,
    client: Client,
    base_url: String,
    default_headers: Vec<(String, String)>,
}

impl HttpTransport {
    /// Create a transport with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the TLS backend cannot be
    /// initialized.
    pub fn new(
        venue: VenueId,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            venue,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_headers: Vec::new(),
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_bearer_token(mut self, token: &str) -> Self {
        self.default_headers
            .push(("Authorization".to_string(), format!("Bearer {token}")));
        self
    }

    /// REST base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn with_headers(&self, mut request: RequestBuilder, extra: &Pairs) -> RequestBuilder {
        for (name, value) in self.default_headers.iter().chain(extra) {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    async fn execute(&self, request: RequestBuilder, path: &str) -> Result<Value, TransportError> {
        let started = Instant::now();
        let result = match request.send().await {
            Ok(response) => decode(response).await,
            Err(e) => Err(map_reqwest_error(&e)),
        };

        let outcome = if result.is_ok() {
            RequestOutcome::Success
        } else {
            RequestOutcome::Failure
        };
        metrics::record_rest_request(self.venue, outcome, started.elapsed());

        if let Err(e) = &result {
            tracing::warn!(venue = %self.venue, path, error = %e, "REST request failed");
        }
        result
    }
}

#[async_trait]
impl RestTransport for HttpTransport {
    async fn get(
        &self,
        path: &str,
        query: &Pairs,
        headers: &Pairs,
    ) -> Result<Value, TransportError> {
        let request = self.with_headers(self.client.get(self.url(path)).query(query), headers);
        self.execute(request, path).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let request = self.with_headers(self.client.post(self.url(path)).json(body), &[]);
        self.execute(request, path).await
    }
}

async fn decode(response: Response) -> Result<Value, TransportError> {
    let status = response.status();
    let text = response.text().await.map_err(|e| map_reqwest_error(&e))?;

    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            body: truncate(&text, MAX_ERROR_BODY),
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
}

fn map_reqwest_error(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_decode() {
        TransportError::Decode(error.to_string())
    } else {
        TransportError::Network(error.to_string())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_trailing_slash() {
        let http = HttpTransport::new(VenueId::Okx, "https://www.okx.com/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(http.base_url(), "https://www.okx.com");
        assert_eq!(http.url("/api/v5/public/instruments"), "https://www.okx.com/api/v5/public/instruments");
    }

    #[test]
    fn bearer_token_becomes_default_header() {
        let http = HttpTransport::new(VenueId::Oanda, "https://example.invalid", Duration::from_secs(1))
            .unwrap()
            .with_bearer_token("abc");
        assert_eq!(
            http.default_headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é…");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let http = HttpTransport::new(VenueId::Binance, "http://127.0.0.1:9", Duration::from_secs(2))
            .unwrap();
        let err = http.get("/fapi/v1/ping", &[], &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_) | TransportError::Timeout));
    }
}
