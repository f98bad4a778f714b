//! Transport - Abstraction over the HTTP POST the REDCap API is driven by.
//!
//! [`DataClient`](super::DataClient) only needs "post this form, give me the
//! body back". Keeping that behind a trait lets tests feed canned responses.

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Longest response body quoted back in a status error.
const MAX_ERROR_BODY: usize = 512;

/// Form-encoded POST to the remote service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `form` to `url` and return the body of a 2xx response.
    async fn post_form(&self, url: &str, form: &[(String, String)])
        -> Result<String, TransportError>;
}

/// reqwest-backed transport with a bounded per-request timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("redcapfs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<String, TransportError> {
        debug!("POST {} ({} params)", url, form.len());

        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // REDCap explains most failures in a {"error": "..."} body
            if let Some(message) = super::query::remote_error(&body) {
                return Err(TransportError::Remote(message));
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        Ok(body)
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_body_unchanged() {
        assert_eq!(truncate("forbidden", 512), "forbidden");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let body = "ééééé";
        let cut = truncate(body, 3);
        assert_eq!(cut, "é...");
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new(Duration::from_secs(1)).is_ok());
    }
}
