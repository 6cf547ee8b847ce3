//! 2Captcha client for plain-text image CAPTCHAs
//!
//! Uses the classic `in.php` / `res.php` endpoints with `json=1`:
//! an image is uploaded as base64, then `res.php?action=get` is polled
//! until the answer is ready. Accepted or rejected answers are reported
//! back with `reportgood` / `reportbad`.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::traits::{CaptchaSolution, CaptchaSolver};

pub const DEFAULT_API_URL: &str = "https://2captcha.com";

const NOT_READY: &str = "CAPCHA_NOT_READY";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: i64,
    request: Value,
}

impl ApiResponse {
    fn request_text(&self) -> String {
        match &self.request {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct TwoCaptchaSolver {
    client: Client,
    api_key: String,
    api_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl TwoCaptchaSolver {
    pub fn new(api_key: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        })
    }

    /// Point the client at another API host (used by tests)
    #[must_use]
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_polling(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self
    }

    /// Image bytes as base64, either from a `data:` URI or downloaded
    async fn image_base64(&self, image_ref: &str) -> Result<String> {
        if let Some(data) = image_ref.strip_prefix("data:") {
            let (_, encoded) = data
                .split_once("base64,")
                .ok_or_else(|| anyhow!("CAPTCHA data URI is not base64 encoded"))?;
            return Ok(encoded.to_string());
        }

        let response = self.client.get(image_ref).send().await?;
        if !response.status().is_success() {
            bail!("Failed to download CAPTCHA image: {}", response.status());
        }
        let bytes = response.bytes().await?;
        Ok(STANDARD.encode(&bytes))
    }

    async fn res(&self, params: &[(&str, &str)]) -> Result<ApiResponse> {
        let mut query = vec![("key", self.api_key.as_str()), ("json", "1")];
        query.extend_from_slice(params);

        let response = self
            .client
            .get(format!("{}/res.php", self.api_url))
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("2Captcha res.php returned {}", response.status());
        }
        Ok(response.json().await?)
    }

    async fn submit(&self, body: &str) -> Result<String> {
        let form = [
            ("key", self.api_key.as_str()),
            ("method", "base64"),
            ("body", body),
            ("json", "1"),
        ];
        let response = self
            .client
            .post(format!("{}/in.php", self.api_url))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("2Captcha in.php returned {}", response.status());
        }

        let reply: ApiResponse = response.json().await?;
        if reply.status != 1 {
            bail!("2Captcha rejected the upload: {}", reply.request_text());
        }
        Ok(reply.request_text())
    }
}

#[async_trait]
impl CaptchaSolver for TwoCaptchaSolver {
    async fn solve(&self, image_ref: &str) -> Result<CaptchaSolution> {
        let body = self.image_base64(image_ref).await?;
        let request_id = self.submit(&body).await?;
        debug!("2Captcha accepted task {}", request_id);

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let reply = self
                .res(&[("action", "get"), ("id", request_id.as_str())])
                .await?;
            let text = reply.request_text();

            if reply.status == 1 {
                info!("2Captcha solved task {}", request_id);
                return Ok(CaptchaSolution {
                    code: text,
                    request_id,
                });
            }
            if text != NOT_READY {
                bail!("2Captcha could not solve task {}: {}", request_id, text);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "2Captcha task {} not solved within {:?}",
                    request_id,
                    self.timeout
                );
            }
        }
    }

    async fn report_outcome(&self, request_id: &str, correct: bool) -> Result<()> {
        let action = if correct { "reportgood" } else { "reportbad" };
        let reply = self.res(&[("action", action), ("id", request_id)]).await?;

        if reply.status != 1 {
            bail!("2Captcha refused {}: {}", action, reply.request_text());
        }
        Ok(())
    }

    async fn balance(&self) -> Result<f64> {
        let reply = self.res(&[("action", "getbalance")]).await?;
        if reply.status != 1 {
            bail!("2Captcha balance request failed: {}", reply.request_text());
        }

        reply
            .request_text()
            .parse()
            .map_err(|e| anyhow!("unexpected 2Captcha balance value: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn solver(server: &MockServer) -> TwoCaptchaSolver {
        TwoCaptchaSolver::new("test-key")
            .unwrap()
            .with_api_url(&server.uri())
            .with_polling(Duration::from_millis(5), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn solve_uploads_image_and_polls_until_ready() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/captcha.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1_u8, 2, 3]))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/in.php"))
            .and(body_string_contains("method=base64"))
            .and(body_string_contains("body=AQID"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 1, "request": "777"})),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/res.php"))
            .and(query_param("action", "get"))
            .and(query_param("id", "777"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 0, "request": "CAPCHA_NOT_READY"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/res.php"))
            .and(query_param("action", "get"))
            .and(query_param("id", "777"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 1, "request": "x7k2p"})),
            )
            .mount(&server)
            .await;

        let solver = solver(&server).await;
        let solution = solver
            .solve(&format!("{}/captcha.png", server.uri()))
            .await
            .unwrap();

        assert_eq!(
            solution,
            CaptchaSolution {
                code: "x7k2p".to_string(),
                request_id: "777".to_string()
            }
        );
    }

    #[tokio::test]
    async fn solve_accepts_data_uri_without_download() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/in.php"))
            .and(body_string_contains("body=AQID"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 1, "request": "9"})),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/res.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 1, "request": "abc"})),
            )
            .mount(&server)
            .await;

        let solver = solver(&server).await;
        let solution = solver.solve("data:image/png;base64,AQID").await.unwrap();
        assert_eq!(solution.code, "abc");
    }

    #[tokio::test]
    async fn solve_fails_on_service_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/in.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 0, "request": "ERROR_ZERO_BALANCE"})),
            )
            .mount(&server)
            .await;

        let solver = solver(&server).await;
        let err = solver.solve("data:image/png;base64,AQID").await.unwrap_err();
        assert!(err.to_string().contains("ERROR_ZERO_BALANCE"));
    }

    #[tokio::test]
    async fn report_outcome_uses_matching_action() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/res.php"))
            .and(query_param("action", "reportbad"))
            .and(query_param("id", "42"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 1, "request": "OK_REPORT_RECORDED"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let solver = solver(&server).await;
        solver.report_outcome("42", false).await.unwrap();
    }

    #[tokio::test]
    async fn balance_parses_amount() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/res.php"))
            .and(query_param("action", "getbalance"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 1, "request": "3.8420"})),
            )
            .mount(&server)
            .await;

        let solver = solver(&server).await;
        let balance = solver.balance().await.unwrap();
        assert!((balance - 3.842).abs() < f64::EPSILON);
    }
}
