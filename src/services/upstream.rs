use crate::config::{LocaleSettings, RetrySettings, Settings};
use crate::constants::{limits, network};
use crate::errors::ToolError;
use crate::services::credentials::{Credential, CredentialManager};
use crate::services::logger::Logger;
use crate::utils::redact::redact_text;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// One catalog call, described independently of any credential.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Raw path segments; each one is percent-encoded on its own.
    pub path_segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub customer_id: Option<String>,
}

impl UpstreamRequest {
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::GET,
            path_segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
            customer_id: None,
        }
    }

    pub fn post<I, S>(segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = Self::get(segments);
        request.method = Method::POST;
        request.body = Some(body);
        request
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn customer_id(mut self, customer_id: Option<String>) -> Self {
        self.customer_id = customer_id;
        self
    }

    pub fn describe(&self) -> String {
        format!("{} /{}", self.method, self.path_segments.join("/"))
    }
}

/// Performs one authorized call. A refused credential must surface as
/// `ToolError::authorization_rejected` so callers can tell it apart.
#[async_trait]
pub trait UpstreamInvoker: Send + Sync {
    async fn invoke(
        &self,
        request: &UpstreamRequest,
        credential: &Credential,
    ) -> Result<Value, ToolError>;
}

#[derive(Clone)]
pub struct HttpInvoker {
    logger: Logger,
    client: Client,
    api_base: Url,
    client_id: String,
    locale: LocaleSettings,
}

impl HttpInvoker {
    pub fn new(logger: Logger, settings: &Settings) -> Result<Self, ToolError> {
        let client = Client::builder()
            .user_agent(network::USER_AGENT)
            .connect_timeout(Duration::from_millis(network::TIMEOUT_CONNECTION_MS))
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ToolError::internal(format!("failed to build HTTP client: {}", err)))?;
        let api_base = Url::parse(&settings.api_base).map_err(|err| {
            ToolError::invalid_params(format!("invalid API base URL: {}", err))
        })?;
        if api_base.cannot_be_a_base() {
            return Err(ToolError::invalid_params(
                "API base URL cannot carry a path",
            ));
        }
        Ok(Self {
            logger: logger.child("upstream"),
            client,
            api_base,
            client_id: settings.client_id.clone(),
            locale: settings.locale.clone(),
        })
    }

    pub fn build_url(&self, request: &UpstreamRequest) -> Result<Url, ToolError> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ToolError::internal("API base URL cannot carry a path"))?;
            segments.pop_if_empty();
            for segment in &request.path_segments {
                segments.push(segment);
            }
        }
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn build_headers(
        &self,
        request: &UpstreamRequest,
        credential: &Credential,
    ) -> Result<HeaderMap, ToolError> {
        let customer_id = request
            .customer_id
            .as_deref()
            .unwrap_or(self.locale.customer_id.as_str());
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", credential.token()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let vendor = [
            ("x-digikey-client-id", self.client_id.as_str()),
            ("x-digikey-locale-site", self.locale.site.as_str()),
            ("x-digikey-locale-language", self.locale.language.as_str()),
            ("x-digikey-locale-currency", self.locale.currency.as_str()),
            ("x-digikey-customer-id", customer_id),
        ];
        for (name, value) in vendor {
            headers.insert(HeaderName::from_static(name), header_value(value)?);
        }
        Ok(headers)
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, ToolError> {
    HeaderValue::from_str(raw)
        .map_err(|_| ToolError::invalid_params("header value contains invalid characters"))
}

#[async_trait]
impl UpstreamInvoker for HttpInvoker {
    async fn invoke(
        &self,
        request: &UpstreamRequest,
        credential: &Credential,
    ) -> Result<Value, ToolError> {
        let url = self.build_url(request)?;
        let headers = self.build_headers(request, credential)?;
        self.logger.info(
            "Making request",
            Some(&serde_json::json!({"method": request.method.as_str(), "path": url.path()})),
        );

        let mut req = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        let started = Instant::now();
        let response = req.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await.map_err(map_reqwest_error)?;
        self.logger.debug(
            "Response received",
            Some(&serde_json::json!({
                "status": status.as_u16(),
                "bytes": text.len(),
                "duration_ms": started.elapsed().as_millis(),
            })),
        );

        if !status.is_success() {
            let preview = redact_text(&text, limits::ERROR_BODY_PREVIEW_BYTES, None);
            self.logger.error(
                "API error",
                Some(&serde_json::json!({"status": status.as_u16(), "body": preview})),
            );
            return Err(map_status(status, &text, retry_after));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|err| ToolError::internal(format!("upstream returned invalid JSON: {}", err)))
    }
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> ToolError {
    if err.is_timeout() {
        return ToolError::timeout("HTTP request timed out");
    }
    ToolError::retryable(err.to_string())
}

/// Vendor errors arrive as problem details (`title`, `detail`).
fn problem_message(text: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(text).ok()?;
    ["detail", "title", "ErrorMessage", "message"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn map_status(status: StatusCode, text: &str, retry_after_secs: Option<u64>) -> ToolError {
    let code = status.as_u16();
    let message = problem_message(text).unwrap_or_else(|| {
        format!(
            "upstream returned {} {}",
            code,
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string()
    });
    let mut details = serde_json::json!({ "status": code });
    if let Some(secs) = retry_after_secs {
        details["retry_after_secs"] = Value::from(secs);
    }
    let err = match status {
        StatusCode::UNAUTHORIZED => ToolError::authorization_rejected(message),
        StatusCode::FORBIDDEN => ToolError::denied(message)
            .with_hint("The application is not subscribed to this API product."),
        StatusCode::NOT_FOUND => ToolError::not_found(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ToolError::timeout(message),
        StatusCode::TOO_MANY_REQUESTS => {
            ToolError::retryable(message).with_hint("Rate limited by the vendor; back off and retry.")
        }
        s if s.is_server_error() => ToolError::retryable(message),
        _ => ToolError::invalid_params(message),
    };
    err.with_details(details)
}

/// Exponential backoff for retryable failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
        }
    }

    /// A vendor `Retry-After` longer than `max_delay_ms` ends the loop: the
    /// retryable error goes back to the caller instead of stalling the call.
    pub fn should_retry(&self, attempt: usize, err: &ToolError) -> bool {
        if attempt >= self.max_attempts || !err.retryable || err.is_authorization_rejected() {
            return false;
        }
        retry_after_ms(err).map_or(true, |ms| ms <= self.max_delay_ms)
    }

    /// Delay before attempt `attempt + 1`, never above `max_delay_ms`. A vendor
    /// `Retry-After` wins when longer than the backoff.
    pub fn compute_delay(&self, attempt: usize, err: Option<&ToolError>) -> Duration {
        let factor: f64 = 2.0;
        let ceiling = self.max_delay_ms as f64;
        let mut delay =
            (self.base_delay_ms as f64) * factor.powi(attempt.saturating_sub(1) as i32);
        if delay > ceiling {
            delay = ceiling;
        }
        if self.jitter > 0.0 {
            let delta = delay * self.jitter;
            delay = delay - delta + rand::random::<f64>() * delta * 2.0;
        }
        if let Some(ms) = err.and_then(retry_after_ms) {
            if ms as f64 > delay {
                delay = ms as f64;
            }
        }
        Duration::from_millis(delay.clamp(0.0, ceiling) as u64)
    }
}

fn retry_after_ms(err: &ToolError) -> Option<u64> {
    err.details
        .as_ref()
        .and_then(|d| d.get("retry_after_secs"))
        .and_then(|v| v.as_u64())
        .map(|secs| secs.saturating_mul(1000))
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay_ms: settings.base_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            jitter: settings.jitter,
        }
    }
}

/// Wraps an invoker with the credential lifecycle: acquire before the call,
/// and on a rejected credential invalidate it and retry exactly once.
#[derive(Clone)]
pub struct AuthorizedInvoker {
    logger: Logger,
    credentials: CredentialManager,
    invoker: Arc<dyn UpstreamInvoker>,
    retry: RetryPolicy,
}

impl AuthorizedInvoker {
    pub fn new(
        logger: Logger,
        credentials: CredentialManager,
        invoker: Arc<dyn UpstreamInvoker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            logger: logger.child("invoker"),
            credentials,
            invoker,
            retry,
        }
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Runs `request` under the retry policy. The invalidate-and-retry on a
    /// rejected credential happens at most once across all attempts.
    pub async fn call(&self, request: &UpstreamRequest) -> Result<Value, ToolError> {
        let mut reauthed = false;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.call_once(request, &mut reauthed).await {
                Ok(value) => return Ok(value),
                Err(err) if self.retry.should_retry(attempt, &err) => {
                    let delay = self.retry.compute_delay(attempt, Some(&err));
                    self.logger.warn(
                        "HTTP retry",
                        Some(&serde_json::json!({
                            "request": request.describe(),
                            "attempt": attempt,
                            "code": err.code,
                            "delay_ms": delay.as_millis(),
                        })),
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn call_once(
        &self,
        request: &UpstreamRequest,
        reauthed: &mut bool,
    ) -> Result<Value, ToolError> {
        let credential = self.credentials.acquire().await?;
        let err = match self.invoker.invoke(request, &credential).await {
            Err(err) if err.is_authorization_rejected() => err,
            other => return other,
        };
        if *reauthed {
            return Err(self.fresh_token_rejected(request, err));
        }
        *reauthed = true;

        let invalidated = self.credentials.invalidate_if_current(&credential);
        self.logger.info(
            "Credential rejected, retrying once with a fresh token",
            Some(&serde_json::json!({
                "request": request.describe(),
                "invalidated": invalidated,
                "status": err.details.as_ref().and_then(|d| d.get("status")).cloned(),
            })),
        );

        let fresh = self.credentials.acquire().await?;
        match self.invoker.invoke(request, &fresh).await {
            Err(err) if err.is_authorization_rejected() => {
                Err(self.fresh_token_rejected(request, err))
            }
            other => other,
        }
    }

    fn fresh_token_rejected(&self, request: &UpstreamRequest, err: ToolError) -> ToolError {
        self.logger.error(
            "Fresh credential rejected",
            Some(&serde_json::json!({"request": request.describe()})),
        );
        err.with_retryable(false).with_hint(
            "A freshly issued token was rejected. Check that the application is \
             subscribed to the Product Information API and that USE_SANDBOX matches \
             the credentials.",
        )
    }
}
