use crate::config::{client_id_preview, Settings};
use crate::constants::{auth, limits, network};
use crate::errors::AuthError;
use crate::services::credentials::{TokenExchanger, TokenGrant};
use crate::services::logger::Logger;
use crate::utils::redact::redact_text;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// OAuth2 client-credentials exchange against the vendor token endpoint.
#[derive(Clone)]
pub struct HttpTokenClient {
    logger: Logger,
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    environment_label: &'static str,
    timeout: Duration,
}

impl HttpTokenClient {
    pub fn new(logger: Logger, settings: &Settings) -> Result<Self, AuthError> {
        let client = Client::builder()
            .user_agent(network::USER_AGENT)
            .connect_timeout(Duration::from_millis(network::TIMEOUT_CONNECTION_MS))
            .timeout(settings.token_timeout)
            .build()
            .map_err(|err| {
                AuthError::ExchangeFailed(format!("failed to build HTTP client: {}", err))
            })?;
        Ok(Self {
            logger: logger.child("oauth"),
            client,
            token_url: settings.token_url(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            environment_label: settings.environment.label(),
            timeout: settings.token_timeout,
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenClient {
    async fn exchange(&self) -> Result<TokenGrant, AuthError> {
        self.logger.info(
            "Requesting token",
            Some(&serde_json::json!({
                "endpoint": self.environment_label,
                "client_id": client_id_preview(&self.client_id),
            })),
        );

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let send = self.client.post(&self.token_url).form(&form).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| AuthError::ExchangeFailed("token request timed out".to_string()))?
            .map_err(map_exchange_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_exchange_error)?;
        if !status.is_success() {
            let body = redact_text(
                &text,
                limits::ERROR_BODY_PREVIEW_BYTES,
                Some(std::slice::from_ref(&self.client_secret)),
            );
            self.logger.error(
                "OAuth error",
                Some(&serde_json::json!({ "status": status.as_u16(), "body": body })),
            );
            let code = status.as_u16();
            let message = oauth_error_message(&text).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("token request failed")
                    .to_string()
            });
            return Err(if code == 408 || code == 429 || status.is_server_error() {
                AuthError::ExchangeFailed(format!("token endpoint returned {}", code))
            } else {
                AuthError::ExchangeDenied {
                    status: code,
                    message,
                }
            });
        }

        let grant = parse_token_response(&text)?;
        self.logger.info("Successfully obtained access token", None);
        Ok(grant)
    }
}

fn map_exchange_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        return AuthError::ExchangeFailed("token request timed out".to_string());
    }
    AuthError::ExchangeFailed(err.to_string())
}

/// Parses `{access_token, expires_in}`. `expires_in` may arrive as a number or
/// a numeric string, and must not exceed `MAX_TOKEN_LIFETIME_SECS`.
pub fn parse_token_response(text: &str) -> Result<TokenGrant, AuthError> {
    let payload: Value = serde_json::from_str(text)
        .map_err(|_| AuthError::ExchangeMalformed("token response is not JSON".to_string()))?;
    let access_token = payload
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::ExchangeMalformed("access_token is missing".to_string()))?;
    let expires_in = payload
        .get("expires_in")
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse::<u64>().ok()))
        })
        .ok_or_else(|| AuthError::ExchangeMalformed("expires_in is missing".to_string()))?;
    if expires_in > auth::MAX_TOKEN_LIFETIME_SECS {
        return Err(AuthError::ExchangeMalformed(format!(
            "expires_in {} exceeds the {} s ceiling",
            expires_in,
            auth::MAX_TOKEN_LIFETIME_SECS
        )));
    }
    Ok(TokenGrant {
        access_token: access_token.to_string(),
        expires_in: Duration::from_secs(expires_in),
    })
}

fn oauth_error_message(text: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(text).ok()?;
    let error = payload.get("error").and_then(|v| v.as_str());
    let description = payload
        .get("error_description")
        .or_else(|| payload.get("ErrorMessage"))
        .and_then(|v| v.as_str());
    match (error, description) {
        (Some(e), Some(d)) => Some(format!("{}: {}", e, d)),
        (Some(e), None) => Some(e.to_string()),
        (None, Some(d)) => Some(d.to_string()),
        (None, None) => None,
    }
}
