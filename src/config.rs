use crate::constants::{auth, locale, network, retry};
use crate::errors::ToolError;
use crate::utils::feature_flags::is_truthy;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn default_base(self) -> &'static str {
        match self {
            Environment::Sandbox => network::SANDBOX_API_BASE,
            Environment::Production => network::PRODUCTION_API_BASE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Environment::Sandbox => "SANDBOX",
            Environment::Production => "PRODUCTION",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocaleSettings {
    pub site: String,
    pub language: String,
    pub currency: String,
    pub customer_id: String,
}

impl Default for LocaleSettings {
    fn default() -> Self {
        Self {
            site: locale::SITE.to_string(),
            language: locale::LANGUAGE.to_string(),
            currency: locale::CURRENCY.to_string(),
            customer_id: locale::CUSTOMER_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            base_delay_ms: retry::BASE_DELAY_MS,
            max_delay_ms: retry::MAX_DELAY_MS,
            jitter: retry::JITTER,
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pub client_id: String,
    pub client_secret: String,
    pub environment: Environment,
    pub api_base: String,
    pub locale: LocaleSettings,
    pub safety_margin: Duration,
    pub token_timeout: Duration,
    pub request_timeout: Duration,
    pub retry: RetrySettings,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("client_id", &client_id_preview(&self.client_id))
            .field("client_secret", &"[REDACTED]")
            .field("environment", &self.environment)
            .field("api_base", &self.api_base)
            .field("locale", &self.locale)
            .field("safety_margin", &self.safety_margin)
            .field("token_timeout", &self.token_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Settings {
    /// Builds settings for the given identity with every other knob at its default.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            environment,
            api_base: environment.default_base().to_string(),
            locale: LocaleSettings::default(),
            safety_margin: Duration::from_secs(auth::SAFETY_MARGIN_SECS),
            token_timeout: Duration::from_millis(network::TIMEOUT_TOKEN_EXCHANGE_MS),
            request_timeout: Duration::from_millis(network::TIMEOUT_API_REQUEST_MS),
            retry: RetrySettings::default(),
        }
    }

    pub fn from_env() -> Result<Self, ToolError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup` so tests do not have to touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ToolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let client_id = read("CLIENT_ID");
        let client_secret = read("CLIENT_SECRET");
        let (client_id, client_secret) = match (client_id, client_secret) {
            (Some(id), Some(secret)) => (id, secret),
            (id, secret) => {
                let mut missing = Vec::new();
                if id.is_none() {
                    missing.push("CLIENT_ID");
                }
                if secret.is_none() {
                    missing.push("CLIENT_SECRET");
                }
                return Err(ToolError::invalid_params(format!(
                    "{} must be set",
                    missing.join(" and ")
                ))
                .with_hint("Export them or put them in a .env file next to the binary.")
                .with_details(serde_json::json!({ "missing": missing })));
            }
        };

        let environment = if read("USE_SANDBOX").map(is_truthy).unwrap_or(false) {
            Environment::Sandbox
        } else {
            Environment::Production
        };

        let mut settings = Settings::new(client_id, client_secret, environment);
        if let Some(base) = read("DIGIKEY_API_BASE") {
            settings.api_base = normalize_base_url(&base)?;
        }
        if let Some(site) = read("DIGIKEY_LOCALE_SITE") {
            settings.locale.site = site;
        }
        if let Some(language) = read("DIGIKEY_LOCALE_LANGUAGE") {
            settings.locale.language = language;
        }
        if let Some(currency) = read("DIGIKEY_LOCALE_CURRENCY") {
            settings.locale.currency = currency;
        }
        if let Some(customer_id) = read("DIGIKEY_CUSTOMER_ID") {
            settings.locale.customer_id = customer_id;
        }
        if let Some(secs) = parse_u64(&read, "DIGIKEY_TOKEN_SAFETY_MARGIN_SECS")? {
            settings.safety_margin = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_u64(&read, "DIGIKEY_TOKEN_TIMEOUT_MS")? {
            settings.token_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = parse_u64(&read, "DIGIKEY_REQUEST_TIMEOUT_MS")? {
            settings.request_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(attempts) = parse_u64(&read, "DIGIKEY_RETRY_MAX_ATTEMPTS")? {
            settings.retry.max_attempts = (attempts as usize).max(1);
        }
        if let Some(ms) = parse_u64(&read, "DIGIKEY_RETRY_BASE_DELAY_MS")? {
            settings.retry.base_delay_ms = ms;
        }
        if let Some(ms) = parse_u64(&read, "DIGIKEY_RETRY_MAX_DELAY_MS")? {
            settings.retry.max_delay_ms = ms;
        }
        Ok(settings)
    }

    pub fn token_url(&self) -> String {
        format!("{}{}", self.api_base, network::TOKEN_PATH)
    }
}

/// First characters of the client id, safe to put in logs.
pub fn client_id_preview(client_id: &str) -> String {
    let prefix: String = client_id
        .chars()
        .take(auth::CLIENT_ID_LOG_PREFIX)
        .collect();
    format!("{}...", prefix)
}

fn parse_u64<F>(read: &F, key: &str) -> Result<Option<u64>, ToolError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = read(key) else {
        return Ok(None);
    };
    raw.parse::<u64>().map(Some).map_err(|_| {
        ToolError::invalid_params(format!("{} must be a non-negative integer", key))
            .with_details(serde_json::json!({ "value": raw }))
    })
}

pub fn normalize_base_url(raw: &str) -> Result<String, ToolError> {
    let raw = raw.trim();
    let mut url = Url::parse(raw).map_err(|_| {
        ToolError::invalid_params("Invalid DIGIKEY_API_BASE URL")
            .with_hint("Expected a valid URL, e.g. \"https://api.digikey.com\".")
            .with_details(serde_json::json!({ "api_base": raw }))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ToolError::invalid_params(
            "DIGIKEY_API_BASE must use http or https",
        ));
    }
    url.set_fragment(None);
    url.set_query(None);
    let normalized = format!("{}{}", url.origin().ascii_serialization(), url.path());
    Ok(normalized.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_identity_is_fatal() {
        let err = Settings::from_lookup(lookup(&[("CLIENT_ID", "abc")])).unwrap_err();
        assert!(err.message.contains("CLIENT_SECRET"));
        assert!(!err.message.contains("CLIENT_ID and"));

        let err = Settings::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.message.contains("CLIENT_ID and CLIENT_SECRET"));
    }

    #[test]
    fn sandbox_switch_selects_base() {
        let settings = Settings::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("USE_SANDBOX", "TRUE"),
        ]))
        .expect("settings");
        assert_eq!(settings.environment, Environment::Sandbox);
        assert_eq!(
            settings.token_url(),
            "https://sandbox-api.digikey.com/v1/oauth2/token"
        );

        let settings = Settings::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
        ]))
        .expect("settings");
        assert_eq!(settings.environment, Environment::Production);
        assert_eq!(settings.api_base, "https://api.digikey.com");
    }

    #[test]
    fn overrides_are_applied() {
        let settings = Settings::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("DIGIKEY_API_BASE", "http://127.0.0.1:9999/"),
            ("DIGIKEY_LOCALE_CURRENCY", "EUR"),
            ("DIGIKEY_TOKEN_SAFETY_MARGIN_SECS", "60"),
            ("DIGIKEY_RETRY_MAX_ATTEMPTS", "0"),
        ]))
        .expect("settings");
        assert_eq!(settings.api_base, "http://127.0.0.1:9999");
        assert_eq!(settings.locale.currency, "EUR");
        assert_eq!(settings.locale.site, "US");
        assert_eq!(settings.safety_margin, Duration::from_secs(60));
        assert_eq!(settings.retry.max_attempts, 1);
    }

    #[test]
    fn rejects_non_numeric_knobs() {
        let err = Settings::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("DIGIKEY_REQUEST_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.message.contains("DIGIKEY_REQUEST_TIMEOUT_MS"));
    }

    #[test]
    fn debug_output_hides_secret() {
        let settings = Settings::new("0123456789abcdef", "hunter2", Environment::Production);
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("0123456789abcdef"));
        assert!(rendered.contains("0123456789..."));
    }
}
