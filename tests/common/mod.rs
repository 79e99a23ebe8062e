#![allow(dead_code)]

use async_trait::async_trait;
use digikey_mcp::app::{App, Components};
use digikey_mcp::errors::{AuthError, ToolError};
use digikey_mcp::services::credentials::{Credential, CredentialManager, TokenExchanger, TokenGrant};
use digikey_mcp::services::logger::{LogLevel, Logger};
use digikey_mcp::services::upstream::{RetryPolicy, UpstreamInvoker, UpstreamRequest};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub fn restore_env(key: &str, previous: Option<String>) {
    match previous {
        Some(value) => std::env::set_var(key, value),
        None => std::env::remove_var(key),
    }
}

pub fn quiet_logger() -> Logger {
    let logger = Logger::new("test");
    logger.set_level(LogLevel::Error);
    logger
}

/// Issues `token-1`, `token-2`, ... and counts exchanges.
pub struct StubExchanger {
    calls: AtomicUsize,
    lifetime: StdMutex<Duration>,
    delay: Duration,
    failures: StdMutex<VecDeque<AuthError>>,
}

impl StubExchanger {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            lifetime: StdMutex::new(lifetime),
            delay: Duration::ZERO,
            failures: StdMutex::new(VecDeque::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Lifetime for grants issued from now on.
    pub fn set_lifetime(&self, lifetime: Duration) {
        *self.lifetime.lock().unwrap() = lifetime;
    }

    pub fn fail_next(&self, err: AuthError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenExchanger for StubExchanger {
    async fn exchange(&self) -> Result<TokenGrant, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(TokenGrant {
            access_token: format!("token-{}", n),
            expires_in: *self.lifetime.lock().unwrap(),
        })
    }
}

/// Returns `payload` unless the presented token is rejected or a scripted
/// failure is queued.
pub struct StubInvoker {
    calls: AtomicUsize,
    payload: Value,
    reject_all: bool,
    rejected_tokens: StdMutex<HashSet<String>>,
    failures: StdMutex<VecDeque<ToolError>>,
    seen_tokens: StdMutex<Vec<String>>,
    requests: StdMutex<Vec<UpstreamRequest>>,
    delay: Duration,
}

impl StubInvoker {
    pub fn new(payload: Value) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            payload,
            reject_all: false,
            rejected_tokens: StdMutex::new(HashSet::new()),
            failures: StdMutex::new(VecDeque::new()),
            seen_tokens: StdMutex::new(Vec::new()),
            requests: StdMutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn always_reject(mut self) -> Self {
        self.reject_all = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().unwrap().insert(token.to_string());
    }

    pub fn fail_next(&self, err: ToolError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen_tokens.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamInvoker for StubInvoker {
    async fn invoke(
        &self,
        request: &UpstreamRequest,
        credential: &Credential,
    ) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens
            .lock()
            .unwrap()
            .push(credential.token().to_string());
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.reject_all || self.rejected_tokens.lock().unwrap().contains(credential.token()) {
            return Err(ToolError::authorization_rejected("Bearer token rejected"));
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.payload.clone())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter: 0.0,
    }
}

pub fn manager(exchanger: Arc<StubExchanger>) -> CredentialManager {
    CredentialManager::new(
        quiet_logger(),
        exchanger,
        Duration::from_secs(300),
        Duration::from_secs(5),
    )
}

pub fn build_app(exchanger: Arc<StubExchanger>, invoker: Arc<StubInvoker>) -> App {
    App::from_components(
        quiet_logger(),
        Components {
            exchanger,
            invoker,
            safety_margin: Duration::from_secs(300),
            exchange_timeout: Duration::from_secs(5),
            retry: fast_retry(),
        },
    )
    .expect("app wiring")
}
