//! Bearer credential cache with single-flight refresh.
//!
//! The fast path is a shared read of the cached credential. Only when the
//! credential is missing, invalidated or inside the safety margin does a caller
//! touch the refresh gate, and then at most one exchange runs: late arrivals
//! attach to the pending exchange and resolve with the same outcome.

use crate::errors::AuthError;
use crate::services::logger::Logger;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Result of one successful client-credentials exchange.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Duration,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self) -> Result<TokenGrant, AuthError>;
}

/// An issued bearer token. Replaced wholesale on refresh, never edited.
#[derive(Clone)]
pub struct Credential {
    token: Arc<str>,
    issued_at: Instant,
    expires_at: Instant,
}

impl Credential {
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Result<Self, AuthError> {
        let issued_at = Instant::now();
        let expires_at = issued_at.checked_add(lifetime).ok_or_else(|| {
            AuthError::ExchangeMalformed(format!(
                "token lifetime of {} s is out of range",
                lifetime.as_secs()
            ))
        })?;
        Ok(Self {
            token: Arc::from(token.into()),
            issued_at,
            expires_at,
        })
    }

    fn from_grant(grant: TokenGrant) -> Result<Self, AuthError> {
        if grant.access_token.trim().is_empty() {
            return Err(AuthError::ExchangeMalformed(
                "access_token is empty".to_string(),
            ));
        }
        Self::new(grant.access_token, grant.expires_in)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// True while `now + margin` is still before expiry.
    pub fn is_fresh_at(&self, now: Instant, margin: Duration) -> bool {
        now.checked_add(margin)
            .map(|deadline| deadline < self.expires_at)
            .unwrap_or(false)
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    fn same_token(&self, other: &Credential) -> bool {
        Arc::ptr_eq(&self.token, &other.token) || self.token == other.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[derive(Default)]
struct CredentialStore {
    current: Option<Credential>,
    stale: bool,
}

type PendingExchange = Shared<BoxFuture<'static, Result<Credential, AuthError>>>;

struct Inner {
    logger: Logger,
    exchanger: Arc<dyn TokenExchanger>,
    safety_margin: Duration,
    exchange_timeout: Duration,
    store: RwLock<CredentialStore>,
    refresh: Mutex<Option<PendingExchange>>,
    exchanges: AtomicU64,
}

impl Inner {
    fn fresh_cached(&self) -> Option<Credential> {
        let store = self.store.read().unwrap_or_else(|err| err.into_inner());
        if store.stale {
            return None;
        }
        store
            .current
            .as_ref()
            .filter(|c| c.is_fresh_at(Instant::now(), self.safety_margin))
            .cloned()
    }

    async fn run_exchange(self: Arc<Self>) -> Result<Credential, AuthError> {
        let attempt = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        self.logger.debug(
            "Requesting access token",
            Some(&serde_json::json!({ "exchange": attempt })),
        );

        // A panic must not escape into the shared future: a poisoned `Shared`
        // left in the slot would fail every later acquire.
        let exchange = tokio::time::timeout(self.exchange_timeout, self.exchanger.exchange());
        let result = match AssertUnwindSafe(exchange).catch_unwind().await {
            Ok(Ok(outcome)) => outcome.and_then(Credential::from_grant),
            Ok(Err(_)) => Err(AuthError::ExchangeFailed(format!(
                "token exchange timed out after {} ms",
                self.exchange_timeout.as_millis()
            ))),
            Err(_) => Err(AuthError::ExchangeFailed(
                "token exchange panicked".to_string(),
            )),
        };

        match &result {
            Ok(credential) => {
                {
                    let mut store = self.store.write().unwrap_or_else(|err| err.into_inner());
                    store.current = Some(credential.clone());
                    store.stale = false;
                }
                let lifetime = credential.remaining();
                if lifetime <= self.safety_margin {
                    self.logger.warn(
                        "Issued token lifetime is shorter than the safety margin",
                        Some(&serde_json::json!({
                            "lifetime_secs": lifetime.as_secs(),
                            "safety_margin_secs": self.safety_margin.as_secs(),
                        })),
                    );
                }
                self.logger.info(
                    "Access token refreshed",
                    Some(&serde_json::json!({
                        "exchange": attempt,
                        "expires_in_secs": lifetime.as_secs(),
                    })),
                );
            }
            Err(err) => {
                self.logger.warn(
                    "Access token exchange failed",
                    Some(&serde_json::json!({
                        "exchange": attempt,
                        "code": err.code(),
                        "retryable": err.is_retryable(),
                        "error": err.to_string(),
                    })),
                );
            }
        }

        // Store is written before the gate opens, so a caller that finds the
        // gate empty and re-checks the store sees the new credential.
        *self.refresh.lock().unwrap_or_else(|err| err.into_inner()) = None;
        result
    }
}

/// Owns the single live credential. Everything else holds a clone of this
/// handle and can only `acquire` or `invalidate`.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

impl CredentialManager {
    pub fn new(
        logger: Logger,
        exchanger: Arc<dyn TokenExchanger>,
        safety_margin: Duration,
        exchange_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                logger: logger.child("credentials"),
                exchanger,
                safety_margin,
                exchange_timeout,
                store: RwLock::new(CredentialStore::default()),
                refresh: Mutex::new(None),
                exchanges: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a credential valid for at least the safety margin, exchanging
    /// for a new one when needed.
    pub async fn acquire(&self) -> Result<Credential, AuthError> {
        if let Some(credential) = self.inner.fresh_cached() {
            return Ok(credential);
        }

        let pending = {
            let mut slot = self
                .inner
                .refresh
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    if let Some(credential) = self.inner.fresh_cached() {
                        return Ok(credential);
                    }
                    let pending = self.inner.clone().run_exchange().boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Marks the cached credential stale. No network call happens here; the
    /// next `acquire` performs the exchange.
    pub fn invalidate(&self) {
        let mut store = self
            .inner
            .store
            .write()
            .unwrap_or_else(|err| err.into_inner());
        if store.current.is_some() {
            store.stale = true;
            self.inner.logger.debug("Access token invalidated", None);
        }
    }

    /// Invalidates only if `rejected` is still the cached credential. Returns
    /// whether anything changed. Concurrent callers rejected with the same
    /// token therefore trigger one refresh, not one each.
    pub fn invalidate_if_current(&self, rejected: &Credential) -> bool {
        let mut store = self
            .inner
            .store
            .write()
            .unwrap_or_else(|err| err.into_inner());
        let matches = store
            .current
            .as_ref()
            .map(|current| current.same_token(rejected))
            .unwrap_or(false);
        if matches && !store.stale {
            store.stale = true;
            self.inner
                .logger
                .debug("Rejected access token invalidated", None);
            return true;
        }
        false
    }

    /// Number of exchanges started since construction.
    pub fn exchange_count(&self) -> u64 {
        self.inner.exchanges.load(Ordering::SeqCst)
    }

    pub fn safety_margin(&self) -> Duration {
        self.inner.safety_margin
    }
}
