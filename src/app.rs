use crate::config::Settings;
use crate::errors::ToolError;
use crate::managers::catalog::CatalogManager;
use crate::mcp::catalog::tool_catalog;
use crate::services::credentials::{CredentialManager, TokenExchanger};
use crate::services::logger::Logger;
use crate::services::token_client::HttpTokenClient;
use crate::services::tool_executor::{ToolExecutor, ToolHandler};
use crate::services::upstream::{AuthorizedInvoker, HttpInvoker, RetryPolicy, UpstreamInvoker};
use crate::services::validation::Validation;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct App {
    pub logger: Logger,
    pub credentials: CredentialManager,
    pub tool_executor: Arc<ToolExecutor>,
}

/// Pieces `App` is assembled from. Tests swap in stub exchangers and invokers.
pub struct Components {
    pub exchanger: Arc<dyn TokenExchanger>,
    pub invoker: Arc<dyn UpstreamInvoker>,
    pub safety_margin: Duration,
    pub exchange_timeout: Duration,
    pub retry: RetryPolicy,
}

impl App {
    fn validate_tool_wiring(
        handlers: &HashMap<String, Arc<dyn ToolHandler>>,
    ) -> Result<(), ToolError> {
        let mut missing: Vec<String> = tool_catalog()
            .iter()
            .filter(|tool| !handlers.contains_key(&tool.name))
            .map(|tool| tool.name.clone())
            .collect();
        let mut undocumented: Vec<String> = handlers
            .keys()
            .filter(|name| !tool_catalog().iter().any(|tool| &tool.name == *name))
            .cloned()
            .collect();
        if missing.is_empty() && undocumented.is_empty() && !handlers.is_empty() {
            return Ok(());
        }
        missing.sort();
        undocumented.sort();
        Err(ToolError::internal("Tool wiring is incomplete")
            .with_hint(
                "Every tool in tool_catalog.json must have a handler, and every handler a catalog entry.",
            )
            .with_details(serde_json::json!({
                "missing_tools": missing,
                "undocumented_tools": undocumented,
            })))
    }

    /// Production wiring: OAuth2 token client and HTTP invoker built from `settings`.
    pub fn initialize(settings: &Settings, logger: Logger) -> Result<Self, ToolError> {
        let exchanger = Arc::new(HttpTokenClient::new(logger.clone(), settings)?);
        let invoker = Arc::new(HttpInvoker::new(logger.clone(), settings)?);
        logger.info(
            "Configured DigiKey endpoint",
            Some(&serde_json::json!({
                "environment": settings.environment.label(),
                "api_base": settings.api_base,
                "token_url": exchanger.token_url(),
            })),
        );
        Self::from_components(
            logger,
            Components {
                exchanger,
                invoker,
                safety_margin: settings.safety_margin,
                exchange_timeout: settings.token_timeout,
                retry: RetryPolicy::from(&settings.retry),
            },
        )
    }

    pub fn from_components(logger: Logger, components: Components) -> Result<Self, ToolError> {
        let credentials = CredentialManager::new(
            logger.clone(),
            components.exchanger,
            components.safety_margin,
            components.exchange_timeout,
        );
        let invoker = AuthorizedInvoker::new(
            logger.clone(),
            credentials.clone(),
            components.invoker,
            components.retry,
        );
        let catalog_manager = Arc::new(CatalogManager::new(
            logger.clone(),
            Validation::new(),
            invoker,
        ));

        let handlers = catalog_manager.handlers();
        Self::validate_tool_wiring(&handlers)?;

        let tool_executor = Arc::new(ToolExecutor::new(logger.clone(), handlers));
        Ok(Self {
            logger,
            credentials,
            tool_executor,
        })
    }

    /// Fetches the first credential before serving. Rejected or malformed
    /// exchanges abort startup; transient failures are left to the first call.
    pub async fn warm_up(&self) -> Result<(), ToolError> {
        match self.credentials.acquire().await {
            Ok(credential) => {
                self.logger.info(
                    "Initial token acquired",
                    Some(&serde_json::json!({"expires_in_secs": credential.remaining().as_secs()})),
                );
                Ok(())
            }
            Err(err) if err.is_retryable() => {
                self.logger.warn(
                    "Initial token exchange failed, will retry on first call",
                    Some(&serde_json::json!({"error": err.to_string()})),
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
