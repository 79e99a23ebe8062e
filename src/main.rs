use clap::Parser;
use digikey_mcp::app::App;
use digikey_mcp::config::{Environment, Settings};
use digikey_mcp::errors::ToolError;
use digikey_mcp::services::logger::{LogLevel, Logger};
use std::sync::Arc;

/// DigiKey product catalog over the Model Context Protocol (stdio).
#[derive(Parser)]
#[command(name = "digikey-mcp", version, about)]
struct Cli {
    /// Use the sandbox API instead of production
    #[arg(long)]
    sandbox: bool,

    /// error, warn, info or debug
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Exchange credentials once, report the result and exit
    #[arg(long)]
    check: bool,
}

async fn run(cli: Cli, logger: Logger) -> Result<(), ToolError> {
    let mut settings = Settings::from_env()?;
    if cli.sandbox && settings.environment != Environment::Sandbox {
        if settings.api_base == Environment::Production.default_base() {
            settings.api_base = Environment::Sandbox.default_base().to_string();
        }
        settings.environment = Environment::Sandbox;
    }
    logger.debug("Loaded settings", Some(&serde_json::json!({"settings": format!("{:?}", settings)})));

    let app = App::initialize(&settings, logger.clone())?;

    if cli.check {
        let credential = app.credentials.acquire().await?;
        logger.info(
            "Credential check passed",
            Some(&serde_json::json!({
                "environment": settings.environment.label(),
                "expires_in_secs": credential.remaining().as_secs(),
            })),
        );
        return Ok(());
    }

    app.warm_up().await?;
    logger.info("Server ready", None);
    digikey_mcp::mcp::server::run_stdio(Arc::new(app)).await
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let logger = Logger::new("digikey");
    if let Some(raw) = cli.log_level.as_deref() {
        match LogLevel::parse(raw) {
            Some(level) => logger.set_level(level),
            None => logger.warn(
                "Unknown log level, keeping default",
                Some(&serde_json::json!({"log_level": raw})),
            ),
        }
    }

    if let Err(err) = run(cli, logger.clone()).await {
        let mut meta = serde_json::json!({"code": err.code, "retryable": err.retryable});
        if let Some(hint) = &err.hint {
            meta["hint"] = serde_json::Value::String(hint.clone());
        }
        logger.error(&err.message, Some(&meta));
        std::process::exit(1);
    }
}
