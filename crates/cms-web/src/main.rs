use clap::Parser;
use cms_core::config::{load_gateway_config, ConfigError, GatewayConfig};
use cms_core::signal_auth::{SignalAuthority, TokenError};
use cms_core::validation::{Validate, ValidationIssue, ValidationLevel};
use cms_web::{run_web_server, WebError, WebState};
use cmsd::logging::init_logging;
use cmsd::{Engine, EngineError, TracingActivities};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_GATEWAY_CONFIG: &str = "config/gateway.toml";

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "cms-gateway", about = "HTTP gateway for the content lifecycle engine")]
struct CliArgs {
    /// Gateway config file. Defaults apply when the default path is absent.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
    /// Overrides `server.bind` and `CMS_GATEWAY_BIND`.
    #[arg(long = "bind", value_name = "ADDR")]
    bind_override: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("{0}")]
    Args(String),
    #[error("failed to load gateway config at {path}: {source}")]
    LoadConfig {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error("{0}")]
    InvalidConfig(String),
    #[error("invalid signal secret: {0}")]
    SignalSecret(#[from] TokenError),
    #[error("failed to open engine: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Web(#[from] WebError),
}

#[tokio::main]
async fn main() {
    if let Err(err) = run(CliArgs::parse()).await {
        eprintln!("cms-gateway failed: {err}");
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<(), MainError> {
    let mut config = load_config(args.config_path.as_deref())?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    let bind = resolve_bind(args.bind_override, &config.server.bind)?;

    let issues = config.validate();
    init_logging(&config.logging);
    for issue in issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Warning)
    {
        tracing::warn!(code = issue.code, "{}", issue.message);
    }
    validate_gateway_config(&issues)?;

    let engine = Arc::new(Engine::open(&config.engine, Arc::new(TracingActivities))?);
    let recovered = engine.recover().await?;
    tracing::info!(
        recovered,
        sqlite_path = %config.engine.sqlite_path.display(),
        "engine ready"
    );

    let mut state = WebState::new(engine);
    match config.auth.signal_secret.as_deref() {
        Some(secret) => state = state.with_signal_authority(SignalAuthority::new(secret)?),
        None => tracing::warn!("no signal secret configured; signals are not authenticated"),
    }

    run_web_server(&bind, state).await?;
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<GatewayConfig, MainError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_GATEWAY_CONFIG);
            if !default.exists() {
                return Ok(GatewayConfig::default());
            }
            default
        }
    };
    load_gateway_config(&path).map_err(|source| MainError::LoadConfig { path, source })
}

fn resolve_bind(bind_override: Option<String>, configured: &str) -> Result<String, MainError> {
    let candidate = bind_override.unwrap_or_else(|| configured.to_string());
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err(MainError::Args(
            "bind address must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_gateway_config(issues: &[ValidationIssue]) -> Result<(), MainError> {
    let errors = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .collect::<Vec<_>>();
    if errors.is_empty() {
        return Ok(());
    }

    let rendered = errors
        .iter()
        .map(|issue| format!("{}: {}", issue.code, issue.message))
        .collect::<Vec<_>>()
        .join("; ");
    Err(MainError::InvalidConfig(format!(
        "gateway config validation failed ({rendered})"
    )))
}
