//! A3S Agent - operator and executor HTTP API binary.
//!
//! Serves the agent call API over HTTP and runs nested containers as local
//! processes under the agent work directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter};

use a3s_agent_core::config::AgentConfig;

use a3s_agent::{
    AclAuthorizer, AgentContext, AgentServer, Authorizer, LocalContainerizer, LoggingControl,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// A3S Agent
#[derive(Parser, Debug)]
#[command(name = "a3s-agent", about = "A3S Agent HTTP API")]
struct Args {
    /// Path to a YAML or JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration file.
    #[arg(long)]
    listen: Option<String>,

    /// Directory holding container sandboxes.
    #[arg(long)]
    work_dir: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn expand_home(path: &str) -> PathBuf {
    if path.starts_with('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(path.strip_prefix("~/").unwrap_or(path))
    } else {
        PathBuf::from(path)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AgentConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(work_dir) = &args.work_dir {
        config.work_dir = expand_home(work_dir);
    }
    config.validate()?;

    // RUST_LOG wins over the configured level
    let base = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.as_str().to_string());
    let filter = EnvFilter::try_new(&base).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    let logging = LoggingControl::new(handle, base);

    std::fs::create_dir_all(&config.work_dir).with_context(|| {
        format!(
            "Failed to create work directory {}",
            config.work_dir.display()
        )
    })?;

    let authorizer = match config.acls.clone() {
        Some(acls) => Some(Arc::new(AclAuthorizer::new(acls)?) as Arc<dyn Authorizer>),
        None => None,
    };
    let containerizer = Arc::new(LocalContainerizer::new(
        config.work_dir.clone(),
        config.max_record_size,
    ));

    tracing::info!(
        agent_id = %config.agent_id,
        listen = %config.listen,
        work_dir = %config.work_dir.display(),
        authenticate_http = config.authenticate_http,
        "Starting A3S Agent"
    );

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;

    let context = AgentContext::new(config, containerizer, authorizer, logging)?;
    AgentServer::new(context).serve(listener).await?;

    Ok(())
}
