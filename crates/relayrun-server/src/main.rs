//! RelayRun Server
//!
//! Streams supervised browser-automation runs over HTTP.

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relayrun_server::{http, AppState, ServerConfig, WorkerKind};
use relayrun_supervisor::{Locale, RemoteEndpoint, SupervisorConfig};
use relayrun_worker_sdk::{ExecutionPolicy, LlmConfig, LlmType};

/// RelayRun browser-automation server.
#[derive(Parser, Debug)]
#[command(name = "relayrun-server", about = "Streams supervised browser-automation runs as server-sent events")]
struct Args {
    /// HTTP server address
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8000")]
    http_addr: String,

    /// Language of the texts attached to events (en, zh-CN)
    #[arg(long, env = "LANGUAGE", default_value = "en")]
    language: String,

    /// Replay a canned session instead of running an agent
    #[arg(long)]
    demo: bool,

    /// Agent executable spawned once per run
    #[arg(long, env = "AGENT_COMMAND", default_value = "browser-agent")]
    agent_command: String,

    /// Extra argument passed to the agent (repeatable)
    #[arg(long = "agent-arg")]
    agent_args: Vec<String>,

    /// Chromium-compatible executable for local browsers
    #[arg(long, env = "BROWSER_PATH", default_value = "chromium")]
    browser_path: String,

    /// Show local browser windows
    #[arg(long)]
    headful: bool,

    /// Proxy for local browsers
    #[arg(long, env = "PROXY_SERVER")]
    proxy_server: Option<String>,

    /// First local debugging port is this plus one
    #[arg(long, default_value = "9222")]
    base_cdp_port: u16,

    /// Remote environment base URL used when a request names none
    #[arg(long, env = "BROWSER_ENDPOINT")]
    browser_endpoint: Option<String>,

    /// Remote environment id used with --browser-endpoint
    #[arg(long, env = "BROWSER_ID", default_value = "id")]
    browser_id: String,

    /// Public endpoint substituted into remote debugger URLs
    #[arg(long, env = "CDP_ENDPOINT")]
    cdp_endpoint: Option<String>,

    /// Default step budget per run
    #[arg(long, default_value = "20")]
    max_steps: u32,

    /// Relay capacity per run
    #[arg(long, default_value = "100")]
    relay_capacity: usize,

    /// Drain poll interval in milliseconds
    #[arg(long, default_value = "500")]
    poll_interval_ms: u64,

    /// Model provider (openai, deepseek, ark)
    #[arg(long, env = "LLM_TYPE", default_value = "ark")]
    llm_type: String,

    /// Model id
    #[arg(long, env = "LLM_MODEL_ID", default_value = "")]
    llm_model_id: String,

    /// Model API key
    #[arg(long, env = "LLM_API_KEY", default_value = "", hide_env_values = true)]
    llm_api_key: String,

    /// Model used for page content extraction
    #[arg(long, env = "LLM_EXTRACT_MODEL_ID", default_value = "")]
    llm_extract_model_id: String,

    /// Model API base URL
    #[arg(long, env = "ARK_BASE_URL")]
    llm_base_url: Option<String>,

    /// Send screenshots to the model
    #[arg(long, env = "ARK_USE_VISION")]
    use_vision: bool,

    /// Tool calling method of the model
    #[arg(long, env = "ARK_FUNCTION_CALLING", default_value = "function_calling")]
    tool_calling_method: String,

    /// Disable artifact mirroring
    #[arg(long)]
    no_artifacts: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let llm_type: LlmType =
            serde_json::from_value(serde_json::Value::String(self.llm_type.to_lowercase()))
                .map_err(|_| format!("Unknown LLM type '{}'", self.llm_type))?;

        let worker = if self.demo {
            WorkerKind::Demo
        } else {
            WorkerKind::Process {
                command: self.agent_command,
                args: self.agent_args,
            }
        };

        let defaults = ServerConfig::default();
        Ok(ServerConfig {
            http_addr: self.http_addr,
            supervisor: SupervisorConfig {
                relay_capacity: self.relay_capacity,
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                base_cdp_port: self.base_cdp_port,
                browser_path: self.browser_path,
                headless: !self.headful,
                proxy_server: self.proxy_server.filter(|p| !p.is_empty()),
                public_cdp_endpoint: self.cdp_endpoint.filter(|e| !e.is_empty()),
                locale: Locale::parse(&self.language),
                ..SupervisorConfig::default()
            },
            worker,
            llm: LlmConfig {
                llm_type,
                model_id: self.llm_model_id,
                api_key: self.llm_api_key,
                extract_model_id: self.llm_extract_model_id,
                base_url: self.llm_base_url,
            },
            policy: ExecutionPolicy {
                use_vision: self.use_vision,
                tool_calling_method: self.tool_calling_method.to_lowercase(),
                ..ExecutionPolicy::default()
            },
            step_budget: self.max_steps,
            browser_endpoint: self
                .browser_endpoint
                .filter(|e| !e.is_empty())
                .map(|e| RemoteEndpoint::new(e, self.browser_id)),
            artifact_base_url: if self.no_artifacts {
                None
            } else {
                defaults.artifact_base_url
            },
            shutdown_grace: defaults.shutdown_grace,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("relayrun=info".parse()?))
        .with_target(true)
        .init();

    let config = args.into_config()?;
    let grace = config.shutdown_grace;
    let listener = TcpListener::bind(&config.http_addr).await?;

    info!(
        http_addr = %config.http_addr,
        worker = ?config.worker,
        locale = %config.supervisor.locale,
        "Starting RelayRun server"
    );

    let state = AppState::new(config);
    let router = http::create_router(state.clone());

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
        })
        .await?;

    if tokio::time::timeout(grace, state.supervisor.wait_for_cleanup())
        .await
        .is_err()
    {
        warn!(
            pending = state.supervisor.pending_cleanups(),
            "Cleanups still running at shutdown"
        );
    }

    info!("RelayRun server stopped");
    Ok(())
}
