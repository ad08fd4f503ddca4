use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{ArgAction, Parser};
use toolgate::{
    app_context::AppContext,
    config::ProxyConfig,
    observability::logging::init_logging,
    server,
};
use tracing::{error, Level};

#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(about = "Reverse proxy for OpenAI-compatible gateways with tool-calling orchestration")]
struct Cli {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    #[arg(long, env = "DEBUG", action = ArgAction::Set, num_args = 0..=1,
          default_value_t = false, default_missing_value = "true")]
    debug: bool,

    /// Base URL of the OpenAI-compatible upstream gateway.
    #[arg(long, env = "UPSTREAM_BASE_URL", default_value = "http://localhost:4000")]
    upstream_base_url: String,

    /// API key sent upstream. When unset, the client's Authorization header
    /// is forwarded instead.
    #[arg(long, env = "UPSTREAM_API_KEY")]
    upstream_api_key: Option<String>,

    /// Maximum tool-calling rounds per request.
    #[arg(long, env = "MAX_TOOL_ROUNDS", default_value_t = 5)]
    max_tool_rounds: usize,

    /// Per-tool execution timeout in seconds.
    #[arg(long, env = "TOOL_EXECUTION_TIMEOUT", default_value_t = 30)]
    tool_execution_timeout: u64,

    /// Run tool rounds non-streaming, then stream the final answer.
    #[arg(long, env = "ENABLE_HYBRID_STREAMING", action = ArgAction::Set, num_args = 0..=1,
          default_value_t = false, default_missing_value = "true")]
    enable_hybrid_streaming: bool,

    /// Overall request budget in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 300)]
    request_timeout: u64,

    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 100)]
    max_connections: usize,

    #[arg(long, env = "MAX_KEEPALIVE_CONNECTIONS", default_value_t = 20)]
    max_keepalive_connections: usize,

    /// Backend list file (YAML). An absent file means an empty catalog.
    #[arg(long, env = "BACKENDS_CONFIG", default_value = "config/backends.yaml")]
    backends_config: PathBuf,
}

impl Cli {
    fn into_config(self) -> ProxyConfig {
        ProxyConfig {
            host: self.host,
            port: self.port,
            debug: self.debug,
            upstream_base_url: self.upstream_base_url,
            upstream_api_key: self.upstream_api_key,
            max_tool_rounds: self.max_tool_rounds,
            tool_execution_timeout: Duration::from_secs(self.tool_execution_timeout),
            enable_hybrid_streaming: self.enable_hybrid_streaming,
            request_timeout: Duration::from_secs(self.request_timeout),
            max_connections: self.max_connections,
            max_keepalive_connections: self.max_keepalive_connections,
            backends_config: self.backends_config,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.into_config();

    init_logging(if config.debug {
        Level::DEBUG
    } else {
        Level::INFO
    });

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    let context = match AppContext::new(config).await {
        Ok(context) => context,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    match server::serve(context).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
