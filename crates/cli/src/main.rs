//! parley — real-time chat messaging server.
//!
//! Exit codes: 0 clean shutdown, 1 init failure, 2 invalid config.

use {
    clap::{Parser, Subcommand},
    tracing::{error, info},
    tracing_subscriber::EnvFilter,
};

use {
    parley_common::Error,
    parley_config::{ParleyConfig, Severity, validate},
};

const EXIT_INIT_FAILURE: i32 = 1;
const EXIT_CONFIG_INVALID: i32 = 2;

#[derive(Parser)]
#[command(name = "parley", about = "parley — real-time chat messaging server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides discovery).
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default when no subcommand is provided).
    Serve,
    /// Validate the configuration and exit.
    CheckConfig,
    /// Generate a random 32-byte key as hex (for `encryption_key`).
    GenKey,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if matches!(cli.command, Some(Commands::GenKey)) {
        println!("{}", parley_security::random_key(32));
        return;
    }

    let config = load_config(&cli);

    let result = validate(&config);
    for diagnostic in &result.diagnostics {
        match diagnostic.severity {
            Severity::Error => error!(path = %diagnostic.path, "{}", diagnostic.message),
            _ => tracing::warn!(path = %diagnostic.path, "{}", diagnostic.message),
        }
    }
    if result.has_errors() {
        error!("configuration is invalid");
        std::process::exit(EXIT_CONFIG_INVALID);
    }
    if matches!(cli.command, Some(Commands::CheckConfig)) {
        info!("configuration is valid");
        return;
    }

    run(config);
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(cli: &Cli) -> ParleyConfig {
    let mut config = match &cli.config {
        Some(path) => match parley_config::load_config(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load config");
                std::process::exit(EXIT_CONFIG_INVALID);
            },
        },
        None => parley_config::discover_and_load(),
    };
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config
}

fn run(config: ParleyConfig) {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            std::process::exit(EXIT_INIT_FAILURE);
        },
    };

    match runtime.block_on(parley_gateway::serve(config)) {
        Ok(()) => {},
        Err(Error::Config(message)) => {
            error!("{message}");
            std::process::exit(EXIT_CONFIG_INVALID);
        },
        Err(e) => {
            error!(error = %e, "server failed");
            std::process::exit(EXIT_INIT_FAILURE);
        },
    }
}
