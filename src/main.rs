//! peer-proxy-core: connection orchestration and peer-input validation
//!
//! The binary is an operator tool around the library: it manages the
//! configuration file, validates peer-asserted records offline and can
//! dry-run a connection against scripted endpoints.
//!
//! # Usage
//!
//! ```bash
//! # Write a default configuration
//! peer-proxy-core -c ./config.json --generate-config
//!
//! # Check a configuration (with environment overrides applied)
//! PEER_PROXY_LOG_LEVEL=debug peer-proxy-core -c ./config.json --check-config
//!
//! # Validate a record received from a peer
//! peer-proxy-core --validate profile ./profile.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use peer_proxy_core::config::{create_default_config, load_config_with_env, Config};
use peer_proxy_core::connection::{RemoteConnection, Update};
use peer_proxy_core::endpoint::{ScriptedGetterFactory, ScriptedSharerFactory};
use peer_proxy_core::firewall::Firewall;

const DEFAULT_CONFIG_PATH: &str = "/etc/peer-proxy/config.json";

/// Kind of record accepted by `--validate`
#[derive(Debug, Clone, Copy)]
enum RecordKind {
    Profile,
    Client,
    Message,
}

impl RecordKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "profile" => Some(Self::Profile),
            "client" => Some(Self::Client),
            "message" => Some(Self::Message),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Profile => "user profile",
            Self::Client => "client state",
            Self::Message => "incoming message",
        }
    }
}

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Whether `-c` was given explicitly
    config_explicit: bool,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
    /// Validate a record file
    validate: Option<(RecordKind, PathBuf)>,
    /// Run a scripted share/get session
    dry_run: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let mut config_explicit = false;
        let mut generate_config = false;
        let mut check_config = false;
        let mut validate = None;
        let mut dry_run = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                        config_explicit = true;
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check-config" => {
                    check_config = true;
                }
                "--validate" => {
                    let kind = args.next().as_deref().and_then(RecordKind::parse);
                    let file = args.next();
                    match (kind, file) {
                        (Some(kind), Some(file)) => validate = Some((kind, PathBuf::from(file))),
                        _ => {
                            eprintln!("--validate expects <profile|client|message> <file>");
                            std::process::exit(1);
                        }
                    }
                }
                "--dry-run" => {
                    dry_run = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("peer-proxy-core v{}", peer_proxy_core::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            config_explicit,
            generate_config,
            check_config,
            validate,
            dry_run,
        }
    }
}

fn print_help() {
    println!(
        r"peer-proxy-core v{}

Per-peer tunnel orchestration and peer-input validation.

USAGE:
    peer-proxy-core [OPTIONS]

OPTIONS:
    -c, --config <PATH>          Configuration file path [default: {DEFAULT_CONFIG_PATH}]
    -g, --generate-config        Generate default configuration and exit
    --check-config               Check configuration and exit
    --validate <KIND> <FILE>     Validate a peer record (profile, client, message)
    --dry-run                    Run a scripted share/get session and print its updates
    -h, --help                   Print help information
    -v, --version                Print version information

ENVIRONMENT:
    PEER_PROXY_LOG_LEVEL          Override log level (trace, debug, info, warn, error)
    PEER_PROXY_ALLOW_NON_UNICAST  Override allow_non_unicast (true/false)
    PEER_PROXY_ICE_SERVERS        Override ICE servers (comma-separated urls)
    PEER_PROXY_BIND_ADDR          Override the getter bind address
    RUST_LOG                      Additional tracing filter directives
",
        peer_proxy_core::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Load the configuration, falling back to defaults when the default path is absent
fn load(args: &Args) -> Result<Config> {
    if !args.config_explicit && !args.config_path.exists() {
        return Ok(Config::default_config());
    }
    load_config_with_env(&args.config_path).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            args.config_path.display()
        )
    })
}

/// Validate one record file; fails if the record is rejected
fn validate_record(kind: RecordKind, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let record: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let firewall = Firewall::default();
    let valid = match kind {
        RecordKind::Profile => firewall.is_valid_user_profile(&record),
        RecordKind::Client => firewall.is_valid_client_state(&record),
        RecordKind::Message => firewall.is_valid_incoming_message(&record),
    };

    if !valid {
        bail!("{} in {} was rejected", kind.name(), path.display());
    }
    println!("{} in {} is valid", kind.name(), path.display());
    Ok(())
}

/// Drive one share and one get session against scripted endpoints
async fn dry_run(config: &Config) -> Result<()> {
    let (tx, mut updates) = mpsc::unbounded_channel::<Update>();
    let sharers = Arc::new(ScriptedSharerFactory::new().ready_immediately());
    let getters = Arc::new(
        ScriptedGetterFactory::new().with_auto_start(config.orchestrator.getter_bind_address),
    );

    let connection = RemoteConnection::builder(Arc::new(tx), sharers.clone(), getters.clone())
        .config(config)
        .build();

    connection.start_share()?.await?;
    let proxy = connection.start_get()?.await?;
    info!(%proxy, "Dry-run getter listening");

    if let Some(sharer) = sharers.latest() {
        sharer.emit_bytes_sent(1024);
        sharer.emit_bytes_received(4096);
    }
    tokio::time::sleep(config.orchestrator.state_update_interval() + Duration::from_millis(50)).await;

    connection.stop_get().await?;
    connection.stop_share().await?;

    while let Ok(update) = updates.try_recv() {
        println!("{}", serde_json::to_string(&update)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        create_default_config(&args.config_path)?;
        println!(
            "Generated default configuration at {}",
            args.config_path.display()
        );
        return Ok(());
    }

    let config = load(&args)?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("peer-proxy-core v{}", peer_proxy_core::VERSION);
    if args.config_path.exists() {
        info!("Configuration loaded from {}", args.config_path.display());
    } else {
        warn!(
            "{} not found, using default configuration",
            args.config_path.display()
        );
    }

    if let Some((kind, path)) = &args.validate {
        return validate_record(*kind, path);
    }

    if args.dry_run {
        dry_run(&config).await?;
        info!(
            "Dry run complete in {:.2}ms",
            start_time.elapsed().as_secs_f64() * 1000.0
        );
        return Ok(());
    }

    print_help();
    Ok(())
}
