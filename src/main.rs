//! countrygate - operator CLI for the country based login gate

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use countrygate::{
    config::{Config, ConfigManager, ConfigWatcher},
    gate::{GateSettings, LoginGate},
    geoip::{
        database_message, discover_candidate_databases, CountryResolver, DatabaseInspector,
        StaticCountryResolver, COUNTRIES,
    },
    metrics::GateMetrics,
    notice::{NoticeQueue, Severity},
    policy::PolicyMode,
    proxy::{check_proxy_header, detect_possible_proxy, ClientAddress, RequestHeaders},
    stats::{CounterKind, CounterStore, JsonFileCounterStore, MemoryCounterStore},
};

/// CLI arguments for countrygate
#[derive(Parser, Debug)]
#[command(name = "countrygate")]
#[command(about = "Country based login gate")]
#[command(version)]
#[command(long_about = "
Country based login gate

Decides whether a login attempt may proceed based on the country of the
client's IP address and a whitelist or blacklist of country codes.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file
4. Built-in defaults

Environment variables:
  COUNTRYGATE_DATABASE_PATH    - GeoIP database file
  COUNTRYGATE_STATIC_TABLE     - CIDR to country table file
  COUNTRYGATE_LOOKUP_DEADLINE  - Lookup deadline (e.g., 250ms)
  COUNTRYGATE_POLICY_MODE      - whitelist or blacklist
  COUNTRYGATE_COUNTRIES        - Comma separated country codes
  COUNTRYGATE_PROXY_HEADER     - Client IP header set by a reverse proxy
  COUNTRYGATE_STATS_PATH       - JSON counter file
  COUNTRYGATE_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
  COUNTRYGATE_OVERRIDE         - Disable every country check (1, true, yes, on)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "countrygate.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Disable every country check
    #[arg(long, help = "Activate the lockout override")]
    pub r#override: bool,

    #[arg(long, help = "GeoIP database path")]
    pub database: Option<String>,

    #[arg(long, help = "Policy mode (whitelist or blacklist)")]
    pub mode: Option<PolicyMode>,

    #[arg(long, help = "Comma separated country codes")]
    pub countries: Option<String>,

    #[arg(long, help = "Client IP header set by a reverse proxy")]
    pub proxy_header: Option<String>,

    #[arg(long, help = "JSON counter file")]
    pub stats_path: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate a login attempt
    Check {
        /// Transport peer address
        #[arg(long)]
        ip: String,
        /// Request header as `Name: value` or `Name=value`
        #[arg(long = "header")]
        headers: Vec<String>,
        /// Authenticated identity, recorded on allowed logins
        #[arg(long)]
        identity: Option<String>,
    },
    /// Validate a GeoIP database file
    ValidateDb {
        /// Defaults to the configured database
        path: Option<String>,
    },
    /// Search for GeoIP databases
    Discover {
        /// Additional directories to search
        roots: Vec<PathBuf>,
    },
    /// List headers suggesting a reverse proxy
    DetectProxy {
        #[arg(long)]
        ip: String,
        #[arg(long = "header")]
        headers: Vec<String>,
    },
    /// Check the client IP header against a request
    CheckHeader {
        /// Header to check; defaults to the configured one
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        ip: String,
        #[arg(long = "header")]
        headers: Vec<String>,
    },
    /// Show persisted counters
    Stats {
        /// Prometheus text exposition
        #[arg(long)]
        prometheus: bool,
    },
    /// List known country codes
    Countries,
    /// Follow configuration changes until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };
    if args.config.exists() {
        config.apply_env()?;
    }

    config.merge_with_cli_args(
        args.database.as_deref(),
        args.mode,
        args.countries.as_deref(),
        args.proxy_header.as_deref(),
        args.stats_path.as_deref(),
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    let override_active = args.r#override || ConfigManager::override_from_env();
    if override_active {
        warn!("Lockout override is active, country checks are disabled");
    }

    let command = match args.command {
        Some(command) if !args.validate_config => command,
        _ => {
            print_summary(&config, override_active);
            return Ok(ExitCode::SUCCESS);
        }
    };

    let inspector = Arc::new(DatabaseInspector::new(config.geoip.build_date_cache_ttl));

    match command {
        Command::Check {
            ip,
            headers,
            identity,
        } => {
            let headers = parse_headers(&headers)?;
            let notices = Arc::new(NoticeQueue::new());
            let counters = open_counters(&config)?;
            let gate = LoginGate::new(build_resolver(&config)?, counters, notices.clone())
                .with_inspector(inspector)
                .with_metrics(GateMetrics::new()?);
            let settings = GateSettings::from_config(&config, override_active);

            let verdict = gate.evaluate(&settings, &ip, &headers);
            let admitted = match &identity {
                Some(identity) => gate.admit(&settings, &verdict, &identity.as_str()),
                None => Ok(()),
            };

            for notice in notices.drain() {
                println!("[{}] {}", notice.severity, notice.text);
            }
            println!("{}", verdict);
            match admitted {
                Ok(()) if verdict.is_allowed() => Ok(ExitCode::SUCCESS),
                Ok(()) => Ok(ExitCode::from(2)),
                Err(e) => {
                    println!("{}", e);
                    Ok(ExitCode::from(2))
                }
            }
        }
        Command::ValidateDb { path } => {
            let path = path.unwrap_or_else(|| config.geoip.database_path.clone());
            match inspector.validate(path.as_str()) {
                Ok(handle) => {
                    println!("{}", handle.describe());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("{}", database_message(&e));
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Discover { roots } => {
            let mut search = roots;
            search.extend(config.geoip.search_paths.iter().cloned());
            if let Some(parent) = Path::new(&config.geoip.database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    search.push(parent.to_path_buf());
                }
            }
            if search.is_empty() {
                search.push(std::env::current_dir().context("Failed to read current directory")?);
            }

            let found = discover_candidate_databases(&search, config.geoip.search_depth, &inspector);
            if found.is_empty() {
                println!("No GeoIP database found");
            }
            for candidate in found {
                println!(
                    "{}\t{:?}\t{}",
                    candidate.path.display(),
                    candidate.format,
                    candidate.publish_date.format("%Y-%m-%d")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::DetectProxy { ip, headers } => {
            let headers = parse_headers(&headers)?;
            let signals = detect_possible_proxy(&ip, &headers);
            if signals.is_empty() {
                println!("No reverse proxy detected");
            }
            for signal in signals {
                println!("{}: {}", signal.header, signal.value);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckHeader { name, ip, headers } => {
            let headers = parse_headers(&headers)?;
            let name = name.or_else(|| config.proxy.header.clone()).unwrap_or_default();
            let resolver = build_resolver(&config)?;
            let db = inspector.validate(config.geoip.database_path.as_str()).ok();

            let geo = |address: &ClientAddress| {
                let db = db.as_ref()?;
                resolver.lookup(db, address).ok().flatten()
            };
            let check = check_proxy_header(&name, &ip, &headers, Some(&geo));

            println!("[{}] {} {}", check.status, check.header, check.message);
            Ok(if check.status == Severity::Error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Stats { prometheus } => {
            let counters = open_counters(&config)?;
            if prometheus {
                let metrics = GateMetrics::new()?;
                metrics.load_counters(counters.as_ref());
                print!("{}", metrics.render());
            } else {
                for kind in CounterKind::ALL {
                    println!("[{}]", kind);
                    for (key, count) in counters.snapshot(kind) {
                        println!("{}\t{}", key, count);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Countries => {
            for (code, name) in COUNTRIES {
                println!("{}\t{}", code, name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Watch => {
            if !args.config.exists() {
                bail!("Configuration file not found: {}", args.config.display());
            }
            watch(args.config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn watch(path: PathBuf) -> Result<()> {
    use tokio_stream::StreamExt;

    let watcher = ConfigWatcher::new(path)?;
    let mut changes = watcher.subscribe();
    info!("Watching configuration, press Ctrl+C to stop");

    loop {
        tokio::select! {
            change = changes.next() => match change {
                Some(Ok(event)) => {
                    let settings = GateSettings::from_config_and_env(&event.config);
                    info!(
                        "Settings reloaded: {} [{}], proxy header {:?}",
                        settings.policy.mode(),
                        settings.policy.to_list(),
                        settings.proxy.header
                    );
                }
                Some(Err(e)) => warn!("Missed configuration changes: {}", e),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                break;
            }
        }
    }
    Ok(())
}

fn parse_headers(raw: &[String]) -> Result<RequestHeaders> {
    let mut headers = RequestHeaders::new();
    for line in raw {
        if !headers.insert_line(line) {
            bail!("Invalid header {:?}, expected `Name: value` or `Name=value`", line);
        }
    }
    Ok(headers)
}

fn open_counters(config: &Config) -> Result<Arc<dyn CounterStore>> {
    Ok(match &config.stats.path {
        Some(path) => Arc::new(JsonFileCounterStore::open(path)?),
        None => Arc::new(MemoryCounterStore::new()),
    })
}

fn build_resolver(config: &Config) -> Result<Arc<dyn CountryResolver>> {
    if let Some(table) = &config.geoip.static_table {
        let text = std::fs::read_to_string(table)
            .with_context(|| format!("Failed to read country table: {}", table.display()))?;
        let resolver = StaticCountryResolver::parse_table(&text)
            .with_context(|| format!("Failed to parse country table: {}", table.display()))?;
        info!("Loaded {} networks from {}", resolver.len(), table.display());
        return Ok(Arc::new(resolver));
    }

    #[cfg(feature = "geoip")]
    {
        Ok(Arc::new(countrygate::geoip::MaxMindCountryResolver::new()))
    }

    #[cfg(not(feature = "geoip"))]
    {
        warn!("No country table configured and geoip feature disabled, every lookup is unresolved");
        Ok(Arc::new(StaticCountryResolver::new()))
    }
}

fn print_summary(config: &Config, override_active: bool) {
    info!("Configuration is valid");
    info!("Configuration summary:");
    info!(
        "  GeoIP database: {}",
        if config.geoip.database_path.is_empty() {
            "(not configured)"
        } else {
            config.geoip.database_path.as_str()
        }
    );
    info!("  Policy: {} [{}]", config.policy.mode, config.policy.countries);
    info!("  Proxy header: {:?}", config.proxy.header);
    info!(
        "  Counters: {}",
        config
            .stats
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "in memory".to_string())
    );
    info!("  Override: {}", if override_active { "active" } else { "inactive" });
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_level(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
