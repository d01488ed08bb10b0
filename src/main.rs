use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use portico::config::{Config, LoggingConfig};
use portico::error::ConfigError;
use portico::{Pinger, Portico, Protocol};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portico")]
#[command(about = "Backend data plane for a caching proxy: pipelined node connections and health probes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the health-check loop for every configured node
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/dev.toml")]
        config: PathBuf,
        /// Probe every node once and exit
        #[arg(long)]
        once: bool,
    },
    /// Send ping probes to one node
    Ping {
        /// Node address as host:port
        #[arg(short, long)]
        addr: String,
        /// Wire protocol (redis or memcache_binary)
        #[arg(short, long, default_value = "memcache_binary")]
        protocol: String,
        /// Number of probes to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Dial, read and write timeout in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Generate example configuration files
    Config {
        /// Backend protocol (memcache_binary or redis)
        #[arg(short, long)]
        protocol: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config, once } => {
            run_checks(config, once).await?;
        }
        Commands::Ping {
            addr,
            protocol,
            count,
            timeout_ms,
        } => {
            ping_node(&addr, &protocol, count, timeout_ms).await?;
        }
        Commands::Config { protocol, output } => {
            generate_config(protocol, output)?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

async fn run_checks(config_path: PathBuf, once: bool) -> anyhow::Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config.logging)?;

    info!("Starting portico v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);
    info!(
        "Cluster {} ({}), {} nodes",
        config.backend.cluster,
        config.backend.protocol,
        config.backend.nodes.len()
    );

    let portico = Portico::new(config);
    let mut backends = portico.backends();

    if once {
        let statuses = portico.check_once(&mut backends).await;
        let mut failed = 0;
        for (backend, status) in backends.iter().zip(&statuses) {
            println!("{:<24} {}", backend.addr, status);
            if !status.is_healthy() {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(anyhow!("{} of {} nodes unhealthy", failed, statuses.len()));
        }
        return Ok(());
    }

    tokio::select! {
        _ = portico.run_health_checks(&mut backends) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for shutdown signal")?;
            info!("Shutting down health checks");
        }
    }

    Ok(())
}

async fn ping_node(addr: &str, protocol: &str, count: u32, timeout_ms: u64) -> anyhow::Result<()> {
    init_logging(&LoggingConfig {
        level: "warn".to_string(),
        format: "text".to_string(),
    })?;

    let protocol = parse_protocol(protocol)?;
    let timeout = Duration::from_millis(timeout_ms);
    let mut pinger = Pinger::dial(addr, protocol, timeout, timeout, timeout)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;

    let mut failed = 0;
    for seq in 1..=count {
        let start = Instant::now();
        match pinger.ping().await {
            Ok(()) => println!("{} {}: seq={} time={:?}", protocol, addr, seq, start.elapsed()),
            Err(e) => {
                println!("{} {}: seq={} error: {}", protocol, addr, seq, e);
                failed += 1;
                // The connection state is unknown after a failed probe
                break;
            }
        }
    }
    pinger.close()?;

    if failed > 0 {
        return Err(anyhow!("ping to {} failed", addr));
    }
    Ok(())
}

fn parse_protocol(name: &str) -> anyhow::Result<Protocol> {
    match name {
        "redis" => Ok(Protocol::Redis),
        "memcache_binary" | "memcache" => Ok(Protocol::MemcacheBinary),
        other => Err(anyhow!(
            "Unknown protocol '{}', expected 'redis' or 'memcache_binary'",
            other
        )),
    }
}

fn generate_config(protocol: String, output: PathBuf) -> anyhow::Result<()> {
    println!("Generating {} configuration file: {:?}", protocol, output);

    Config::create_example_config(&output, &protocol).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  portico check --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Cluster: {}", config.backend.cluster);
            println!("  Protocol: {}", config.backend.protocol);
            println!(
                "  Timeouts: dial {}ms, read {}ms, write {}ms",
                config.timeouts.dial_ms, config.timeouts.read_ms, config.timeouts.write_ms
            );
            println!("  Nodes: {} instances", config.backend.nodes.len());
            for (i, node) in config.backend.nodes.iter().enumerate() {
                println!("    {}: {}", i + 1, node);
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("portico v{}", env!("CARGO_PKG_VERSION"));
    println!("Backend data plane for a caching proxy");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Protocols:");
    println!("  • Redis (RESP)");
    println!("  • Memcache binary");
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized at level: {}", logging.level);
    Ok(())
}
