mod cli;

use hls_relay::{config, server, upstream::proxy};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    // Load config, then environment, then CLI flags
    let mut config = config::load_config_or_default(config_path)?;
    config::apply_env_overrides(&mut config)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting hls-relay");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!("Upstream: {}", config.upstream.url_template);

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "hls_relay=trace,tower_http=debug".to_string()
        } else {
            "hls_relay=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("hls-relay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Upstream: {}", config.upstream.url_template);
    match config.upstream.proxy() {
        Some(url) => {
            let redacted = proxy::parse_proxy_url(url)
                .map(|p| p.redacted())
                .unwrap_or_else(|_| "<invalid>".to_string());
            println!("  Proxy: {}", redacted);
        }
        None => println!("  Proxy: none"),
    }
    println!("  Timeout: {}s", config.upstream.timeout_secs);
    println!(
        "  Cache TTL: {}s (eager expiry: {}, coalesce: {})",
        config.cache.ttl_secs, config.cache.eager_expiry, config.cache.coalesce
    );
    println!("  Segment extensions: {}", config.relay.segment_extensions.join(", "));

    Ok(())
}
