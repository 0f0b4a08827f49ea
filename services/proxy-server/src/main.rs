//! Smart Proxy
//!
//! HTTP service exposing Puppet environment classes, served from a shared
//! revalidating cache, and conflict-checked DNS record management.
//!
//! # Usage
//! ```bash
//! smart-proxy --puppet-url https://puppet.example.com:8140 \
//!     --puppet-ssl-ca /etc/puppetlabs/puppet/ssl/certs/ca.pem \
//!     --cloudflare-zone example.com
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use dns_proxy::{CloudflareDnsBackend, DnsBackend, DnsRecordManager};
use puppet_proxy::{
    warm_cache, ClassSource, EnvironmentClassesRetriever, EnvironmentSource, PuppetApiClient,
    PuppetApiConfig, RetrieverConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod api;

use api::{AppState, ClassesRetriever};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "smart-proxy")]
#[command(about = "Puppet classes and DNS record proxy", long_about = None)]
#[command(version)]
struct Cli {
    /// Puppet server base URL
    #[arg(long, env = "PUPPET_URL")]
    puppet_url: String,

    /// CA certificate for the Puppet server (PEM)
    #[arg(long, env = "PUPPET_SSL_CA")]
    puppet_ssl_ca: Option<PathBuf>,

    /// Client certificate (PEM)
    #[arg(long, env = "PUPPET_SSL_CERT")]
    puppet_ssl_cert: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long, env = "PUPPET_SSL_KEY")]
    puppet_ssl_key: Option<PathBuf>,

    /// Seconds a request waits for environment classes
    #[arg(long, env = "PUPPET_API_TIMEOUT", default_value = "30")]
    api_timeout: u64,

    /// Address to listen on
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    listen: SocketAddr,

    /// Cloudflare API token
    #[arg(long, env = "CLOUDFLARE_API_TOKEN", hide_env_values = true)]
    cloudflare_token: Option<String>,

    /// Zone managed through Cloudflare (e.g., example.com)
    #[arg(long, env = "CLOUDFLARE_ZONE")]
    cloudflare_zone: Option<String>,

    /// TTL for created DNS records, in seconds
    #[arg(long, default_value = "86400")]
    dns_ttl: u32,

    /// Don't fetch every environment's classes at startup
    #[arg(long)]
    skip_warm_cache: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON
    #[arg(long)]
    log_json: bool,
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json)?;

    info!("Starting smart proxy");

    let puppet = Arc::new(
        PuppetApiClient::new(&PuppetApiConfig {
            url: cli.puppet_url.clone(),
            ssl_ca: cli.puppet_ssl_ca.clone(),
            ssl_cert: cli.puppet_ssl_cert.clone(),
            ssl_key: cli.puppet_ssl_key.clone(),
        })
        .context("Failed to configure Puppet API client")?,
    );
    info!("Using Puppet server at {}", cli.puppet_url);

    let classes: ClassesRetriever = EnvironmentClassesRetriever::new(
        puppet.clone() as Arc<dyn ClassSource>,
        RetrieverConfig {
            wait_bound: Duration::from_secs(cli.api_timeout),
        },
    );

    let dns = dns_manager(&cli)?;

    let environments: Arc<dyn EnvironmentSource> = puppet;

    if cli.skip_warm_cache {
        info!("Skipping class cache warm-up");
    } else {
        tokio::spawn(warm_up(classes.clone(), environments.clone()));
    }

    let app = api::router(AppState {
        classes,
        environments,
        dns,
    });

    info!("Smart proxy listening on {}", cli.listen);

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("Failed to bind {}", cli.listen))?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn dns_manager(cli: &Cli) -> Result<Option<Arc<api::DnsManager>>> {
    let (token, zone) = match (&cli.cloudflare_token, &cli.cloudflare_zone) {
        (Some(token), Some(zone)) => (token.clone(), zone.clone()),
        (None, None) => {
            info!("No DNS backend configured; DNS endpoints disabled");
            return Ok(None);
        }
        _ => {
            warn!("Both --cloudflare-token and --cloudflare-zone are needed for DNS; DNS endpoints disabled");
            return Ok(None);
        }
    };

    let backend = CloudflareDnsBackend::new(token, zone)
        .context("Failed to configure Cloudflare DNS backend")?
        .with_ttl(cli.dns_ttl);
    info!("Managing DNS zone {} through Cloudflare", backend.zone_name());

    let backend: Arc<dyn DnsBackend> = Arc::new(backend);
    Ok(Some(Arc::new(DnsRecordManager::new(backend))))
}

async fn warm_up(classes: ClassesRetriever, environments: Arc<dyn EnvironmentSource>) {
    match environments.environments().await {
        Ok(environments) => {
            warm_cache(&classes, &environments).await;
        }
        Err(e) => warn!("Skipping class cache warm-up, cannot list environments: {}", e),
    }
}
