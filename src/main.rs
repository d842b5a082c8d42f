use clap::{Parser, Subcommand};
use std::net::IpAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

use noti_ratelimit::config::{LoggingConfig, NotiConfig};
use noti_ratelimit::protocol::ClearSelector;
use noti_ratelimit::ratelimit::RateLimitPolicy;
use noti_ratelimit::service::RateLimitService;

/// Manage rate limiting for users and IPs.
#[derive(Debug, Parser)]
#[command(name = "noti-ratelimit", version, about)]
struct Cli {
    /// Configuration file (YAML or TOML); `NOTI__*` variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Clear rate limits for a user, an IP or a key; everything when none is given
    Clear {
        /// User ID
        #[arg(long)]
        user: Option<u64>,
        /// Client IP address
        #[arg(long)]
        ip: Option<IpAddr>,
        /// Raw rate limit key, e.g. `notification:user:42`
        #[arg(long)]
        key: Option<String>,
    },
    /// Show active rate limit keys
    Status,
    /// Exercise the limiter with synthetic requests
    Test {
        /// Requests allowed per window
        #[arg(long, default_value_t = 10)]
        limit: u64,
        /// Window length in seconds
        #[arg(long, default_value_t = 60)]
        window: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = NotiConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting noti-ratelimit");

    let service = RateLimitService::from_config(&config).await?;
    let admin = service.admin();

    match cli.action {
        Action::Clear { user, ip, key } => {
            let outcomes = admin.clear(&ClearSelector { user, ip, key }).await;
            let mut cleared = Vec::new();
            for outcome in &outcomes {
                if outcome.success {
                    cleared.push(format!("{} ({} keys)", outcome.target, outcome.removed));
                } else {
                    println!("Failed to clear rate limit for {}", outcome.target);
                }
            }

            if cleared.is_empty() {
                println!("No rate limits were cleared");
            } else {
                println!("Successfully cleared rate limits for: {}", cleared.join(", "));
            }
            if outcomes.iter().any(|o| !o.success) {
                anyhow::bail!("some rate limits could not be cleared");
            }
        }
        Action::Status => {
            let statuses = admin.status().await?;
            if statuses.is_empty() {
                println!("No active rate limits found");
                return Ok(());
            }

            println!("Found {} active rate limit keys:", statuses.len());
            println!("{}", "-".repeat(50));
            for status in statuses {
                println!("Key: {}", status.key);
                println!("  Count: {}", status.count);
                println!("  TTL: {} seconds", status.ttl);
                println!();
            }
        }
        Action::Test { limit, window } => {
            let policy = RateLimitPolicy::new(limit, window)?;
            println!("Testing rate limiting: {} requests per {} seconds", limit, window);
            println!("{}", "-".repeat(50));

            for probe in admin.test(policy).await? {
                let decision = &probe.decision;
                println!(
                    "Request {:2}: {:7} | Remaining: {:2} | Retry after: {:2}s",
                    probe.request,
                    if decision.allowed { "ALLOWED" } else { "BLOCKED" },
                    decision.remaining,
                    decision.retry_after
                );
                if !decision.allowed {
                    println!("Rate limit exceeded at request {}", probe.request);
                }
            }
            println!("Rate limiting test completed");
        }
    }

    Ok(())
}

/// Initialize tracing; `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
