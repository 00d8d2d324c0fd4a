use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use host_forward::config::Config;
use host_forward::proxy::connector::Connector;
use host_forward::proxy::egress::EgressProxies;
use host_forward::proxy::{Dispatcher, DnsFailurePolicy, HttpForwarder, SsrfGuard, SystemResolver};
use host_forward::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Arc::new(Config::load().context("Failed to load configuration")?);

    let egress = EgressProxies::from_config(&cfg.upstream).context("Invalid upstream proxy setting")?;
    if egress.is_enabled() {
        tracing::info!("Outbound requests go through upstream proxy");
    }
    let engine = HttpForwarder::new(Connector::new(cfg.strict_tls, egress));

    let policy = if cfg.ssrf_dns_fail_closed {
        DnsFailurePolicy::FailClosed
    } else {
        DnsFailurePolicy::FailOpen
    };
    let guard = SsrfGuard::new(Arc::new(SystemResolver), policy);
    let dispatcher = Arc::new(Dispatcher::new(guard, Arc::new(engine)));

    tokio::select! {
        res = server::listener::run(Arc::clone(&cfg), dispatcher) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
