//! The realm server binary.
//!
//! Parses the realm identity and backend selection from flags or the
//! environment, builds the provider, and serves the router.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use realm_core::types::RealmId;
use realm_daemon::metrics::MetricsRegistry;
use realm_daemon::{router, Provider, ProviderName};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Software realm for PIN-protected secret recovery.
#[derive(Parser, Debug)]
#[command(name = "realm-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// A 16-byte hex string identifying this realm.
    ///
    /// Changing the id of an existing realm orphans its stored records.
    #[arg(long, env = "REALM_ID")]
    id: String,

    /// The port to serve on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// The backend provider to run against.
    ///
    /// The memory provider reads versioned tenant signing keys from the
    /// TENANT_SECRETS environment variable, as JSON of the form
    /// {"tenantName": {"1": "tenantSecretKey"}}.
    #[arg(long, env = "PROVIDER", default_value = "memory")]
    provider: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let realm_id: RealmId = args.id.parse().context("invalid --id / REALM_ID")?;
    let provider_name: ProviderName =
        args.provider.parse().context("invalid --provider / PROVIDER")?;

    info!(realm = %realm_id, provider = %provider_name, "starting realm");

    let provider =
        Provider::new(provider_name, &realm_id).context("failed to construct provider")?;
    let metrics = MetricsRegistry::new().context("failed to register metrics")?;

    let app = router::router(realm_id, Arc::new(provider), metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
