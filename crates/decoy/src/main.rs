use anyhow::Context;
use clap::Parser;
use decoy::admin_api::AdminApiServer;
use decoy::config::{self, Args};
use decoy::imposter::ImposterManager;
use decoy::logging::init_logging;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_format, &args.log_level);

    let settings = args.manager_settings()?;
    if !settings.allow_injection {
        warn!("JavaScript injection is disabled; imposters using inject will be rejected");
    }
    let manager = Arc::new(ImposterManager::new(settings));

    if let Some(path) = &args.configfile {
        let imposters = config::load_imposters(path)?;
        info!(count = imposters.len(), "Loading imposters from {}", path.display());
        for imposter in imposters {
            let port = imposter.port;
            manager
                .create_imposter(imposter)
                .await
                .with_context(|| format!("failed to create imposter on port {port:?}"))?;
        }
    }

    let addr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .with_context(|| format!("could not resolve host '{}'", args.host))?;
    let server = AdminApiServer::bind(addr, Arc::clone(&manager))
        .await
        .with_context(|| format!("failed to bind admin API on {addr}"))?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            manager.delete_all().await;
        }
    }

    Ok(())
}
