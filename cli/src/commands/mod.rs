//! Command implementations

pub mod reap;
pub mod site;
pub mod units;
pub mod version;
pub mod vm;

use tracing::warn;

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
