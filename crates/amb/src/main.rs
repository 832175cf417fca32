use std::sync::Arc;

use anyhow::Context;

use amb_core::config::Config;
use amb_store::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    amb_core::logging::init("amb")?;

    let cfg = Arc::new(Config::load()?);
    let store = SqliteStore::open(&cfg.database_path)
        .await
        .with_context(|| format!("opening database {}", cfg.database_path.display()))?;
    tracing::info!(path = %cfg.database_path.display(), "database ready");

    let store = Arc::new(store);
    let result = amb_telegram::router::run_polling(cfg, store.clone())
        .await
        .context("telegram bot failed");
    store.close().await;
    result
}
