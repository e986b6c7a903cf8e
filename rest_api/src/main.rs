// rest_api/src/main.rs
use anyhow::Result;
use tokio::sync::oneshot;

use rest_api::{load_rest_api_config, load_storage_config, start_server};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let api_config = load_rest_api_config()?;
    let store_config = load_storage_config(None)?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    start_server(api_config, store_config, shutdown_rx).await
}
