//! Inkmesh relay server binary.

use inkmesh_server::{RelayConfig, serve};
use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkmesh_server=info,tower_http=info".into()),
        )
        .init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = serve(config).await {
        error!("Relay server stopped: {}", e);
        std::process::exit(1);
    }
}
