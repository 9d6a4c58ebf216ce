/**
 * xfchat Server Entry Point
 *
 * Loads configuration, initializes tracing and serves the chat API and
 * WebSocket endpoint.
 */

#[cfg(feature = "ssr")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    tracing::info!("[Startup] Server initialization started (RUST_LOG={})", env_filter);

    let config = xfchat::backend::server::config::load_config()?;
    let bind_address = config.bind_address.clone();

    let app = xfchat::backend::server::init::create_app(config).await;

    tracing::info!("[Startup] Starting server on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("[Startup] Listening on {}", bind_address);
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(not(feature = "ssr"))]
fn main() {
    eprintln!("Server requires the 'ssr' feature to be enabled.");
    eprintln!("Run with: cargo run --bin xfchat-server --features ssr");
    std::process::exit(1);
}
