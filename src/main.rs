mod auth;
mod backend;
mod config;
mod db;
mod error;
mod handlers;
mod ip_lookup;
mod local_store;
mod models;
mod tasks;
mod voting;

use std::sync::Arc;

use log::{error, info};

use auth::PlatformAuth;
use config::Config;
use db::Database;
use handlers::App;
use ip_lookup::IpResolver;
use local_store::LocalStore;
use tasks::realtime::RealtimeSubscription;
use voting::VotingState;

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let database = match Database::connect(&config.database_url, config.database_max_connections).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    let local = match LocalStore::open(&config.local_store_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open local store {}: {}", config.local_store_path, e);
            return;
        }
    };

    let client = match reqwest::Client::builder().timeout(config.http_timeout).build() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return;
        }
    };

    let ip = IpResolver::new(client.clone(), config.ip_lookup_url.clone(), local.clone());
    let platform = PlatformAuth::new(
        client,
        config.auth_url.clone(),
        config.api_key.clone(),
        config.auth_retry_attempts,
        config.retry_delay,
    );
    let voting = Arc::new(VotingState::new(database, config.clone(), local, ip));

    if let Err(e) = voting.refresh().await {
        error!("Initial fetch failed, starting with an empty view: {}", e);
    }

    // --- Start Background Task for Realtime Updates ---
    let subscription = RealtimeSubscription::open(voting.clone());

    let app = Arc::new(App {
        voting,
        auth: Arc::new(platform.clone()),
        platform,
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    };
    match warp::serve(handlers::routes(app)).try_bind_with_graceful_shutdown(config.bind_addr, shutdown) {
        Ok((addr, server)) => {
            info!("Listening on {}", addr);
            server.await;
            info!("Shutting down");
        }
        Err(e) => error!("Failed to bind {}: {}", config.bind_addr, e),
    }

    subscription.close();
}
