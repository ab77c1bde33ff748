mod adapters;
mod app;
pub mod auth;
mod calendar;
mod clock;
pub mod config;
mod gate;
mod media;
mod ports;
mod recorder;
mod state;
mod store;

pub use app::app;
pub use auth::{generate_auth_key, hash_password};

use std::net::SocketAddr;

pub async fn serve(addr: SocketAddr, config: config::AppConfig) {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app(config)).await.expect("server error");
}
