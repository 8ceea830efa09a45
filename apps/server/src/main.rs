#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;

use actix_web::{App, HttpServer, web};
use tracing::info;

mod auth;
mod error;
mod routes;
mod state;

use error::AppError;
use logger::init_tracing;
use pingtower_service::config::Config;
use state::AppState;

/// Overrides the default config file location
const CONFIG_ENV: &str = "PINGTOWER_CONFIG";

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_config(std::env::var_os(CONFIG_ENV))?;
    let state = AppState::open(&config).await?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    run_server(addr, state).await
}

async fn run_server(addr: SocketAddr, state: AppState) -> Result<(), AppError> {
    let state = web::Data::new(state);
    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes)).bind(addr)?;

    info!(%addr, "PingTower API listening");
    server.run().await?;

    Ok(())
}
