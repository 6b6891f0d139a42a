// API server implementation using actix-web

use crate::api::{handlers::AppState, middleware, routes};
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};

pub struct ApiServer {
    pub host: String,
    pub port: u16,
}

impl ApiServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Serve until the process is stopped.
    pub async fn run(self, state: AppState) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);
        tracing::info!(host = %self.host, port = self.port, "starting admin API server");

        let state = web::Data::new(state);
        HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            App::new()
                .app_data(state.clone())
                .wrap(logger)
                .wrap(compress)
                .configure(routes::configure_routes)
        })
        .disable_signals()
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind to {}", bind_addr))?
        .run()
        .await
        .context("HTTP server error")?;

        Ok(())
    }
}
