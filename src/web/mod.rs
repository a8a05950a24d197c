//! HTTP control API, carried forward from the teacher's `web/` module:
//! a `salvo` router over process-wide state stashed in a `OnceCell`,
//! initialized once by `WebServer::new` before the first request can land.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::orchestrator::Orchestrator;

pub mod handlers;
#[cfg(feature = "metrics")]
pub mod metrics;

#[derive(Clone)]
pub struct WebState {
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> &'static WebState {
    WEB_STATE.get().expect("web state is not initialized before handler execution")
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub async fn new(config: Arc<Config>, orchestrator: Arc<Orchestrator>) -> Result<Self> {
        let _ = WEB_STATE.set(WebState {
            orchestrator,
            started_at: Instant::now(),
        });
        Ok(Self { config })
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.bridge.bind_address, self.config.bridge.port);
        info!(%bind_addr, "starting web server");

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(handlers::create_router()).await;

        Ok(())
    }
}
