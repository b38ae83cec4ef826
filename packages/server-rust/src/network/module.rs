//! Network module with deferred startup lifecycle.
//!
//! `new()` creates the shutdown controller, `start()` binds the TCP
//! listener, and `serve()` accepts connections. The controller exists before
//! the listener so the application state and signal handling can share it.

use std::future::Future;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{api_routes, health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::with_http_layers;
use super::shutdown::ShutdownController;

/// Manages the admin HTTP server lifecycle.
///
/// 1. `new()` -- allocates the shutdown controller
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready` -- process health checks
    /// - `GET|PUT /api/topom/...` -- status feed, model and admin commands
    pub fn build_router(&self, state: AppState) -> Router {
        let xauth = state.topom.xauth().to_string();
        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .merge(api_routes());
        with_http_layers(router, &self.config, &xauth).with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "admin listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves the admin API until `shutdown` resolves.
    ///
    /// When the signal fires the controller moves to Draining (readiness
    /// fails, new commands get 503), axum stops accepting connections, and
    /// accepted commands get `drain_timeout_ms` to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        self,
        state: AppState,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router(state);
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let ctrl = self.shutdown;

        ctrl.set_ready();

        let draining = Arc::clone(&ctrl);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                draining.trigger_shutdown();
                info!("admin listener draining");
            })
            .await?;

        // A listener error skips the graceful path; make sure we are draining.
        ctrl.trigger_shutdown();
        if ctrl.wait_for_drain(self.config.drain_timeout()).await {
            info!("admin commands drained");
        } else {
            warn!(
                in_flight = ctrl.in_flight_count(),
                "drain timeout expired with commands still running"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::HealthState;
    use crate::service::{Kicker, TopomConfig};
    use crate::testing::test_topom;

    fn local_config() -> NetworkConfig {
        NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..NetworkConfig::default()
        }
    }

    async fn state_for(module: &NetworkModule) -> AppState {
        let (topom, _fakes) = test_topom(4).await;
        AppState::new(
            topom,
            &TopomConfig::default(),
            Kicker::default(),
            module.shutdown_controller(),
        )
    }

    #[test]
    fn new_creates_module_without_binding() {
        let module = NetworkModule::new(NetworkConfig::default());
        assert!(module.listener.is_none());
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = NetworkModule::new(local_config());
        let port = module.start().await.unwrap();
        assert!(port > 0, "OS-assigned port should be > 0");
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = NetworkModule::new(local_config());
        let state = state_for(&module).await;
        let err = module
            .serve(state, std::future::ready(()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serve_stops_on_signal_and_drains() {
        let mut module = NetworkModule::new(local_config());
        module.start().await.unwrap();
        let ctrl = module.shutdown_controller();
        let state = state_for(&module).await;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(state, async move {
            let _ = rx.await;
        }));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ctrl.health_state(), HealthState::Ready);

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(ctrl.health_state(), HealthState::Stopped);
    }
}
