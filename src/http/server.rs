//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router that hands every request to the dispatcher
//! - Wire up middleware (correlation id, tracing)
//! - Attach the client deadline from `x-request-timeout-ms`
//! - Serve the proxy and admin listeners until shutdown
//!
//! # Design Decisions
//! - The correlation id is set before tracing so every span carries it
//! - A client disconnect drops the handler future; the dispatcher treats
//!   that as a cancelled request

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::gateway::Gateway;
use crate::http::dispatcher::Dispatcher;
use crate::http::request::{ClientDeadline, X_CORRELATION_ID};
use crate::lifecycle::shutdown::Shutdown;

/// Build the proxy router.
pub fn proxy_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(dispatcher)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(X_CORRELATION_ID, MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(X_CORRELATION_ID)),
        )
}

async fn proxy_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    mut request: Request<Body>,
) -> Response {
    if let Some(deadline) = ClientDeadline::from_headers(request.headers()) {
        request.extensions_mut().insert(deadline);
    }
    dispatcher.handle(request).await
}

/// Serve `router` on `listener` until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
    name: &'static str,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, listener = name, "HTTP server starting");

    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!(listener = name, "HTTP server stopped");
    Ok(())
}

/// The gateway's listeners.
pub struct HttpServer {
    gateway: Arc<Gateway>,
}

impl HttpServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Bind the configured addresses and serve until shutdown.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let proxy = TcpListener::bind(&self.gateway.config.listener.bind_address).await?;
        let admin = if self.gateway.config.admin.enabled {
            Some(TcpListener::bind(&self.gateway.config.admin.bind_address).await?)
        } else {
            None
        };
        self.run_with_listeners(proxy, admin, shutdown).await
    }

    /// Serve on already bound listeners.
    pub async fn run_with_listeners(
        self,
        proxy: TcpListener,
        admin: Option<TcpListener>,
        shutdown: &Shutdown,
    ) -> Result<(), std::io::Error> {
        let proxy_task = serve(proxy, self.gateway.proxy_router(), shutdown.subscribe(), "proxy");

        match admin {
            Some(admin) => {
                let admin_task = serve(
                    admin,
                    self.gateway.admin_router(),
                    shutdown.subscribe(),
                    "admin",
                );
                tokio::try_join!(proxy_task, admin_task)?;
            }
            None => proxy_task.await?,
        }
        Ok(())
    }
}
