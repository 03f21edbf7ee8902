use crate::{
    admin::{start_admin_server, RelayMetrics},
    config::RelayConfig,
    controller::PanelHandle,
    error::RelayError,
    extraction::{project_name_from_query, ExtractionJob},
    forward::Forwarder,
    jobs::ExtractionQueue,
    policy::{RequestContext, RouteAction, RoutePolicy},
    Result,
};
use axum::{
    body::Body,
    extract::State,
    http::{Request, Response, StatusCode},
    response::IntoResponse,
    Router,
};
use std::net::SocketAddr;
use std::sync::{atomic::Ordering, Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Local reverse proxy between the embedded frame and the remote origin.
pub struct RelayServer {
    config: RelayConfig,
    state: RelayState,
}

#[derive(Clone)]
struct RelayState {
    policy: Arc<RoutePolicy>,
    forwarder: Forwarder,
    panel: Arc<dyn PanelHandle>,
    queue: ExtractionQueue,
    project_name_key: Arc<str>,
    metrics: Arc<RelayMetrics>,
}

impl RelayServer {
    pub fn new(
        config: RelayConfig,
        panel: Arc<dyn PanelHandle>,
        queue: ExtractionQueue,
        metrics: Arc<RelayMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        let forwarder = Forwarder::new(
            config.remote_origin_trimmed(),
            config.stripped_headers.clone(),
            config.max_request_body_bytes,
            metrics.clone(),
        )?;

        let state = RelayState {
            policy: Arc::new(RoutePolicy::for_prefix(&config.intercept_prefix)),
            forwarder,
            panel,
            queue,
            project_name_key: Arc::from(config.project_name_key.as_str()),
            metrics,
        };

        Ok(Self { config, state })
    }

    /// Replace the routing policy (defaults to intercepting `intercept_prefix`).
    pub fn with_policy(mut self, policy: RoutePolicy) -> Self {
        self.state.policy = Arc::new(policy);
        self
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.state.metrics.clone()
    }

    /// Every path goes through the same handler.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(handle_request)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the listener. Fails when the port is taken: the panel's frame
    /// and resource allow-list point at this exact port.
    pub async fn bind(self) -> Result<BoundRelay> {
        let addr = format!("{}:{}", self.config.listen_address, self.config.listen_port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            RelayError::Network(format!("Failed to bind relay on {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        info!("Relay listening on {} -> {}", local_addr, self.config.remote_origin);

        Ok(BoundRelay {
            router: self.router(),
            listener,
            local_addr,
            admin_port: self.config.admin_port,
            metrics: self.state.metrics.clone(),
        })
    }
}

/// A relay whose listener is already bound.
pub struct BoundRelay {
    router: Router,
    listener: TcpListener,
    local_addr: SocketAddr,
    admin_port: Option<u16>,
    metrics: Arc<RelayMetrics>,
}

impl BoundRelay {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(self) -> Result<()> {
        if let Some(port) = self.admin_port {
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                if let Err(e) = start_admin_server(port, metrics).await {
                    error!("Admin server failed: {}", e);
                }
            });
        }

        axum::serve(self.listener, self.router)
            .await
            .map_err(|e| RelayError::Network(format!("Relay failed: {}", e)))
    }
}

async fn handle_request(State(state): State<RelayState>, req: Request<Body>) -> Response<Body> {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

    let action = state.policy.classify(&RequestContext {
        method: req.method().as_str(),
        path: req.uri().path(),
        query: req.uri().query(),
    });

    match action {
        RouteAction::Intercept => intercept(&state, &req),
        RouteAction::Forward => state.forwarder.forward(req).await,
    }
}

/// Acknowledge the download at once and push the extraction to the queue.
fn intercept(state: &RelayState, req: &Request<Body>) -> Response<Body> {
    state.metrics.intercepted.fetch_add(1, Ordering::Relaxed);
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    info!("Intercepted archive download {}", path_and_query);

    state.panel.hide();

    match req
        .uri()
        .query()
        .and_then(|query| project_name_from_query(query, &state.project_name_key))
    {
        Some(project_name) => {
            let job = ExtractionJob::new(
                project_name,
                state.forwarder.upstream_url(path_and_query),
            );
            debug!("Queueing extraction job [{}]", job.id);
            if let Err(e) = state.queue.submit(job) {
                warn!("{}", e);
            }
        }
        None => {
            debug!("No {} parameter, skipping extraction", state.project_name_key);
        }
    }

    StatusCode::NO_CONTENT.into_response()
}
