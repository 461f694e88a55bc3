use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use pizza_metrics::{
    AuthEvents, BusinessEvents, Exporter, ExporterHandle, MetricStore, OrderItem,
    RequestInstrumentation, TelemetryConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Level};

#[derive(Clone)]
struct AppState {
    requests: RequestInstrumentation,
    business: BusinessEvents,
    auth: AuthEvents,
    start_time: Instant,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderItemRequest {
    description: String,
    price: f64,
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    items: Vec<OrderItemRequest>,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    pizzas: usize,
    total: f64,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let store = Arc::new(MetricStore::new());
    let state = AppState {
        requests: RequestInstrumentation::new(store.clone()),
        business: BusinessEvents::new(store.clone()),
        auth: AuthEvents::new(store.clone()),
        start_time: Instant::now(),
    };

    let exporter = start_exporter(store)?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth", post(login))
        .route("/api/order", post(create_order))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .with_state(state);

    let addr = "0.0.0.0:3000";
    info!("Starting pizza service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    if let Some(handle) = exporter {
        handle.shutdown().await;
    }
    Ok(())
}

/// Spawns the metrics exporter when a collector is configured, either via a
/// TOML file (`PIZZA_METRICS_CONFIG`) or via `METRICS_URL` /
/// `METRICS_API_KEY` / `METRICS_SOURCE`. Without one the service runs with
/// in-process aggregation only.
fn start_exporter(store: Arc<MetricStore>) -> anyhow::Result<Option<ExporterHandle>> {
    let config = if let Ok(path) = std::env::var("PIZZA_METRICS_CONFIG") {
        Some(TelemetryConfig::from_file(path)?)
    } else {
        match (std::env::var("METRICS_URL"), std::env::var("METRICS_API_KEY")) {
            (Ok(url), Ok(api_key)) => {
                let source =
                    std::env::var("METRICS_SOURCE").unwrap_or_else(|_| "pizza-service-dev".into());
                Some(TelemetryConfig::new(url, api_key, source))
            }
            _ => None,
        }
    };

    match config {
        Some(config) => Ok(Some(Exporter::new(store, config)?.spawn())),
        None => {
            warn!("No metrics collector configured, exporter disabled");
            Ok(None)
        }
    }
}

/// Tracks every request: counts on entry, latency on every exit path, and
/// activity for the identity the auth layer resolved (here: a header).
async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().as_str().to_string();
    let handle = state.requests.on_request_start(&method);

    if let Some(user_id) = req
        .headers()
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
    {
        state.requests.on_authenticated_identity(user_id);
    }

    let response = next.run(req).await;
    state.requests.on_request_finish(handle);
    response
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Response {
    // Demo credential check; real verification lives in the external auth
    // collaborator.
    if request.password.is_empty() {
        state.auth.record_failure();
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }

    state.auth.record_success();
    state.requests.on_authenticated_identity(&request.email);
    Json(LoginResponse {
        user_id: request.email,
    })
    .into_response()
}

async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Response {
    if request.items.is_empty() {
        state.business.record_creation_failure();
        return (StatusCode::BAD_REQUEST, "order has no items").into_response();
    }

    let started = Instant::now();
    let items: Vec<OrderItem> = request
        .items
        .iter()
        .map(|item| OrderItem { price: item.price })
        .collect();
    let total: f64 = items.iter().map(|item| item.price).sum();

    info!(
        pizzas = items.len(),
        total, "Order completed: {}",
        request
            .items
            .iter()
            .map(|i| i.description.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    state.business.record_sale(&items);
    state
        .business
        .record_creation_latency(started.elapsed().as_secs_f64() * 1000.0);

    Json(OrderResponse {
        pizzas: items.len(),
        total,
        created_at: chrono::Utc::now(),
    })
    .into_response()
}
