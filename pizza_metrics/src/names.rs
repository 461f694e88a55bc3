//! Metric names as they appear on the wire.

pub const ACTIVE_USERS: &str = "active_users_last_5min";
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUESTS_BY_METHOD: &str = "http_requests_by_method_total";
pub const HTTP_AVG_LATENCY_MS: &str = "http_avg_latency_ms";
pub const AUTH_SUCCESS_TOTAL: &str = "auth_success_total";
pub const AUTH_FAILURE_TOTAL: &str = "auth_failure_total";
pub const CPU_USAGE_PERCENT: &str = "cpu_usage_percent";
pub const MEMORY_USAGE_PERCENT: &str = "memory_usage_percent";
pub const PIZZA_CREATION_LATENCY_MS: &str = "pizza_creation_latency_ms";
pub const PIZZAS_SOLD_TOTAL: &str = "pizzas_sold_total";
pub const PIZZA_REVENUE_TOTAL: &str = "pizza_revenue_total";
pub const PIZZA_CREATION_FAILURES: &str = "pizza_creation_failures";

/// Dimension key used for per-method request metrics.
pub const METHOD_DIM: &str = "method";
