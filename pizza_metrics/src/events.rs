use crate::names;
use crate::store::MetricStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// One line item of a completed order; only the price matters to telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub price: f64,
}

/// Fire-and-forget entry points for the order-processing collaborator.
#[derive(Clone)]
pub struct BusinessEvents {
    store: Arc<MetricStore>,
}

impl BusinessEvents {
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self { store }
    }

    /// Records a completed sale: sold count grows by the item count, revenue
    /// by the price sum. Negative prices are clamped to zero.
    pub fn record_sale(&self, items: &[OrderItem]) {
        if items.is_empty() {
            return;
        }
        let revenue: f64 = items
            .iter()
            .map(|item| {
                if item.price < 0.0 {
                    warn!(price = item.price, "clamping negative item price to zero");
                    0.0
                } else {
                    item.price
                }
            })
            .sum();

        self.store
            .increment_counter(names::PIZZAS_SOLD_TOTAL, items.len() as f64, None);
        self.store
            .increment_counter(names::PIZZA_REVENUE_TOTAL, revenue, None);
    }

    pub fn record_creation_failure(&self) {
        self.store
            .increment_counter(names::PIZZA_CREATION_FAILURES, 1.0, None);
    }

    pub fn record_creation_latency(&self, ms: f64) {
        self.store.record_creation_latency(ms);
    }
}

/// Fire-and-forget entry points for the auth collaborator.
#[derive(Clone)]
pub struct AuthEvents {
    store: Arc<MetricStore>,
}

impl AuthEvents {
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self { store }
    }

    pub fn record_success(&self) {
        self.store
            .increment_counter(names::AUTH_SUCCESS_TOTAL, 1.0, None);
    }

    pub fn record_failure(&self) {
        self.store
            .increment_counter(names::AUTH_FAILURE_TOTAL, 1.0, None);
    }
}
