use chrono::Utc;
use serde::Serialize;

const CUMULATIVE: &str = "AGGREGATION_TEMPORALITY_CUMULATIVE";

/// Export semantics of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Last-observed instantaneous value.
    Gauge,
    /// Monotonically non-decreasing cumulative sum.
    Sum,
}

/// One metric observation, before it is wrapped into the wire envelope.
#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub name: String,
    pub unit: String,
    pub kind: MetricKind,
    pub value: f64,
    pub attributes: Vec<(String, String)>,
}

impl MetricPoint {
    pub fn gauge(name: &str, unit: &str, value: f64) -> Self {
        Self::new(name, unit, MetricKind::Gauge, value)
    }

    pub fn sum(name: &str, unit: &str, value: f64) -> Self {
        Self::new(name, unit, MetricKind::Sum, value)
    }

    fn new(name: &str, unit: &str, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            kind,
            value,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }
}

/// Wire-format envelope: the collector expects the OTLP JSON nesting with
/// exactly one metric per payload
/// (`resourceMetrics[0].scopeMetrics[0].metrics[0]`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    resource_metrics: Vec<ResourceMetrics>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceMetrics {
    scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeMetrics {
    metrics: Vec<Metric>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Metric {
    name: String,
    unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    gauge: Option<GaugeBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sum: Option<SumBody>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GaugeBody {
    data_points: Vec<DataPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SumBody {
    data_points: Vec<DataPoint>,
    aggregation_temporality: &'static str,
    is_monotonic: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataPoint {
    as_double: f64,
    time_unix_nano: i64,
    attributes: Vec<KeyValue>,
}

#[derive(Debug, Clone, Serialize)]
struct KeyValue {
    key: String,
    value: AttributeValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttributeValue {
    string_value: String,
}

impl ExportEnvelope {
    /// Wraps one point, stamping the current time and appending the fixed
    /// `source` attribute identifying this deployment.
    pub fn wrap(point: &MetricPoint, source: &str) -> Self {
        let mut attributes: Vec<KeyValue> = point
            .attributes
            .iter()
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: AttributeValue {
                    string_value: value.clone(),
                },
            })
            .collect();
        attributes.push(KeyValue {
            key: "source".to_string(),
            value: AttributeValue {
                string_value: source.to_string(),
            },
        });

        let data_point = DataPoint {
            as_double: point.value,
            time_unix_nano: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            attributes,
        };

        let (gauge, sum) = match point.kind {
            MetricKind::Gauge => (
                Some(GaugeBody {
                    data_points: vec![data_point],
                }),
                None,
            ),
            MetricKind::Sum => (
                None,
                Some(SumBody {
                    data_points: vec![data_point],
                    aggregation_temporality: CUMULATIVE,
                    is_monotonic: true,
                }),
            ),
        };

        Self {
            resource_metrics: vec![ResourceMetrics {
                scope_metrics: vec![ScopeMetrics {
                    metrics: vec![Metric {
                        name: point.name.clone(),
                        unit: point.unit.clone(),
                        gauge,
                        sum,
                    }],
                }],
            }],
        }
    }
}
