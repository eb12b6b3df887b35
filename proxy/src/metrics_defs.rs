use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Proxy request duration in seconds, injected delay included. \
        Tagged with route, status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const ENDPOINT_WRITES: MetricDef = MetricDef {
    name: "admin.endpoint_writes",
    metric_type: MetricType::Counter,
    description: "Endpoint writes through the admin API. Tagged with operation, status.",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUEST_DURATION, REQUESTS_INFLIGHT, ENDPOINT_WRITES];
