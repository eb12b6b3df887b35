use shared::metrics_defs::{MetricDef, MetricType};

pub const DISPATCH_TIE: MetricDef = MetricDef {
    name: "dispatch.tie",
    metric_type: MetricType::Counter,
    description: "Requests matched by several endpoints of equal specificity",
};

pub const DISPATCH_NO_MATCH: MetricDef = MetricDef {
    name: "dispatch.no_match",
    metric_type: MetricType::Counter,
    description: "Requests no active endpoint in the collection matched",
};

pub const INJECTED_DELAY: MetricDef = MetricDef {
    name: "chaos.injected_delay",
    metric_type: MetricType::Histogram,
    description: "Delay injected before a request outcome, in milliseconds",
};

pub const SIMULATED_FAILURE: MetricDef = MetricDef {
    name: "chaos.simulated_failure",
    metric_type: MetricType::Counter,
    description: "Requests answered with a synthetic error instead of being forwarded",
};

pub const RULE_WRITE_REJECTED: MetricDef = MetricDef {
    name: "rules.write_rejected",
    metric_type: MetricType::Counter,
    description: "Endpoint writes rejected because of an exact conflict",
};

pub const ALL_METRICS: &[MetricDef] = &[
    DISPATCH_TIE,
    DISPATCH_NO_MATCH,
    INJECTED_DELAY,
    SIMULATED_FAILURE,
    RULE_WRITE_REJECTED,
];
