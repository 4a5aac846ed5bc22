use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, TextEncoder,
};

static MUTATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "interaction_service_mutations_total",
            "Write operations handled by the orchestrator",
        ),
        &["operation", "outcome"],
    )
    .expect("failed to create interaction_service_mutations_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register interaction_service_mutations_total");
    counter
});

static CACHE_INVALIDATION_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "interaction_service_cache_invalidation_failures_total",
            "Cache invalidations that failed after a durable write",
        ),
        &["policy"],
    )
    .expect("failed to create interaction_service_cache_invalidation_failures_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register interaction_service_cache_invalidation_failures_total");
    counter
});

static CACHE_READS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "interaction_service_cache_reads_total",
            "Cache-aside lookups by view and result",
        ),
        &["view", "result"],
    )
    .expect("failed to create interaction_service_cache_reads_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register interaction_service_cache_reads_total");
    counter
});

static EVENT_PUBLISH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "interaction_service_event_publish_total",
            "Interaction events handed to the queue",
        ),
        &["result"],
    )
    .expect("failed to create interaction_service_event_publish_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register interaction_service_event_publish_total");
    counter
});

static RECONCILED_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "interaction_service_reconciled_events_total",
            "Events seen by the reconciliation worker",
        ),
        &["result"],
    )
    .expect("failed to create interaction_service_reconciled_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register interaction_service_reconciled_events_total");
    counter
});

static RECONCILIATION_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "interaction_service_reconciliation_retries_total",
        "Batch applies retried after a store failure",
    )
    .expect("failed to create interaction_service_reconciliation_retries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register interaction_service_reconciliation_retries_total");
    counter
});

static RECONCILIATION_BATCH_SIZE: Lazy<Histogram> = Lazy::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "interaction_service_reconciliation_batch_size",
            "Deliveries per reconciliation batch",
        )
        .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
    )
    .expect("failed to create interaction_service_reconciliation_batch_size");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register interaction_service_reconciliation_batch_size");
    histogram
});

static ADMISSION_REJECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "interaction_service_admission_rejections_total",
        "gRPC requests rejected by the rate limiter",
    )
    .expect("failed to create interaction_service_admission_rejections_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register interaction_service_admission_rejections_total");
    counter
});

static PROCESSED_EVENTS_PRUNED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "interaction_service_processed_events_pruned_total",
        "Expired rows removed from the processed-event ledger",
    )
    .expect("failed to create interaction_service_processed_events_pruned_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register interaction_service_processed_events_pruned_total");
    counter
});

/// `outcome` is one of `ok`, `degraded`, `error`
pub fn record_mutation(operation: &str, outcome: &str) {
    MUTATIONS_TOTAL.with_label_values(&[operation, outcome]).inc();
}

pub fn record_cache_invalidation_failure(policy: &str) {
    CACHE_INVALIDATION_FAILURES_TOTAL
        .with_label_values(&[policy])
        .inc();
}

/// `result` is one of `hit`, `miss`, `error`
pub fn record_cache_read(view: &str, result: &str) {
    CACHE_READS_TOTAL.with_label_values(&[view, result]).inc();
}

pub fn record_event_publish(result: &str) {
    EVENT_PUBLISH_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_reconciled_events(result: &str, count: usize) {
    RECONCILED_EVENTS_TOTAL
        .with_label_values(&[result])
        .inc_by(count as u64);
}

pub fn record_reconciliation_retry() {
    RECONCILIATION_RETRIES_TOTAL.inc();
}

pub fn observe_batch_size(size: usize) {
    RECONCILIATION_BATCH_SIZE.observe(size as f64);
}

pub fn record_admission_rejection() {
    ADMISSION_REJECTIONS_TOTAL.inc();
}

pub fn record_processed_events_pruned(rows: u64) {
    PROCESSED_EVENTS_PRUNED_TOTAL.inc_by(rows);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
