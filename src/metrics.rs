use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

const LABELS: &[&str] = &["status", "path", "method"];

/// Request-level Prometheus collectors, registered once at startup and
/// observed from the metrics middleware.
pub struct Metrics {
    registry: Registry,
    request_count: IntCounterVec,
    request_duration: HistogramVec,
    request_size: HistogramVec,
    response_size: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_count = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            LABELS,
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            LABELS,
        )?;
        let request_size = HistogramVec::new(
            HistogramOpts::new("http_request_size_bytes", "HTTP request size in bytes"),
            LABELS,
        )?;
        let response_size = HistogramVec::new(
            HistogramOpts::new("http_response_size_bytes", "HTTP response size in bytes"),
            LABELS,
        )?;

        registry.register(Box::new(request_count.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(request_size.clone()))?;
        registry.register(Box::new(response_size.clone()))?;

        Ok(Self {
            registry,
            request_count,
            request_duration,
            request_size,
            response_size,
        })
    }

    pub fn observe(
        &self,
        status: u16,
        path: &str,
        method: &str,
        duration_secs: f64,
        request_bytes: f64,
        response_bytes: f64,
    ) {
        let status = status.to_string();
        let labels = [status.as_str(), path, method];
        self.request_count.with_label_values(&labels).inc();
        self.request_duration
            .with_label_values(&labels)
            .observe(duration_secs);
        self.request_size
            .with_label_values(&labels)
            .observe(request_bytes);
        self.response_size
            .with_label_values(&labels)
            .observe(response_bytes);
    }

    /// Text exposition for the `/metrics` endpoint.
    pub fn gather(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
