//! Telemetry for the gateway
//!
//! Prometheus counters and histograms exposed on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, TextEncoder, register_counter_vec, register_histogram_vec};

use crate::{GatewayError, Result};

/// MCP requests received, by HTTP method
static MCP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gateway_mcp_requests_total",
        "Total number of MCP endpoint requests received",
        &["method"]
    )
    .unwrap()
});

/// tools/call invocations, by synthetic tool
static TOOL_CALLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gateway_tool_calls_total",
        "Total number of tools/call invocations",
        &["tool"]
    )
    .unwrap()
});

/// Upstream round-trip latency
static UPSTREAM_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        HistogramOpts::new(
            "gateway_upstream_call_duration_seconds",
            "Duration of upstream MCP round-trips in seconds"
        ),
        &["server"]
    )
    .unwrap()
});

/// Record one MCP endpoint request
pub fn record_mcp_request(method: &str) {
    MCP_REQUESTS_TOTAL.with_label_values(&[method]).inc();
}

/// Record one tools/call by synthetic tool name
pub fn record_tool_call(tool: &str) {
    // cap label cardinality: anything other than the two synthetic tools is
    // a client mistake
    let label = match tool {
        crate::constants::SEARCH_TOOLS_NAME | crate::constants::EXECUTE_TOOL_NAME => tool,
        _ => "unknown",
    };
    TOOL_CALLS_TOTAL.with_label_values(&[label]).inc();
}

/// Time one upstream round-trip
pub fn observe_upstream_call(server: &str, seconds: f64) {
    UPSTREAM_CALL_DURATION
        .with_label_values(&[server])
        .observe(seconds);
}

/// Encode all registered metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| GatewayError::internal(format!("failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| GatewayError::internal(format!("metrics are not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_encode() {
        record_mcp_request("post");
        record_tool_call("SEARCH_TOOLS");
        record_tool_call("SOMETHING_ELSE");
        observe_upstream_call("GMAIL", 0.25);

        let encoded = gather_metrics().unwrap();
        assert!(encoded.contains("gateway_mcp_requests_total"));
        assert!(encoded.contains("gateway_tool_calls_total"));
    }
}
