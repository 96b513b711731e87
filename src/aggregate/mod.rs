pub mod accumulator;
pub mod ping;
pub mod stream;

pub use accumulator::Accumulator;
pub use ping::Color;

/// A single health-check attempt outcome.
/// The poller creates one per attempt and pushes it into the accumulator.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Configured service id, e.g. "api-eu"
    pub endpoint: String,
    /// Epoch milliseconds at which the attempt finished
    pub at_ms: i64,
    /// 2xx response within the timeout
    pub success: bool,
    /// Round-trip milliseconds, present only on success
    pub latency_ms: Option<u64>,
}

impl Sample {
    pub fn ok(endpoint: impl Into<String>, at_ms: i64, latency_ms: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            at_ms,
            success: true,
            latency_ms: Some(latency_ms),
        }
    }

    pub fn failed(endpoint: impl Into<String>, at_ms: i64) -> Self {
        Self {
            endpoint: endpoint.into(),
            at_ms,
            success: false,
            latency_ms: None,
        }
    }
}
