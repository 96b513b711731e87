use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregate::{Accumulator, Sample};
use crate::bucket::now_ms;
use crate::config::ServiceConfig;

/// Pause between a failed attempt and its retry
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

const USER_AGENT: &str = concat!("pingboard/", env!("CARGO_PKG_VERSION"));

// ─── Transport ───────────────────────────────────────────────────

/// Pooled HTTP clients, one per protocol, shared by every worker so
/// keep-alive connections are reused across checks.
pub struct HttpProbe {
    plain: Client,
    tls: Client,
}

/// How a single attempt ended.
#[derive(Debug)]
pub enum Attempt {
    Up { latency_ms: u64 },
    BadStatus(StatusCode),
    Error(reqwest::Error),
    Timeout,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up { latency_ms } => write!(f, "up in {latency_ms}ms"),
            Self::BadStatus(status) => write!(f, "status {status}"),
            Self::Error(e) => write!(f, "request error: {e}"),
            Self::Timeout => f.write_str("timed out"),
        }
    }
}

impl HttpProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let plain = Client::builder()
            .user_agent(USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        let tls = Client::builder()
            .user_agent(USER_AGENT)
            .use_rustls_tls()
            .https_only(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self { plain, tls })
    }

    fn client_for(&self, url: &str) -> &Client {
        if url.starts_with("https://") {
            &self.tls
        } else {
            &self.plain
        }
    }

    /// One GET, cancelled at exactly `timeout`. Success means the full
    /// response arrived in time with a 2xx status.
    pub async fn attempt(&self, url: &str, timeout: Duration) -> Attempt {
        let client = self.client_for(url);
        let t0 = Instant::now();

        let request = async {
            let resp = client.get(url).send().await?;
            let status = resp.status();
            resp.bytes().await?;
            Ok::<_, reqwest::Error>(status)
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(status)) if status.is_success() => Attempt::Up {
                latency_ms: t0.elapsed().as_millis() as u64,
            },
            Ok(Ok(status)) => Attempt::BadStatus(status),
            Ok(Err(e)) => Attempt::Error(e),
            Err(_) => Attempt::Timeout,
        }
    }
}

// ─── Single check ────────────────────────────────────────────────

/// Run one logical check: the first attempt plus up to
/// `effective_retries()` sequential retries. Every attempt, including
/// each failed retry, is recorded as its own sample.
pub async fn check_with_retries(
    probe: &HttpProbe,
    service: &ServiceConfig,
    accumulator: &Accumulator,
) -> bool {
    let attempts = 1 + service.effective_retries();

    for n in 1..=attempts {
        let outcome = probe.attempt(&service.url, service.timeout()).await;
        let at_ms = now_ms();

        match outcome {
            Attempt::Up { latency_ms } => {
                accumulator.record_sample(Sample::ok(service.id.as_str(), at_ms, latency_ms));
                return true;
            }
            failure => {
                debug!(service = %service.id, attempt = n, reason = %failure, "check attempt failed");
                accumulator.record_sample(Sample::failed(service.id.as_str(), at_ms));
            }
        }

        if n < attempts {
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }
    false
}

// ─── Public entry point ──────────────────────────────────────────

/// Spawns one worker per service, each polling on its own interval
/// until `cancel` fires. A slow or failing service never delays another.
pub async fn run(
    services: Vec<ServiceConfig>,
    probe: Arc<HttpProbe>,
    accumulator: Arc<Accumulator>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut handles = Vec::with_capacity(services.len());

    for service in services {
        let probe = probe.clone();
        let accumulator = accumulator.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            worker(service, probe, accumulator, interval, cancel).await;
        }));
    }

    // Wait for all workers to finish
    for h in handles {
        crate::join_logged("poller worker", h).await;
    }
    info!("poller stopped");
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    service: ServiceConfig,
    probe: Arc<HttpProbe>,
    accumulator: Arc<Accumulator>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // a check that overruns its interval delays the next one instead of
    // stacking attempts for the same service
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            up = check_with_retries(&probe, &service, &accumulator) => {
                debug!(service = %service.id, up, "check finished");
            }
        }
    }
}
