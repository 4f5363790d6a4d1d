//! Bounded-concurrency dispatch of probes against one target.
use std::num::NonZeroU8;
use std::sync::Arc;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::collector::ResultCollector;
use crate::error::ScanError;
use crate::ports::{order_ports, ScanOrder};
use crate::probe::{Connector, Probe, TcpConnector};
use crate::progress::ScanProgress;
use crate::target::Target;
use crate::types::{Outcome, ScanResult, Verdict};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 500;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Runtime parameters of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Upper bound on probes in `Connecting` at once. Zero is treated as one.
    pub max_in_flight: usize,
    /// Per-attempt timeout, measured from when the attempt starts connecting.
    pub timeout: Duration,
    pub tries: NonZeroU8,
    pub order: ScanOrder,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout: DEFAULT_TIMEOUT,
            tries: NonZeroU8::MIN,
            order: ScanOrder::Serial,
        }
    }
}

/// Resolve `host` and connect-scan `ports` on it.
///
/// Fails only when the host cannot be resolved or a port is 0; otherwise every
/// port gets a verdict.
pub async fn scan<I>(
    host: &str,
    ports: I,
    max_in_flight: usize,
    per_probe_timeout: Duration,
) -> Result<ScanResult, ScanError>
where
    I: IntoIterator<Item = u16>,
{
    scan_with_cancel(
        host,
        ports,
        max_in_flight,
        per_probe_timeout,
        CancellationToken::new(),
    )
    .await
}

/// Variant of [`scan`] that stops when `cancel` fires. Outstanding ports then
/// resolve to `Errored("cancelled")`.
pub async fn scan_with_cancel<I>(
    host: &str,
    ports: I,
    max_in_flight: usize,
    per_probe_timeout: Duration,
    cancel: CancellationToken,
) -> Result<ScanResult, ScanError>
where
    I: IntoIterator<Item = u16>,
{
    let target = Target::resolve(host, ports).await?;
    let scanner = Scanner::new(ScanOptions {
        max_in_flight,
        timeout: per_probe_timeout,
        ..ScanOptions::default()
    });
    Ok(scanner.run(&target, cancel).await)
}

/// Dispatches one probe per port through a [`Connector`].
#[derive(Debug, Clone)]
pub struct Scanner<C = TcpConnector> {
    options: ScanOptions,
    connector: Arc<C>,
    progress: ScanProgress,
}

impl Scanner<TcpConnector> {
    pub fn new(options: ScanOptions) -> Self {
        Self::with_connector(options, TcpConnector)
    }
}

impl<C: Connector> Scanner<C> {
    pub fn with_connector(options: ScanOptions, connector: C) -> Self {
        Self {
            options,
            connector: Arc::new(connector),
            progress: ScanProgress::new(),
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Live counters, shared with every clone of this scanner.
    pub fn progress(&self) -> ScanProgress {
        self.progress.clone()
    }

    /// Probe every port of `target`.
    ///
    /// - A `Semaphore` caps probes in flight; a probe takes its slot before
    ///   it starts connecting and frees it on reaching a terminal state.
    /// - On cancellation no further probes are issued. Unissued ports and
    ///   probes still connecting resolve to `Errored("cancelled")`.
    #[instrument(level = "debug", skip_all, fields(addr = %target.addr(), ports = target.ports().len()))]
    pub async fn run(&self, target: &Target, cancel: CancellationToken) -> ScanResult {
        let started_at = now_rfc3339();
        let ports = order_ports(target.ports(), self.options.order);
        let collector = ResultCollector::new(&ports);
        self.progress.reset(ports.len() as u64);

        let in_flight = self.options.max_in_flight.clamp(1, Semaphore::MAX_PERMITS);
        debug!(
            in_flight,
            timeout_ms = self.options.timeout.as_millis() as u64,
            tries = self.options.tries.get(),
            order = ?self.options.order,
            "starting scan"
        );

        let sem = Arc::new(Semaphore::new(in_flight));
        let mut set = JoinSet::new();
        let mut queue = ports.into_iter();

        while let Some(port) = queue.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = sem.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                debug!("scan cancelled; resolving unissued ports");
                for port in std::iter::once(port).chain(queue.by_ref()) {
                    self.record(&collector, Probe::new(port).cancel()).await;
                }
                break;
            };

            let addr = target.socket_addr(port);
            let connector = self.connector.clone();
            let collector = collector.clone();
            let progress = self.progress.clone();
            let cancel = cancel.clone();
            let options = self.options;

            set.spawn(async move {
                let verdict = Probe::new(port)
                    .run(
                        addr,
                        connector.as_ref(),
                        options.timeout,
                        options.tries,
                        &cancel,
                        &progress,
                    )
                    .await;
                drop(permit);
                debug!(port, outcome = %verdict.outcome, attempts = verdict.attempts, "verdict");
                progress.completed(verdict.outcome.is_open());
                if let Err(e) = collector.record(verdict).await {
                    error!("dropping verdict: {e}");
                }
            });
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                error!("probe task failed: {e}");
            }
        }

        // A probe task that panicked never recorded its verdict.
        for port in collector.missing().await {
            let verdict = Verdict::new(port, Outcome::Errored("probe task failed".into()));
            self.record(&collector, verdict).await;
        }

        let verdicts = collector.completed().await;
        let result = ScanResult::new(
            target.host().to_string(),
            target.addr(),
            started_at,
            now_rfc3339(),
            verdicts,
        );
        let s = result.summary();
        info!(
            host = target.host(),
            open = s.open,
            closed = s.closed,
            timed_out = s.timed_out,
            errored = s.errored,
            "scan finished"
        );
        result
    }

    async fn record(&self, collector: &ResultCollector, verdict: Verdict) {
        self.progress.completed(verdict.outcome.is_open());
        if let Err(e) = collector.record(verdict).await {
            error!("dropping verdict: {e}");
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
