//! A single connection attempt against one port, and the seam it connects through.
use std::io;
use std::net::SocketAddr;
use std::num::NonZeroU8;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::progress::ScanProgress;
use crate::types::{Outcome, Verdict};

/// Opens a connection to one socket address.
///
/// The returned connection is only held until the verdict is built and is then
/// dropped, which closes it.
pub trait Connector: Send + Sync + 'static {
    type Conn: Send + 'static;

    fn connect(&self, addr: SocketAddr) -> BoxFuture<'static, io::Result<Self::Conn>>;
}

/// Plain TCP connect through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Conn = TcpStream;

    fn connect(&self, addr: SocketAddr) -> BoxFuture<'static, io::Result<TcpStream>> {
        TcpStream::connect(addr).boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Pending,
    Connecting,
    Open,
    Closed,
    TimedOut,
    Errored,
}

impl ProbeState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProbeState::Pending | ProbeState::Connecting)
    }

    /// A pending probe may only be errored when the scan is cancelled before it is issued.
    fn can_advance_to(self, next: ProbeState) -> bool {
        use ProbeState::*;
        matches!(
            (self, next),
            (Pending, Connecting)
                | (Pending, Errored)
                | (Connecting, Open)
                | (Connecting, Closed)
                | (Connecting, TimedOut)
                | (Connecting, Errored)
        )
    }

    fn for_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Open => ProbeState::Open,
            Outcome::Closed => ProbeState::Closed,
            Outcome::TimedOut => ProbeState::TimedOut,
            Outcome::Errored(_) => ProbeState::Errored,
        }
    }
}

/// One port's probe. Consumed when it yields its [`Verdict`].
#[derive(Debug)]
pub struct Probe {
    port: u16,
    state: ProbeState,
    deadline: Option<Instant>,
    attempts: u8,
}

impl Probe {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            state: ProbeState::Pending,
            deadline: None,
            attempts: 0,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Deadline of the current attempt; `None` until the probe is issued, or
    /// when the timeout is too large to express as an instant.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn advance(&mut self, next: ProbeState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal probe transition {:?} -> {:?} on port {}",
            self.state,
            next,
            self.port
        );
        trace!(port = self.port, from = ?self.state, to = ?next, "probe transition");
        self.state = next;
    }

    fn begin_attempt(&mut self, timeout: Duration) -> Option<Instant> {
        if self.state == ProbeState::Pending {
            self.advance(ProbeState::Connecting);
        }
        self.attempts = self.attempts.saturating_add(1);
        self.deadline = Instant::now().checked_add(timeout);
        self.deadline
    }

    fn finish(mut self, outcome: Outcome, latency: Duration) -> Verdict {
        self.advance(ProbeState::for_outcome(&outcome));
        Verdict {
            port: self.port,
            outcome,
            attempts: self.attempts,
            latency_ms: latency.as_millis() as u64,
        }
    }

    /// Resolve a probe that was never issued.
    pub fn cancel(self) -> Verdict {
        self.finish(Outcome::cancelled(), Duration::ZERO)
    }

    /// Run the probe to a terminal state.
    ///
    /// Each attempt races the connect against its own deadline and the scan's
    /// cancellation token. `TimedOut` and `Errored` attempts are retried until
    /// `tries` attempts have been made.
    pub async fn run<C: Connector>(
        mut self,
        addr: SocketAddr,
        connector: &C,
        timeout: Duration,
        tries: NonZeroU8,
        cancel: &CancellationToken,
        progress: &ScanProgress,
    ) -> Verdict {
        if cancel.is_cancelled() {
            return self.cancel();
        }
        progress.issued();
        let _slot = progress.connecting();

        loop {
            let deadline = self.begin_attempt(timeout);
            let started = Instant::now();
            let mut open_conn = None;
            let attempt = async {
                match deadline {
                    Some(deadline) => time::timeout_at(deadline, connector.connect(addr)).await,
                    None => Ok(connector.connect(addr).await),
                }
            };
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::cancelled(),
                res = attempt => match res {
                    Ok(Ok(conn)) => {
                        open_conn = Some(conn);
                        Outcome::Open
                    }
                    Ok(Err(e)) => classify(&e),
                    Err(_elapsed) => Outcome::TimedOut,
                },
            };

            let retryable = matches!(outcome, Outcome::TimedOut | Outcome::Errored(_))
                && !outcome.is_cancelled();
            if retryable && self.attempts < tries.get() {
                trace!(port = self.port, attempt = self.attempts, %outcome, "retrying");
                continue;
            }

            let verdict = self.finish(outcome, started.elapsed());
            // close the socket
            drop(open_conn);
            return verdict;
        }
    }
}

/// Map a failed connect to an outcome.
pub fn classify(err: &io::Error) -> Outcome {
    match err.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => Outcome::Closed,
        io::ErrorKind::TimedOut => Outcome::TimedOut,
        _ => {
            if err.raw_os_error() == Some(EMFILE) {
                warn!("too many open files; lower the in-flight bound");
            }
            Outcome::Errored(err.to_string())
        }
    }
}

#[cfg(unix)]
const EMFILE: i32 = 24;
#[cfg(not(unix))]
const EMFILE: i32 = -1;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::Mutex;

    enum Step {
        Accept,
        Refuse,
        Reset,
        Fail,
        Hang,
    }

    /// Plays back one step per connect call; hangs once the script runs out.
    struct Scripted(Mutex<VecDeque<Step>>);

    impl Scripted {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self(Mutex::new(steps.into_iter().collect()))
        }
    }

    impl Connector for Scripted {
        type Conn = ();

        fn connect(&self, _addr: SocketAddr) -> BoxFuture<'static, io::Result<()>> {
            let step = self.0.lock().unwrap().pop_front().unwrap_or(Step::Hang);
            match step {
                Step::Accept => futures::future::ready(Ok(())).boxed(),
                Step::Refuse => futures::future::ready(Err(io::Error::from(
                    io::ErrorKind::ConnectionRefused,
                )))
                .boxed(),
                Step::Reset => futures::future::ready(Err(io::Error::from(
                    io::ErrorKind::ConnectionReset,
                )))
                .boxed(),
                Step::Fail => futures::future::ready(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "network unreachable",
                )))
                .boxed(),
                Step::Hang => futures::future::pending().boxed(),
            }
        }
    }

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9))
    }

    fn tries(n: u8) -> NonZeroU8 {
        NonZeroU8::new(n).unwrap()
    }

    async fn run(connector: &Scripted, timeout_ms: u64, n: u8, cancel: &CancellationToken) -> Verdict {
        Probe::new(9)
            .run(
                addr(),
                connector,
                Duration::from_millis(timeout_ms),
                tries(n),
                cancel,
                &ScanProgress::new(),
            )
            .await
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        use ProbeState::*;
        assert!(Pending.can_advance_to(Connecting));
        assert!(Connecting.can_advance_to(TimedOut));
        assert!(!Open.can_advance_to(Closed));
        assert!(!Connecting.can_advance_to(Pending));
        assert!(!Pending.can_advance_to(Open));
        assert!(Closed.is_terminal() && !Connecting.is_terminal());
    }

    #[test]
    fn classify_refused_as_closed() {
        let e = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify(&e), Outcome::Closed);
        let e = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(classify(&e), Outcome::Closed);
        let e = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(classify(&e), Outcome::TimedOut);
        let e = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(classify(&e), Outcome::Errored("boom".into()));
    }

    #[tokio::test]
    async fn refused_is_not_retried() {
        let c = Scripted::new([Step::Refuse, Step::Accept]);
        let v = run(&c, 500, 3, &CancellationToken::new()).await;
        assert_eq!(v.outcome, Outcome::Closed);
        assert_eq!(v.attempts, 1);
    }

    #[tokio::test]
    async fn reset_is_closed_and_not_retried() {
        let c = Scripted::new([Step::Reset, Step::Accept]);
        let v = run(&c, 500, 3, &CancellationToken::new()).await;
        assert_eq!(v.outcome, Outcome::Closed);
        assert_eq!(v.attempts, 1);
    }

    #[tokio::test]
    async fn unrepresentable_deadline_still_connects() {
        let c = Scripted::new([Step::Accept]);
        let v = Probe::new(9)
            .run(
                addr(),
                &c,
                Duration::MAX,
                tries(1),
                &CancellationToken::new(),
                &ScanProgress::new(),
            )
            .await;
        assert_eq!(v.outcome, Outcome::Open);
        assert_eq!(v.attempts, 1);
    }

    #[tokio::test]
    async fn error_then_accept_is_open_after_retry() {
        let c = Scripted::new([Step::Fail, Step::Accept]);
        let v = run(&c, 500, 2, &CancellationToken::new()).await;
        assert_eq!(v.outcome, Outcome::Open);
        assert_eq!(v.attempts, 2);
    }

    #[tokio::test]
    async fn last_error_is_reported_when_tries_run_out() {
        let c = Scripted::new([Step::Fail, Step::Fail]);
        let v = run(&c, 500, 2, &CancellationToken::new()).await;
        assert_eq!(v.outcome, Outcome::Errored("network unreachable".into()));
        assert_eq!(v.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hang_times_out_at_deadline() {
        let c = Scripted::new([]);
        let start = Instant::now();
        let v = run(&c, 300, 1, &CancellationToken::new()).await;
        assert_eq!(v.outcome, Outcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(v.latency_ms >= 300);
    }

    #[tokio::test(start_paused = true)]
    async fn each_retry_gets_a_full_timeout() {
        let c = Scripted::new([]);
        let start = Instant::now();
        let v = run(&c, 200, 3, &CancellationToken::new()).await;
        assert_eq!(v.outcome, Outcome::TimedOut);
        assert_eq!(v.attempts, 3);
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_connecting_probe() {
        let c = Scripted::new([]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let v = run(&c, 60_000, 5, &cancel).await;
        assert!(v.outcome.is_cancelled());
        assert_eq!(v.attempts, 1);
    }

    #[tokio::test]
    async fn cancelled_before_issue_makes_no_attempt() {
        let c = Scripted::new([Step::Accept]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let progress = ScanProgress::new();
        let v = Probe::new(9)
            .run(
                addr(),
                &c,
                Duration::from_millis(500),
                tries(1),
                &cancel,
                &progress,
            )
            .await;
        assert!(v.outcome.is_cancelled());
        assert_eq!(v.attempts, 0);
        assert_eq!(progress.snapshot().issued, 0);
        assert_eq!(progress.peak_in_flight(), 0);
    }
}
