use std::time::Duration;

use connscan::{scan, scan_with_cancel, Outcome, ScanError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_millis(500);

/// A port on 127.0.0.1 that accepts connections while the listener lives.
async fn open_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

/// A port on 127.0.0.1 with nothing listening on it.
async fn refused_port() -> u16 {
    let (listener, port) = open_port().await;
    drop(listener);
    port
}

#[tokio::test]
async fn listener_is_open() {
    let (_listener, port) = open_port().await;
    let result = scan("127.0.0.1", [port], 8, TIMEOUT).await.unwrap();
    assert_eq!(result.outcome(port), Some(&Outcome::Open));
    assert_eq!(result.get(port).unwrap().attempts, 1);
}

#[tokio::test]
async fn unbounded_timeout_still_reports_open() {
    let (_listener, port) = open_port().await;
    let result = scan("127.0.0.1", [port], 4, Duration::MAX).await.unwrap();
    assert_eq!(result.outcome(port), Some(&Outcome::Open));
}

#[tokio::test]
async fn open_classification_is_stable_across_scans() {
    let (_listener, port) = open_port().await;
    for _ in 0..3 {
        let result = scan("127.0.0.1", [port], 8, TIMEOUT).await.unwrap();
        assert_eq!(result.outcome(port), Some(&Outcome::Open));
    }
}

#[tokio::test]
async fn refused_port_is_closed_within_timeout() {
    let port = refused_port().await;
    let start = std::time::Instant::now();
    let result = scan("127.0.0.1", [port], 8, TIMEOUT).await.unwrap();
    assert_eq!(result.outcome(port), Some(&Outcome::Closed));
    assert!(start.elapsed() < TIMEOUT);
}

#[tokio::test]
async fn mixed_ports_each_get_a_verdict() {
    let (_listener, open) = open_port().await;
    let closed_a = refused_port().await;
    let closed_b = refused_port().await;

    let result = scan("127.0.0.1", [closed_a, closed_b, open], 3, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(result.outcome(open), Some(&Outcome::Open));
    for port in [closed_a, closed_b] {
        assert!(matches!(
            result.outcome(port),
            Some(Outcome::Closed) | Some(Outcome::TimedOut)
        ));
    }
    let ports: Vec<u16> = result.iter().map(|(p, _)| p).collect();
    let mut sorted = ports.clone();
    sorted.sort_unstable();
    assert_eq!(ports, sorted);
}

#[tokio::test]
async fn duplicate_ports_are_scanned_once() {
    let (_listener, open) = open_port().await;
    let closed = refused_port().await;
    let result = scan("127.0.0.1", [open, closed, open, closed], 2, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(result.len(), 2);
}

#[tokio::test]
async fn many_ports_with_small_bound_all_complete() {
    let mut listeners = Vec::new();
    let mut ports = Vec::new();
    for _ in 0..20 {
        let (l, p) = open_port().await;
        listeners.push(l);
        ports.push(p);
    }
    let result = scan("127.0.0.1", ports.clone(), 2, TIMEOUT).await.unwrap();
    assert_eq!(result.len(), ports.len());
    assert_eq!(result.summary().open, ports.len());
}

#[tokio::test]
async fn empty_port_list_completes_immediately() {
    let result = scan("127.0.0.1", Vec::<u16>::new(), 8, TIMEOUT).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn unresolvable_host_fails_before_probing() {
    let err = scan("no-such-host.invalid", [80], 8, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Resolution { .. }));
}

#[tokio::test]
async fn pre_cancelled_scan_issues_nothing() {
    let (_listener, open) = open_port().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = scan_with_cancel("127.0.0.1", [open, 1, 2], 8, TIMEOUT, cancel)
        .await
        .unwrap();
    assert_eq!(result.len(), 3);
    for v in result.verdicts() {
        assert!(v.outcome.is_cancelled());
        assert_eq!(v.attempts, 0);
    }
}

// Needs a route that silently drops SYNs; not available on every CI host.
#[tokio::test]
#[ignore]
async fn black_holed_address_times_out_at_deadline() {
    let timeout = Duration::from_millis(300);
    let start = std::time::Instant::now();
    let result = scan("10.255.255.1", [80], 1, timeout).await.unwrap();
    assert_eq!(result.outcome(80), Some(&Outcome::TimedOut));
    assert!(start.elapsed() >= timeout);
}
