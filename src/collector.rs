//! Accumulates verdicts and signals when every requested port has one.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::error;

use crate::error::CollectError;
use crate::types::Verdict;

/// Shared, clonable handle onto one scan's verdicts.
///
/// Every expected port may be recorded exactly once. [`ResultCollector::completed`]
/// resolves once all of them are present.
#[derive(Clone, Debug)]
pub struct ResultCollector {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    expected: BTreeSet<u16>,
    verdicts: Mutex<BTreeMap<u16, Verdict>>,
    complete: watch::Sender<bool>,
}

impl ResultCollector {
    pub fn new(ports: &[u16]) -> Self {
        let expected: BTreeSet<u16> = ports.iter().copied().collect();
        let (complete, _) = watch::channel(expected.is_empty());
        Self {
            inner: Arc::new(Inner {
                expected,
                verdicts: Mutex::new(BTreeMap::new()),
                complete,
            }),
        }
    }

    /// Record a verdict. A second verdict for the same port is refused.
    pub async fn record(&self, verdict: Verdict) -> Result<(), CollectError> {
        let port = verdict.port;
        if !self.inner.expected.contains(&port) {
            return Err(CollectError::UnexpectedPort(port));
        }
        let mut guard = self.inner.verdicts.lock().await;
        if guard.contains_key(&port) {
            return Err(CollectError::Duplicate(port));
        }
        guard.insert(port, verdict);
        if guard.len() == self.inner.expected.len() {
            self.inner.complete.send_replace(true);
        }
        Ok(())
    }

    /// Ports that have no verdict yet, ascending.
    pub async fn missing(&self) -> Vec<u16> {
        let guard = self.inner.verdicts.lock().await;
        self.inner
            .expected
            .iter()
            .copied()
            .filter(|p| !guard.contains_key(p))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.complete.borrow()
    }

    pub fn expected_len(&self) -> usize {
        self.inner.expected.len()
    }

    /// Wait until every expected port has a verdict, then return them sorted by port.
    pub async fn completed(&self) -> BTreeMap<u16, Verdict> {
        let mut rx = self.inner.complete.subscribe();
        // the sender lives in `inner`, so the channel cannot close while we hold `self`
        let closed = rx.wait_for(|done| *done).await.is_err();
        if closed {
            error!("completion channel closed early");
        }
        self.inner.verdicts.lock().await.clone()
    }
}
