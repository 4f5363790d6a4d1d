use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Final classification of one probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Open,
    Closed,
    TimedOut,
    Errored(String),
}

impl Outcome {
    pub const CANCELLED: &'static str = "cancelled";

    pub fn cancelled() -> Self {
        Outcome::Errored(Self::CANCELLED.to_string())
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Outcome::Open)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Errored(reason) if reason == Self::CANCELLED)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Open => f.write_str("open"),
            Outcome::Closed => f.write_str("closed"),
            Outcome::TimedOut => f.write_str("timed-out"),
            Outcome::Errored(reason) => write!(f, "error ({reason})"),
        }
    }
}

/// The verdict for one port. Immutable once produced.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub port: u16,
    pub outcome: Outcome,
    /// Connection attempts made, zero when the probe never reached `Connecting`.
    pub attempts: u8,
    /// Time spent in the final attempt.
    pub latency_ms: u64,
}

impl Verdict {
    pub fn new(port: u16, outcome: Outcome) -> Self {
        Self {
            port,
            outcome,
            attempts: 0,
            latency_ms: 0,
        }
    }
}

/// Complete port -> verdict mapping of a finished scan, ordered by port.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanResult {
    pub host: String,
    pub addr: IpAddr,
    pub started_at: String,
    pub finished_at: String,
    verdicts: BTreeMap<u16, Verdict>,
}

impl ScanResult {
    pub(crate) fn new(
        host: String,
        addr: IpAddr,
        started_at: String,
        finished_at: String,
        verdicts: BTreeMap<u16, Verdict>,
    ) -> Self {
        Self {
            host,
            addr,
            started_at,
            finished_at,
            verdicts,
        }
    }

    /// `(port, outcome)` pairs in ascending port order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Outcome)> + '_ {
        self.verdicts.iter().map(|(port, v)| (*port, &v.outcome))
    }

    pub fn verdicts(&self) -> impl Iterator<Item = &Verdict> + '_ {
        self.verdicts.values()
    }

    pub fn get(&self, port: u16) -> Option<&Verdict> {
        self.verdicts.get(&port)
    }

    pub fn outcome(&self, port: u16) -> Option<&Outcome> {
        self.verdicts.get(&port).map(|v| &v.outcome)
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.iter()
            .filter(|(_, o)| o.is_open())
            .map(|(port, _)| port)
            .collect()
    }

    pub fn summary(&self) -> Summary {
        let mut s = Summary::default();
        for (_, outcome) in self.iter() {
            match outcome {
                Outcome::Open => s.open += 1,
                Outcome::Closed => s.closed += 1,
                Outcome::TimedOut => s.timed_out += 1,
                Outcome::Errored(_) => s.errored += 1,
            }
        }
        s
    }
}

/// Per-outcome counts of a [`ScanResult`].
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub open: usize,
    pub closed: usize,
    pub timed_out: usize,
    pub errored: usize,
}
