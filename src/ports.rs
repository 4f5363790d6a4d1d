use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

/// Order in which probes are issued. Results are always reported sorted by port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanOrder {
    #[default]
    Serial,
    Random,
}

/// Parse a comma separated port list such as `22,80,8000-8010`.
///
/// Duplicates are dropped keeping the first occurrence.
pub fn parse_port_list(s: &str) -> Result<Vec<u16>> {
    let mut out = PortSet::default();
    for token in s.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        out.extend(parse_token(token).with_context(|| format!("invalid port spec: {token}"))?);
    }
    Ok(out.ports)
}

/// Parse a ports file content into a deduplicated list of TCP ports (1..=65535).
///
/// Each line holds a port, an inclusive range `8000-8010`, or a comma list of
/// either. Everything after `#` is ignored, as are blank lines.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out = PortSet::default();
    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }
        let ports = parse_port_list(line).with_context(|| format!("line {line_no}"))?;
        out.extend(ports);
    }
    Ok(out.ports)
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Remove `excluded` from `ports`, preserving order.
pub fn exclude(ports: Vec<u16>, excluded: &[u16]) -> Vec<u16> {
    if excluded.is_empty() {
        return ports;
    }
    let excluded: HashSet<u16> = excluded.iter().copied().collect();
    ports.into_iter().filter(|p| !excluded.contains(p)).collect()
}

/// Issue order for `ports` under `order`.
pub fn order_ports(ports: &[u16], order: ScanOrder) -> Vec<u16> {
    let mut out = ports.to_vec();
    if order == ScanOrder::Random {
        out.shuffle(&mut rand::thread_rng());
    }
    out
}

/// Commonly exposed TCP services, used when no ports are given.
pub fn default_ports() -> Vec<u16> {
    const DEFAULT: &[u16] = &[
        21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 389, 443, 445, 465, 587, 631, 993, 995,
        1433, 1521, 1723, 2049, 2375, 3000, 3306, 3389, 5000, 5432, 5672, 5900, 5985, 6379, 8000,
        8080, 8443, 8888, 9000, 9090, 9200, 11211, 27017,
    ];
    DEFAULT.to_vec()
}

#[derive(Default)]
struct PortSet {
    seen: HashSet<u16>,
    ports: Vec<u16>,
}

impl Extend<u16> for PortSet {
    fn extend<I: IntoIterator<Item = u16>>(&mut self, iter: I) {
        for p in iter {
            if self.seen.insert(p) {
                self.ports.push(p);
            }
        }
    }
}

fn parse_token(token: &str) -> Result<RangeInclusive<u16>> {
    if let Some((a, b)) = token.split_once('-') {
        let start = parse_port_str(a.trim())
            .with_context(|| format!("invalid start in range: {a}"))?;
        let end =
            parse_port_str(b.trim()).with_context(|| format!("invalid end in range: {b}"))?;
        if start > end {
            bail!("invalid range {start}-{end} (start > end)");
        }
        return Ok(start..=end);
    }
    let p = parse_port_str(token)?;
    Ok(p..=p)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
