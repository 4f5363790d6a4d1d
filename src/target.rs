//! The scan target: one resolved address and the ports to probe on it.
use std::collections::HashSet;
use std::fs;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio::net::lookup_host;
use tracing::{debug, instrument};

use crate::error::ScanError;

const DNS_PORT: u16 = 53;

/// A resolved host plus a de-duplicated port list. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    addr: IpAddr,
    ports: Vec<u16>,
}

impl Target {
    /// Resolve `host` once through the system resolver and validate `ports`.
    ///
    /// Literal IPv4/IPv6 addresses (optionally bracketed) skip DNS. Port 0 is
    /// rejected; duplicates are dropped keeping the first occurrence.
    pub async fn resolve<I>(host: &str, ports: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = u16>,
    {
        Self::resolve_with(host, ports, &[]).await
    }

    /// Like [`Target::resolve`], but queries `nameservers` (UDP port 53)
    /// instead of the system resolver when the list is not empty.
    #[instrument(level = "debug", skip(ports))]
    pub async fn resolve_with<I>(
        host: &str,
        ports: I,
        nameservers: &[IpAddr],
    ) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = u16>,
    {
        let ports = validate_ports(ports)?;
        let addr = resolve_host(host, nameservers).await?;
        debug!(%addr, ports = ports.len(), "target resolved");
        Ok(Self {
            host: host.to_string(),
            addr,
            ports,
        })
    }

    /// Build a target from an already known address.
    pub fn from_addr<I>(addr: IpAddr, ports: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = u16>,
    {
        Ok(Self {
            host: addr.to_string(),
            addr,
            ports: validate_ports(ports)?,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.addr, port)
    }
}

fn validate_ports<I>(ports: I) -> Result<Vec<u16>, ScanError>
where
    I: IntoIterator<Item = u16>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for port in ports {
        if port == 0 {
            return Err(ScanError::InvalidPort(0));
        }
        if seen.insert(port) {
            out.push(port);
        }
    }
    Ok(out)
}

/// Parse a nameserver list: either a path to a file with one address per
/// line, or a comma separated list of addresses.
pub fn parse_nameservers(spec: &str) -> Result<Vec<IpAddr>, ScanError> {
    let invalid = |entry: &str, reason: &str| ScanError::Resolution {
        host: entry.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, reason.to_string()),
    };

    let path = Path::new(spec.trim());
    let (content, separator) = if path.is_file() {
        let content = fs::read_to_string(path).map_err(|source| ScanError::Resolution {
            host: spec.to_string(),
            source,
        })?;
        (content, '\n')
    } else {
        (spec.to_string(), ',')
    };

    let mut out = Vec::new();
    for entry in content.split(separator).map(str::trim) {
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let ip = entry
            .parse::<IpAddr>()
            .map_err(|_| invalid(entry, "not a nameserver address"))?;
        out.push(ip);
    }
    if out.is_empty() {
        return Err(invalid(spec, "no nameserver addresses given"));
    }
    Ok(out)
}

async fn resolve_host(host: &str, nameservers: &[IpAddr]) -> Result<IpAddr, ScanError> {
    let trimmed = host.trim();
    let literal = trimmed
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(trimmed);
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(ip);
    }

    let resolution_error = |source: io::Error| ScanError::Resolution {
        host: host.to_string(),
        source,
    };
    if literal.is_empty() {
        return Err(resolution_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty host",
        )));
    }

    let first = if nameservers.is_empty() {
        let mut addrs = lookup_host((literal, 0)).await.map_err(resolution_error)?;
        addrs.next().map(|sa| sa.ip())
    } else {
        lookup_via(literal, nameservers)
            .await
            .map_err(resolution_error)?
    };
    first.ok_or_else(|| {
        resolution_error(io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses returned",
        ))
    })
}

async fn lookup_via(host: &str, nameservers: &[IpAddr]) -> io::Result<Option<IpAddr>> {
    let mut config = ResolverConfig::new();
    for ip in nameservers {
        config.add_name_server(NameServerConfig::new(
            SocketAddr::new(*ip, DNS_PORT),
            Protocol::Udp,
        ));
    }
    let resolver = TokioAsyncResolver::tokio(config, ResolverOpts::default());
    let lookup = resolver
        .lookup_ip(host)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(lookup.iter().next())
}
