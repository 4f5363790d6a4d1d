use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use connscan::types::ScanResult;
use connscan::{limits, logging, ports, target, ScanConfig, ScanOrder, Scanner, Target};

/// Command line options; values given here override the config file.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "connscan",
    version,
    about = "Bounded-concurrency TCP connect scanner for a single host.",
    long_about = None
)]
struct Cli {
    /// Host name or IP address to scan.
    host: String,

    /// Ports to scan, e.g. `22,80,8000-8010`. Defaults to a list of common services.
    #[arg(short, long, conflicts_with = "ports_file")]
    ports: Option<String>,

    /// File with one port, range or comma list per line.
    #[arg(long)]
    ports_file: Option<PathBuf>,

    /// Ports to leave out, same syntax as --ports.
    #[arg(long)]
    exclude: Option<String>,

    /// Max concurrent TCP connect attempts.
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Connect timeout per attempt in milliseconds.
    #[arg(short, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Attempts per port before settling on timed-out/errored.
    #[arg(long)]
    tries: Option<u8>,

    /// Order in which ports are probed.
    #[arg(long, value_enum)]
    order: Option<ScanOrder>,

    /// Raise the open file limit to this value first.
    #[arg(long)]
    ulimit: Option<u64>,

    /// Comma separated nameserver addresses, or a file with one per line.
    #[arg(long)]
    resolver: Option<String>,

    /// Config file (default: ~/.connscan.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write results as pretty JSON to this path.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Only print open ports.
    #[arg(long, default_value_t = false)]
    open_only: bool,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn merge_into(&self, cfg: &mut ScanConfig) -> Result<()> {
        if let Some(c) = self.concurrency {
            cfg.max_in_flight = c;
        }
        if let Some(t) = self.timeout_ms {
            cfg.timeout_ms = t;
        }
        if let Some(t) = self.tries {
            cfg.tries = t;
        }
        if let Some(o) = self.order {
            cfg.scan_order = o;
        }
        if let Some(u) = self.ulimit {
            cfg.ulimit = Some(u);
        }
        if let Some(spec) = self.resolver.as_deref() {
            cfg.resolver = target::parse_nameservers(spec).context("--resolver")?;
        }
        if let Some(ex) = self.exclude.as_deref() {
            cfg.exclude_ports
                .extend(ports::parse_port_list(ex).context("--exclude")?);
        }
        Ok(())
    }

    fn port_list(&self) -> Result<Vec<u16>> {
        if let Some(list) = self.ports.as_deref() {
            return ports::parse_port_list(list).context("--ports");
        }
        if let Some(path) = self.ports_file.as_deref() {
            return ports::load_ports_from_path(path);
        }
        Ok(ports::default_ports())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = ScanConfig::load(cli.config.as_deref())?;
    cli.merge_into(&mut cfg)?;

    if let Some(limit) = cfg.ulimit {
        if let Err(e) = limits::raise_fd_limit(limit) {
            warn!("failed to raise file descriptor limit to {limit}: {e}");
        }
    }

    let port_list = ports::exclude(cli.port_list()?, &cfg.exclude_ports);
    let target = Target::resolve_with(&cli.host, port_list, &cfg.resolver)
        .await
        .with_context(|| format!("cannot scan {}", cli.host))?;

    let mut options = cfg.scan_options();
    options.max_in_flight = limits::clamp_in_flight(options.max_in_flight, limits::fd_soft_limit());
    info!(
        host = target.host(),
        addr = %target.addr(),
        ports = target.ports().len(),
        max_in_flight = options.max_in_flight,
        "scanning"
    );

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_ctrlc.cancel();
        }
    });

    let scanner = Scanner::new(options);
    let results = scanner.run(&target, cancel).await;

    print_results_table(&results, cli.open_only);
    if let Some(path) = cli.json.as_deref() {
        write_results_json(path, &results)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        println!("Wrote JSON results to {}", path.display());
    }
    Ok(())
}

fn print_results_table(results: &ScanResult, open_only: bool) {
    let s = results.summary();
    println!(
        "\n{} ({}): {} open, {} closed, {} timed out, {} errored",
        results.host, results.addr, s.open, s.closed, s.timed_out, s.errored
    );
    println!("{:>5}  {:<10}  {:>10}  {}", "port", "state", "latency_ms", "tries");
    println!("{:-<5}  {:-<10}  {:-<10}  {:-<5}", "", "", "", "");
    for v in results.verdicts() {
        if open_only && !v.outcome.is_open() {
            continue;
        }
        println!(
            "{:>5}  {:<10}  {:>10}  {}",
            v.port,
            v.outcome.to_string(),
            v.latency_ms,
            v.attempts
        );
    }
}

fn write_results_json(path: &Path, results: &ScanResult) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}
