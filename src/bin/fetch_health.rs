//! fetch-health — network and request diagnostics
//!
//! Usage:
//!   fetch-health probe <url> [--samples N]      Probe a URL, print the derived NetworkInfo
//!   fetch-health get <url> [--config <path>]    One orchestrated GET, then the health report

use std::time::Duration;

use adaptive_request::network::{HttpProbe, NetworkMonitor};
use adaptive_request::{ClientBuilder, ClientConfig};
use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "probe" => cmd_probe(&args[2..]).await,
        "get" => cmd_get(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("fetch-health {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"fetch-health — network and request diagnostics

USAGE:
    fetch-health <COMMAND> [OPTIONS]

COMMANDS:
    probe <url> [--samples N]     Probe a URL N times (default 5), print NetworkInfo as JSON
    get <url> [--config <path>]   Perform one orchestrated GET, print response and health
    version                       Show version information
    help                          Show this help message

ENVIRONMENT:
    RUST_LOG                      Log filter (default: info)
    ADAPTIVE_*                    Configuration overrides, see ClientConfig::apply_env"#
    );
}

/// Value following `flag`, if present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> anyhow::Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => match args.get(i + 1) {
            Some(v) => Ok(Some(v.as_str())),
            None => bail!("{flag} needs a value"),
        },
        None => Ok(None),
    }
}

async fn cmd_probe(args: &[String]) -> anyhow::Result<()> {
    let Some(url) = args.first() else {
        bail!("probe needs a url");
    };
    let samples: u32 = match flag_value(args, "--samples")? {
        Some(n) => n.parse().context("--samples must be a number")?,
        None => 5,
    };

    let config = ClientConfig::default().apply_env()?;
    let monitor = NetworkMonitor::new(config.network.clone());
    let probe = HttpProbe::new(url.as_str())?;
    for _ in 0..samples.max(1) {
        monitor.probe_once(&probe).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    println!("{}", serde_json::to_string_pretty(&monitor.current_info())?);
    Ok(())
}

async fn cmd_get(args: &[String]) -> anyhow::Result<()> {
    let Some(url) = args.first() else {
        bail!("get needs a url");
    };
    let config = match flag_value(args, "--config")? {
        Some(path) => ClientConfig::from_path(path)
            .with_context(|| format!("loading {path}"))?,
        None => ClientConfig::default(),
    }
    .apply_env()?;

    let client = ClientBuilder::from_config(config).build()?;
    if let Some(probe_url) = client.monitor().config().probe_url.clone() {
        let probe = HttpProbe::new(client.resolve_url(&probe_url)?)?;
        client.monitor().probe_once(&probe).await;
    }

    match client.get(url).await {
        Ok(response) => {
            println!("status: {}", response.status);
            println!("{}", serde_json::to_string_pretty(&response.body)?);
        }
        Err(e) => eprintln!("request failed: {e}"),
    }
    println!("{}", serde_json::to_string_pretty(&client.health())?);
    Ok(())
}
