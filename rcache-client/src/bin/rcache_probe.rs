//! Sends one command to a server from a JSON pool config and prints the reply.
//!
//! Usage: `rcache-probe <config.json> <COMMAND> [ARGS...]`
//! Log output is controlled with `RUST_LOG` (e.g. `RUST_LOG=debug`).

use std::env;
use std::process;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use rcache_client::{CacheClient, CacheConfig, RespValue};

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {:#}", err);
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: rcache-probe <config.json> <COMMAND> [ARGS...]");
    };
    let Some(command) = args.next() else {
        bail!("missing command name");
    };
    let rest: Vec<String> = args.collect();

    let config = CacheConfig::load(&path).with_context(|| format!("failed to load {}", path))?;
    let client = CacheClient::connect(&config).context("failed to open cache session")?;
    tracing::info!(server = %client.server(), "connected");

    let rest: Vec<&[u8]> = rest.iter().map(|arg| arg.as_bytes()).collect();
    let reply = client
        .execute(command.as_bytes(), &rest)
        .with_context(|| format!("{} failed", command))?;

    let mut out = String::new();
    render(&reply, 0, &mut out);
    print!("{}", out);
    Ok(())
}

fn render(value: &RespValue, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match value {
        RespValue::Status(text) => out.push_str(&format!("{}{}\n", pad, String::from_utf8_lossy(text))),
        RespValue::Error(text) => out.push_str(&format!("{}(error) {}\n", pad, String::from_utf8_lossy(text))),
        RespValue::Integer(n) => out.push_str(&format!("{}(integer) {}\n", pad, n)),
        RespValue::Bulk(None) => out.push_str(&format!("{}(nil)\n", pad)),
        RespValue::Bulk(Some(data)) => out.push_str(&format!("{}\"{}\"\n", pad, String::from_utf8_lossy(data))),
        RespValue::Array(items) if items.is_empty() => out.push_str(&format!("{}(empty array)\n", pad)),
        RespValue::Array(items) => {
            for item in items {
                render(item, indent + 1, out);
            }
        }
    }
}
