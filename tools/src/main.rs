//! batch-runner: headless message runner for the player-data processor.
//!
//! Usage:
//!   batch-runner --db store.db message1.json message2.json
//!   batch-runner --api-id a1b2 --env prod --tenant T-1 message.json

use anyhow::{Context, Result};
use railbird_core::{
    config::ProcessorConfig, driver::MessageDriver, naming::TableNamer, store::Gateway,
};
use std::env;
use std::fs;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let config = load_config(&args)?;

    let message_files: Vec<&String> = args
        .iter()
        .skip(1)
        .enumerate()
        .filter(|(i, a)| !a.starts_with("--") && !is_flag_value(&args, *i + 1))
        .map(|(_, a)| a)
        .collect();
    if message_files.is_empty() {
        eprintln!("usage: batch-runner [--db FILE] [--api-id ID --env NAME --tenant ID] MESSAGE.json ...");
        std::process::exit(2);
    }

    let mut bodies = Vec::with_capacity(message_files.len());
    for path in &message_files {
        let body = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        bodies.push(body);
    }

    println!("batch-runner");
    println!("  db:        {db}");
    println!("  api id:    {}", config.api_id);
    println!("  env:       {}", config.environment);
    println!("  messages:  {}", bodies.len());
    println!();

    let gateway = Gateway::open(db, TableNamer::new(&config))?;
    let driver = MessageDriver::new(&gateway, &config);
    let summary = driver.process_batch(&bodies)?;

    println!(
        "status={} processed={} successful={} failed={} tenant={}",
        summary.status_code,
        summary.total_processed,
        summary.successful,
        summary.failed,
        summary.tenant_id.as_deref().unwrap_or("-")
    );
    gateway.shutdown()?;
    Ok(())
}

/// Environment configuration first, command-line overrides second.
fn load_config(args: &[String]) -> Result<ProcessorConfig> {
    let mut config = ProcessorConfig::from_env().unwrap_or_else(|_| {
        ProcessorConfig::new(String::new(), String::new(), None)
    });
    if let Some(api_id) = flag_value(args, "--api-id") {
        config.api_id = api_id.to_string();
    }
    if let Some(environment) = flag_value(args, "--env") {
        config.environment = environment.to_string();
    }
    if let Some(tenant) = flag_value(args, "--tenant") {
        config.default_tenant_id = Some(tenant.to_string());
    }
    if config.api_id.is_empty() || config.environment.is_empty() {
        anyhow::bail!(
            "api id and environment are required (set {} / {} or pass --api-id / --env)",
            railbird_core::config::ENV_API_ID,
            railbird_core::config::ENV_ENVIRONMENT
        );
    }
    Ok(config)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

/// True when the arg at `index` is the value of a preceding flag.
fn is_flag_value(args: &[String], index: usize) -> bool {
    index >= 1 && args[index - 1].starts_with("--")
}
