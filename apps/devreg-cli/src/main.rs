use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tracing::{info, warn};

use device_link::{MockLink, ParamValue, Timestamp, Uid, UpdateSink};
use device_registry as devreg;
use devreg::{DeviceRegistry, ParamRef};

#[derive(Parser, Debug)]
#[command(
    name = "devreg",
    version,
    about = "Device parameter registry tools",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every device type in a schema file
    SchemaList {
        /// CSV schema source
        #[arg(long)]
        schema: String,
        /// Print as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Resolve a parameter name or index for a device uid
    SchemaCheck {
        /// CSV schema source
        #[arg(long)]
        schema: String,
        /// Device uid (decimal or 0x hex)
        #[arg(long)]
        uid: String,
        /// Parameter name or index
        #[arg(long)]
        param: String,
    },
    /// Replay a JSON-lines event log against a registry on the mock link
    Replay {
        /// Runtime config YAML
        #[arg(long, default_value = "configs/registry.yaml")]
        config: String,
        /// Event log, one JSON object per line
        #[arg(long)]
        events: String,
        /// Print prometheus metrics after the replay
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
}

/// One line of a replay log
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Event {
    /// Device reported a parameter value
    Update {
        uid: Uid,
        index: usize,
        value: ParamValue,
        ts: f64,
    },
    /// Device acknowledged a subscription
    Ack { uid: Uid, delay: u16, ts: f64 },
    Register { uid: Uid },
    Forget { uid: Uid },
    Subscribe { uid: Uid, delay: i64 },
    Write {
        uid: Uid,
        param: ParamRef,
        value: ParamValue,
    },
    Read { uid: Uid, param: ParamRef },
    /// Let the mock devices answer everything requested so far
    Pump {
        #[serde(default)]
        ts: Option<f64>,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::SchemaList { schema, json } => schema_list(&schema, json),
        Commands::SchemaCheck { schema, uid, param } => schema_check(&schema, &uid, &param),
        Commands::Replay {
            config,
            events,
            metrics,
        } => replay(&config, &events, metrics),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn schema_list(path: &str, json: bool) -> Result<()> {
    let schemas = devreg::SchemaRegistry::load(path)?;
    if json {
        let all: Vec<&devreg::Schema> = schemas.iter().map(|s| s.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }
    for schema in schemas.iter() {
        println!("{schema}");
    }
    Ok(())
}

fn schema_check(path: &str, uid: &str, param: &str) -> Result<()> {
    let schemas = devreg::SchemaRegistry::load(path)?;
    let uid: Uid = uid.parse()?;
    let type_id = uid.device_type();
    let schema = schemas
        .get(type_id)
        .ok_or_else(|| anyhow::anyhow!("no device type {type_id} for uid {uid}"))?;
    let param: ParamRef = param.parse()?;
    let index = schema
        .resolve(&param)
        .ok_or_else(|| anyhow::anyhow!("{} has no parameter {param}", schema.name()))?;
    println!(
        "{uid}\t{}\t{index}\t{}",
        schema.name(),
        schema.param_name(index).unwrap_or_default()
    );
    Ok(())
}

fn replay(config: &str, events: &str, metrics: bool) -> Result<()> {
    let cfg = devreg::load_registry_config(config)?;
    let schemas = Arc::new(devreg::SchemaRegistry::load(&cfg.schema_file)?);
    let link = Arc::new(MockLink::new());
    let mut reg = DeviceRegistry::new(schemas, link.clone());
    if metrics {
        reg = reg.with_metrics(devreg::MetricsHub::new().map_err(anyhow::Error::msg)?);
    }

    for uid in cfg.uids()? {
        reg.register_device(uid)?;
        if let Some(delay) = cfg.default_delay_ms {
            reg.subscribe(uid, i64::from(delay))?;
        }
    }

    let file = File::open(events).with_context(|| format!("opening events: {events}"))?;
    let mut count = 0usize;
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading events: {events}"))?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        let event: Event =
            serde_json::from_str(t).with_context(|| format!("{events}:{}", n + 1))?;
        if let Err(e) = apply_event(&reg, &link, event) {
            warn!(line = n + 1, error = %e, "event rejected");
        }
        count += 1;
    }
    info!(events = count, devices = reg.device_uids().len(), "replay finished");

    for uid in reg.device_uids() {
        println!("{}", reg.snapshot(uid)?);
    }
    if let Some(m) = reg.metrics() {
        print!("{}", m.encode_text());
    }
    Ok(())
}

fn apply_event(reg: &DeviceRegistry, link: &MockLink, event: Event) -> devreg::Result<()> {
    // Device reports go through the sink, exactly as a live link would deliver them
    let sink: &dyn UpdateSink = reg;
    match event {
        Event::Update {
            uid,
            index,
            value,
            ts,
        } => {
            sink.on_param_update(uid, index, value, Timestamp::from_secs(ts));
        }
        Event::Ack { uid, delay, ts } => {
            sink.on_subscription_ack(uid, delay, Timestamp::from_secs(ts));
        }
        Event::Register { uid } => {
            reg.register_device(uid)?;
        }
        Event::Forget { uid } => {
            reg.forget_device(uid);
        }
        Event::Subscribe { uid, delay } => reg.subscribe(uid, delay)?,
        Event::Write { uid, param, value } => reg.write_value(uid, &param, value)?,
        Event::Read { uid, param } => reg.read_value(uid, &param)?,
        Event::Pump { ts } => {
            let ts = ts.map(Timestamp::from_secs).unwrap_or_else(Timestamp::now);
            link.acknowledge(sink, ts);
            // nothing reads the history during a replay
            link.clear_sent();
        }
    }
    Ok(())
}
