//! `tlm` - drive a telemetry subscription against a simulated device

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tlm_config::telemetry::{simulated_device, transport_path};
use tlm_config::{ConfigDelta, ConfigStore, MemoryConfigStore, SensorGroup, SensorGroups, TransportState};
use tlm_core::{MeasurementBuffer, OrchestratorConfig, TelemetryOrchestrator};
use tlm_stream::{Encoding, Endpoint, LoopbackConnector, SecurityTier, TierScript};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PATHS: [&str; 2] = [
    "Cisco-IOS-XR-nto-misc-oper:memory-summary/nodes/node/summary",
    "Cisco-IOS-XR-infra-statsd-oper:infra-statistics/interfaces/interface/latest/generic-counters",
];

const BASE_TIMESTAMP_MS: u64 = 1_700_000_000_000;

fn cli() -> Command {
    Command::new("tlm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Telemetry subscription orchestrator")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Orchestrator configuration file (TOML)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .arg(
            Arg::new("prefix")
                .long("prefix")
                .global(true)
                .help("Override the subscription id prefix"),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .global(true)
                .value_parser(value_parser!(u64))
                .help("Override the sample interval in milliseconds"),
        )
        .arg(
            Arg::new("no-downgrade")
                .long("no-downgrade")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Surface handshake rejections instead of retrying unencrypted"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run one subscription against a simulated device")
                .arg(
                    Arg::new("group")
                        .long("group")
                        .default_value("grp1")
                        .help("Sensor group to subscribe to"),
                )
                .arg(
                    Arg::new("path")
                        .long("path")
                        .action(ArgAction::Append)
                        .help("Sensor path for the group (repeatable)"),
                )
                .arg(
                    Arg::new("records")
                        .long("records")
                        .default_value("5")
                        .value_parser(value_parser!(u64))
                        .help("Number of records the device streams"),
                )
                .arg(
                    Arg::new("reject-tls")
                        .long("reject-tls")
                        .action(ArgAction::SetTrue)
                        .help("Device rejects the encrypted handshake"),
                )
                .arg(
                    Arg::new("transport-enabled")
                        .long("transport-enabled")
                        .action(ArgAction::SetTrue)
                        .help("Transport is already enabled before the subscription starts"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .default_value("10")
                        .value_parser(value_parser!(u64))
                        .help("Seconds to wait for the records"),
                ),
        )
        .subcommand(
            Command::new("show-config")
                .about("Print the effective orchestrator configuration")
                .arg(
                    Arg::new("device")
                        .long("device")
                        .action(ArgAction::SetTrue)
                        .help("Also print the simulated device's running datastore"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Configuration file (or defaults) with command line overrides applied
fn effective_config(args: &ArgMatches) -> Result<OrchestratorConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => OrchestratorConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };
    if let Some(prefix) = args.get_one::<String>("prefix") {
        config = config.with_id_prefix(prefix.clone());
    }
    if let Some(interval) = args.get_one::<u64>("interval") {
        config = config.with_sample_interval_ms(*interval);
    }
    if args.get_flag("no-downgrade") {
        config = config.with_downgrade(false);
    }
    config.validate().context("invalid orchestrator configuration")?;
    Ok(config)
}

fn synthetic_records(count: u64, paths: &[String]) -> Vec<Vec<u8>> {
    (0..count)
        .map(|seq| {
            let ts = BASE_TIMESTAMP_MS + seq * 1000;
            let path = &paths[usize::try_from(seq).unwrap_or(0) % paths.len()];
            json!({
                "node_id_str": "router1",
                "encoding_path": path,
                "collection_id": seq,
                "msg_timestamp": ts,
                "data_json": [{ "timestamp": ts, "content": { "seq": seq } }],
            })
            .to_string()
            .into_bytes()
        })
        .collect()
}

async fn simulate(config: OrchestratorConfig, args: &ArgMatches) -> Result<()> {
    let group_id = args.get_one::<String>("group").context("missing --group")?;
    let records = *args.get_one::<u64>("records").context("missing --records")?;
    let wait = Duration::from_secs(*args.get_one::<u64>("timeout").context("missing --timeout")?);
    let paths: Vec<String> = match args.get_many::<String>("path") {
        Some(paths) => paths.cloned().collect(),
        None => DEFAULT_PATHS.iter().map(|p| (*p).to_string()).collect(),
    };

    let device = simulated_device();
    if args.get_flag("transport-enabled") {
        device.apply_external(&[ConfigDelta::replace(
            transport_path(),
            TransportState {
                enabled: true,
                port: config.default_port,
            }
            .to_node(),
        )])?;
    }
    let store: Arc<dyn ConfigStore> = Arc::new(device.clone());
    let group = paths
        .iter()
        .fold(SensorGroup::new(group_id.as_str()), |group, path| group.with_path(path.as_str()));
    SensorGroups::new(Arc::clone(&store)).save(&group).await?;
    let before = device.running();

    let payloads = synthetic_records(records, &paths);
    let strong = if args.get_flag("reject-tls") {
        TierScript::reject_handshake("certificate verify failed")
    } else {
        TierScript::stream(payloads.clone())
    };
    let connector = LoopbackConnector::new()
        .with_tier(SecurityTier::Strong, strong)
        .with_tier(SecurityTier::Unencrypted, TierScript::stream(payloads));

    let orchestrator = TelemetryOrchestrator::new(
        store,
        Arc::new(connector.clone()),
        Endpoint::new("router1", 830).with_credentials("admin", "admin"),
        config.with_encoding(Encoding::Json),
    )?;
    let (handle, buffer) = orchestrator.start_buffered(group_id).await?;
    info!(id = %handle.id(), group = %group_id, "subscription started");

    let expected = usize::try_from(records)?;
    let received = tokio::time::timeout(wait, async {
        while buffer.len() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    tokio::select! {
        result = received => {
            if result.is_err() {
                warn!(received = buffer.len(), expected, "timed out waiting for records");
            }
        }
        outcome = handle.closed() => {
            warn!(?outcome, "subscription ended before all records arrived");
        }
    }

    print_records(&buffer);
    let status = handle.status();
    let outcome = handle.close().await;

    println!();
    println!("Subscription: {}", handle.id());
    println!("  Tier: {}", status.tier);
    println!("  Downgraded: {}", status.downgraded);
    println!("  Records: {}", status.records);
    println!("  Clients opened: {}", connector.opened());
    println!("  Device restored: {}", device.running() == before);

    match outcome {
        Ok(()) => Ok(()),
        Err(err) => bail!(err),
    }
}

fn print_records(buffer: &MeasurementBuffer) {
    let selected = buffer.selected().map(|r| r.seq);
    for record in buffer.records() {
        let marker = if Some(record.seq) == selected { '*' } else { ' ' };
        println!("{marker} {} ({})", record.label(), record.tier);
    }
}

fn show_config(config: &OrchestratorConfig, args: &ArgMatches) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    if args.get_flag("device") {
        let device: MemoryConfigStore = simulated_device();
        let running = device.running();
        let subtrees: Vec<_> = running.subtrees().collect();
        println!();
        println!("{}", serde_json::to_string_pretty(&subtrees)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    let config = effective_config(&matches)?;

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(config, args).await,
        Some(("show-config", args)) => show_config(&config, args),
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}
