//! Replay JSON-lines files through the output lifecycle against an in-memory table.
//!
//! Every input file becomes one output instance writing to the same destination. Lines are
//! packed into host-format buffers and flushed in batches, so the run exercises decoding,
//! normalization, encoding and the append path end to end.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::DateTime;
use clap::Args;
use tracing::error;
use writeapi_output::{DestinationCoordinates, FlushOutcome, MemoryWriteService, PluginStatus, WriteApiOutput};
use writeapi_rows::{EventTime, RawRecord, RawValue, TableSchema, encode_events};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Table schema as JSON (`{"fields": [...]}`)
    #[arg(long)]
    pub schema: PathBuf,

    /// JSON-lines input files; each one is replayed as its own instance
    #[arg(long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    #[arg(long, default_value = "local")]
    pub project: String,

    #[arg(long, default_value = "logs")]
    pub dataset: String,

    #[arg(long, default_value = "events")]
    pub table: String,

    /// Records per flush
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: u64,

    /// Print the appended rows as JSON lines after the summary
    #[arg(long)]
    pub show_rows: bool,
}

#[derive(Debug, Default)]
struct InstanceReport {
    rows: usize,
    batches: usize,
    failed: usize,
}

pub async fn cmd_replay(args: &ReplayArgs) -> Result<()> {
    let schema = load_schema(&args.schema)?;
    let coordinates = DestinationCoordinates::new(&args.project, &args.dataset, &args.table);

    let service = MemoryWriteService::new().with_table(coordinates.table_path(), schema);
    let output = WriteApiOutput::new(Arc::new(service.clone()));

    let mut failed_batches = 0;
    for (n, input) in args.inputs.iter().enumerate() {
        let id = instance_id(n, input);
        let records = read_records(input)?;

        let config = instance_config(&id, &coordinates);
        if output.init(&config).await != PluginStatus::Ok {
            bail!("init failed for {id} ({})", input.display());
        }

        let mut report = InstanceReport::default();
        for batch in records.chunks(args.batch_size as usize) {
            let buffer = encode_events(batch).context("encode host buffer")?;
            report.batches += 1;
            match output.try_flush(&id, &buffer).await {
                Ok(FlushOutcome::Appended(result)) => report.rows += result.rows,
                Ok(_) => {}
                Err(err) => {
                    error!(instance = %id, error = %err, "flush failed");
                    report.failed += 1;
                }
            }
        }

        if output.exit(&id).await != PluginStatus::Ok {
            bail!("exit failed for {id}");
        }
        println!(
            "{id}: {} rows in {} batches ({} failed)",
            report.rows, report.batches, report.failed
        );
        failed_batches += report.failed;
    }
    output.unregister().await;

    println!(
        "{coordinates}: {} rows appended",
        service.rows(&coordinates.table_path()).len()
    );
    if args.show_rows {
        for row in service.decoded_rows(&coordinates.table_path()) {
            println!("{}", serde_json::to_string(&row)?);
        }
    }

    if failed_batches > 0 {
        bail!("{failed_batches} batch(es) failed");
    }
    Ok(())
}

fn instance_id(n: usize, input: &Path) -> String {
    match input.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => format!("{n}-{stem}"),
        None => format!("{n}"),
    }
}

fn instance_config(id: &str, coordinates: &DestinationCoordinates) -> HashMap<String, String> {
    HashMap::from([
        ("OutputID".to_string(), id.to_string()),
        ("ProjectID".to_string(), coordinates.project().to_string()),
        ("DatasetID".to_string(), coordinates.dataset().to_string()),
        ("TableID".to_string(), coordinates.table().to_string()),
    ])
}

fn load_schema(path: &Path) -> Result<TableSchema> {
    let text = fs::read_to_string(path).with_context(|| format!("read schema {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse schema {}", path.display()))
}

fn read_records(path: &Path) -> Result<Vec<RawRecord>> {
    let text = fs::read_to_string(path).with_context(|| format!("read input {}", path.display()))?;
    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), line_no + 1))?;
        let timestamp = event_time(&value);
        let fields = match RawValue::from(value) {
            RawValue::Map(fields) => fields,
            other => {
                return Err(anyhow!(
                    "{}:{}: expected a JSON object, got {}",
                    path.display(),
                    line_no + 1,
                    other.kind()
                ));
            }
        };
        records.push(RawRecord::new(timestamp, fields));
    }
    Ok(records)
}

/// Event time from an RFC 3339 `Time` field, or now.
fn event_time(value: &serde_json::Value) -> EventTime {
    let parsed = value
        .get("Time")
        .and_then(|t| t.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&chrono::Utc));
    let time = parsed.unwrap_or_else(chrono::Utc::now);
    EventTime::new(time.timestamp(), time.timestamp_subsec_nanos())
}
