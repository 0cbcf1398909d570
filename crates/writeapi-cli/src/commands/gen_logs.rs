//! Demo input for the relay: timestamped JSON log lines appended to files.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::Args;
use serde::Serialize;
use tracing::info;

const DEFAULT_TEXTS: [&str; 2] = ["Hello World!", "Until we meet again!"];

#[derive(Args, Debug)]
pub struct GenLogsArgs {
    /// Files to append to; each gets its own writer task
    #[arg(long = "out", required = true, num_args = 1..)]
    pub outputs: Vec<PathBuf>,

    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Lines per file; runs until interrupted when omitted
    #[arg(long)]
    pub count: Option<u64>,

    /// Message text, assigned to files in order (repeatable)
    #[arg(long = "text")]
    pub texts: Vec<String>,
}

#[derive(Serialize)]
struct LogLine<'a> {
    #[serde(rename = "Time")]
    time: String,
    #[serde(rename = "Text")]
    text: &'a str,
}

pub async fn cmd_gen_logs(args: &GenLogsArgs) -> Result<()> {
    let texts: Vec<String> = if args.texts.is_empty() {
        DEFAULT_TEXTS.iter().map(|t| t.to_string()).collect()
    } else {
        args.texts.clone()
    };
    let interval = Duration::from_millis(args.interval_ms.max(1));

    let mut tasks = Vec::with_capacity(args.outputs.len());
    for (n, path) in args.outputs.iter().enumerate() {
        let path = path.clone();
        let text = texts[n % texts.len()].clone();
        let count = args.count;
        tasks.push(tokio::spawn(async move { write_lines(&path, &text, interval, count).await }));
    }

    let writers = async {
        for task in tasks {
            task.await.context("log writer task panicked")??;
        }
        Ok::<_, anyhow::Error>(())
    };

    if args.count.is_some() {
        writers.await
    } else {
        tokio::select! {
            result = writers => result,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                Ok(())
            }
        }
    }
}

async fn write_lines(path: &Path, text: &str, interval: Duration, count: Option<u64>) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut ticker = tokio::time::interval(interval);
    let mut written = 0u64;

    while count.is_none_or(|limit| written < limit) {
        ticker.tick().await;
        let line = LogLine {
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            text,
        };
        let mut encoded = serde_json::to_vec(&line)?;
        encoded.push(b'\n');
        file.write_all(&encoded)
            .with_context(|| format!("write {}", path.display()))?;
        written += 1;
    }
    info!(path = %path.display(), lines = written, "log writer finished");
    Ok(())
}
