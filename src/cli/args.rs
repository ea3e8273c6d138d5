use anyhow::{anyhow, Context};
use serde_json::Value;
use std::path::PathBuf;

#[derive(clap::Args)]
pub struct GraphFileArgs {
    /// Graph document to read (.json, .yaml or .yml)
    #[arg(value_name = "FILE")]
    pub path: PathBuf,
}

#[derive(clap::Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub graph: GraphFileArgs,

    /// Emit either terminal-friendly text or machine-readable JSON
    #[arg(long, default_value = "text", value_name = "FORMAT")]
    pub format: OutputFormat,
}

/// Event or callback payload given inline or from a file.
#[derive(clap::Args, Default)]
pub struct PayloadArgs {
    /// Payload as a JSON string
    #[arg(long, value_name = "JSON")]
    pub payload: Option<String>,

    /// Read the payload from a JSON file
    #[arg(long, value_name = "FILE", conflicts_with = "payload")]
    pub payload_file: Option<PathBuf>,
}

impl PayloadArgs {
    /// Parsed payload; `null` when neither flag is given.
    pub fn value(&self) -> crate::Result<Value> {
        let text = match (&self.payload, &self.payload_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read payload file {}", path.display()))?,
            (None, None) => return Ok(Value::Null),
        };
        serde_json::from_str(&text).map_err(|err| anyhow!("payload is not valid JSON: {}", err))
    }
}

#[derive(clap::Args)]
pub struct TriggerArgs {
    /// Published graph to start
    #[arg(value_name = "GRAPH_ID")]
    pub graph_id: String,

    /// Pin a specific published version (default: latest)
    #[arg(long, value_name = "VERSION")]
    pub version: Option<u32>,

    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(clap::Args)]
pub struct ResumeArgs {
    #[arg(value_name = "RUN_ID")]
    pub run_id: uuid::Uuid,

    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(clap::Args)]
pub struct DeliverArgs {
    /// Event key the runs are waiting on
    #[arg(value_name = "KEY")]
    pub key: String,

    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(clap::Args)]
pub struct PollArgs {
    /// Scan interval such as "30s" (default: suspension.poll_interval)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub interval: Option<std::time::Duration>,
}

#[derive(clap::Args)]
pub struct RunIdArgs {
    #[arg(value_name = "RUN_ID")]
    pub run_id: uuid::Uuid,
}

#[derive(clap::Args)]
pub struct StatusArgs {
    /// Run to inspect; lists every run when omitted
    #[arg(value_name = "RUN_ID")]
    pub run_id: Option<uuid::Uuid>,

    #[arg(long, default_value = "text", value_name = "FORMAT")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary
    Text,
    /// JSON payload suitable for downstream tooling
    Json,
}
