use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use blockpipe::{EndpointKind, OutputFormat, PipelineConfig};
use serde::Deserialize;

use crate::cli::Cli;

pub const DEFAULT_OUT: &str = "blocks.log";
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 10;

/// Values read from the optional JSON settings file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub rpc: Option<String>,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub live: bool,
    pub allow_future_start: bool,
    pub out: Option<PathBuf>,
    pub format: Option<OutputFormat>,
    pub retry_interval: Option<u64>,
    pub max_retry_interval: Option<u64>,
    pub block_buffer_size: Option<usize>,
    pub headers_buffer_size: Option<usize>,
}

/// Effective settings after flags were laid over the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub rpc: String,
    pub endpoint: EndpointKind,
    pub out: PathBuf,
    pub format: OutputFormat,
    pub config: PipelineConfig,
}

impl Settings {
    pub fn read(file: &Path) -> anyhow::Result<Self> {
        let settings: Self = serde_json::from_reader(std::io::BufReader::new(
            std::fs::File::open(file)
                .with_context(|| format!("failed to open {}", file.display()))?,
        ))
        .with_context(|| format!("failed to parse {}", file.display()))?;
        Ok(settings)
    }

    pub fn resolve(self, cli: &Cli) -> anyhow::Result<RunSettings> {
        let rpc = cli
            .rpc
            .clone()
            .or(self.rpc)
            .ok_or_else(|| anyhow!("RPC URL is required (set `rpc` in the settings file or use --rpc)"))?;
        let endpoint = EndpointKind::detect(&rpc)?;

        let live = cli.live || self.live;
        let allow_future_start = cli.allow_future_start || self.allow_future_start;
        let start = cli.start.or(self.start);

        let mut builder = PipelineConfig::builder()
            .live(live)
            .allow_future_start(allow_future_start)
            .follow_mode(endpoint.follow_mode())
            .retry_delay(Duration::from_secs(
                cli.retry_interval
                    .or(self.retry_interval)
                    .unwrap_or(DEFAULT_RETRY_INTERVAL_SECS),
            ))
            .handoff_capacity(cli.block_buffer_size.or(self.block_buffer_size).unwrap_or(0))
            .notification_capacity(
                cli.headers_buffer_size
                    .or(self.headers_buffer_size)
                    .unwrap_or(0),
            );

        // Outside live mode the start defaults to genesis.
        match (live, start) {
            (_, Some(start)) => builder = builder.start_block(start),
            (false, None) => builder = builder.start_block(0),
            (true, None) => {}
        }
        if let Some(max) = cli.max_retry_interval.or(self.max_retry_interval) {
            builder = builder.max_retry_delay(Duration::from_secs(max));
        }
        if let Some(end) = cli.end.or(self.end) {
            builder = builder.end_block(end);
        }

        let config = builder.build().context("invalid pipeline settings")?;
        let out = cli
            .out
            .clone()
            .or(self.out)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT));
        let format = cli.format.or(self.format).unwrap_or_default();

        Ok(RunSettings {
            rpc,
            endpoint,
            out,
            format,
            config,
        })
    }
}
