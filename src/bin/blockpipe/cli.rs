use std::path::PathBuf;

use blockpipe::OutputFormat;
use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(version, about = "Ordered block ingestion: backfill, live tailing and persistence", long_about = None)]
pub struct Cli {
    /// JSON-RPC endpoint (http://, https://, ws:// or wss://)
    #[arg(long, env = "BLOCKPIPE_RPC")]
    pub rpc: Option<String>,

    /// First block to fetch
    #[arg(long)]
    pub start: Option<u64>,

    /// Last block to fetch (inclusive); unbounded when omitted
    #[arg(long)]
    pub end: Option<u64>,

    /// Start from the current head instead of an explicit start block
    #[arg(long)]
    pub live: bool,

    /// Wait for the chain to reach a start block that does not exist yet
    #[arg(long)]
    pub allow_future_start: bool,

    /// File the fetched blocks are appended to
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Layout of the output file: text or json-lines
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Optional JSON settings file; flags take precedence over its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds to wait between attempts of a failed block lookup
    #[arg(long)]
    pub retry_interval: Option<u64>,

    /// Upper bound in seconds for the retry delay; doubles the delay after each failed attempt
    #[arg(long)]
    pub max_retry_interval: Option<u64>,

    /// Number of blocks the fetcher may run ahead of the writer
    #[arg(long)]
    pub block_buffer_size: Option<usize>,

    /// Buffer size of the new-heads notification channel
    #[arg(long)]
    pub headers_buffer_size: Option<usize>,
}
