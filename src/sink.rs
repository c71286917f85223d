//! Persistence sinks that receive records from the drain.

use crate::block::BlockRecord;
use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub type SinkFuture<'a> = BoxFuture<'a, Result<()>>;

/// Destination for persisted block records.
///
/// A failed `save` is reported to the drain, which logs it and moves on to
/// the next record; implementations should not retry internally.
pub trait BlockSink: Send + Sync {
    fn save<'a>(&'a self, record: &'a BlockRecord) -> SinkFuture<'a>;
}

impl<S: BlockSink + ?Sized> BlockSink for Arc<S> {
    fn save<'a>(&'a self, record: &'a BlockRecord) -> SinkFuture<'a> {
        (**self).save(record)
    }
}

/// Renders `record` in the plain-text layout written by [`FileSink`].
pub fn render_record(record: &BlockRecord) -> String {
    let mut out = String::with_capacity(640);
    let _ = write!(
        out,
        "Number: {}\nHash: {}\nTxCount: {}\nTimestamp: {}\nParentHash: {}\nNonce: {}\nMiner: {}\nGasUsed: {}\nGasLimit: {}\nSize: {}\nExtraData: {}\nDifficulty: {}\nReceiptsRoot: {}\n\n",
        record.number(),
        record.hash(),
        record.tx_count(),
        record.timestamp(),
        record.parent_hash(),
        record.nonce(),
        record.miner(),
        record.gas_used(),
        record.gas_limit(),
        record.size(),
        hex::encode(record.extra_data()),
        record.difficulty(),
        record.receipts_root(),
    );
    out
}

/// Layout of the records written by [`FileSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// The `Key: value` block produced by [`render_record`].
    #[default]
    Text,
    /// One JSON object per line.
    JsonLines,
}

impl OutputFormat {
    pub fn render(self, record: &BlockRecord) -> Result<String> {
        match self {
            OutputFormat::Text => Ok(render_record(record)),
            OutputFormat::JsonLines => {
                let mut line = serde_json::to_string(record)
                    .with_context(|| format!("failed to encode block {}", record.number()))?;
                line.push('\n');
                Ok(line)
            }
        }
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json-lines" | "jsonl" => Ok(OutputFormat::JsonLines),
            other => bail!("unknown output format {other:?} (expected text or json-lines)"),
        }
    }
}

/// Appends one rendered record per save to a file, flushing after every write.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    format: OutputFormat,
    file: Mutex<File>,
}

impl FileSink {
    /// Opens `path` for appending text records, creating it when missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_format(path, OutputFormat::Text).await
    }

    pub async fn open_with_format(path: impl AsRef<Path>, format: OutputFormat) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open output file {}", path.display()))?;

        Ok(Self {
            path,
            format,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    async fn append(&self, record: &BlockRecord) -> Result<()> {
        let rendered = self.format.render(record)?;
        let mut file = self.file.lock().await;
        file.write_all(rendered.as_bytes())
            .await
            .with_context(|| format!("failed to write block {}", record.number()))?;
        file.flush()
            .await
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }
}

impl BlockSink for FileSink {
    fn save<'a>(&'a self, record: &'a BlockRecord) -> SinkFuture<'a> {
        Box::pin(self.append(record))
    }
}
