mod cli;
mod settings;

use std::sync::Arc;

use anyhow::Context;
use blockpipe::{
    init_tracing, EthereumSource, FileSink, Pipeline, RpcClientOptions, Runner,
};
use clap::Parser;
use cli::Cli;
use settings::{RunSettings, Settings};

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    init_tracing();

    let settings = match args.config.as_deref() {
        Some(path) => {
            let settings = Settings::read(path)?;
            tracing::info!(path = %path.display(), "using settings file");
            settings
        }
        None => Settings::default(),
    };
    let settings = settings.resolve(&args)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(settings))
}

async fn run(settings: RunSettings) -> anyhow::Result<()> {
    let RunSettings {
        rpc,
        endpoint,
        out,
        format,
        config,
    } = settings;

    tracing::info!(%endpoint, mode = ?config.run_mode(), "connecting to block source");
    let source = EthereumSource::connect(rpc, RpcClientOptions::default())
        .await
        .context("failed to connect to the block source")?;
    let sink = FileSink::open_with_format(&out, format).await?;
    tracing::info!(out = %out.display(), ?format, "appending blocks to output file");

    let mut runner = Runner::new(Pipeline::new(config, Arc::new(source), Arc::new(sink)));
    let report = runner.run_until_ctrl_c().await?;

    tracing::info!(
        first = ?report.first_queued,
        last = ?report.last_queued,
        persisted = report.persisted,
        sink_failures = report.sink_failures,
        cancelled = report.cancelled,
        "blockpipe finished"
    );
    Ok(())
}
