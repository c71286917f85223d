pub mod block;
pub mod handoff;
pub mod processor;
pub mod runtime;
pub mod sink;
pub mod source;

pub use block::{BlockHash, BlockHeaderNotice, BlockRecord, BlockRecordParts};
pub use processor::backoff::RetryPolicy;
pub use processor::pipeline::{Pipeline, PipelineReport};
pub use runtime::config::{
    FollowMode, GapFillPolicy, PipelineConfig, PipelineConfigBuilder, PipelineConfigParams,
    RunMode,
};
pub use runtime::error::{pipeline_error, PipelineError};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use sink::{BlockSink, FileSink, OutputFormat, SinkFuture};
pub use source::{
    BlockSource, EndpointKind, EthereumSource, RpcClientOptions, RpcError, SourceFuture,
    SubscriptionHandle,
};
