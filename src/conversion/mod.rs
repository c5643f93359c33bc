//! Conversion: bounded external tools, per-kind pipelines and the scheduler
//! that runs them, plus the seams to and from the core API and the HTTP
//! services some pipelines call.

mod client;
pub mod identifier;
pub mod pipeline;
mod remotes;
mod runner;
mod scheduler;
mod server;
mod tools;

pub use client::{
    HttpPipelineBackend, HttpPipelineLauncher, LocalLauncher, LocalPipelineBackend,
    PipelineBackend, PipelineLauncher,
};
pub use identifier::identify;
pub use pipeline::PreviewLimits;
pub use remotes::{
    EntityMention, HttpLanguageService, HttpMosaicService, HttpWatermarkService, LanguageService,
    MosaicMetadata, MosaicService, MosaicZoomLevel, Remotes, WatermarkCategory, WatermarkRequest,
    WatermarkService,
};
pub use runner::{DEFAULT_TOOL_TIMEOUT, ToolRunner};
pub use scheduler::{STATUS_LOG_INTERVAL, Scheduler, SchedulerOptions, SchedulerStatus};
pub use server::{ConversionState, create_conversion_router};
pub use tools::{THUMBNAIL_MAX_EDGE, Toolbox, Tools};
