use async_trait::async_trait;

use super::{Context, Pipeline};
use crate::error::Result;
use crate::types::PipelineId;

/// Unknown kinds keep only their original.
pub struct NoopPipeline;

#[async_trait]
impl Pipeline for NoopPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Noop
    }

    async fn run(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }
}
