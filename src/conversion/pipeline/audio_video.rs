use async_trait::async_trait;

use super::{Context, Pipeline};
use crate::conversion::identifier::is_video;
use crate::error::Result;
use crate::types::{PipelineId, SnapshotPatch};

/// Media is previewed as is; videos also get a thumbnail of their first frame.
pub struct AudioVideoPipeline;

#[async_trait]
impl Pipeline for AudioVideoPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::AudioVideo
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        ctx.patch(SnapshotPatch::new().preview(ctx.original()))
            .await?;

        if !is_video(&ctx.opts.key) {
            return Ok(());
        }
        let frame = ctx.path("frame.png");
        match ctx.tools.video_frame(ctx.input(), &frame).await {
            Ok(()) => ctx.thumbnail(&frame).await,
            Err(e) => {
                tracing::warn!(
                    "Failed to grab a frame of snapshot {}: {}",
                    ctx.opts.snapshot_id,
                    e
                );
                Ok(())
            }
        }
    }
}
