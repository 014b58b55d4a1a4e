//! Stage compositing: node collection, paint order and the capture path.

use std::sync::Arc;

use image::{Rgba, RgbaImage};
use stagebooth_video::{
    CapturedImage, FrameSource, ImageFormat, MattePipelines, Matting, PixelRect, encode, fill, paint_matte,
    parse_color,
};

use crate::errors::BoothError;
use crate::layout::{Room, StageSize, Tile};

const FALLBACK_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// One participant ready to be painted.
#[derive(Debug, Clone)]
pub struct CompositeNode {
    pub participant_id: String,
    pub tile: Tile,
    pub matte: RgbaImage,
}

impl CompositeNode {
    /// Output rectangle for this node on a `stage`-sized canvas.
    pub fn rect(&self, stage: StageSize) -> PixelRect {
        let px = self.tile.to_pixels(stage);
        PixelRect {
            x: px.x.round() as i64,
            y: px.y.round() as i64,
            width: px.w.round().max(0.0) as u32,
            height: px.h.round().max(0.0) as u32,
        }
        .bounded(stage.width, stage.height)
    }
}

pub struct CompositingEngine {
    pipelines: MattePipelines,
}

impl CompositingEngine {
    pub fn new(matting: Arc<dyn Matting>, fps: u32) -> Self {
        Self {
            pipelines: MattePipelines::new(matting, fps),
        }
    }

    /// Start (or restart) the matte loop for a participant. The local
    /// participant's matte is mirrored.
    pub fn start(&mut self, participant_id: &str, source: Arc<dyn FrameSource>, is_local: bool) {
        self.pipelines.start(participant_id, source, is_local);
    }

    pub fn stop(&mut self, participant_id: &str) -> bool {
        self.pipelines.stop(participant_id)
    }

    pub fn stop_all(&mut self) {
        self.pipelines.stop_all();
    }

    /// Participants with both a tile and a ready matte, in paint order:
    /// `z` ascending, ties in layout arrival order.
    pub fn nodes(&self, room: &Room) -> Vec<CompositeNode> {
        let mut nodes: Vec<CompositeNode> = room
            .layout
            .iter()
            .filter_map(|(id, tile)| {
                let matte = self.pipelines.latest(id)?;
                Some(CompositeNode {
                    participant_id: id.clone(),
                    tile: *tile,
                    matte,
                })
            })
            .collect();
        nodes.sort_by_key(|node| node.tile.z);
        nodes
    }

    /// Paint every ready node over the room background.
    pub fn render(&self, room: &Room, stage: StageSize) -> RgbaImage {
        let background = parse_color(&room.background).unwrap_or_else(|| {
            tracing::debug!(background = %room.background, "unparseable background, using white");
            FALLBACK_BACKGROUND
        });
        let mut canvas = fill(stage.width, stage.height, background);

        for node in self.nodes(room) {
            let rect = node.rect(stage);
            if let Err(e) = paint_matte(&mut canvas, &node.matte, rect) {
                tracing::debug!(participant_id = %node.participant_id, "skipping node: {e}");
            }
        }
        canvas
    }

    /// Render and encode one still at the stage size.
    pub fn capture(
        &self,
        room: &Room,
        stage: Option<StageSize>,
        format: ImageFormat,
    ) -> Result<CapturedImage, BoothError> {
        let stage = stage.ok_or_else(|| BoothError::Capture("stage size is not known yet".into()))?;
        let canvas = self.render(room, stage);
        let image = encode(&canvas, format)?;
        tracing::info!(
            width = image.width,
            height = image.height,
            bytes = image.bytes.len(),
            "capture encoded"
        );
        Ok(image)
    }
}
