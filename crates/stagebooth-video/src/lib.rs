//! Matte pipeline and still compositing.
//!
//! Turns participant video frames into background-stripped mattes on
//! per-participant tokio tasks, and paints those mattes into a single
//! captured still. Frame decoding and the matting model itself are
//! supplied by the host through [`FrameSource`] and [`Matting`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

mod canvas;
mod still;

pub use canvas::{PixelRect, fill, paint_matte, parse_color};
pub use still::{CapturedImage, ImageFormat, encode};

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("matting failed: {0}")]
    Matting(String),
    #[error("nothing to paint: {0}")]
    EmptyMatte(String),
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Source of decoded video frames for one participant.
pub trait FrameSource: Send + Sync {
    /// Latest decoded frame, or `None` while the stream has produced nothing.
    fn latest_frame(&self) -> Option<RgbaImage>;
}

/// Background removal: returns the subject with a transparent background.
///
/// Called from the blocking pool, so implementations may be slow.
pub trait Matting: Send + Sync {
    fn matte(&self, frame: &RgbaImage) -> Result<RgbaImage, VideoError>;
}

/// Latest matte produced for a participant.
pub type MatteBuffer = Arc<RwLock<Option<RgbaImage>>>;

// ---------------------------------------------------------------------------
// Pipeline registry
// ---------------------------------------------------------------------------

/// Per-participant matte loop handle. Dropping cancels the background task.
struct MattePipeline {
    cancel_tx: watch::Sender<bool>,
    _handle: JoinHandle<()>,
    buffer: MatteBuffer,
}

impl Drop for MattePipeline {
    fn drop(&mut self) {
        // The loop exits on its next select.
        let _ = self.cancel_tx.send(true);
    }
}

/// Registry of running matte loops, keyed by participant id.
pub struct MattePipelines {
    matting: Arc<dyn Matting>,
    interval: Duration,
    pipelines: HashMap<String, MattePipeline>,
}

impl MattePipelines {
    /// `fps` is the refresh rate each loop ticks at; zero is treated as one.
    pub fn new(matting: Arc<dyn Matting>, fps: u32) -> Self {
        let fps = fps.max(1);
        Self {
            matting,
            interval: Duration::from_secs(1) / fps,
            pipelines: HashMap::new(),
        }
    }

    /// Start matting frames from `source` for `participant_id`.
    ///
    /// Replaces any pipeline already running for that participant. Must be
    /// called from within a tokio runtime.
    pub fn start(&mut self, participant_id: &str, source: Arc<dyn FrameSource>, mirrored: bool) {
        self.stop(participant_id);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let buffer: MatteBuffer = Arc::new(RwLock::new(None));
        let handle = tokio::spawn(matte_loop(
            participant_id.to_string(),
            source,
            self.matting.clone(),
            buffer.clone(),
            mirrored,
            self.interval,
            cancel_rx,
        ));

        self.pipelines.insert(
            participant_id.to_string(),
            MattePipeline {
                cancel_tx,
                _handle: handle,
                buffer,
            },
        );
    }

    /// Stop and remove the pipeline for `participant_id`.
    pub fn stop(&mut self, participant_id: &str) -> bool {
        self.pipelines.remove(participant_id).is_some()
    }

    pub fn stop_all(&mut self) {
        let count = self.pipelines.len();
        self.pipelines.clear();
        if count > 0 {
            tracing::info!(count, "all matte pipelines stopped");
        }
    }

    pub fn is_running(&self, participant_id: &str) -> bool {
        self.pipelines.contains_key(participant_id)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Copy of the most recent matte, or `None` if none is ready yet.
    pub fn latest(&self, participant_id: &str) -> Option<RgbaImage> {
        let pipeline = self.pipelines.get(participant_id)?;
        pipeline
            .buffer
            .read()
            .expect("matte buffer lock poisoned")
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Matte loop
// ---------------------------------------------------------------------------

async fn matte_loop(
    participant_id: String,
    source: Arc<dyn FrameSource>,
    matting: Arc<dyn Matting>,
    buffer: MatteBuffer,
    mirrored: bool,
    interval: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) {
    tracing::info!(participant_id = %participant_id, mirrored, "matte loop started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut matte_count: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                tracing::info!(participant_id = %participant_id, "matte loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                let Some(frame) = source.latest_frame() else {
                    continue;
                };

                let matting = matting.clone();
                match tokio::task::spawn_blocking(move || matting.matte(&frame)).await {
                    Ok(Ok(mut matte)) => {
                        if mirrored {
                            image::imageops::flip_horizontal_in_place(&mut matte);
                        }
                        matte_count += 1;
                        if matte_count == 1 {
                            tracing::info!(
                                participant_id = %participant_id,
                                width = matte.width(),
                                height = matte.height(),
                                "first matte produced"
                            );
                        }
                        *buffer.write().expect("matte buffer lock poisoned") = Some(matte);
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(participant_id = %participant_id, "matting failed, retrying next frame: {e}");
                    }
                    Err(e) => {
                        tracing::warn!(participant_id = %participant_id, "matting task aborted: {e}");
                    }
                }
            }
        }
    }

    tracing::info!(participant_id = %participant_id, matte_count, "matte loop exited");
}
