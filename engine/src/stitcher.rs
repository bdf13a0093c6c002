use std::sync::Arc;

use scroll_stitch_common::config::StitchConfig;
use scroll_stitch_common::frame::Frame;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::compositor::{check_geometry, composite};
use crate::overlap::{estimate_overlap, verify_overlap, OverlapBounds};

/// How a frame was folded into the running composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchOutcome {
    /// Stacked under the previous composite with `overlap` raw rows shared.
    Merged { overlap: u32 },
    /// Frames could not be aligned; the new frame replaced the composite.
    GeometryMismatch,
}

#[derive(Debug, Clone)]
pub struct Stitched {
    pub composite: Frame,
    pub outcome: StitchOutcome,
}

/// Fold `bottom` into `top`. Pure and synchronous; the engine worker runs
/// exactly this for every appended frame.
///
/// A frame whose width or scale factor differs from `top` cannot be aligned,
/// so it becomes the new composite on its own rather than failing the session.
pub fn stitch(top: &Frame, bottom: Frame, config: &StitchConfig) -> Stitched {
    if let Err(e) = check_geometry(top, &bottom) {
        warn!(error = %e, "cannot stitch frame, restarting composite from it");
        return Stitched {
            composite: bottom,
            outcome: StitchOutcome::GeometryMismatch,
        };
    }

    let bounds = OverlapBounds::for_heights(top.height(), bottom.height(), config);
    let estimated = estimate_overlap(top, &bottom, config);
    let overlap = verify_overlap(estimated, bounds, config);

    match composite(top, &bottom, overlap) {
        Ok(frame) => Stitched {
            composite: frame,
            outcome: StitchOutcome::Merged { overlap },
        },
        Err(e) => {
            error!(error = %e, "compositing failed, restarting composite from frame");
            Stitched {
                composite: bottom,
                outcome: StitchOutcome::GeometryMismatch,
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("stitching worker is no longer running")]
    WorkerGone,
}

enum Command {
    Start(Frame),
    Append(Frame),
    Finish(oneshot::Sender<Option<Arc<Frame>>>),
}

/// Handle to a stitching session running on its own tokio task.
///
/// Commands are queued in call order and executed one at a time, so
/// `append` never races another `append`, and `finish` only answers once
/// every earlier command has completed. Dropping the handle stops the worker.
pub struct StitchingEngine {
    tx: mpsc::UnboundedSender<Command>,
}

impl StitchingEngine {
    /// Spawn the worker task. Must be called from within a tokio runtime.
    pub fn spawn(config: StitchConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(config);
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    /// Begin a session with `frame` as the whole composite. A session already
    /// in progress is discarded.
    pub fn start(&self, frame: Frame) {
        self.send(Command::Start(frame));
    }

    /// Queue `frame` to be stitched under the running composite. Returns
    /// immediately.
    pub fn append(&self, frame: Frame) {
        self.send(Command::Append(frame));
    }

    /// Wait for all queued work, end the session and return the composite.
    ///
    /// `None` if no session was ever started. Calling it again without a new
    /// `start` returns the same composite.
    pub async fn finish(&self) -> Result<Option<Arc<Frame>>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Finish(reply))
            .map_err(|_| EngineError::WorkerGone)?;
        rx.await.map_err(|_| EngineError::WorkerGone)
    }

    fn send(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            error!("stitching worker is gone, dropping command");
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SessionStats {
    frames: u32,
    merged: u32,
    mismatches: u32,
}

enum SessionState {
    Idle {
        /// Composite returned by the last `finish`, handed out again on repeat calls.
        last: Option<Arc<Frame>>,
    },
    Stitching {
        composite: Arc<Frame>,
        stats: SessionStats,
    },
}

struct Worker {
    state: Option<SessionState>, // Option so we can take() during transitions
    config: Arc<StitchConfig>,
}

impl Worker {
    fn new(config: StitchConfig) -> Self {
        Self {
            state: Some(SessionState::Idle { last: None }),
            config: Arc::new(config),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            let state = self.state.take().unwrap_or(SessionState::Idle { last: None });
            let next = match cmd {
                Command::Start(frame) => self.handle_start(state, frame),
                Command::Append(frame) => self.handle_append(state, frame).await,
                Command::Finish(reply) => {
                    let (next, result) = self.handle_finish(state);
                    if reply.send(result).is_err() {
                        debug!("finish caller went away before receiving the composite");
                    }
                    next
                }
            };
            self.state = Some(next);
        }
        debug!("stitching worker stopped");
    }

    fn handle_start(&self, state: SessionState, frame: Frame) -> SessionState {
        if let SessionState::Stitching { stats, .. } = state {
            warn!(
                frames = stats.frames,
                "start while stitching, discarding unfinished composite"
            );
        }
        info!(
            width = frame.width(),
            height = frame.height(),
            scale_factor = frame.scale_factor(),
            "stitching session started"
        );
        SessionState::Stitching {
            composite: Arc::new(frame),
            stats: SessionStats {
                frames: 1,
                ..SessionStats::default()
            },
        }
    }

    async fn handle_append(&self, state: SessionState, frame: Frame) -> SessionState {
        let (composite, mut stats) = match state {
            SessionState::Stitching { composite, stats } => (composite, stats),
            idle @ SessionState::Idle { .. } => {
                warn!(
                    width = frame.width(),
                    height = frame.height(),
                    "append without an active session, dropping frame"
                );
                return idle;
            }
        };

        let top = Arc::clone(&composite);
        let config = Arc::clone(&self.config);
        let joined = tokio::task::spawn_blocking(move || stitch(&top, frame, &config)).await;

        let stitched = match joined {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "stitch task failed, keeping previous composite");
                return SessionState::Stitching { composite, stats };
            }
        };

        stats.frames += 1;
        match stitched.outcome {
            StitchOutcome::Merged { overlap } => {
                stats.merged += 1;
                debug!(
                    overlap,
                    height = stitched.composite.height(),
                    logical_height = stitched.composite.logical_height(),
                    frames = stats.frames,
                    "frame stitched"
                );
            }
            StitchOutcome::GeometryMismatch => {
                stats.mismatches += 1;
            }
        }

        SessionState::Stitching {
            composite: Arc::new(stitched.composite),
            stats,
        }
    }

    fn handle_finish(&self, state: SessionState) -> (SessionState, Option<Arc<Frame>>) {
        match state {
            SessionState::Stitching { composite, stats } => {
                info!(
                    frames = stats.frames,
                    merged = stats.merged,
                    mismatches = stats.mismatches,
                    width = composite.width(),
                    height = composite.height(),
                    "stitching session finished"
                );
                let result = Some(Arc::clone(&composite));
                (SessionState::Idle { last: Some(composite) }, result)
            }
            SessionState::Idle { last } => {
                if last.is_none() {
                    debug!("finish without a session, no composite");
                }
                let result = last.clone();
                (SessionState::Idle { last }, result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{gray_frame, noise_page, slice_rows};

    #[test]
    fn stitch_merges_scrolled_frames() {
        let page = noise_page(64, 300, 21);
        let top = gray_frame(64, 200, slice_rows(&page, 64, 0, 200), 2.0);
        let bottom = gray_frame(64, 200, slice_rows(&page, 64, 100, 200), 2.0);
        let out = stitch(&top, bottom, &StitchConfig::default());
        assert_eq!(out.outcome, StitchOutcome::Merged { overlap: 100 });
        assert_eq!(out.composite.height(), 300);
        assert_eq!(out.composite.logical_height(), 150.0);
        let expected = gray_frame(64, 300, &page, 2.0);
        assert_eq!(out.composite, expected);
    }

    #[test]
    fn stitch_width_mismatch_returns_new_frame() {
        let top = gray_frame(64, 100, &noise_page(64, 100, 1), 2.0);
        let bottom = gray_frame(32, 100, &noise_page(32, 100, 2), 2.0);
        let out = stitch(&top, bottom.clone(), &StitchConfig::default());
        assert_eq!(out.outcome, StitchOutcome::GeometryMismatch);
        assert_eq!(out.composite, bottom);
    }

    #[test]
    fn stitch_short_frames_use_fallback_overlap() {
        // min overlap (20) exceeds the frames' height (10)
        let top = gray_frame(8, 10, &noise_page(8, 10, 3), 1.0);
        let bottom = gray_frame(8, 10, &noise_page(8, 10, 4), 1.0);
        let out = stitch(&top, bottom, &StitchConfig::default());
        assert_eq!(out.outcome, StitchOutcome::Merged { overlap: 3 });
        assert_eq!(out.composite.height(), 17);
    }

    #[tokio::test]
    async fn append_without_start_is_ignored() {
        let engine = StitchingEngine::spawn(StitchConfig::default());
        engine.append(gray_frame(8, 8, &noise_page(8, 8, 1), 1.0));
        assert!(engine.finish().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_discards_unfinished_session() {
        let engine = StitchingEngine::spawn(StitchConfig::default());
        let first = gray_frame(8, 40, &noise_page(8, 40, 1), 1.0);
        let second = gray_frame(8, 30, &noise_page(8, 30, 2), 1.0);
        engine.start(first);
        engine.start(second.clone());
        let out = engine.finish().await.unwrap().unwrap();
        assert_eq!(*out, second);
    }
}
