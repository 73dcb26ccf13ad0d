// ── Frame pipeline ──
//
// Primary loop: wait for a camera announce, open the link (bounded
// retries), then pull frames, identify every n-th one and route each
// face. A lost link is reopened; a camera that cannot be opened is
// forgotten until the next announce. Routing and table saves write the
// CSV file, so they run on the blocking pool.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CameraSettings;
use crate::error::CoreError;
use crate::oracle::{Frame, FrameSource, Identifier};
use crate::orchestrator::Orchestrator;

pub struct FramePipeline {
    frames: Arc<dyn FrameSource>,
    identifier: Arc<dyn Identifier>,
    settings: CameraSettings,
}

impl FramePipeline {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        identifier: Arc<dyn Identifier>,
        settings: CameraSettings,
    ) -> Self {
        Self {
            frames,
            identifier,
            settings,
        }
    }

    pub async fn run(self, orchestrator: Orchestrator, cancel: CancellationToken) {
        let mut target = orchestrator.camera_target();
        let mut frames_seen: u64 = 0;

        'link: loop {
            let announced = target.borrow_and_update().clone();
            let Some(host) = announced else {
                debug!("no camera target, waiting for announce");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = target.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            };

            info!(%host, "opening camera link");
            let Some(mut frame) = self.open(&host, &cancel).await else {
                if cancel.is_cancelled() {
                    break;
                }
                warn!(%host, "camera unreachable, waiting for a new announce");
                orchestrator.clear_camera_target(&host);
                continue;
            };

            loop {
                frames_seen += 1;
                self.process(&orchestrator, &frame, frames_seen).await;

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break 'link,
                    () = tokio::time::sleep(self.settings.tick) => {}
                }
                if target.has_changed().unwrap_or(true) {
                    info!("camera target changed, relinking");
                    continue 'link;
                }

                match cancellable(&cancel, self.frames.fetch(&host)).await {
                    None => break 'link,
                    Some(Ok(next)) => frame = next,
                    Some(Err(e)) => {
                        warn!(%host, error = %e, "frame not received, reopening link");
                        continue 'link;
                    }
                }
            }
        }
        debug!("frame pipeline exiting");
    }

    /// First frame from `host`, retried `open_attempts` times.
    async fn open(&self, host: &str, cancel: &CancellationToken) -> Option<Frame> {
        let attempts = self.settings.open_attempts.max(1);
        for attempt in 1..=attempts {
            match cancellable(cancel, self.frames.fetch(host)).await? {
                Ok(frame) => return Some(frame),
                Err(e) => warn!(host, attempt, error = %e, "camera open failed"),
            }
            if attempt < attempts {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return None,
                    () = tokio::time::sleep(self.settings.retry_pause) => {}
                }
            }
        }
        None
    }

    async fn process(&self, orchestrator: &Orchestrator, frame: &Frame, seq: u64) {
        if seq % self.settings.frame_stride.max(1) == 0 {
            match self.identifier.identify(frame).await {
                Ok(detections) if detections.is_empty() => {
                    debug!(frame = seq, "no faces in frame");
                }
                Ok(detections) => {
                    debug!(frame = seq, faces = detections.len(), "frame identified");
                    let gate = orchestrator.clone();
                    let routed = tokio::task::spawn_blocking(move || {
                        detections
                            .iter()
                            .map(|detection| gate.router().route(detection))
                            .collect::<Vec<_>>()
                    })
                    .await;
                    match routed {
                        Ok(outcomes) => {
                            for outcome in outcomes {
                                debug!(frame = seq, %outcome, "detection routed");
                            }
                        }
                        Err(e) => warn!(frame = seq, error = %e, "routing task failed"),
                    }
                }
                Err(e) => warn!(frame = seq, error = %e, "identification failed"),
            }
        }

        if seq % self.settings.save_every.max(1) == 0 {
            let gate = orchestrator.clone();
            match tokio::task::spawn_blocking(move || gate.save_table()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "periodic attendance save failed"),
                Err(e) => warn!(error = %e, "attendance save task failed"),
            }
        }
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, CoreError>>,
) -> Option<Result<T, CoreError>> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = fut => Some(result),
    }
}
