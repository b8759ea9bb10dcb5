use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, trace, warn};

use super::{aggregate, evaluate, AlertDispatcher};
use crate::{
    camera::{CameraError, FrameSource, Overlay},
    config::ConfigLabels,
    hub::Messenger,
    impulse::{Detector, RunnerError},
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub labels: ConfigLabels,
    pub required_count: u32,
    pub frame_period: Duration,
    pub send_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub preview: Option<Overlay>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RunOutcome {
    Cancelled,
    SourceExhausted,
}

/// Owns every resource of a sampling run. Running it consumes it, and the resources
/// are released in reverse order on every way out.
pub struct Session<S: FrameSource, D: Detector, M: Messenger> {
    source: S,
    detector: D,
    dispatcher: AlertDispatcher<M>,
    settings: PipelineSettings,
}

impl<S: FrameSource, D: Detector, M: Messenger> Session<S, D, M> {
    pub fn new(source: S, detector: D, messenger: Arc<M>, settings: PipelineSettings) -> Self {
        let dispatcher =
            AlertDispatcher::new(messenger, &settings.labels.target, settings.send_timeout);
        Self {
            source,
            detector,
            dispatcher,
            settings,
        }
    }

    /// Samples until `cancel` turns true, the source runs dry or a fatal error occurs.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Result<RunOutcome, PipelineError> {
        let result = self.sample(&mut cancel).await;
        match &result {
            Ok(RunOutcome::Cancelled) => info!("Sampling cancelled"),
            Ok(RunOutcome::SourceExhausted) => info!("No more frames"),
            Err(e) => warn!("Sampling stopped: {}", e),
        }
        self.teardown().await;
        result
    }

    async fn sample(&mut self, cancel: &mut watch::Receiver<bool>) -> Result<RunOutcome, PipelineError> {
        let mut ticker = time::interval(self.settings.frame_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(cancel) => return Ok(RunOutcome::Cancelled),
                _ = ticker.tick() => {}
            }
            let cycle = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Ok(RunOutcome::Cancelled),
                cycle = self.cycle() => cycle,
            };
            for report in self.dispatcher.drain_reports() {
                report.log();
            }
            match cycle {
                Err(PipelineError::Acquisition(CameraError::EndOfStream)) => {
                    return Ok(RunOutcome::SourceExhausted)
                }
                other => other?,
            }
        }
    }

    async fn cycle(&mut self) -> Result<(), PipelineError> {
        let frame = self.source.read().await?;
        let result = self.detector.classify(&frame).await?;
        let boxes = match result.boxes {
            Some(boxes) => boxes,
            None => {
                trace!("Model returned no bounding boxes");
                return Ok(());
            }
        };
        trace!(captured_at=%frame.captured_at, timing=?result.timing, boxes = boxes.len(), "Frame classified");
        for b in &boxes {
            debug!(
                "Found {} ({:.2}) at x={}, y={}, w={}, h={}",
                b.label, b.confidence, b.x, b.y, b.width, b.height
            );
        }

        let tally = aggregate(&self.settings.labels, &boxes);
        let verdict = evaluate(&tally, self.settings.required_count);

        if let Some(overlay) = self.settings.preview.clone() {
            let labels = self.settings.labels.clone();
            match tokio::task::spawn_blocking(move || overlay.write(&frame, &boxes, &labels)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Unable to write preview: {}", e),
                Err(e) => warn!("Preview task failed: {}", e),
            }
        }

        if let Some(alert_id) = self.dispatcher.dispatch_if_needed(&verdict).await {
            info!(
                alert=%alert_id,
                "Found {} missing {}s!",
                verdict.deficit,
                self.settings.labels.target
            );
        }
        Ok(())
    }

    async fn teardown(mut self) {
        let wait = self.settings.disconnect_timeout;
        self.source.close().await;
        self.detector.stop().await;
        for report in self.dispatcher.settle(wait).await {
            report.log();
        }
        disconnect_messenger(self.dispatcher.messenger().as_ref(), wait).await;
    }
}

/// Best effort disconnect that gives up after `wait`.
pub async fn disconnect_messenger<M: Messenger>(messenger: &M, wait: Duration) {
    if !messenger.is_connected() {
        return;
    }
    match time::timeout(wait, messenger.disconnect()).await {
        Ok(Ok(())) => info!("Disconnected from IoT hub"),
        Ok(Err(e)) => warn!("Disconnect failed: {}", e),
        Err(_) => warn!("Disconnect did not finish within {:?}", wait),
    }
}

/// Resolves once cancellation is requested. A dropped sender never cancels.
pub(super) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let sender_gone = cancel.wait_for(|cancelled| *cancelled).await.is_err();
    if sender_gone {
        futures::future::pending::<()>().await;
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum PipelineError {
        Acquisition(error: CameraError) {
            display("Frame acquisition failed: {}", error)
            from()
            source(error)
        }
        Detection(error: RunnerError) {
            display("Detection failed: {}", error)
            from()
            source(error)
        }
    }
}
