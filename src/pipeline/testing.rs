//! Stand-ins for the camera, the model runner and the hub.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use image::RgbImage;
use tokio::time::Instant;

use super::Alert;
use crate::{
    camera::{CameraError, Frame, FrameSource},
    hub::{DispatchError, HubError, Messenger},
    impulse::{Detection, DetectionResult, Detector, RunnerError},
};

#[derive(Default)]
pub struct FakeHub {
    pub delay: Duration,
    pub failing: bool,
    pub hang_on_disconnect: bool,
    pub sent: Mutex<Vec<Alert>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeHub {
    pub fn sent(&self) -> Vec<Alert> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for FakeHub {
    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(alert.clone());
        if self.failing {
            Err(DispatchError::NotConnected)
        } else {
            Ok(())
        }
    }

    async fn disconnect(&self) -> Result<(), HubError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_disconnect {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.disconnects.load(Ordering::SeqCst) == 0
    }
}

/// Shared view on what the pipeline did with the fakes it owns.
#[derive(Default, Clone)]
pub struct Usage {
    pub reads: Arc<Mutex<Vec<Instant>>>,
    pub closes: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl Usage {
    pub fn read_times(&self) -> Vec<Instant> {
        self.reads.lock().unwrap().clone()
    }
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Delivers `frames` frames, or frames forever when `None`.
pub struct FakeSource {
    pub frames: Option<usize>,
    pub usage: Usage,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn read(&mut self) -> Result<Frame, CameraError> {
        let mut reads = self.usage.reads.lock().unwrap();
        if matches!(self.frames, Some(n) if reads.len() >= n) {
            return Err(CameraError::EndOfStream);
        }
        reads.push(Instant::now());
        Ok(Frame::new(RgbImage::new(4, 4)))
    }

    async fn close(&mut self) {
        self.usage.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns the same boxes for every frame after `cost` has elapsed.
pub struct FakeDetector {
    pub cost: Duration,
    pub boxes: Option<Vec<Detection>>,
    /// Zero based call that fails
    pub fail_on: Option<usize>,
    pub calls: usize,
    pub usage: Usage,
}

impl FakeDetector {
    pub fn new(boxes: Vec<Detection>, usage: &Usage) -> Self {
        Self {
            cost: Duration::ZERO,
            boxes: Some(boxes),
            fail_on: None,
            calls: 0,
            usage: usage.clone(),
        }
    }
}

#[async_trait]
impl Detector for FakeDetector {
    async fn classify(&mut self, _frame: &Frame) -> Result<DetectionResult, RunnerError> {
        let call = self.calls;
        self.calls += 1;
        tokio::time::sleep(self.cost).await;
        if self.fail_on == Some(call) {
            return Err(RunnerError::Closed);
        }
        Ok(DetectionResult {
            boxes: self.boxes.clone(),
            timing: None,
        })
    }

    async fn stop(&mut self) {
        self.usage.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn wheel_with_lug_nuts(lug_nuts: u32) -> Vec<Detection> {
    let mut boxes = vec![Detection::new("wheel", 0.95, 10, 10, 200, 200)];
    boxes.extend((0..lug_nuts).map(|i| Detection::new("lug_nut", 0.8, 40 + i * 20, 60, 12, 12)));
    boxes
}
