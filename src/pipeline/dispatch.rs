use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{Alert, Verdict};
use crate::hub::{DispatchError, Messenger};

/// Outcome of one background send, handed back to the sampling loop.
#[derive(Debug)]
pub struct SendReport {
    pub alert_id: Uuid,
    pub result: Result<(), DispatchError>,
}

impl SendReport {
    pub fn log(&self) {
        match &self.result {
            Ok(()) => info!(alert=%self.alert_id, "Alert delivered"),
            Err(e) => warn!(alert=%self.alert_id, "Alert not delivered: {}", e),
        }
    }
}

/// Sends alerts in the background with at most one send outstanding.
/// Alerts leave in the order they were dispatched.
pub struct AlertDispatcher<M: Messenger> {
    messenger: Arc<M>,
    target_label: String,
    send_timeout: Duration,
    in_flight: Arc<Semaphore>,
    reports_tx: mpsc::UnboundedSender<SendReport>,
    reports_rx: mpsc::UnboundedReceiver<SendReport>,
}

impl<M: Messenger> AlertDispatcher<M> {
    pub fn new(messenger: Arc<M>, target_label: &str, send_timeout: Duration) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            messenger,
            target_label: target_label.to_string(),
            send_timeout,
            in_flight: Arc::new(Semaphore::new(1)),
            reports_tx,
            reports_rx,
        }
    }

    pub fn messenger(&self) -> &Arc<M> {
        &self.messenger
    }

    /// Starts a send for a positive verdict and returns the new alert id.
    /// Waits for the previous send to settle first.
    pub async fn dispatch_if_needed(&mut self, verdict: &Verdict) -> Option<Uuid> {
        if !verdict.should_alert {
            return None;
        }
        // The semaphore is never closed
        let permit = self.in_flight.clone().acquire_owned().await.ok()?;

        let alert = Alert::new(verdict, &self.target_label);
        let alert_id = alert.id;
        debug!(alert=%alert_id, deficit = alert.deficit, counted = alert.counted, "Dispatching alert");

        let messenger = self.messenger.clone();
        let reports = self.reports_tx.clone();
        let send_timeout = self.send_timeout;
        tokio::spawn(
            async move {
                let result = match tokio::time::timeout(send_timeout, messenger.send(&alert)).await {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::TimedOut(send_timeout)),
                };
                // Report before releasing the permit so a settled dispatcher has every report
                let _ = reports.send(SendReport { alert_id, result });
                drop(permit);
            }
            .instrument(info_span!("alert_send", alert=%alert_id)),
        );
        Some(alert_id)
    }

    /// Reports of sends that finished since the last call.
    pub fn drain_reports(&mut self) -> Vec<SendReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.reports_rx.try_recv() {
            reports.push(report);
        }
        reports
    }

    /// Waits up to `wait` for the outstanding send, then drains the reports.
    pub async fn settle(&mut self, wait: Duration) -> Vec<SendReport> {
        if tokio::time::timeout(wait, self.in_flight.acquire())
            .await
            .is_err()
        {
            warn!("Alert still in flight after {:?}, abandoning it", wait);
        }
        self.drain_reports()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{atomic::Ordering, Arc},
        time::Duration,
    };

    use tokio::time::Instant;

    use super::AlertDispatcher;
    use crate::{
        hub::DispatchError,
        pipeline::{testing::FakeHub, Verdict},
    };

    const MISSING_TWO: Verdict = Verdict {
        should_alert: true,
        deficit: 2,
        counted: 4,
    };

    fn dispatcher(hub: FakeHub) -> (Arc<FakeHub>, AlertDispatcher<FakeHub>) {
        let hub = Arc::new(hub);
        let dispatcher = AlertDispatcher::new(hub.clone(), "lug_nut", Duration::from_secs(10));
        (hub, dispatcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_alert() {
        let (hub, mut dispatcher) = dispatcher(FakeHub::default());
        let verdict = Verdict {
            should_alert: false,
            deficit: 0,
            counted: 4,
        };
        assert_eq!(dispatcher.dispatch_if_needed(&verdict).await, None);
        assert!(dispatcher.settle(Duration::from_secs(1)).await.is_empty());
        assert!(hub.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_alert() {
        let (hub, mut dispatcher) = dispatcher(FakeHub::default());
        let id = dispatcher.dispatch_if_needed(&MISSING_TWO).await.unwrap();

        let reports = dispatcher.settle(Duration::from_secs(1)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].alert_id, id);
        assert!(reports[0].result.is_ok());

        let sent = hub.sent();
        assert_eq!(sent.len(), 1);
        let message = sent[0].message();
        assert_eq!(message.id, id.to_string());
        assert_eq!(message.text, "Found 2 missing lug_nuts!");
        assert_eq!(message.custom_properties["counted"], serde_json::json!(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_send_at_a_time_in_order() {
        let (hub, mut dispatcher) = dispatcher(FakeHub {
            delay: Duration::from_millis(30),
            ..Default::default()
        });

        let start = Instant::now();
        let first = dispatcher.dispatch_if_needed(&MISSING_TWO).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(1));
        // Held back until the first send settles
        let second = dispatcher.dispatch_if_needed(&MISSING_TWO).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));

        dispatcher.settle(Duration::from_secs(1)).await;
        let sent: Vec<_> = hub.sent().iter().map(|a| a.id).collect();
        assert_eq!(sent, vec![first, second]);
        assert_eq!(hub.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_is_reported() {
        let (_hub, mut dispatcher) = dispatcher(FakeHub {
            failing: true,
            ..Default::default()
        });
        dispatcher.dispatch_if_needed(&MISSING_TWO).await.unwrap();
        let reports = dispatcher.settle(Duration::from_secs(1)).await;
        assert!(matches!(reports[0].result, Err(DispatchError::NotConnected)));

        // The dispatcher stays usable
        assert!(dispatcher.dispatch_if_needed(&MISSING_TWO).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout() {
        let hub = Arc::new(FakeHub {
            delay: Duration::from_secs(60),
            ..Default::default()
        });
        let mut dispatcher = AlertDispatcher::new(hub.clone(), "lug_nut", Duration::from_secs(1));
        dispatcher.dispatch_if_needed(&MISSING_TWO).await.unwrap();

        let reports = dispatcher.settle(Duration::from_secs(5)).await;
        assert!(matches!(reports[0].result, Err(DispatchError::TimedOut(_))));
        assert!(hub.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_is_bounded() {
        let (_hub, mut dispatcher) = dispatcher(FakeHub {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        dispatcher.dispatch_if_needed(&MISSING_TWO).await.unwrap();

        let start = Instant::now();
        assert!(dispatcher.settle(Duration::from_secs(1)).await.is_empty());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
