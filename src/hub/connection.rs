use super::{message::MqttMessage, ConnectionString, DispatchError, HubError, Messenger};
use crate::{config::ConfigHub, pipeline::Alert};
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS, Transport};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, info_span, trace, Instrument};

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

const HUB_PORT: u16 = 8883;

/// Device connection to an Azure IoT hub over MQTT.
pub struct HubMessenger {
    connection: ConnectionString,
    client: AsyncClient,
    link: Arc<LinkState>,
    event_loop: tokio::task::AbortHandle,
}

/// State shared between the messenger and its event loop task
#[derive(Default)]
struct LinkState {
    connected: AtomicBool,
    next_ticket: AtomicU64,
    acks: Mutex<AckBook>,
    closed: Notify,
}

/// Pairs PUBACKs with the send that is waiting for them.
///
/// The client hands publishes to the event loop in order, so the n-th
/// outgoing publish belongs to the n-th issued ticket.
#[derive(Default)]
struct AckBook {
    issued: VecDeque<u64>,
    in_flight: HashMap<u16, u64>,
    waiter: Option<(u64, oneshot::Sender<()>)>,
}

#[derive(Debug, PartialEq, Eq)]
enum LinkStep {
    Continue,
    Established,
    Closed,
}

impl LinkState {
    fn book(&self) -> std::sync::MutexGuard<'_, AckBook> {
        self.acks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a publish about to be handed to the client. `tx` fires on its PUBACK.
    fn issue(&self, tx: oneshot::Sender<()>) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let mut book = self.book();
        book.issued.push_back(ticket);
        book.waiter = Some((ticket, tx));
        ticket
    }

    /// The client refused the publish, it never reaches the wire.
    fn withdraw(&self, ticket: u64) {
        let mut book = self.book();
        book.issued.retain(|t| *t != ticket);
        if matches!(book.waiter, Some((t, _)) if t == ticket) {
            book.waiter = None;
        }
    }

    /// Stops waiting for `ticket`. A late PUBACK for it is then ignored.
    fn forget(&self, ticket: u64) {
        let mut book = self.book();
        if matches!(book.waiter, Some((t, _)) if t == ticket) {
            book.waiter = None;
        }
    }

    fn published(&self, pkid: u16) {
        let mut book = self.book();
        if book.in_flight.contains_key(&pkid) {
            trace!(pkid, "Publish retransmitted");
            return;
        }
        if let Some(ticket) = book.issued.pop_front() {
            book.in_flight.insert(pkid, ticket);
        }
    }

    /// Completes the send waiting for `pkid`. Returns false if nobody waits for it.
    fn acknowledge(&self, pkid: u16) -> bool {
        let mut book = self.book();
        let Some(ticket) = book.in_flight.remove(&pkid) else {
            return false;
        };
        match book.waiter.take() {
            Some((waiting, tx)) if waiting == ticket => tx.send(()).is_ok(),
            other => {
                book.waiter = other;
                false
            }
        }
    }

    /// Dropping the sender fails the waiting publish
    fn abandon_pending(&self) {
        self.book().waiter = None;
    }

    fn on_event(&self, event: &Event) -> LinkStep {
        match event {
            Event::Incoming(Incoming::ConnAck(_)) => {
                info!("Connected to IoT hub.");
                self.connected.store(true, Ordering::SeqCst);
                LinkStep::Established
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                self.published(*pkid);
                LinkStep::Continue
            }
            Event::Incoming(Incoming::PubAck(ack)) => {
                if self.acknowledge(ack.pkid) {
                    trace!(pkid = ack.pkid, "Publish acknowledged");
                } else {
                    debug!(pkid = ack.pkid, "Acknowledgement for an abandoned publish");
                }
                LinkStep::Continue
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                debug!("Disconnect sent, stopping event loop");
                self.on_lost();
                *self.book() = AckBook::default();
                self.closed.notify_one();
                LinkStep::Closed
            }
            _ => LinkStep::Continue,
        }
    }

    fn on_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.abandon_pending();
    }
}

/// Clears the waiting slot when a send finishes or is dropped mid-flight.
struct PendingAck<'a> {
    link: &'a LinkState,
    ticket: u64,
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        self.link.forget(self.ticket);
    }
}

impl HubMessenger {
    /// Authenticates with a fresh SAS token and waits for the hub to accept the session.
    pub async fn connect(
        connection: &ConnectionString,
        config: &ConfigHub,
    ) -> Result<HubMessenger, HubError> {
        let expiry = Utc::now().timestamp() + config.sas_ttl_secs as i64;
        // TODO: renew the SAS token before it expires instead of relying on a long ttl
        let password = connection.sas_token(expiry)?;

        let mut mqttoptions = MqttOptions::new(
            connection.device_id.clone(),
            connection.host_name.clone(),
            HUB_PORT,
        );
        mqttoptions
            .set_keep_alive(Duration::from_secs(config.keep_alive_secs))
            .set_credentials(connection.username(), password)
            // Unacknowledged alerts are not replayed after a reconnect
            .set_clean_session(true)
            .set_transport(Transport::tls_with_default_config());

        let (client, eventloop) = AsyncClient::new(mqttoptions, 10);
        let link = Arc::new(LinkState::default());
        let (established_tx, established_rx) = oneshot::channel();

        let logging_span = info_span!("Hub link", device=%connection.device_id);
        let handle = tokio::task::spawn(
            drive_event_loop(eventloop, link.clone(), established_tx).instrument(logging_span),
        );
        // Dropping the messenger aborts the event loop, also when this future is dropped
        let messenger = HubMessenger {
            connection: connection.clone(),
            client,
            link,
            event_loop: handle.abort_handle(),
        };

        match tokio::time::timeout(config.connect_timeout(), established_rx).await {
            Ok(Ok(Ok(()))) => Ok(messenger),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(HubError::ConnectionFailed(
                "event loop stopped before the connection was acknowledged".into(),
            )),
            Err(_) => Err(HubError::ConnectTimeout(config.connect_timeout())),
        }
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    link: Arc<LinkState>,
    established: oneshot::Sender<Result<(), HubError>>,
) {
    let mut established = Some(established);
    loop {
        match eventloop.poll().await {
            Ok(event) => match link.on_event(&event) {
                LinkStep::Established => {
                    if let Some(tx) = established.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                LinkStep::Closed => return,
                LinkStep::Continue => {}
            },
            Err(e) => {
                link.on_lost();
                if let Some(tx) = established.take() {
                    // Never connected: let the caller decide, do not retry
                    let _ = tx.send(Err(e.into()));
                    return;
                }
                error!("IoT hub connection error encountered: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl Messenger for HubMessenger {
    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        if !self.is_connected() {
            return Err(DispatchError::NotConnected);
        }
        let message = MqttMessage::telemetry(&self.connection, &alert.message());
        let (ack_tx, ack_rx) = oneshot::channel();
        let pending = PendingAck {
            link: &self.link,
            ticket: self.link.issue(ack_tx),
        };

        debug!(topic=%message.topic, "Publishing alert");
        if let Err(e) = self
            .client
            .publish(message.topic.clone(), QoS::AtLeastOnce, false, message.render())
            .await
        {
            self.link.withdraw(pending.ticket);
            return Err(DispatchError::Publish(e));
        }
        ack_rx.await.map_err(|_| DispatchError::Interrupted)
    }

    async fn disconnect(&self) -> Result<(), HubError> {
        let closed = self.link.closed.notified();
        self.client.disconnect().await.map_err(HubError::Client)?;
        closed.await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }
}

impl Drop for HubMessenger {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}
