//! Command router: transport connection state machine and dispatch.
//!
//! The broker event loop is polled by a pump task that forwards raw
//! transport events into a bounded queue; a single consumer task owns every
//! connection-state transition, so no flag is written from two places.
//! Validated commands are handled in spawned tasks and therefore never
//! block message delivery; per-worker ordering comes from the lifecycle
//! manager, which publishes each command's status event before releasing
//! that worker's lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use messaging::{topics, CommandTopic, MqttSettings, StatusPublisher};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::commands::Command;
use crate::lifecycle::LifecycleManager;

/// Startup policy: a bounded attempt count with a fixed delay. The broker
/// is co-located and recovers quickly, so exponential backoff buys nothing.
const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_DELAY: Duration = Duration::from_secs(5);

/// Pause before the event loop retries after a mid-flight disconnect.
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
}

#[derive(Debug)]
enum TransportEvent {
    Connected,
    Disconnected(String),
    Message { topic: String, payload: bytes::Bytes },
}

/// Cheap observer handle for the HTTP health surface.
#[derive(Clone)]
pub struct RouterHandle {
    connected: Arc<AtomicBool>,
}

impl RouterHandle {
    pub fn transport_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

pub struct CommandRouter {
    client: AsyncClient,
    lifecycle: Arc<LifecycleManager>,
    publisher: StatusPublisher,
    namespace: String,
    connected: Arc<AtomicBool>,
}

impl CommandRouter {
    /// Connect with the bounded retry policy and spawn the routing tasks.
    ///
    /// Exhausting retries leaves the gateway in degraded mode: the returned
    /// publisher and handle stay valid, health reports the transport as
    /// down, and no commands are processed until the process is restarted.
    pub async fn start(
        settings: &MqttSettings,
        lifecycle: Arc<LifecycleManager>,
    ) -> (StatusPublisher, RouterHandle) {
        let (client, mut eventloop) = AsyncClient::new(settings.options(), 64);
        let publisher = StatusPublisher::new(client.clone(), &settings.namespace);
        let connected = Arc::new(AtomicBool::new(false));
        let handle = RouterHandle {
            connected: connected.clone(),
        };

        info!(
            "Transport: connecting to {}:{} (up to {} attempts)",
            settings.host, settings.port, CONNECT_ATTEMPTS
        );

        if !await_connack(&mut eventloop).await {
            error!(
                "Transport: connect retries exhausted; running degraded, \
                 no commands will be processed until restart"
            );
            return (publisher, handle);
        }

        let router = CommandRouter {
            client,
            lifecycle,
            publisher: publisher.clone(),
            namespace: settings.namespace.clone(),
            connected,
        };

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        // The initial ConnAck was consumed while connecting; seed the queue
        // so the consumer performs the first subscription.
        tx.send(TransportEvent::Connected).await.ok();

        tokio::spawn(pump(eventloop, tx));
        tokio::spawn(router.consume(rx));

        (publisher, handle)
    }

    /// Single consumer owning the connection state machine.
    async fn consume(self, mut rx: mpsc::Receiver<TransportEvent>) {
        let mut state = ConnectionState::Connecting;

        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Connected => {
                    self.connected.store(true, Ordering::Relaxed);
                    state = match self.subscribe_commands().await {
                        Ok(()) => {
                            info!("Transport: subscribed to command topics");
                            ConnectionState::Subscribed
                        }
                        Err(e) => {
                            warn!("Transport: subscribe failed: {}", e);
                            ConnectionState::Connected
                        }
                    };
                }
                TransportEvent::Disconnected(reason) => {
                    self.connected.store(false, Ordering::Relaxed);
                    state = ConnectionState::Disconnected;
                    warn!("Transport: disconnected from broker: {}", reason);
                }
                TransportEvent::Message { topic, payload } => {
                    if state != ConnectionState::Subscribed {
                        debug!("Transport: dropping message received in state {:?}", state);
                        continue;
                    }
                    self.dispatch(&topic, &payload);
                }
            }
        }
    }

    async fn subscribe_commands(&self) -> Result<(), rumqttc::ClientError> {
        for filter in topics::command_filters(&self.namespace) {
            self.client.subscribe(filter, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Validate and hand off one inbound message. Malformed messages are
    /// logged and dropped without side effects.
    fn dispatch(&self, topic: &str, payload: &[u8]) {
        let Some(parsed) = CommandTopic::parse(&self.namespace, topic) else {
            warn!("Router: invalid topic structure: {}", topic);
            return;
        };

        let command = match Command::parse(parsed.kind, payload) {
            Ok(c) => c,
            Err(e) => {
                warn!("Router: dropping message on {}: {}", topic, e);
                return;
            }
        };

        debug!("Router: handling {:?} for worker {}", parsed.kind, parsed.worker_id);

        // The lifecycle manager publishes exactly one status event per
        // accepted command; failures become error statuses, never panics.
        let lifecycle = self.lifecycle.clone();
        let publisher = self.publisher.clone();
        let worker_id = parsed.worker_id;
        tokio::spawn(async move {
            lifecycle.execute(&worker_id, command, &publisher).await;
        });
    }
}

/// Drive the initial connection: poll until a successful ConnAck, counting
/// each failure as one attempt with a fixed inter-attempt delay.
async fn await_connack(eventloop: &mut EventLoop) -> bool {
    let mut attempts: u32 = 0;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack)))
                if ack.code == ConnectReturnCode::Success =>
            {
                info!("Transport: connected to broker");
                return true;
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                attempts += 1;
                warn!(
                    "Transport: broker refused connection ({:?}), attempt {}/{}",
                    ack.code, attempts, CONNECT_ATTEMPTS
                );
                if attempts >= CONNECT_ATTEMPTS {
                    return false;
                }
                tokio::time::sleep(CONNECT_DELAY).await;
            }
            Ok(_) => {}
            Err(e) => {
                attempts += 1;
                warn!(
                    "Transport: connection attempt {}/{} failed: {}",
                    attempts, CONNECT_ATTEMPTS, e
                );
                if attempts >= CONNECT_ATTEMPTS {
                    return false;
                }
                tokio::time::sleep(CONNECT_DELAY).await;
            }
        }
    }
}

/// Forward raw transport events into the queue. After the initial connect
/// the client reconnects on its own; every new ConnAck triggers a
/// resubscription via the consumer.
async fn pump(mut eventloop: EventLoop, tx: mpsc::Sender<TransportEvent>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    if tx.send(TransportEvent::Connected).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let event = TransportEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                if tx
                    .send(TransportEvent::Disconnected(e.to_string()))
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(RECONNECT_PAUSE).await;
            }
        }
    }
}
