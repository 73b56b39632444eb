//! Realtime broker
//!
//! Keeps the registry of connected subscribers for one instance. Each
//! subscriber owns a bounded broadcast buffer; a slow subscriber loses its
//! oldest buffered events and never blocks the publisher or its peers.
//!
//! Outgoing envelopes pass through a single forwarding task so sibling
//! instances see them in publish order. The relay listener re-subscribes with
//! backoff whenever its stream ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::relay::{Relay, RelayEnvelope, RelayError, RelayStream};
use super::{BroadcastEvent, Scope};
use crate::client::{BackoffConfig, ReconnectBackoff};
use crate::config::BrokerConfig;
use crate::metrics;

type SubscriberMap = HashMap<u64, broadcast::Sender<Arc<BroadcastEvent>>>;

/// Broker errors
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker is closed")]
    Closed,

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

struct BrokerInner {
    instance_id: Uuid,
    buffer: usize,
    registry: RwLock<HashMap<Scope, SubscriberMap>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    relay: Arc<dyn Relay>,
    outbound: Mutex<Option<mpsc::Sender<RelayEnvelope>>>,
    resubscribe: BackoffConfig,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerInner {
    fn deliver_local(&self, event: &Arc<BroadcastEvent>) -> usize {
        let registry = self.registry.read();
        let mut delivered = 0;

        let event_scope = event.event_slug.clone().map(Scope::Event);
        let scopes = std::iter::once(Scope::All).chain(event_scope);

        for scope in scopes {
            let Some(subscribers) = registry.get(&scope) else {
                continue;
            };
            debug_assert!(scope.matches(event));
            for sender in subscribers.values() {
                // Fails only when the receiver is mid-drop; its entry goes away with it.
                if sender.send(Arc::clone(event)).is_ok() {
                    delivered += 1;
                }
            }
        }

        delivered
    }

    fn remove(&self, scope: &Scope, id: u64) {
        let mut registry = self.registry.write();
        let Some(subscribers) = registry.get_mut(scope) else {
            return;
        };
        if subscribers.remove(&id).is_some() {
            metrics::subscribers_removed(1);
        }
        if subscribers.is_empty() {
            registry.remove(scope);
        }
    }
}

/// Per-instance subscriber registry with cross-instance relay
#[derive(Clone)]
pub struct RealtimeBroker {
    inner: Arc<BrokerInner>,
}

impl RealtimeBroker {
    /// Create a broker without starting the relay listener
    ///
    /// Local publishing works immediately; events from other instances only
    /// arrive after [`RealtimeBroker::start`].
    pub fn new(config: &BrokerConfig, relay: Arc<dyn Relay>) -> Self {
        let instance_id = config.instance_id.unwrap_or_else(Uuid::new_v4);

        let (tx, rx) = mpsc::channel(config.relay_queue.max(1));
        let outbound = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(forward_to_relay(Arc::clone(&relay), rx));
                Some(tx)
            }
            Err(_) => {
                tracing::warn!("No runtime available, broadcasts will not be relayed");
                None
            }
        };

        Self {
            inner: Arc::new(BrokerInner {
                instance_id,
                buffer: config.subscriber_buffer.max(1),
                registry: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                relay,
                outbound: Mutex::new(outbound),
                resubscribe: config.resubscribe.clone(),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Create a broker and start listening on the relay
    pub async fn connect(config: &BrokerConfig, relay: Arc<dyn Relay>) -> Result<Self, BrokerError> {
        let broker = Self::new(config, relay);
        broker.start().await?;
        Ok(broker)
    }

    /// Subscribe to the relay and forward foreign envelopes to local subscribers
    pub async fn start(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let incoming = self.inner.relay.subscribe().await?;
        let handle = tokio::spawn(listen(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.relay),
            incoming,
            ReconnectBackoff::new(self.inner.resubscribe.clone()),
        ));

        if let Some(previous) = self.inner.listener.lock().replace(handle) {
            previous.abort();
        }

        tracing::info!(
            instance_id = %self.inner.instance_id,
            relay = self.inner.relay.name(),
            "Realtime broker listening on relay"
        );
        Ok(())
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Register a subscriber for `scope`
    pub fn subscribe(&self, scope: Scope) -> Result<Subscription, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let (tx, rx) = broadcast::channel(self.inner.buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .registry
            .write()
            .entry(scope.clone())
            .or_default()
            .insert(id, tx);
        metrics::subscriber_added();

        tracing::debug!(subscriber = id, scope = %scope, "Subscriber registered");

        Ok(Subscription {
            id,
            scope,
            rx,
            broker: Arc::downgrade(&self.inner),
        })
    }

    /// Remove a subscriber; dropping the subscription has the same effect
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Deliver to local subscribers, then hand the event to the relay
    ///
    /// Returns the number of local subscribers reached. Never blocks and never
    /// fails: relay errors are logged from a background task.
    pub fn publish(&self, event: BroadcastEvent) -> usize {
        if self.is_closed() {
            tracing::debug!(kind = %event.kind, "Dropping publish on closed broker");
            return 0;
        }

        let event = Arc::new(event);
        let delivered = self.inner.deliver_local(&event);
        metrics::record_published(event.kind.as_str());

        tracing::debug!(
            kind = %event.kind,
            event_slug = event.event_slug.as_deref().unwrap_or("-"),
            delivered,
            "Broadcast published"
        );

        let envelope = RelayEnvelope {
            origin: self.inner.instance_id,
            event: (*event).clone(),
        };

        if let Some(outbound) = self.inner.outbound.lock().as_ref() {
            match outbound.try_send(envelope) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(envelope)) => {
                    metrics::record_relay_error();
                    tracing::warn!(
                        kind = %envelope.event.kind,
                        "Relay queue full, broadcast not relayed"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(kind = %event.kind, "Relay forwarder stopped");
                }
            }
        }

        delivered
    }

    /// Deliver an envelope received from the relay
    ///
    /// Envelopes this instance produced are ignored; they were already
    /// delivered locally at publish time.
    pub fn handle_relayed(&self, envelope: RelayEnvelope) -> usize {
        if envelope.origin == self.inner.instance_id || self.is_closed() {
            return 0;
        }

        metrics::record_relayed_in();
        let event = Arc::new(envelope.event);
        self.inner.deliver_local(&event)
    }

    /// Number of registered subscribers across all scopes
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.read().values().map(HashMap::len).sum()
    }

    /// Drop every subscriber and stop listening on the relay
    ///
    /// Subscribers drain what is already buffered and then see end of stream.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let removed: usize = {
            let mut registry = self.inner.registry.write();
            let count = registry.values().map(HashMap::len).sum();
            registry.clear();
            count
        };
        metrics::subscribers_removed(removed);

        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        // The forwarder flushes what is queued, then exits
        self.inner.outbound.lock().take();

        tracing::info!(instance_id = %self.inner.instance_id, removed, "Realtime broker closed");
    }
}

/// Publish queued envelopes one at a time, preserving their order
async fn forward_to_relay(relay: Arc<dyn Relay>, mut rx: mpsc::Receiver<RelayEnvelope>) {
    while let Some(envelope) = rx.recv().await {
        if let Err(e) = relay.publish(&envelope).await {
            metrics::record_relay_error();
            tracing::warn!(
                error = %e,
                kind = %envelope.event.kind,
                "Failed to relay broadcast to other instances"
            );
        }
    }
    tracing::debug!(relay = relay.name(), "Relay forwarder stopped");
}

fn is_live(broker: &Weak<BrokerInner>) -> bool {
    broker
        .upgrade()
        .is_some_and(|inner| !inner.closed.load(Ordering::Acquire))
}

/// Deliver foreign envelopes until the broker goes away, re-subscribing
/// whenever the relay stream ends
async fn listen(
    broker: Weak<BrokerInner>,
    relay: Arc<dyn Relay>,
    mut incoming: RelayStream,
    mut backoff: ReconnectBackoff,
) {
    let max_delay = Duration::from_millis(backoff.config().max_delay_ms);

    loop {
        while let Some(envelope) = incoming.next().await {
            let Some(inner) = broker.upgrade() else {
                return;
            };
            RealtimeBroker { inner }.handle_relayed(envelope);
        }

        if !is_live(&broker) {
            break;
        }

        metrics::record_relay_error();
        tracing::warn!(relay = relay.name(), "Relay stream ended, re-subscribing");

        incoming = loop {
            let delay = backoff.next_delay().unwrap_or(max_delay);
            tokio::time::sleep(delay).await;
            if !is_live(&broker) {
                tracing::debug!("Broker gone, relay listener stopped");
                return;
            }

            match relay.subscribe().await {
                Ok(stream) => {
                    tracing::info!(
                        relay = relay.name(),
                        attempts = backoff.attempts(),
                        "Re-subscribed to relay"
                    );
                    backoff.reset();
                    break stream;
                }
                Err(e) => {
                    metrics::record_relay_error();
                    tracing::warn!(
                        error = %e,
                        relay = relay.name(),
                        attempts = backoff.attempts(),
                        "Relay re-subscribe failed"
                    );
                }
            }
        };
    }

    tracing::debug!("Relay listener stopped");
}

/// Receiving end of a broker registration
///
/// Dropping it unregisters the subscriber.
pub struct Subscription {
    id: u64,
    scope: Scope,
    rx: broadcast::Receiver<Arc<BroadcastEvent>>,
    broker: Weak<BrokerInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Next event, or `None` once the broker has closed
    ///
    /// Events evicted from a full buffer are skipped and logged.
    pub async fn recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::record_dropped(skipped);
                    tracing::warn!(
                        subscriber = self.id,
                        skipped,
                        "Subscriber fell behind, oldest events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is buffered
    pub fn try_recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    metrics::record_dropped(skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Convert into a stream that ends when the broker closes
    pub fn into_stream(self) -> impl Stream<Item = Arc<BroadcastEvent>> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|event| (event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.broker.upgrade() {
            inner.remove(&self.scope, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .finish()
    }
}
