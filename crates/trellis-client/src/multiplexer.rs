//! Channel multiplexer: fans inbound events out to per-channel listeners.
//!
//! The table maps each channel name to its listeners, with a reverse index
//! from subscription id to channel for cleanup. Every listener owns a bounded
//! queue drained by its own delivery task, so a slow or failing listener never
//! holds up another one, while events for a single listener keep their
//! arrival order. A listener that falls a full queue behind loses its oldest
//! pending events.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, warn};
use trellis_protocol::{ChannelEvent, ChannelName};

/// Counter for generating subscription ids.
static SUBSCRIPTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one registered listener.
///
/// Ids are never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(SUBSCRIPTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: SubscriptionId,
    channel: ChannelName,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }
}

/// Receives events for the channels it is subscribed to.
///
/// Invoked on a blocking worker. A returned error or a panic is logged and
/// affects only that one delivery.
pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, event: &ChannelEvent) -> anyhow::Result<()>;
}

impl<F> EventListener for F
where
    F: Fn(&ChannelEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_event(&self, event: &ChannelEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Pending events for one listener. Full queues drop from the front.
struct EventQueue {
    events: Mutex<VecDeque<ChannelEvent>>,
    capacity: usize,
    ready: Notify,
    closed: AtomicBool,
}

impl EventQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
            ready: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append `event`, returning the event it displaced if the queue was full.
    fn push(&self, event: ChannelEvent) -> Option<ChannelEvent> {
        let dropped = {
            let mut events = self.events.lock();
            let dropped = if events.len() >= self.capacity {
                events.pop_front()
            } else {
                None
            };
            events.push_back(event);
            dropped
        };
        self.ready.notify_one();
        dropped
    }

    /// Next event in arrival order, or `None` once closed. Pending events
    /// are discarded on close.
    async fn next(&self) -> Option<ChannelEvent> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            let pending = self.events.lock().pop_front();
            if let Some(event) = pending {
                return Some(event);
            }
            self.ready.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.events.lock().clear();
        self.ready.notify_one();
    }
}

#[derive(Default)]
struct Table {
    channels: HashMap<ChannelName, HashMap<SubscriptionId, Arc<EventQueue>>>,
    index: HashMap<SubscriptionId, ChannelName>,
}

pub(crate) struct Multiplexer {
    table: Mutex<Table>,
    queue_capacity: usize,
}

impl Multiplexer {
    /// `queue_capacity` bounds each listener's pending events; at least 1.
    pub(crate) fn new(queue_capacity: usize) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a listener and start its delivery task.
    ///
    /// Returns the subscription and whether it is the first on its channel.
    /// Must be called from within a tokio runtime.
    pub(crate) fn register(
        &self,
        channel: ChannelName,
        listener: Arc<dyn EventListener>,
    ) -> (Subscription, bool) {
        let subscription = Subscription {
            id: SubscriptionId::next(),
            channel,
        };
        let queue = Arc::new(EventQueue::new(self.queue_capacity));
        tokio::spawn(deliver(subscription.clone(), listener, Arc::clone(&queue)));

        let mut table = self.table.lock();
        let listeners = table
            .channels
            .entry(subscription.channel.clone())
            .or_default();
        let first = listeners.is_empty();
        listeners.insert(subscription.id, queue);
        table
            .index
            .insert(subscription.id, subscription.channel.clone());

        debug!(channel = %subscription.channel, subscription = %subscription.id, "Listener registered");
        (subscription, first)
    }

    /// Remove a listener. Events not yet handed to it are discarded.
    ///
    /// Returns `None` for an unknown subscription, otherwise whether the
    /// channel is now without listeners.
    pub(crate) fn remove(&self, subscription: &Subscription) -> Option<bool> {
        let mut table = self.table.lock();
        let channel = table.index.remove(&subscription.id)?;
        let listeners = table.channels.get_mut(&channel)?;
        if let Some(queue) = listeners.remove(&subscription.id) {
            queue.close();
        }
        let last = listeners.is_empty();
        if last {
            table.channels.remove(&channel);
        }
        debug!(channel = %channel, subscription = %subscription.id, "Listener removed");
        Some(last)
    }

    /// Queue an event for every listener on exactly `channel`.
    ///
    /// Returns the number of listeners it was queued for.
    pub(crate) fn dispatch(&self, channel: &ChannelName, payload: Value) -> usize {
        let table = self.table.lock();
        let Some(listeners) = table.channels.get(channel) else {
            debug!(channel = %channel, "No listeners for event");
            return 0;
        };
        let event = ChannelEvent::new(channel.clone(), payload);
        for (id, queue) in listeners {
            if queue.push(event.clone()).is_some() {
                warn!(
                    channel = %channel,
                    subscription = %id,
                    capacity = self.queue_capacity,
                    "Listener queue full, dropped oldest event"
                );
            }
        }
        listeners.len()
    }

    /// Channels with at least one listener.
    pub(crate) fn channels(&self) -> Vec<ChannelName> {
        self.table.lock().channels.keys().cloned().collect()
    }

    pub(crate) fn has_listeners(&self, channel: &ChannelName) -> bool {
        self.table.lock().channels.contains_key(channel)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.table.lock().index.len()
    }

    /// Drop every listener.
    pub(crate) fn clear(&self) {
        let mut table = self.table.lock();
        for queue in table.channels.values().flat_map(HashMap::values) {
            queue.close();
        }
        table.channels.clear();
        table.index.clear();
    }
}

async fn deliver(
    subscription: Subscription,
    listener: Arc<dyn EventListener>,
    queue: Arc<EventQueue>,
) {
    while let Some(event) = queue.next().await {
        let listener = Arc::clone(&listener);
        match tokio::task::spawn_blocking(move || listener.on_event(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                channel = %subscription.channel,
                subscription = %subscription.id,
                error = %e,
                "Listener failed"
            ),
            Err(e) if e.is_panic() => error!(
                channel = %subscription.channel,
                subscription = %subscription.id,
                "Listener panicked"
            ),
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn channel(name: &str) -> ChannelName {
        ChannelName::new(name).unwrap()
    }

    fn collector() -> (Arc<dyn EventListener>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = move |event: &ChannelEvent| -> anyhow::Result<()> {
            let _ = tx.send(event.clone());
            Ok(())
        };
        (Arc::new(listener), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("listener queue closed")
    }

    #[tokio::test]
    async fn test_first_and_last_listener_flags() {
        let mux = Multiplexer::new(64);
        let (a, _) = collector();
        let (b, _) = collector();

        let (sub_a, first_a) = mux.register(channel("project:1"), a);
        let (sub_b, first_b) = mux.register(channel("project:1"), b);
        assert!(first_a);
        assert!(!first_b);

        assert_eq!(mux.remove(&sub_a), Some(false));
        assert!(mux.has_listeners(&channel("project:1")));
        assert_eq!(mux.remove(&sub_b), Some(true));
        assert!(!mux.has_listeners(&channel("project:1")));
        assert_eq!(mux.remove(&sub_b), None);
    }

    #[tokio::test]
    async fn test_dispatch_only_reaches_exact_channel() {
        let mux = Multiplexer::new(64);
        let (a, mut rx_a) = collector();
        let (b, mut rx_b) = collector();
        mux.register(channel("project:123"), a);
        mux.register(channel("project:456"), b);

        let queued = mux.dispatch(&channel("project:123"), json!({"type": "ASSET_CREATED", "id": "A1"}));
        assert_eq!(queued, 1);

        let event = next(&mut rx_a).await;
        assert_eq!(event.payload, json!({"type": "ASSET_CREATED", "id": "A1"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_per_listener_order_is_preserved() {
        let mux = Multiplexer::new(64);
        let (a, mut rx) = collector();
        mux.register(channel("asset:7"), a);
        for n in 0..20 {
            mux.dispatch(&channel("asset:7"), json!({ "n": n }));
        }
        for n in 0..20 {
            assert_eq!(next(&mut rx).await.payload["n"], n);
        }
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_affect_others() {
        let mux = Multiplexer::new(64);
        let failing: Arc<dyn EventListener> =
            Arc::new(|_: &ChannelEvent| -> anyhow::Result<()> { Err(anyhow::anyhow!("listener broke")) });
        let panicking: Arc<dyn EventListener> =
            Arc::new(|_: &ChannelEvent| -> anyhow::Result<()> { panic!("listener exploded") });
        let (healthy, mut rx) = collector();
        mux.register(channel("wallet:0xabc"), failing);
        mux.register(channel("wallet:0xabc"), panicking);
        mux.register(channel("wallet:0xabc"), healthy);

        mux.dispatch(&channel("wallet:0xabc"), json!(1));
        mux.dispatch(&channel("wallet:0xabc"), json!(2));
        assert_eq!(next(&mut rx).await.payload, json!(1));
        assert_eq!(next(&mut rx).await.payload, json!(2));
    }

    #[tokio::test]
    async fn test_stalled_listener_keeps_newest_events() {
        let mux = Multiplexer::new(2);
        let (seen, mut rx) = mpsc::unbounded_channel();
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let gate = Mutex::new(gate);
        let stalling: Arc<dyn EventListener> = Arc::new(move |event: &ChannelEvent| -> anyhow::Result<()> {
            let _ = seen.send(event.clone());
            if event.payload == json!(0) {
                let _ = gate.lock().recv();
            }
            Ok(())
        });
        mux.register(channel("project:1"), stalling);

        // The listener is now blocked on the first event.
        mux.dispatch(&channel("project:1"), json!(0));
        assert_eq!(next(&mut rx).await.payload, json!(0));

        for n in 1..=4 {
            assert_eq!(mux.dispatch(&channel("project:1"), json!(n)), 1);
        }
        release.send(()).unwrap();

        assert_eq!(next(&mut rx).await.payload, json!(3));
        assert_eq!(next(&mut rx).await.payload, json!(4));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_removed_listener_gets_nothing_more() {
        let mux = Multiplexer::new(64);
        let (a, mut rx_a) = collector();
        let (b, mut rx_b) = collector();
        let (sub_a, _) = mux.register(channel("project:9"), a);
        mux.register(channel("project:9"), b);

        mux.remove(&sub_a);
        mux.dispatch(&channel("project:9"), json!("after"));

        assert_eq!(next(&mut rx_b).await.payload, json!("after"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clear_empties_table() {
        let mux = Multiplexer::new(64);
        let (a, _) = collector();
        let (b, _) = collector();
        mux.register(channel("a"), a);
        mux.register(channel("b"), b);
        assert_eq!(mux.listener_count(), 2);
        assert_eq!(mux.channels().len(), 2);

        mux.clear();
        assert_eq!(mux.listener_count(), 0);
        assert!(mux.channels().is_empty());
        assert_eq!(mux.dispatch(&channel("a"), json!(null)), 0);
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }
}
