//! In-process broker for tests
//!
//! Honors the parts of AMQP the pipeline relies on: durable-parameter equivalence on
//! redeclare (406 otherwise), direct/fanout routing, per-consumer prefetch, ack/nack and
//! dead-lettering through `x-dead-letter-*` style queue settings. Faults can be injected
//! to exercise the retry and reconnect paths.

use super::{
    Binding, BrokerChannel, BrokerConnection, BrokerConnector, CloseHook, Delivery,
    DeliveryStream, ExchangeKind, ExchangeSpec, MessageProperties, QueueSpec,
};
use crate::error::{BrokerError, ClosedResource};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

const NOT_FOUND: u16 = 404;
const PRECONDITION_FAILED: u16 = 406;

#[derive(Debug, Clone)]
struct StoredMessage {
    data: Vec<u8>,
    properties: MessageProperties,
    redelivered: bool,
}

struct Subscriber {
    channel_id: u64,
    consumer_tag: String,
    prefetch: u16,
    in_flight: usize,
    sender: mpsc::UnboundedSender<Result<Delivery, BrokerError>>,
}

impl Subscriber {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight < usize::from(self.prefetch)
    }
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    subscribers: Vec<Subscriber>,
}

struct ChannelState {
    connection_id: u64,
    next_tag: u64,
    prefetch: u16,
    open: bool,
}

struct Unacked {
    queue: String,
    consumer_tag: String,
    message: StoredMessage,
}

#[derive(Default)]
struct Faults {
    connect_errors: VecDeque<BrokerError>,
    publish_errors: VecDeque<BrokerError>,
    rejected_publishes: usize,
    connect_delay: Option<Duration>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    connections: HashMap<u64, bool>,
    close_hooks: HashMap<u64, Vec<CloseHook>>,
    channels: HashMap<u64, ChannelState>,
    unacked: HashMap<(u64, u64), Unacked>,
    faults: Faults,
    connect_attempts: usize,
    accepted_publishes: usize,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn connection_open(&self, id: u64) -> bool {
        self.connections.get(&id).copied().unwrap_or(false)
    }

    fn ensure_channel_open(&self, id: u64) -> Result<(), BrokerError> {
        match self.channels.get(&id) {
            Some(channel) if channel.open && self.connection_open(channel.connection_id) => Ok(()),
            _ => Err(BrokerError::Closed(ClosedResource::Channel)),
        }
    }

    fn enqueue(&mut self, queue: &str, message: StoredMessage) {
        if let Some(state) = self.queues.get_mut(queue) {
            state.ready.push_back(message);
            self.dispatch(queue);
        }
    }

    fn route(&mut self, exchange: &str, routing_key: &str, message: StoredMessage) {
        if exchange.is_empty() {
            self.enqueue(routing_key, message);
            return;
        }

        let Some(kind) = self.exchanges.get(exchange).map(|e| e.kind) else {
            return;
        };
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| kind == ExchangeKind::Fanout || b.routing_key == routing_key)
            .map(|b| b.queue.clone())
            .collect();

        for queue in targets {
            self.enqueue(&queue, message.clone());
        }
    }

    /// Hand ready messages to subscribers with spare prefetch capacity
    fn dispatch(&mut self, queue: &str) {
        let Some(state) = self.queues.get_mut(queue) else {
            return;
        };

        loop {
            state.subscribers.retain(|s| !s.sender.is_closed());
            if state.ready.is_empty() {
                return;
            }
            let Some(index) = state.subscribers.iter().position(Subscriber::has_capacity) else {
                return;
            };
            let Some(channel) = self.channels.get_mut(&state.subscribers[index].channel_id) else {
                state.subscribers.remove(index);
                continue;
            };
            let Some(message) = state.ready.pop_front() else {
                return;
            };

            let tag = channel.next_tag;
            channel.next_tag += 1;

            let subscriber = &mut state.subscribers[index];
            let delivery = Delivery {
                delivery_tag: tag,
                data: message.data.clone(),
                message_id: message.properties.message_id.clone(),
                redelivered: message.redelivered,
            };
            if subscriber.sender.send(Ok(delivery)).is_err() {
                state.ready.push_front(message);
                state.subscribers.remove(index);
                continue;
            }

            subscriber.in_flight += 1;
            self.unacked.insert(
                (subscriber.channel_id, tag),
                Unacked {
                    queue: queue.to_string(),
                    consumer_tag: subscriber.consumer_tag.clone(),
                    message,
                },
            );

            // round-robin between subscribers of the same queue
            let subscriber = state.subscribers.remove(index);
            state.subscribers.push(subscriber);
        }
    }

    fn settle(&mut self, channel_id: u64, tag: u64) -> Result<Unacked, BrokerError> {
        let unacked =
            self.unacked
                .remove(&(channel_id, tag))
                .ok_or_else(|| BrokerError::Protocol {
                    code: PRECONDITION_FAILED,
                    message: format!("PRECONDITION_FAILED - unknown delivery tag {tag}"),
                })?;

        let subscriber = self.queues.get_mut(&unacked.queue).and_then(|state| {
            state
                .subscribers
                .iter_mut()
                .find(|s| s.channel_id == channel_id && s.consumer_tag == unacked.consumer_tag)
        });
        if let Some(subscriber) = subscriber {
            subscriber.in_flight = subscriber.in_flight.saturating_sub(1);
        }
        Ok(unacked)
    }

    fn requeue(&mut self, unacked: Unacked) {
        let Unacked {
            queue, mut message, ..
        } = unacked;
        message.redelivered = true;
        if let Some(state) = self.queues.get_mut(&queue) {
            state.ready.push_front(message);
        }
        self.dispatch(&queue);
    }

    fn dead_letter(&mut self, unacked: Unacked) {
        let Unacked {
            queue, mut message, ..
        } = unacked;
        let target = self
            .queues
            .get(&queue)
            .and_then(|state| state.spec.dead_letter.clone());
        if let Some(dead_letter) = target {
            message.redelivered = false;
            self.route(&dead_letter.exchange, &dead_letter.routing_key, message);
        }
        self.dispatch(&queue);
    }

    fn close_channel(&mut self, channel_id: u64) {
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            channel.open = false;
        }
        for state in self.queues.values_mut() {
            state.subscribers.retain(|s| s.channel_id != channel_id);
        }

        let tags: Vec<_> = self
            .unacked
            .keys()
            .filter(|(channel, _)| *channel == channel_id)
            .copied()
            .collect();
        for key in tags {
            if let Some(unacked) = self.unacked.remove(&key) {
                self.requeue(unacked);
            }
        }
    }

    /// Close a connection and its channels, handing back its close hooks
    fn close_connection(&mut self, connection_id: u64) -> Vec<CloseHook> {
        self.connections.insert(connection_id, false);
        let channels: Vec<_> = self
            .channels
            .iter()
            .filter(|(_, c)| c.connection_id == connection_id && c.open)
            .map(|(id, _)| *id)
            .collect();
        for channel_id in channels {
            self.close_channel(channel_id);
        }
        self.close_hooks.remove(&connection_id).unwrap_or_default()
    }
}

/// In-process broker, cheap to clone
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next connects with these errors, in order
    pub fn inject_connect_errors(&self, errors: impl IntoIterator<Item = BrokerError>) {
        self.lock().faults.connect_errors.extend(errors);
    }

    /// Fail the next publishes with these errors, in order
    pub fn inject_publish_errors(&self, errors: impl IntoIterator<Item = BrokerError>) {
        self.lock().faults.publish_errors.extend(errors);
    }

    /// Negatively confirm the next `count` publishes
    pub fn reject_next_publishes(&self, count: usize) {
        self.lock().faults.rejected_publishes += count;
    }

    /// Make every connect take at least `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().faults.connect_delay = Some(delay);
    }

    /// Simulate losing every open connection; fires their close hooks
    pub fn drop_connections(&self) {
        let hooks: Vec<CloseHook> = {
            let mut state = self.lock();
            let open: Vec<u64> = state
                .connections
                .iter()
                .filter(|(_, open)| **open)
                .map(|(id, _)| *id)
                .collect();
            open.into_iter()
                .flat_map(|id| state.close_connection(id))
                .collect()
        };

        for hook in hooks {
            hook(BrokerError::Closed(ClosedResource::Connection));
        }
    }

    /// Put raw bytes on a queue as if another producer sent them
    pub fn push_raw(&self, queue: &str, data: impl Into<Vec<u8>>) {
        let message = StoredMessage {
            data: data.into(),
            properties: MessageProperties::json(),
            redelivered: false,
        };
        self.lock().route("", queue, message);
    }

    /// Connect calls seen, including failed ones
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Publishes the broker accepted
    pub fn accepted_publishes(&self) -> usize {
        self.lock().accepted_publishes
    }

    pub fn open_connections(&self) -> usize {
        self.lock().connections.values().filter(|open| **open).count()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.lock().exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    /// Messages waiting on `queue`, not counting unacknowledged ones
    pub fn queue_depth(&self, name: &str) -> usize {
        self.lock()
            .queues
            .get(name)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Payloads waiting on `queue`, oldest first
    pub fn queue_payloads(&self, name: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(name)
            .map(|q| q.ready.iter().map(|m| m.data.clone()).collect())
            .unwrap_or_default()
    }

    /// Properties of messages waiting on `queue`, oldest first
    pub fn queue_properties(&self, name: &str) -> Vec<MessageProperties> {
        self.lock()
            .queues
            .get(name)
            .map(|q| q.ready.iter().map(|m| m.properties.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries handed out and not yet settled
    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self, _url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let delay = {
            let mut state = self.lock();
            state.connect_attempts += 1;
            state.faults.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(err) = state.faults.connect_errors.pop_front() {
            return Err(err);
        }
        let id = state.next_id();
        state.connections.insert(id, true);

        Ok(Arc::new(MemoryConnection {
            id,
            broker: self.clone(),
        }))
    }
}

pub struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut state = self.broker.lock();
        if !state.connection_open(self.id) {
            return Err(BrokerError::Closed(ClosedResource::Connection));
        }
        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelState {
                connection_id: self.id,
                next_tag: 1,
                prefetch: 0,
                open: true,
            },
        );

        Ok(Arc::new(MemoryChannel {
            id,
            broker: self.broker.clone(),
        }))
    }

    fn on_close(&self, hook: CloseHook) {
        let mut state = self.broker.lock();
        if state.connection_open(self.id) {
            state.close_hooks.entry(self.id).or_default().push(hook);
            return;
        }
        drop(state);
        hook(BrokerError::Closed(ClosedResource::Connection));
    }

    fn is_connected(&self) -> bool {
        self.broker.lock().connection_open(self.id)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        if state.connection_open(self.id) {
            // explicit close does not fire close hooks
            let _hooks = state.close_connection(self.id);
        }
        Ok(())
    }
}

pub struct MemoryChannel {
    id: u64,
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_channel_open(self.id)?;

        match state.exchanges.get(&spec.name) {
            Some(existing) if existing == spec => Ok(()),
            Some(_) => Err(BrokerError::Protocol {
                code: PRECONDITION_FAILED,
                message: format!(
                    "PRECONDITION_FAILED - inequivalent arg for exchange '{}'",
                    spec.name
                ),
            }),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_channel_open(self.id)?;

        match state.queues.get(&spec.name) {
            Some(existing) if existing.spec == *spec => Ok(()),
            Some(_) => Err(BrokerError::Protocol {
                code: PRECONDITION_FAILED,
                message: format!(
                    "PRECONDITION_FAILED - inequivalent arg for queue '{}'",
                    spec.name
                ),
            }),
            None => {
                state.queues.insert(
                    spec.name.clone(),
                    QueueState {
                        spec: spec.clone(),
                        ready: VecDeque::new(),
                        subscribers: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &Binding) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_channel_open(self.id)?;

        if !state.queues.contains_key(&binding.queue)
            || !state.exchanges.contains_key(&binding.exchange)
        {
            return Err(BrokerError::Protocol {
                code: NOT_FOUND,
                message: format!(
                    "NOT_FOUND - no queue '{}' or exchange '{}'",
                    binding.queue, binding.exchange
                ),
            });
        }
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<bool, BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_channel_open(self.id)?;

        if let Some(err) = state.faults.publish_errors.pop_front() {
            return Err(err);
        }
        if state.faults.rejected_publishes > 0 {
            state.faults.rejected_publishes -= 1;
            return Ok(false);
        }

        state.route(
            "",
            queue,
            StoredMessage {
                data: payload.to_vec(),
                properties: properties.clone(),
                redelivered: false,
            },
        );
        state.accepted_publishes += 1;
        Ok(true)
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_channel_open(self.id)?;
        if let Some(channel) = state.channels.get_mut(&self.id) {
            channel.prefetch = count;
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_channel_open(self.id)?;

        let prefetch = state.channels.get(&self.id).map(|c| c.prefetch).unwrap_or(0);
        let (sender, receiver) = mpsc::unbounded_channel();
        let Some(queue_state) = state.queues.get_mut(queue) else {
            return Err(BrokerError::Protocol {
                code: NOT_FOUND,
                message: format!("NOT_FOUND - no queue '{queue}'"),
            });
        };
        queue_state.subscribers.push(Subscriber {
            channel_id: self.id,
            consumer_tag: consumer_tag.to_string(),
            prefetch,
            in_flight: 0,
            sender,
        });
        state.dispatch(queue);

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_channel_open(self.id)?;
        let unacked = state.settle(self.id, delivery_tag)?;
        state.dispatch(&unacked.queue);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_channel_open(self.id)?;
        let unacked = state.settle(self.id, delivery_tag)?;
        if requeue {
            state.requeue(unacked);
        } else {
            state.dead_letter(unacked);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.broker.lock().ensure_channel_open(self.id).is_ok()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.lock().close_channel(self.id);
        Ok(())
    }
}
