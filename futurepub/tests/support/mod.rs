// In-memory broker used by the integration-style tests in this crate

#![allow(dead_code)]

use futurepub::errors::QueueError;
use futurepub::queue::{AckAction, Broker, OutgoingMessage, QueueSpec};
use futurepub::scheduler::{Evaluation, SchedulerService};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A message sitting in a queue
#[derive(Debug, Clone)]
pub struct Queued {
    pub routing_key: String,
    pub message: OutgoingMessage,
}

/// A successful publish call
#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub message: OutgoingMessage,
}

#[derive(Default)]
struct State {
    exchanges: BTreeSet<String>,
    queues: BTreeMap<String, (QueueSpec, VecDeque<Queued>)>,
    bindings: BTreeSet<(String, String, String)>,
    published: Vec<Published>,
    publish_attempts: BTreeMap<String, usize>,
    failing_publishes: usize,
    failing_exchange: Option<String>,
}

/// Topic-exchange broker kept in memory. Routes publishes to bound queues,
/// dead-letters on demand and can be told to fail or disconnect.
pub struct InMemoryBroker {
    state: Mutex<State>,
    connected: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail the next `count` publishes to `exchange` (or to any exchange)
    pub fn fail_next_publishes(&self, count: usize, exchange: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.failing_publishes = count;
        state.failing_exchange = exchange.map(str::to_string);
    }

    pub fn exchanges(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().exchanges.clone()
    }

    pub fn queue_specs(&self) -> Vec<QueueSpec> {
        self.state
            .lock()
            .unwrap()
            .queues
            .values()
            .map(|(spec, _)| spec.clone())
            .collect()
    }

    pub fn queue_spec(&self, queue: &str) -> Option<QueueSpec> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|(spec, _)| spec.clone())
    }

    pub fn bindings(&self) -> BTreeSet<(String, String, String)> {
        self.state.lock().unwrap().bindings.clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_to(&self, exchange: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.exchange == exchange)
            .collect()
    }

    pub fn publish_attempts(&self, exchange: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .publish_attempts
            .get(exchange)
            .copied()
            .unwrap_or(0)
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|(_, messages)| messages.len())
            .unwrap_or(0)
    }

    pub fn messages(&self, queue: &str) -> Vec<Queued> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|(_, messages)| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pop(&self, queue: &str) -> Option<Queued> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get_mut(queue)
            .and_then(|(_, messages)| messages.pop_front())
    }

    pub fn push_front(&self, queue: &str, queued: Queued) {
        if let Some((_, messages)) = self.state.lock().unwrap().queues.get_mut(queue) {
            messages.push_front(queued);
        }
    }

    /// Expire the message at the head of `queue` the way the broker does:
    /// drop its expiration and route it to the queue's dead-letter exchange
    /// with its original routing key. Returns the expiration it carried.
    pub fn expire_head(&self, queue: &str) -> Option<u32> {
        let mut state = self.state.lock().unwrap();
        let (spec, messages) = state.queues.get_mut(queue)?;
        let mut queued = messages.pop_front()?;
        let dead_letter_exchange = spec.dead_letter_exchange.clone()?;

        let ttl = queued
            .message
            .properties
            .expiration
            .take()
            .and_then(|ttl| ttl.parse().ok());

        route(&mut state, &dead_letter_exchange, &queued.routing_key, &queued.message);
        ttl
    }
}

fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

fn route(state: &mut State, exchange: &str, routing_key: &str, message: &OutgoingMessage) {
    let targets: Vec<String> = state
        .bindings
        .iter()
        .filter(|(bound_exchange, _, binding_key)| {
            bound_exchange == exchange && topic_matches(binding_key, routing_key)
        })
        .map(|(_, queue, _)| queue.clone())
        .collect();

    for queue in targets {
        if let Some((_, messages)) = state.queues.get_mut(&queue) {
            messages.push_back(Queued {
                routing_key: routing_key.to_string(),
                message: message.clone(),
            });
        }
    }
}

#[async_trait::async_trait]
impl Broker for InMemoryBroker {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn declare_exchange(&self, name: &str) -> Result<(), QueueError> {
        if !self.is_connected() {
            return Err(QueueError::Disconnected);
        }
        self.state.lock().unwrap().exchanges.insert(name.to_string());
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), QueueError> {
        if !self.is_connected() {
            return Err(QueueError::Disconnected);
        }

        let mut state = self.state.lock().unwrap();
        match state.queues.get(&spec.name) {
            Some((existing, _)) if existing != spec => Err(QueueError::QueueDeclaration {
                name: spec.name.clone(),
                reason: "PRECONDITION_FAILED - inequivalent arg 'x-dead-letter-exchange'"
                    .to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                state
                    .queues
                    .insert(spec.name.clone(), (spec.clone(), VecDeque::new()));
                Ok(())
            }
        }
    }

    async fn bind(&self, exchange: &str, queue: &str, binding_key: &str) -> Result<(), QueueError> {
        if !self.is_connected() {
            return Err(QueueError::Disconnected);
        }

        let mut state = self.state.lock().unwrap();
        if !state.exchanges.contains(exchange) || !state.queues.contains_key(queue) {
            return Err(QueueError::Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                reason: "NOT_FOUND".to_string(),
            });
        }
        state.bindings.insert((
            exchange.to_string(),
            queue.to_string(),
            binding_key.to_string(),
        ));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutgoingMessage,
    ) -> Result<(), QueueError> {
        if !self.is_connected() {
            return Err(QueueError::Disconnected);
        }

        let mut state = self.state.lock().unwrap();
        *state
            .publish_attempts
            .entry(exchange.to_string())
            .or_insert(0) += 1;

        let targeted = state
            .failing_exchange
            .as_deref()
            .map_or(true, |failing| failing == exchange);
        if state.failing_publishes > 0 && targeted {
            state.failing_publishes -= 1;
            return Err(QueueError::PublishFailed(format!(
                "simulated failure on '{}'",
                exchange
            )));
        }

        if !state.exchanges.contains(exchange) {
            return Err(QueueError::PublishFailed(format!(
                "NOT_FOUND - no exchange '{}'",
                exchange
            )));
        }

        route(&mut state, exchange, routing_key, &message);
        state.published.push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message,
        });
        Ok(())
    }
}

/// Feed every message waiting in `live_queue` to the scheduler. A delivery
/// the scheduler leaves unacknowledged goes back to the head of the queue and
/// draining stops.
pub async fn drain_live(
    broker: &InMemoryBroker,
    scheduler: &SchedulerService,
    live_queue: &str,
) -> Vec<Evaluation> {
    let mut evaluations = Vec::new();

    while let Some(queued) = broker.pop(live_queue) {
        let evaluation = scheduler.handle_delivery(&queued.message.body).await;
        let leave = evaluation.ack_action() == AckAction::Leave;
        evaluations.push(evaluation);

        if leave {
            broker.push_front(live_queue, queued);
            break;
        }
    }

    evaluations
}

#[test]
fn topic_matching() {
    assert!(topic_matches("#", "orders.created"));
    assert!(topic_matches("#", ""));
    assert!(topic_matches("orders.*", "orders.created"));
    assert!(!topic_matches("orders.*", "orders.created.eu"));
    assert!(topic_matches("orders.#", "orders.created.eu"));
    assert!(!topic_matches("invoices.#", "orders.created"));
}
