use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use conclave_types::{ErrorKind, Message, MessageContent, MessageQuery};
use tokio::sync::Mutex;

use crate::ledger::Ledger;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Debug, Clone, Copy)]
pub enum Replay {
    None,
    SinceTimestamp(i64),
}

#[derive(Clone)]
struct Subscriber {
    token: SubscriptionToken,
    topic: String,
    handler: Handler,
}

struct QueueState {
    pending: VecDeque<Message>,
    draining: bool,
    subscribers: Vec<Subscriber>,
}

/// Dispatches newly-appended messages to interested subscribers.
///
/// `append` is never gated behind dispatch: `publish` appends to the Ledger directly, then hands
/// the appended message to a small FIFO so subscribers can be notified. Whichever caller finds
/// the FIFO idle becomes its drainer and walks it to completion (synchronously invoking every
/// matching subscriber before returning, matching `publish`'s "appends, then synchronously
/// dispatches" contract for a top-level call). A subscriber that publishes again while it is
/// running just appends and enqueues — since the FIFO is already being drained by an enclosing
/// call, that call returns immediately without waiting for its own message to be delivered. The
/// active drainer picks the enqueued message up once the current subscriber returns, so recursion
/// depth never grows. Subscribing/unsubscribing only ever touch the subscriber list under a brief
/// lock and never wait on the drain loop, so they are reentrancy-safe from inside a handler too.
pub struct Bus {
    ledger: Arc<Ledger>,
    state: Mutex<QueueState>,
    next_token: AtomicU64,
    stopping: AtomicBool,
}

impl Bus {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                draining: false,
                subscribers: Vec::new(),
            }),
            next_token: AtomicU64::new(1),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Begins refusing new publishes. Jobs already queued still drain normally.
    pub fn begin_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Appends `message` to the Ledger, then dispatches it to every matching subscriber in
    /// registration order. Returns the appended message (with its assigned `id`/`timestamp`).
    pub async fn publish(&self, message: Message) -> Result<Message, ErrorKind> {
        if self.is_stopping() {
            return Err(ErrorKind::ClusterStopping);
        }
        let appended = self.ledger.append(message).await?;
        self.dispatch(appended.clone()).await;
        Ok(appended)
    }

    pub fn seed(&self, topic: impl Into<String>, content: MessageContent) -> Message {
        self.ledger.seed_message(topic, content)
    }

    /// Registers `handler` for `topic`. With `Replay::SinceTimestamp`, the subscriber is
    /// synchronously fed every matching historical message (in ledger order) before it can be
    /// delivered anything live. The historical query and the registration happen while holding
    /// the same lock a concurrent `publish` needs to enqueue a new message for dispatch, so no
    /// message is ever duplicated or skipped across the replay/live boundary.
    pub async fn subscribe(&self, topic: impl Into<String>, replay: Replay, handler: Handler) -> SubscriptionToken {
        let topic = topic.into();
        let (token, historical) = {
            let mut state = self.state.lock().await;
            let historical = match replay {
                Replay::SinceTimestamp(since) => {
                    self.ledger
                        .query(&MessageQuery { topic: Some(topic.clone()), since: Some(since), ..Default::default() })
                        .await
                }
                Replay::None => Vec::new(),
            };
            let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::SeqCst));
            state.subscribers.push(Subscriber { token, topic, handler: handler.clone() });
            (token, historical)
        };
        for message in historical {
            handler(message).await;
        }
        token
    }

    pub async fn unsubscribe(&self, token: SubscriptionToken) {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|s| s.token != token);
    }

    /// Enqueues `message` for delivery. Becomes the drainer (and walks the FIFO to completion)
    /// if nothing else is already draining; otherwise just enqueues and returns immediately,
    /// leaving delivery to the call that is already draining.
    async fn dispatch(&self, message: Message) {
        let became_drainer = {
            let mut state = self.state.lock().await;
            state.pending.push_back(message);
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };
        if !became_drainer {
            return;
        }
        loop {
            let next = {
                let mut state = self.state.lock().await;
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };
            match next {
                Some(message) => self.deliver(message).await,
                None => break,
            }
        }
    }

    async fn deliver(&self, message: Message) {
        let subscribers = {
            let state = self.state.lock().await;
            state.subscribers.clone()
        };
        for subscriber in subscribers.iter().filter(|s| s.topic == message.topic) {
            (subscriber.handler)(message.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn bus() -> Bus {
        Bus::new(Arc::new(Ledger::new("c-1")))
    }

    fn recording_handler() -> (Handler, Arc<StdMutex<Vec<String>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let recorded = seen.clone();
        let handler: Handler = Arc::new(move |message: Message| {
            let recorded = recorded.clone();
            Box::pin(async move {
                recorded.lock().unwrap().push(message.topic);
            })
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn subscriber_receives_messages_in_ledger_order() {
        let bus = bus();
        let (handler, seen) = recording_handler();
        bus.subscribe("A", Replay::None, handler).await;

        bus.publish(bus.seed("A", MessageContent::text("1"))).await.unwrap();
        bus.publish(bus.seed("B", MessageContent::text("2"))).await.unwrap();
        bus.publish(bus.seed("A", MessageContent::text("3"))).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["A".to_string(), "A".to_string()]);
    }

    #[tokio::test]
    async fn replay_and_live_delivery_never_duplicate() {
        let bus = bus();
        bus.publish(bus.seed("A", MessageContent::text("1"))).await.unwrap();
        bus.publish(bus.seed("A", MessageContent::text("2"))).await.unwrap();

        let (handler, seen) = recording_handler();
        bus.subscribe("A", Replay::SinceTimestamp(0), handler).await;
        bus.publish(bus.seed("A", MessageContent::text("3"))).await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reentrant_publish_from_a_handler_does_not_deadlock() {
        let bus = Arc::new(bus());
        let inner_bus = bus.clone();
        let handler: Handler = Arc::new(move |message: Message| {
            let inner_bus = inner_bus.clone();
            Box::pin(async move {
                if message.topic == "A" {
                    let _ = inner_bus
                        .publish(inner_bus.seed("B", MessageContent::text("chained")))
                        .await;
                }
            })
        });
        bus.subscribe("A", Replay::None, handler).await;

        let (recorder, seen) = recording_handler();
        bus.subscribe("B", Replay::None, recorder).await;

        bus.publish(bus.seed("A", MessageContent::text("go"))).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn reentrant_subscribe_from_a_handler_does_not_deadlock() {
        let bus = Arc::new(bus());
        let inner_bus = bus.clone();
        let (recorder, seen) = recording_handler();
        let recorder_for_subscribe = recorder.clone();
        let handler: Handler = Arc::new(move |message: Message| {
            let inner_bus = inner_bus.clone();
            let recorder = recorder_for_subscribe.clone();
            Box::pin(async move {
                if message.topic == "A" {
                    inner_bus.subscribe("B", Replay::None, recorder).await;
                }
            })
        });
        bus.subscribe("A", Replay::None, handler).await;

        bus.publish(bus.seed("A", MessageContent::text("go"))).await.unwrap();
        bus.publish(bus.seed("B", MessageContent::text("now seen"))).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn publish_after_stopping_is_rejected() {
        let bus = bus();
        bus.begin_stopping();
        let result = bus.publish(bus.seed("A", MessageContent::default())).await;
        assert_eq!(result, Err(ErrorKind::ClusterStopping));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = bus();
        let (handler, _seen) = recording_handler();
        let token = bus.subscribe("A", Replay::None, handler).await;
        bus.unsubscribe(token).await;
        bus.unsubscribe(token).await;
    }
}
