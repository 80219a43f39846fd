use std::collections::HashMap;

use conclave_types::{ErrorKind, Message, MessageContent, MessageQuery};
use tokio::sync::RwLock;

struct LedgerState {
    messages: Vec<Message>,
    by_topic: HashMap<String, Vec<usize>>,
    last_id: u64,
    last_timestamp: i64,
    closed: bool,
}

impl LedgerState {
    fn empty() -> Self {
        Self {
            messages: Vec::new(),
            by_topic: HashMap::new(),
            last_id: 0,
            last_timestamp: 0,
            closed: false,
        }
    }

    fn index(&mut self, position: usize) {
        let topic = self.messages[position].topic.clone();
        self.by_topic.entry(topic).or_default().push(position);
    }
}

/// Durable, queryable record of every message for one cluster. `append` is the only mutator;
/// every other operation is a read over a consistent snapshot.
pub struct Ledger {
    cluster_id: String,
    state: RwLock<LedgerState>,
}

impl Ledger {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            state: RwLock::new(LedgerState::empty()),
        }
    }

    /// Rebuilds a ledger from a persisted byte-stream of messages in original order. `id`
    /// assignment and indices come out identical to a fresh sequence of `append` calls, since
    /// the messages already carry their id/timestamp.
    pub fn restore(cluster_id: impl Into<String>, messages: Vec<Message>) -> Self {
        let mut state = LedgerState::empty();
        for message in messages {
            state.last_id = state.last_id.max(message.id);
            state.last_timestamp = state.last_timestamp.max(message.timestamp);
            state.messages.push(message);
            let position = state.messages.len() - 1;
            state.index(position);
        }
        Self {
            cluster_id: cluster_id.into(),
            state: RwLock::new(state),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Assigns `id = last_id + 1`, stamps `timestamp` if absent (never earlier than the
    /// previous message's timestamp), and indexes the message. Fails with `LedgerClosed` once
    /// the cluster has started shutting down.
    pub async fn append(&self, mut message: Message) -> Result<Message, ErrorKind> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(ErrorKind::LedgerClosed);
        }
        state.last_id += 1;
        message.id = state.last_id;
        message.cluster_id = self.cluster_id.clone();
        if message.timestamp == 0 {
            message.timestamp = now_ms();
        }
        message.timestamp = message.timestamp.max(state.last_timestamp);
        state.last_timestamp = message.timestamp;
        state.messages.push(message.clone());
        let position = state.messages.len() - 1;
        state.index(position);
        Ok(message)
    }

    pub async fn close(&self) {
        self.state.write().await.closed = true;
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// Returns a snapshot slice matching `query`, sorted by `(timestamp, id)` ascending, keeping
    /// only the most recent `limit` entries when set.
    pub async fn query(&self, query: &MessageQuery) -> Vec<Message> {
        let state = self.state.read().await;
        let mut matched: Vec<Message> = match &query.topic {
            Some(topic) => state
                .by_topic
                .get(topic)
                .into_iter()
                .flatten()
                .filter_map(|&position| state.messages.get(position))
                .filter(|message| query.matches(message))
                .cloned()
                .collect(),
            None => state
                .messages
                .iter()
                .filter(|message| query.matches(message))
                .cloned()
                .collect(),
        };
        matched.sort_by_key(|m| (m.timestamp, m.id));
        if let Some(limit) = query.limit {
            let start = matched.len().saturating_sub(limit);
            matched = matched.split_off(start);
        }
        matched
    }

    /// Returns the highest-id message matching `topic`, if any.
    pub async fn find_last(&self, topic: &str) -> Option<Message> {
        let state = self.state.read().await;
        let positions = state.by_topic.get(topic)?;
        positions
            .iter()
            .filter_map(|&position| state.messages.get(position))
            .max_by_key(|message| message.id)
            .cloned()
    }

    pub async fn count(&self, topic: Option<&str>) -> usize {
        let state = self.state.read().await;
        match topic {
            Some(topic) => state.by_topic.get(topic).map(Vec::len).unwrap_or(0),
            None => state.messages.len(),
        }
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.state.read().await.messages.clone()
    }

    pub async fn created_at(&self) -> Option<i64> {
        self.state.read().await.messages.first().map(|m| m.timestamp)
    }

    /// Builds a seed message addressed to this ledger's cluster, ready for `append`.
    pub fn seed_message(&self, topic: impl Into<String>, content: MessageContent) -> Message {
        Message::seed(self.cluster_id.clone(), topic, content)
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_strictly_increasing_ids() {
        let ledger = Ledger::new("c-1");
        let a = ledger.append(ledger.seed_message("A", MessageContent::text("a"))).await.unwrap();
        let b = ledger.append(ledger.seed_message("B", MessageContent::text("b"))).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn query_filters_by_topic_and_sorts_by_timestamp_then_id() {
        let ledger = Ledger::new("c-1");
        ledger.append(ledger.seed_message("A", MessageContent::text("1"))).await.unwrap();
        ledger.append(ledger.seed_message("B", MessageContent::text("2"))).await.unwrap();
        ledger.append(ledger.seed_message("A", MessageContent::text("3"))).await.unwrap();

        let results = ledger.query(&MessageQuery::topic("A")).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].id < results[1].id);
    }

    #[tokio::test]
    async fn query_limit_keeps_most_recent_n() {
        let ledger = Ledger::new("c-1");
        for i in 0..5 {
            ledger
                .append(ledger.seed_message("A", MessageContent::text(i.to_string())))
                .await
                .unwrap();
        }
        let results = ledger
            .query(&MessageQuery {
                limit: Some(2),
                ..Default::default()
            })
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].id, 5);
    }

    #[tokio::test]
    async fn append_fails_once_closed() {
        let ledger = Ledger::new("c-1");
        ledger.close().await;
        let result = ledger.append(ledger.seed_message("A", MessageContent::default())).await;
        assert_eq!(result, Err(ErrorKind::LedgerClosed));
    }

    #[tokio::test]
    async fn find_last_returns_highest_id() {
        let ledger = Ledger::new("c-1");
        ledger.append(ledger.seed_message("A", MessageContent::text("1"))).await.unwrap();
        let second = ledger.append(ledger.seed_message("A", MessageContent::text("2"))).await.unwrap();
        assert_eq!(ledger.find_last("A").await, Some(second));
    }

    #[tokio::test]
    async fn restore_reproduces_identical_ids_and_indices() {
        let ledger = Ledger::new("c-1");
        ledger.append(ledger.seed_message("A", MessageContent::text("1"))).await.unwrap();
        ledger.append(ledger.seed_message("B", MessageContent::text("2"))).await.unwrap();
        let dumped = ledger.snapshot().await;

        let restored = Ledger::restore("c-1", dumped.clone());
        assert_eq!(restored.snapshot().await, dumped);
        assert_eq!(restored.count(Some("A")).await, 1);
    }
}
