//! Drives one agent's ten-step trigger pipeline (guard, predicate, iteration cap, config
//! resolution, context assembly, execute, parse, hook, retry, drain), bounding total concurrent
//! executions across all agents to `maxParallel`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use conclave_hooks::{evaluate_predicate, fire, FireContext};
use conclave_ledger::bus::{Bus, Handler, Replay};
use conclave_runner::{RunOptions, RunOutcome, TaskRunner};
use conclave_types::{topics, AgentConfig, AgentRunState, Message, MessageContent, Settings, TriggerAction};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::context::assemble_context;
use crate::decision::{exceeds_iteration_cap, resolve_model, resolve_prompt};
use crate::types::AgentRuntime;

const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(30);

pub struct AgentScheduler<R> {
    cluster_id: String,
    bus: Arc<Bus>,
    runner: Arc<R>,
    settings: Settings,
    max_parallel: Arc<Semaphore>,
    runtimes: RwLock<HashMap<String, Arc<Mutex<AgentRuntime>>>>,
}

impl<R: TaskRunner + 'static> AgentScheduler<R> {
    pub fn new(cluster_id: impl Into<String>, bus: Arc<Bus>, runner: Arc<R>, settings: Settings, max_parallel: usize) -> Arc<Self> {
        Arc::new(Self {
            cluster_id: cluster_id.into(),
            bus,
            runner,
            settings,
            max_parallel: Arc::new(Semaphore::new(max_parallel.max(1))),
            runtimes: RwLock::new(HashMap::new()),
        })
    }

    /// Subscribes `agent` to the bus for each of its triggers. Idempotent on the runtime-state
    /// side: calling it again for an already-known agent id reuses the existing runtime.
    pub async fn subscribe_agent(self: &Arc<Self>, agent: Arc<AgentConfig>) {
        self.runtimes
            .write()
            .unwrap()
            .entry(agent.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AgentRuntime::new())));

        for trigger_index in 0..agent.triggers.len() {
            let scheduler = self.clone();
            let agent = agent.clone();
            let topic = agent.triggers[trigger_index].topic.clone();
            let handler: Handler = Arc::new(move |message: Message| {
                let scheduler = scheduler.clone();
                let agent = agent.clone();
                Box::pin(async move {
                    scheduler.on_message(agent, trigger_index, message).await;
                })
            });
            self.bus.subscribe(topic, Replay::None, handler).await;
        }
    }

    fn runtime_for(&self, agent_id: &str) -> Option<Arc<Mutex<AgentRuntime>>> {
        self.runtimes.read().unwrap().get(agent_id).cloned()
    }

    async fn on_message(self: Arc<Self>, agent: Arc<AgentConfig>, trigger_index: usize, message: Message) {
        let Some(runtime) = self.runtime_for(&agent.id) else { return };

        // Step 1: guard.
        {
            let mut state = runtime.lock().await;
            if state.state == AgentRunState::Running {
                state.pending.push_back((trigger_index, message));
                return;
            }
            state.state = AgentRunState::Running;
        }

        self.drive(agent, runtime, trigger_index, message).await;
    }

    /// Runs steps 2-9 for `(trigger_index, message)`, then drains the pending queue (step 10),
    /// looping rather than recursing so a long backlog does not grow the call stack.
    async fn drive(self: Arc<Self>, agent: Arc<AgentConfig>, runtime: Arc<Mutex<AgentRuntime>>, mut trigger_index: usize, mut message: Message) {
        loop {
            self.drive_once(&agent, &runtime, trigger_index, &message).await;

            let next = runtime.lock().await.pending.pop_front();
            match next {
                Some((index, next_message)) => {
                    trigger_index = index;
                    message = next_message;
                }
                None => {
                    runtime.lock().await.state = AgentRunState::Idle;
                    return;
                }
            }
        }
    }

    async fn drive_once(&self, agent: &Arc<AgentConfig>, runtime: &Arc<Mutex<AgentRuntime>>, trigger_index: usize, message: &Message) {
        let trigger = &agent.triggers[trigger_index];

        // Step 2: predicate.
        if let Some(logic) = &trigger.logic {
            let iteration = runtime.lock().await.iteration;
            let predicate_ctx = FireContext {
                agent_id: &agent.id,
                cluster_id: &self.cluster_id,
                iteration,
                triggering_message: Some(message),
                result: None,
            };
            if !evaluate_predicate(&logic.script, &predicate_ctx).await {
                return;
            }
        }

        if trigger.action == TriggerAction::StopCluster {
            let _ = self
                .bus
                .publish(self.bus.seed(topics::CLUSTER_COMPLETE, MessageContent::data(json!({"agentId": agent.id}))))
                .await;
            return;
        }

        // Step 3: iteration cap.
        let tentative_iteration = runtime.lock().await.iteration + 1;
        if exceeds_iteration_cap(agent, tentative_iteration) {
            let _ = self
                .bus
                .publish(self.bus.seed(topics::AGENT_MAX_ITERATIONS, MessageContent::data(json!({"agentId": agent.id}))))
                .await;
            return;
        }

        // Step 4: resolve configuration.
        let model = resolve_model(agent, tentative_iteration);
        if let Some(level) = model {
            if let Err(reason) = self.settings.check_model_ceiling(level) {
                tracing::warn!(agent = %agent.id, %reason, "resolved model level is outside the configured bounds");
            }
        }
        let prompt = resolve_prompt(agent, tentative_iteration).unwrap_or_default();

        // Step 5: context assembly.
        let created_at = self.bus.ledger().created_at().await.unwrap_or(0);
        let context = assemble_context(self.bus.ledger(), agent, &prompt, message, created_at).await;

        // Step 6: execute, with a bounded number of concurrent runs across the whole scheduler.
        let _permit = self.max_parallel.acquire().await.expect("semaphore never closed");
        let _ = self
            .bus
            .publish(Message::from_agent(self.cluster_id.clone(), agent.id.clone(), topics::AGENT_STARTED, MessageContent::data(json!({"iteration": tentative_iteration}))))
            .await;

        let outcome = self.execute_with_retries(agent, &context, model).await;

        runtime.lock().await.iteration = tentative_iteration;
        drop(_permit);

        // Step 7-8: parse result, fire the matching hook.
        self.finish(agent, trigger, message, outcome).await;
    }

    async fn execute_with_retries(&self, agent: &AgentConfig, context: &str, model: Option<conclave_types::ModelLevel>) -> RunOutcome {
        let model_label = model.map(|level| format!("{level:?}")).unwrap_or_else(|| "default".to_string());
        let mut attempt = 0_u32;
        let mut sigterm_retry_spent = false;
        loop {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let sink: Arc<dyn Fn(&str) + Send + Sync> = {
                let tx = tx.clone();
                Arc::new(move |line: &str| {
                    let _ = tx.send(line.to_string());
                })
            };
            let bus = self.bus.clone();
            let cluster_id = self.cluster_id.clone();
            let agent_id = agent.id.clone();
            let stream_task = tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    let _ = bus.publish(Message::from_agent(cluster_id.clone(), agent_id.clone(), topics::AGENT_OUTPUT, MessageContent::text(line))).await;
                }
            });

            let mut options = RunOptions::new(agent.id.as_str(), model_label.as_str(), agent.output_format);
            options.json_schema = agent.json_schema.clone();
            options.timeout = Duration::from_millis(agent.timeout_ms);
            options.enable_liveness_check = agent.enable_liveness_check;
            options.on_output = Some(sink);

            let outcome = self.runner.run(context, options).await;
            drop(tx);
            let _ = stream_task.await;

            if outcome.success {
                return outcome;
            }
            if outcome.error_type == Some(conclave_runner::RunErrorType::RateLimit) {
                if let Some(delay) = outcome.retry_after {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            let killed_by_sigterm = outcome.error.as_deref() == Some("Task killed");
            let allowance = if killed_by_sigterm && !sigterm_retry_spent {
                agent.max_retries.max(1)
            } else {
                agent.max_retries
            };
            if killed_by_sigterm {
                sigterm_retry_spent = true;
            }
            if attempt >= allowance {
                return outcome;
            }
            let backoff = RETRY_BASE.saturating_mul(1 << attempt.min(6)).min(RETRY_CAP);
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn finish(&self, agent: &AgentConfig, trigger: &conclave_types::Trigger, triggering_message: &Message, outcome: RunOutcome) {
        if outcome.success {
            let mut parsed = conclave_extractor::extract(&outcome.output);
            if let Some(value) = parsed.as_mut() {
                if let Some(schema) = &agent.json_schema {
                    match conclave_extractor::validate_against_schema(value, schema, agent.is_validator()) {
                        Ok(issues) if !issues.is_empty() => {
                            let _ = self
                                .bus
                                .publish(self.bus.seed(topics::AGENT_SCHEMA_WARNING, MessageContent::data(json!({"agentId": agent.id, "issues": issues.iter().map(|i| i.message.clone()).collect::<Vec<_>>()}))))
                                .await;
                        }
                        Ok(_) => {}
                        Err(_) => {
                            self.publish_error(agent, "structured output failed schema validation").await;
                            return;
                        }
                    }
                }
            }

            let fire_ctx = FireContext {
                agent_id: &agent.id,
                cluster_id: &self.cluster_id,
                iteration: 0,
                triggering_message: Some(triggering_message),
                result: parsed.as_ref(),
            };
            if let Some(hook) = &trigger.on_complete {
                if let Some(published) = fire(hook, &fire_ctx).await {
                    let _ = self.bus.publish(published).await;
                }
            }
            if let Some(hook) = &agent.hooks.on_complete {
                if let Some(published) = fire(hook, &fire_ctx).await {
                    let _ = self.bus.publish(published).await;
                }
            }
        } else {
            let error_text = outcome.error.clone().unwrap_or_else(|| "task failed with no captured reason".to_string());
            let result: Value = json!({"error": error_text});
            let fire_ctx = FireContext {
                agent_id: &agent.id,
                cluster_id: &self.cluster_id,
                iteration: 0,
                triggering_message: Some(triggering_message),
                result: Some(&result),
            };
            match &agent.hooks.on_error {
                Some(hook) => {
                    if let Some(published) = fire(hook, &fire_ctx).await {
                        let _ = self.bus.publish(published).await;
                    }
                }
                None => self.publish_error(agent, &error_text).await,
            }
        }
    }

    async fn publish_error(&self, agent: &AgentConfig, reason: &str) {
        let _ = self
            .bus
            .publish(Message::from_agent(self.cluster_id.clone(), agent.id.clone(), topics::AGENT_ERROR, MessageContent::data(json!({"error": reason}))))
            .await;
    }
}
