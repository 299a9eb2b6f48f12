//! Staged task execution.
//!
//! A run starts from one environment. Each stage crosses the live
//! environments with its actions, sends every pairing through the worker
//! pool, waits for all of them, and forks the live set by whatever the
//! pairings discovered. A stage that discovers nothing either halts the run
//! or, when it proceeds anyway, leaves a single empty environment behind.

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use fanfetch_types::{Env, StageSpec, TaskSpec, dedup_envs};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::{
    action::Action,
    error::TaskError,
    finalizer::{FinalizerRegistry, TaskFinalizer},
    pool::{UnitResult, WorkUnit, WorkerPool},
    reader::{PluginRegistry, ResponseReader},
};

pub struct TaskExecutor {
    spec: TaskSpec,
    pool: Arc<WorkerPool>,
    reader: Arc<dyn ResponseReader>,
    /// Chain built from the spec's plugins; closed once after the first run.
    owned_chain: Option<Arc<dyn ResponseReader>>,
    finalizer: Option<Box<dyn TaskFinalizer>>,
}

impl TaskExecutor {
    /// Prepares a run of `spec`.
    ///
    /// An injected `reader` is used as-is and never closed here; otherwise a
    /// chain is built from `spec.plugins` and closed when the run ends.
    pub fn new(
        spec: TaskSpec,
        pool: Arc<WorkerPool>,
        reader: Option<Arc<dyn ResponseReader>>,
        plugins: &PluginRegistry,
        finalizers: &FinalizerRegistry,
    ) -> Result<Self, TaskError> {
        let finalizer = finalizers.build_chain(&spec.finalizers)?;
        let (reader, owned_chain) = match reader {
            Some(reader) => (reader, None),
            None => {
                let chain = plugins.build_chain(&spec.plugins)?;
                (chain.clone(), Some(chain))
            }
        };
        Ok(Self {
            spec,
            pool,
            reader,
            owned_chain,
            finalizer,
        })
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn into_spec(self) -> TaskSpec {
        self.spec
    }

    /// Runs every stage and returns the surviving environments. Per-unit
    /// failures, finalizer failures and close failures go to `errors`.
    pub async fn execute(&mut self, errors: UnboundedSender<TaskError>) -> Vec<Env> {
        let mut envs = vec![self.spec.initial_env()];
        info!(stages = self.spec.stages.len(), workers = self.pool.size(), "task started");

        for (index, stage) in self.spec.stages.iter().enumerate() {
            if stage.skip || stage.actions.is_empty() {
                debug!(stage = index, skip = stage.skip, "stage skipped");
                continue;
            }
            if stage.debug {
                info!(stage = index, envs = ?envs, "entering stage");
            }

            let forks = self.run_stage(index, stage, &envs, &errors).await;
            info!(stage = index, entering = envs.len(), forks = forks.len(), "stage finished");

            if !forks.is_empty() {
                envs = forks;
            } else if stage.proceed_when_no_update {
                envs = vec![Env::empty()];
            } else {
                info!(stage = index, "stage produced no updates, stopping");
                break;
            }
        }

        if let Some(chain) = self.owned_chain.take()
            && let Err(error) = chain.close()
        {
            warn!(error = %error, "closing plugin chain failed");
            let _ = errors.send(TaskError::Close(error));
        }

        if let Some(finalizer) = &self.finalizer
            && let Err(error) = finalizer.finalize(&mut self.spec, envs.clone())
        {
            warn!(error = %error, "finalizer failed");
            let _ = errors.send(TaskError::Finalizer(error));
        }

        info!(envs = envs.len(), "task finished");
        envs
    }

    async fn run_stage(&self, index: usize, stage: &StageSpec, envs: &[Env], errors: &UnboundedSender<TaskError>) -> Vec<Env> {
        let action_count = stage.actions.len();
        let expected = envs.len() * action_count;
        let (results, received) = mpsc::unbounded_channel();
        let reaper = tokio::spawn(reap(received, expected, errors.clone()));

        for (env_index, env) in envs.iter().enumerate() {
            for (action_index, action_spec) in stage.actions.iter().enumerate() {
                let slot = env_index * action_count + action_index;
                let action = match Action::compile(action_spec, self.reader.clone()) {
                    Ok(action) => Arc::new(action),
                    Err(source) => {
                        let _ = results.send(UnitResult::failed(
                            slot,
                            TaskError::InvalidAction {
                                tag: action_spec.tag.clone(),
                                source,
                            },
                        ));
                        continue;
                    }
                };
                let unit = WorkUnit {
                    slot,
                    action,
                    env: env.clone(),
                    results: results.clone(),
                };
                if let Err(source) = self.pool.submit(unit).await {
                    let _ = results.send(UnitResult::failed(
                        slot,
                        TaskError::Pool {
                            tag: action_spec.tag.clone(),
                            source,
                        },
                    ));
                }
            }
        }
        drop(results);

        match reaper.await {
            Ok(slots) => dedup_envs(slots.into_iter().flatten().collect()),
            Err(error) => {
                warn!(stage = index, error = %error, "stage reaper failed");
                Vec::new()
            }
        }
    }
}

/// Collects exactly `expected` results and returns each slot's forks in
/// slot order.
async fn reap(mut received: UnboundedReceiver<UnitResult>, expected: usize, errors: UnboundedSender<TaskError>) -> Vec<Vec<Env>> {
    let mut slots = vec![Vec::new(); expected];
    for _ in 0..expected {
        let Some(result) = received.recv().await else {
            warn!(expected, "result channel closed before every unit reported");
            break;
        };
        match result.outcome {
            Ok(forks) => {
                if let Some(slot) = slots.get_mut(result.slot) {
                    *slot = forks;
                }
            }
            Err(error) => {
                warn!(slot = result.slot, error = %error, "work unit failed");
                let _ = errors.send(error);
            }
        }
    }
    slots
}

/// Everything a run produced.
#[derive(Debug)]
pub struct TaskOutcome {
    pub envs: Vec<Env>,
    pub errors: Vec<TaskError>,
    /// The spec after finalizers ran, when the executor could be built.
    pub spec: Option<TaskSpec>,
}

/// Serializable view of a [`TaskOutcome`].
#[derive(Debug, Serialize)]
pub struct TaskReport {
    pub errors: Vec<String>,
    pub envs: Vec<Env>,
}

impl TaskOutcome {
    pub fn report(&self) -> TaskReport {
        TaskReport {
            errors: self.errors.iter().map(ToString::to_string).collect(),
            envs: self.envs.clone(),
        }
    }
}

/// Builds an executor for `spec`, runs it, and gathers the error sink
/// alongside the result.
pub async fn run_task(
    spec: TaskSpec,
    pool: Arc<WorkerPool>,
    reader: Option<Arc<dyn ResponseReader>>,
    plugins: &PluginRegistry,
    finalizers: &FinalizerRegistry,
) -> TaskOutcome {
    let (errors, mut received) = mpsc::unbounded_channel();
    let collector = tokio::spawn(async move {
        let mut collected = Vec::new();
        while let Some(error) = received.recv().await {
            collected.push(error);
        }
        collected
    });

    let (envs, spec) = match TaskExecutor::new(spec, pool, reader, plugins, finalizers) {
        Ok(mut executor) => {
            let envs = executor.execute(errors).await;
            (envs, Some(executor.into_spec()))
        }
        Err(error) => {
            warn!(error = %error, "task could not be prepared");
            let _ = errors.send(error);
            drop(errors);
            (Vec::new(), None)
        }
    };

    let errors = match collector.await {
        Ok(errors) => errors,
        Err(error) => {
            warn!(error = %error, "error collector failed");
            Vec::new()
        }
    };
    TaskOutcome { envs, errors, spec }
}

/// Loads a task from JSON, or YAML when the extension is `.yaml`/`.yml`.
pub fn load_task_file(path: &Path) -> Result<TaskSpec> {
    let content = fs::read_to_string(path).with_context(|| format!("read task file {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
    if is_yaml {
        serde_yaml::from_str(&content).with_context(|| format!("parse YAML task {}", path.display()))
    } else {
        serde_json::from_str(&content).with_context(|| format!("parse JSON task {}", path.display()))
    }
}
