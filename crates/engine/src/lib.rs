//! # Fanfetch Engine
//!
//! Runs staged HTTP fan-out tasks. A task is a list of stages; every stage
//! issues its actions against every live environment, and the bindings the
//! actions extract from responses fork those environments for the next stage.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fanfetch_engine::{FinalizerRegistry, PluginRegistry, WorkerPool, load_task_file, run_task};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let spec = load_task_file(std::path::Path::new("task.json"))?;
//! let pool = WorkerPool::start(8);
//! let outcome = run_task(spec, pool.clone(), None, &PluginRegistry::with_builtins(), &FinalizerRegistry::with_builtins()).await;
//! for env in &outcome.envs {
//!     println!("{env:?}");
//! }
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`template`**: `{{ .name }}` placeholder templates
//! - **`action`**: compiled actions and response matching
//! - **`reader`**: the response-reader trait, built-in plugins and chain assembly
//! - **`finalizer`**: post-run finalizer chain
//! - **`pool`**: the worker pool
//! - **`task`**: stage execution
//! - **`config`**: engine configuration

pub mod action;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod pool;
pub mod reader;
pub mod task;
pub mod template;

pub use action::Action;
pub use config::{EngineConfig, load_config};
pub use error::{ActionError, ChainError, FinalizerError, PoolError, ReaderError, TaskError};
pub use fanfetch_types::{ActionSpec, Env, FinalizerSpec, PluginSpec, Request, Response, StageSpec, TaskSpec};
pub use finalizer::{FinalizerFactory, FinalizerRegistry, TaskFinalizer};
pub use pool::{WorkUnit, WorkerPool};
pub use reader::{PluginFactory, PluginRegistry, ResponseReader};
pub use task::{TaskExecutor, TaskOutcome, TaskReport, load_task_file, run_task};
pub use template::{Template, TemplateError};
