//! Post-run finalizers.
//!
//! Finalizers see the task spec and the final environments once every stage
//! has run. Like plugins, they form a chain folded right to left from a list
//! of [`FinalizerSpec`]s; each one may transform the environments before
//! handing them to the next.

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::Write,
    sync::{Arc, Mutex},
};

use fanfetch_types::{Env, FinalizerSpec, TaskSpec};
use fanfetch_util::{expand_tilde, parse_bool};
use indexmap::IndexMap;
use tracing::debug;

use crate::error::FinalizerError;

pub type FinalizerParams = IndexMap<String, String>;

pub trait TaskFinalizer: Send + Sync {
    fn finalize(&self, spec: &mut TaskSpec, envs: Vec<Env>) -> Result<(), FinalizerError>;
}

pub trait FinalizerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, params: &FinalizerParams, rest: Option<Box<dyn TaskFinalizer>>) -> Result<Box<dyn TaskFinalizer>, FinalizerError>;
}

#[derive(Clone, Default)]
pub struct FinalizerRegistry {
    factories: HashMap<String, Arc<dyn FinalizerFactory>>,
}

impl FinalizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `merge`, `replace-init-env` and `write-spec`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MergeFactory));
        registry.register(Arc::new(ReplaceInitEnvFactory));
        registry.register(Arc::new(WriteSpecFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn FinalizerFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    /// Builds the chain for `specs`; `None` when the list is empty.
    pub fn build_chain(&self, specs: &[FinalizerSpec]) -> Result<Option<Box<dyn TaskFinalizer>>, FinalizerError> {
        let mut rest: Option<Box<dyn TaskFinalizer>> = None;
        for spec in specs.iter().rev() {
            let factory = self
                .factories
                .get(&spec.name)
                .ok_or_else(|| FinalizerError::UnknownFinalizer { name: spec.name.clone() })?;
            debug!(finalizer = %spec.name, params = ?spec.params, "building finalizer");
            rest = Some(factory.build(&spec.params, rest)?);
        }
        Ok(rest)
    }
}

fn pass_on(rest: &Option<Box<dyn TaskFinalizer>>, spec: &mut TaskSpec, envs: Vec<Env>) -> Result<(), FinalizerError> {
    match rest {
        Some(next) => next.finalize(spec, envs),
        None => Ok(()),
    }
}

/// Collapses all environments into one holding `keys`.
///
/// Every environment that has a key must agree on its value. Keys absent
/// from every environment are left out.
pub struct Merge {
    keys: Vec<String>,
    rest: Option<Box<dyn TaskFinalizer>>,
}

impl Merge {
    pub fn new(keys: Vec<String>, rest: Option<Box<dyn TaskFinalizer>>) -> Self {
        Self { keys, rest }
    }

    pub fn merge(&self, envs: &[Env]) -> Result<Env, FinalizerError> {
        let mut merged = Env::empty();
        for key in &self.keys {
            let mut agreed: Option<&str> = None;
            for value in envs.iter().filter_map(|env| env.get(key)) {
                match agreed {
                    Some(first) if first != value => {
                        return Err(FinalizerError::Conflict {
                            key: key.clone(),
                            first: first.to_string(),
                            second: value.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => agreed = Some(value),
                }
            }
            if let Some(value) = agreed {
                merged = merged.with(key.clone(), value);
            }
        }
        Ok(merged)
    }
}

impl TaskFinalizer for Merge {
    fn finalize(&self, spec: &mut TaskSpec, envs: Vec<Env>) -> Result<(), FinalizerError> {
        let merged = self.merge(&envs)?;
        pass_on(&self.rest, spec, vec![merged])
    }
}

/// Writes the single remaining environment back as the task's initial one.
pub struct ReplaceInitEnv {
    rest: Option<Box<dyn TaskFinalizer>>,
}

impl ReplaceInitEnv {
    pub fn new(rest: Option<Box<dyn TaskFinalizer>>) -> Self {
        Self { rest }
    }
}

impl TaskFinalizer for ReplaceInitEnv {
    fn finalize(&self, spec: &mut TaskSpec, envs: Vec<Env>) -> Result<(), FinalizerError> {
        if envs.len() != 1 {
            return Err(FinalizerError::EnvironmentCount {
                finalizer: REPLACE_INIT_ENV.into(),
                expected: 1,
                actual: envs.len(),
            });
        }
        spec.init_env = envs.first().cloned();
        pass_on(&self.rest, spec, envs)
    }
}

/// Serializes the task spec as JSON to a sink.
pub struct SpecWriter {
    sink: Mutex<Box<dyn Write + Send>>,
    pretty: bool,
    rest: Option<Box<dyn TaskFinalizer>>,
}

impl SpecWriter {
    pub fn new(sink: Box<dyn Write + Send>, pretty: bool, rest: Option<Box<dyn TaskFinalizer>>) -> Self {
        Self {
            sink: Mutex::new(sink),
            pretty,
            rest,
        }
    }
}

impl TaskFinalizer for SpecWriter {
    fn finalize(&self, spec: &mut TaskSpec, envs: Vec<Env>) -> Result<(), FinalizerError> {
        let mut document = if self.pretty {
            serde_json::to_vec_pretty(spec)?
        } else {
            serde_json::to_vec(spec)?
        };
        document.push(b'\n');
        {
            let mut sink = self
                .sink
                .lock()
                .map_err(|_| FinalizerError::Write(std::io::Error::other("spec sink lock poisoned")))?;
            sink.write_all(&document).map_err(FinalizerError::Write)?;
            sink.flush().map_err(FinalizerError::Write)?;
        }
        pass_on(&self.rest, spec, envs)
    }
}

pub const MERGE: &str = "merge";
pub const REPLACE_INIT_ENV: &str = "replace-init-env";
pub const WRITE_SPEC: &str = "write-spec";

struct MergeFactory;

impl FinalizerFactory for MergeFactory {
    fn name(&self) -> &str {
        MERGE
    }

    fn build(&self, params: &FinalizerParams, rest: Option<Box<dyn TaskFinalizer>>) -> Result<Box<dyn TaskFinalizer>, FinalizerError> {
        let keys: Vec<String> = params
            .get("keys")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if keys.is_empty() {
            return Err(FinalizerError::invalid_parameter(MERGE, "parameter 'keys' is required"));
        }
        Ok(Box::new(Merge::new(keys, rest)))
    }
}

struct ReplaceInitEnvFactory;

impl FinalizerFactory for ReplaceInitEnvFactory {
    fn name(&self) -> &str {
        REPLACE_INIT_ENV
    }

    fn build(&self, _params: &FinalizerParams, rest: Option<Box<dyn TaskFinalizer>>) -> Result<Box<dyn TaskFinalizer>, FinalizerError> {
        Ok(Box::new(ReplaceInitEnv::new(rest)))
    }
}

struct WriteSpecFactory;

impl FinalizerFactory for WriteSpecFactory {
    fn name(&self) -> &str {
        WRITE_SPEC
    }

    fn build(&self, params: &FinalizerParams, rest: Option<Box<dyn TaskFinalizer>>) -> Result<Box<dyn TaskFinalizer>, FinalizerError> {
        let path = params
            .get("file")
            .filter(|path| !path.is_empty())
            .ok_or_else(|| FinalizerError::invalid_parameter(WRITE_SPEC, "parameter 'file' is required"))?;
        let pretty = match params.get("pretty") {
            Some(raw) => parse_bool(raw).map_err(|error| FinalizerError::invalid_parameter(WRITE_SPEC, error.to_string()))?,
            None => true,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(expand_tilde(path))
            .map_err(|source| FinalizerError::Open {
                finalizer: WRITE_SPEC.into(),
                path: path.clone(),
                source,
            })?;
        Ok(Box::new(SpecWriter::new(Box::new(file), pretty, rest)))
    }
}
