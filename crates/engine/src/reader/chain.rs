//! Plugin registry and chain assembly.
//!
//! A chain is folded right to left over its [`PluginSpec`] list: the last
//! entry becomes the innermost reader and each earlier entry wraps the reader
//! built so far. Every plugin is placed behind a [`TagRouter`] so its tag
//! patterns decide whether it sees a request or passes it on.

use std::{collections::HashMap, fs::OpenOptions, sync::Arc};

use fanfetch_types::PluginSpec;
use fanfetch_util::{build_http_client, expand_tilde, parse_bool, parse_duration, parse_status_list};
use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

use super::{HttpReader, ResponseReader, RetryReader, TagRouter, TimerReader, retry};
use crate::error::ChainError;

pub type PluginParams = IndexMap<String, String>;

/// Builds one plugin given its parameters and the reader it should wrap.
///
/// `rest` is `None` only for the last plugin in a chain. A plugin handed
/// `rest` owns it: the chain closes only the outermost plugin, so the built
/// reader must forward `close` to `rest` itself, even when it never routes
/// requests there.
pub trait PluginFactory: Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, params: &PluginParams, rest: Option<Arc<dyn ResponseReader>>) -> Result<Arc<dyn ResponseReader>, ChainError>;
}

/// Explicit name → factory map handed to chain builders.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, Arc<dyn PluginFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `http`, `retry` and `timer`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpPlugin));
        registry.register(Arc::new(RetryPlugin));
        registry.register(Arc::new(TimerPlugin));
        registry
    }

    /// Adds or replaces a factory under its own name.
    pub fn register(&mut self, factory: Arc<dyn PluginFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Builds a reader chain from `specs`. An empty list means `[http]`.
    pub fn build_chain(&self, specs: &[PluginSpec]) -> Result<Arc<dyn ResponseReader>, ChainError> {
        let default_chain = [PluginSpec::named(HTTP_PLUGIN)];
        let specs = if specs.is_empty() { &default_chain[..] } else { specs };

        let mut rest: Option<Arc<dyn ResponseReader>> = None;
        for spec in specs.iter().rev() {
            let factory = self.factories.get(&spec.name).ok_or_else(|| ChainError::UnknownPlugin {
                name: spec.name.clone(),
            })?;
            let patterns = compile_tag_patterns(spec)?;
            if rest.is_none() && !patterns.is_empty() {
                return Err(ChainError::placement(
                    &spec.name,
                    "the last plugin handles every request and cannot be tag-restricted",
                ));
            }
            debug!(plugin = %spec.name, tags = ?spec.tag_patterns, params = ?spec.params, "building plugin");
            let plugin = factory.build(&spec.params, rest.clone())?;
            rest = Some(Arc::new(TagRouter::new(patterns, plugin, rest)));
        }

        rest.ok_or_else(|| ChainError::placement("chain", "no plugins to build"))
    }
}

fn compile_tag_patterns(spec: &PluginSpec) -> Result<Vec<Regex>, ChainError> {
    spec.tag_patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ChainError::InvalidTagPattern {
                plugin: spec.name.clone(),
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

pub const HTTP_PLUGIN: &str = "http";
pub const RETRY_PLUGIN: &str = "retry";
pub const TIMER_PLUGIN: &str = "timer";

struct HttpPlugin;

impl PluginFactory for HttpPlugin {
    fn name(&self) -> &str {
        HTTP_PLUGIN
    }

    fn build(&self, params: &PluginParams, rest: Option<Arc<dyn ResponseReader>>) -> Result<Arc<dyn ResponseReader>, ChainError> {
        if rest.is_some() {
            return Err(ChainError::placement(HTTP_PLUGIN, "must be the last plugin in the chain"));
        }
        let error_as_response = match params.get("error-as-response") {
            Some(raw) => parse_bool(raw).map_err(|error| ChainError::invalid_parameter(HTTP_PLUGIN, "error-as-response", error))?,
            None => false,
        };
        let timeout = params
            .get("timeout")
            .map(|raw| parse_duration(raw).map_err(|error| ChainError::invalid_parameter(HTTP_PLUGIN, "timeout", error)))
            .transpose()?;
        let client = build_http_client(timeout).map_err(|source| ChainError::Transport {
            plugin: HTTP_PLUGIN.into(),
            source,
        })?;
        Ok(Arc::new(HttpReader::new(client, error_as_response)))
    }
}

struct RetryPlugin;

impl PluginFactory for RetryPlugin {
    fn name(&self) -> &str {
        RETRY_PLUGIN
    }

    fn build(&self, params: &PluginParams, rest: Option<Arc<dyn ResponseReader>>) -> Result<Arc<dyn ResponseReader>, ChainError> {
        let rest = rest.ok_or_else(|| ChainError::placement(RETRY_PLUGIN, "needs another reader to wrap"))?;
        let retry_on = match params.get("retry-when") {
            Some(raw) => parse_status_list(raw).map_err(|error| ChainError::invalid_parameter(RETRY_PLUGIN, "retry-when", error))?,
            None => retry::DEFAULT_RETRY_STATUSES.to_vec(),
        };
        let max_wait = match params.get("max-wait") {
            Some(raw) => parse_duration(raw).map_err(|error| ChainError::invalid_parameter(RETRY_PLUGIN, "max-wait", error))?,
            None => retry::DEFAULT_MAX_WAIT,
        };
        let max_attempts = match params.get("max-attempts") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|error| ChainError::InvalidParameter {
                plugin: RETRY_PLUGIN.into(),
                parameter: "max-attempts".into(),
                reason: error.to_string(),
            })?,
            None => retry::DEFAULT_MAX_ATTEMPTS,
        };
        Ok(Arc::new(RetryReader::new(rest, retry_on, max_wait, max_attempts)))
    }
}

struct TimerPlugin;

impl PluginFactory for TimerPlugin {
    fn name(&self) -> &str {
        TIMER_PLUGIN
    }

    fn build(&self, params: &PluginParams, rest: Option<Arc<dyn ResponseReader>>) -> Result<Arc<dyn ResponseReader>, ChainError> {
        let rest = rest.ok_or_else(|| ChainError::placement(TIMER_PLUGIN, "needs another reader to wrap"))?;
        let tag_pattern = params
            .get("tag")
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ChainError::InvalidTagPattern {
                    plugin: TIMER_PLUGIN.into(),
                    pattern: pattern.clone(),
                    source,
                })
            })
            .transpose()?;
        let log = params
            .get("log")
            .filter(|path| !path.is_empty())
            .map(|path| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(expand_tilde(path))
                    .map_err(|source| ChainError::Io {
                        plugin: TIMER_PLUGIN.into(),
                        path: path.clone(),
                        source,
                    })
            })
            .transpose()?;
        Ok(Arc::new(TimerReader::new(rest, tag_pattern, log)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use fanfetch_types::{Env, HttpMethod, Request, Response};

    use super::*;
    use crate::error::ReaderError;

    /// Innermost test reader answering with a fixed status.
    struct Stub {
        status: u16,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ResponseReader for Stub {
        async fn read_response(&self, _request: &Request, _env: &Env) -> Result<(Response, Env), ReaderError> {
            Ok((Response::status_only(self.status), Env::empty()))
        }

        fn close(&self) -> Result<(), ReaderError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubPlugin {
        closes: Arc<AtomicUsize>,
    }

    impl PluginFactory for StubPlugin {
        fn name(&self) -> &str {
            "stub"
        }

        fn build(&self, params: &PluginParams, rest: Option<Arc<dyn ResponseReader>>) -> Result<Arc<dyn ResponseReader>, ChainError> {
            if rest.is_some() {
                return Err(ChainError::placement("stub", "must be last"));
            }
            let status = params.get("status").and_then(|raw| raw.parse().ok()).unwrap_or(200);
            Ok(Arc::new(Stub {
                status,
                closes: self.closes.clone(),
            }))
        }
    }

    fn registry_with_stub() -> (PluginRegistry, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::with_builtins();
        registry.register(Arc::new(StubPlugin { closes: closes.clone() }));
        (registry, closes)
    }

    #[test]
    fn unknown_plugins_are_rejected() {
        let error = PluginRegistry::with_builtins()
            .build_chain(&[PluginSpec::named("teleport")])
            .err()
            .expect("unknown plugin");
        assert!(matches!(error, ChainError::UnknownPlugin { name } if name == "teleport"));
    }

    #[test]
    fn http_must_be_last() {
        let (registry, _) = registry_with_stub();
        let error = registry
            .build_chain(&[PluginSpec::named("http"), PluginSpec::named("stub")])
            .err()
            .expect("misplaced http");
        assert!(matches!(error, ChainError::Placement { plugin, .. } if plugin == "http"));
    }

    #[test]
    fn retry_cannot_be_innermost() {
        let error = PluginRegistry::with_builtins()
            .build_chain(&[PluginSpec::named("retry")])
            .err()
            .expect("retry without rest");
        assert!(matches!(error, ChainError::Placement { plugin, .. } if plugin == "retry"));
    }

    #[test]
    fn invalid_tag_patterns_are_configuration_errors() {
        let (registry, _) = registry_with_stub();
        let error = registry
            .build_chain(&[PluginSpec::named("timer").with_tags(["("]), PluginSpec::named("stub")])
            .err()
            .expect("bad pattern");
        assert!(matches!(error, ChainError::InvalidTagPattern { .. }));
    }

    #[test]
    fn invalid_parameters_name_the_parameter() {
        let (registry, _) = registry_with_stub();
        let error = registry
            .build_chain(&[PluginSpec::named("retry").with_param("max-wait", "soon"), PluginSpec::named("stub")])
            .err()
            .expect("bad duration");
        assert!(matches!(error, ChainError::InvalidParameter { parameter, .. } if parameter == "max-wait"));
    }

    #[test]
    fn empty_chain_defaults_to_http() {
        assert!(PluginRegistry::with_builtins().build_chain(&[]).is_ok());
    }

    #[tokio::test]
    async fn tagged_plugins_only_see_matching_requests() {
        let (mut registry, _) = registry_with_stub();

        struct Teapot;
        impl PluginFactory for Teapot {
            fn name(&self) -> &str {
                "teapot"
            }

            fn build(&self, _params: &PluginParams, _rest: Option<Arc<dyn ResponseReader>>) -> Result<Arc<dyn ResponseReader>, ChainError> {
                Ok(Arc::new(Stub {
                    status: 418,
                    closes: Arc::new(AtomicUsize::new(0)),
                }))
            }
        }
        registry.register(Arc::new(Teapot));

        let chain = registry
            .build_chain(&[PluginSpec::named("teapot").with_tags(["^brew"]), PluginSpec::named("stub")])
            .expect("chain");
        let brew = Request::new("brew-tea", HttpMethod::Get, "http://localhost/");
        let other = Request::new("list", HttpMethod::Get, "http://localhost/");
        assert_eq!(chain.read_response(&brew, &Env::empty()).await.expect("brew").0.status, 418);
        assert_eq!(chain.read_response(&other, &Env::empty()).await.expect("other").0.status, 200);
    }

    #[test]
    fn tag_routing_leaves_closing_rest_to_the_plugin() {
        let (mut registry, closes) = registry_with_stub();

        // Routes nothing to `rest` and never closes it.
        struct Detached;
        impl PluginFactory for Detached {
            fn name(&self) -> &str {
                "detached"
            }

            fn build(&self, _params: &PluginParams, _rest: Option<Arc<dyn ResponseReader>>) -> Result<Arc<dyn ResponseReader>, ChainError> {
                Ok(Arc::new(Stub {
                    status: 204,
                    closes: Arc::new(AtomicUsize::new(0)),
                }))
            }
        }
        registry.register(Arc::new(Detached));

        let chain = registry
            .build_chain(&[PluginSpec::named("detached").with_tags(["^x$"]), PluginSpec::named("stub")])
            .expect("chain");
        chain.close().expect("close");
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        let chain = registry
            .build_chain(&[PluginSpec::named("timer").with_tags(["^x$"]), PluginSpec::named("stub")])
            .expect("chain");
        chain.close().expect("close");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closing_a_decorated_chain_closes_the_innermost_reader_once() {
        let (registry, closes) = registry_with_stub();
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("latency.tsv");
        let chain = registry
            .build_chain(&[
                PluginSpec::named("timer").with_param("log", log.to_string_lossy()),
                PluginSpec::named("retry").with_tags(["^set-"]),
                PluginSpec::named("stub"),
            ])
            .expect("chain");

        chain.close().expect("close");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
