use std::sync::Arc;

use async_trait::async_trait;
use fanfetch_types::{Env, Request, Response};
use regex::Regex;
use tracing::trace;

use super::ResponseReader;
use crate::error::ReaderError;

/// Routes a request to `plugin` when its tag matches one of `patterns`, and to
/// `rest` otherwise. With no patterns every request goes to `plugin`.
///
/// `plugin` already wraps `rest`, so closing the router closes only `plugin`.
pub struct TagRouter {
    patterns: Vec<Regex>,
    plugin: Arc<dyn ResponseReader>,
    rest: Option<Arc<dyn ResponseReader>>,
}

impl TagRouter {
    pub fn new(patterns: Vec<Regex>, plugin: Arc<dyn ResponseReader>, rest: Option<Arc<dyn ResponseReader>>) -> Self {
        Self { patterns, plugin, rest }
    }

    fn routes_to_plugin(&self, tag: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|pattern| pattern.is_match(tag))
    }
}

#[async_trait]
impl ResponseReader for TagRouter {
    async fn read_response(&self, request: &Request, env: &Env) -> Result<(Response, Env), ReaderError> {
        if self.routes_to_plugin(&request.tag) {
            return self.plugin.read_response(request, env).await;
        }
        trace!(tag = %request.tag, "tag not routed to plugin, falling through");
        match &self.rest {
            Some(rest) => rest.read_response(request, env).await,
            None => Err(ReaderError::Unrouted {
                tag: request.tag.clone(),
            }),
        }
    }

    /// `rest` is owned by `plugin`, which forwards to it.
    fn close(&self) -> Result<(), ReaderError> {
        self.plugin.close()
    }
}
