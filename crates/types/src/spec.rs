//! Serializable task descriptions: tasks, stages, actions, plugins and finalizers.
//!
//! These are the documents a caller submits. They carry template strings and
//! flags only; compilation into executable actions and reader chains happens
//! in the engine.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Env, request::MultiMap};

/// One file part of a multipart body.
///
/// A `filename` starting with `@` names a file on disk whose contents are
/// sent under the file's base name; otherwise `file` holds inline contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartFile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, rename = "file", skip_serializing_if = "String::is_empty")]
    pub content: String,
}

impl MultipartFile {
    /// Path on disk when the filename uses the `@path` form.
    pub fn disk_path(&self) -> Option<&str> {
        self.filename.strip_prefix('@')
    }

    /// The filename sent to the server.
    pub fn upload_name(&self) -> &str {
        match self.disk_path() {
            Some(path) => path.rsplit(['/', '\\']).next().unwrap_or(path),
            None => &self.filename,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartContent {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub form: MultiMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<MultipartFile>,
}

/// Request body description.
///
/// Raw content wins over everything else; otherwise a multipart body is sent
/// when present; otherwise the form is URL-encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContent {
    #[serde(default, rename = "raw-content", skip_serializing_if = "String::is_empty")]
    pub raw_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart: Option<MultipartContent>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub form: MultiMap,
}

impl RequestContent {
    pub fn raw(content: impl Into<String>) -> Self {
        Self {
            raw_content: content.into(),
            ..Self::default()
        }
    }
}

/// Declarative description of one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
    #[serde(default)]
    pub tag: String,
    #[serde(default, rename = "url")]
    pub url_template: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, rename = "urlquery", skip_serializing_if = "IndexMap::is_empty")]
    pub url_query: MultiMap,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: MultiMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<RequestContent>,
    #[serde(default, rename = "expected-statuses", skip_serializing_if = "Vec::is_empty")]
    pub expected_statuses: Vec<u16>,
    #[serde(default, rename = "response-templates", skip_serializing_if = "Vec::is_empty")]
    pub response_templates: Vec<String>,
    #[serde(default, rename = "must-match", skip_serializing_if = "std::ops::Not::not")]
    pub must_match: bool,
    #[serde(default, rename = "max-nr-forks", skip_serializing_if = "is_zero")]
    pub max_nr_forks: usize,
}

impl ActionSpec {
    pub fn new(tag: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            method: method.into(),
            url_template: url.into(),
            ..Self::default()
        }
    }
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// A stage: actions issued concurrently against every live environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    #[serde(default, rename = "concurrent-actions")]
    pub actions: Vec<ActionSpec>,
    #[serde(default, rename = "proceed-when-no-update", skip_serializing_if = "std::ops::Not::not")]
    pub proceed_when_no_update: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
}

impl StageSpec {
    pub fn new(actions: Vec<ActionSpec>) -> Self {
        Self {
            actions,
            ..Self::default()
        }
    }

    pub fn proceeding(mut self) -> Self {
        self.proceed_when_no_update = true;
        self
    }
}

/// One entry of a response-reader plugin chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(default, rename = "tags", skip_serializing_if = "Vec::is_empty")]
    pub tag_patterns: Vec<String>,
    #[serde(default, rename = "parameters", skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, String>,
}

impl PluginSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_tags<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_patterns.extend(patterns.into_iter().map(Into::into));
        self
    }
}

/// One entry of a finalizer chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizerSpec {
    pub name: String,
    #[serde(default, rename = "parameters", skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, String>,
}

impl FinalizerSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: IndexMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// A complete task: ordered stages plus the chains that run around them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default, rename = "env", skip_serializing_if = "Option::is_none")]
    pub init_env: Option<Env>,
    #[serde(default, rename = "action-seq")]
    pub stages: Vec<StageSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginSpec>,
    #[serde(default, rename = "finally", skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<FinalizerSpec>,
}

impl TaskSpec {
    pub fn new(stages: Vec<StageSpec>) -> Self {
        Self {
            stages,
            ..Self::default()
        }
    }

    /// The starting environment, canonical empty when none was supplied.
    pub fn initial_env(&self) -> Env {
        self.init_env.clone().unwrap_or_default()
    }
}
