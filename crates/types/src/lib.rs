//! Shared data model for fanfetch: environments, request/response
//! descriptors, and the serializable task specification.

pub mod env;
pub mod request;
pub mod spec;

pub use env::{Env, dedup_envs, uniq_envs};
pub use request::{HttpMethod, MultiMap, Request, Response, UnknownMethodError};
pub use spec::{ActionSpec, FinalizerSpec, MultipartContent, MultipartFile, PluginSpec, RequestContent, StageSpec, TaskSpec};
