//! Response readers: the capability an action uses to turn a request into a
//! response.
//!
//! Readers compose as decorators. Each built-in plugin wraps a "rest" reader
//! and delegates to it, and the innermost reader talks to the network. Chains
//! are assembled from [`PluginSpec`](fanfetch_types::PluginSpec) lists by a
//! [`PluginRegistry`].

use async_trait::async_trait;
use fanfetch_types::{Env, Request, Response};

use crate::error::ReaderError;

pub mod chain;
pub mod http;
pub mod retry;
pub mod tag;
pub mod timer;

pub use chain::{PluginFactory, PluginRegistry};
pub use http::HttpReader;
pub use retry::RetryReader;
pub use tag::TagRouter;
pub use timer::TimerReader;

/// Send a request and produce a response plus an out-of-band environment
/// update, which is usually empty.
///
/// Implementations must be safe to call concurrently from many workers.
/// `close` is called once by the owner of the chain after the last request;
/// decorators forward it to what they wrap.
#[async_trait]
pub trait ResponseReader: Send + Sync {
    async fn read_response(&self, request: &Request, env: &Env) -> Result<(Response, Env), ReaderError>;

    fn close(&self) -> Result<(), ReaderError> {
        Ok(())
    }
}
