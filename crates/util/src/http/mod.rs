pub mod http_exec;

pub use http_exec::*;
