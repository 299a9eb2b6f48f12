use async_trait::async_trait;
use fanfetch_types::{Env, Request, Response};
use fanfetch_util::{HttpExecError, execute_request, redact_sensitive};
use reqwest::Client;
use tracing::warn;

use super::ResponseReader;
use crate::error::ReaderError;

/// The innermost reader: issues the real network call.
///
/// With `error_as_response` set, transport failures become a synthetic
/// status-500 response with an empty body so that status expectations and
/// retries see them like any other failure.
pub struct HttpReader {
    client: Client,
    error_as_response: bool,
}

impl HttpReader {
    pub fn new(client: Client, error_as_response: bool) -> Self {
        Self {
            client,
            error_as_response,
        }
    }

    async fn send(&self, request: &Request) -> Result<Response, HttpExecError> {
        execute_request(&self.client, request).await
    }
}

#[async_trait]
impl ResponseReader for HttpReader {
    async fn read_response(&self, request: &Request, _env: &Env) -> Result<(Response, Env), ReaderError> {
        match self.send(request).await {
            Ok(response) => Ok((response, Env::empty())),
            Err(error) if self.error_as_response => {
                warn!(
                    tag = %request.tag,
                    url = %redact_sensitive(&request.url),
                    error = %error,
                    "transport error converted to a 500 response"
                );
                Ok((Response::synthetic_failure(), Env::empty()))
            }
            Err(error) => Err(ReaderError::Transport(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use fanfetch_types::HttpMethod;
    use fanfetch_util::build_http_client;

    use super::*;

    fn unreachable_request() -> Request {
        // Nothing listens on the discard port.
        Request::new("probe", HttpMethod::Get, "http://127.0.0.1:9/")
    }

    #[tokio::test]
    async fn transport_errors_can_become_responses() {
        let reader = HttpReader::new(build_http_client(None).expect("client"), true);
        let (response, update) = reader
            .read_response(&unreachable_request(), &Env::empty())
            .await
            .expect("converted");
        assert_eq!(response, Response::synthetic_failure());
        assert!(update.is_empty());
    }

    #[tokio::test]
    async fn transport_errors_propagate_by_default() {
        let reader = HttpReader::new(build_http_client(None).expect("client"), false);
        let error = reader
            .read_response(&unreachable_request(), &Env::empty())
            .await
            .expect_err("transport error");
        assert!(matches!(error, ReaderError::Transport(_)));
    }

    #[tokio::test]
    async fn invalid_urls_are_transport_errors() {
        let reader = HttpReader::new(build_http_client(None).expect("client"), false);
        let request = Request::new("bad", HttpMethod::Get, "not a url");
        let error = reader.read_response(&request, &Env::empty()).await.expect_err("bad url");
        assert!(matches!(error, ReaderError::Transport(HttpExecError::InvalidUrl { .. })));
    }
}
