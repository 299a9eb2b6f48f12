//! HTTP execution helpers used by the transport reader.
//!
//! This module turns a resolved [`Request`] into a `reqwest` call: query
//! parameters are appended to the URL, headers are added as-is, and the body
//! is encoded from [`RequestContent`] (raw, multipart or URL-encoded form).
//! The response body is always read fully before returning.

use std::time::{Duration, Instant};

use fanfetch_types::{HttpMethod, MultiMap, Request, RequestContent, Response};
use reqwest::{
    Client, Method, RequestBuilder,
    header::{self, HeaderName, HeaderValue},
    multipart::{Form, Part},
};
use thiserror::Error;
use tracing::{debug, warn};
use url::{Url, form_urlencoded};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Failures raised while building or sending a request.
#[derive(Debug, Error)]
pub enum HttpExecError {
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl { url: String, source: url::ParseError },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("cannot read multipart file '{path}': {source}")]
    MultipartFile { path: String, source: std::io::Error },

    #[error("could not build the HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("network error for {method} {url}: {source}")]
    Network {
        method: HttpMethod,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Builds the shared client used by one transport reader.
pub fn build_http_client(timeout: Option<Duration>) -> Result<Client, HttpExecError> {
    let mut builder = Client::builder().connect_timeout(Duration::from_secs(30));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(HttpExecError::Client)
}

pub fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Trace => Method::TRACE,
        HttpMethod::Connect => Method::CONNECT,
    }
}

/// Appends query parameters to `raw_url`, keeping any query it already has.
pub fn build_url(raw_url: &str, query: &MultiMap) -> Result<Url, HttpExecError> {
    let mut url = Url::parse(raw_url).map_err(|source| HttpExecError::InvalidUrl {
        url: raw_url.to_string(),
        source,
    })?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, values) in query {
            for value in values {
                pairs.append_pair(name, value);
            }
        }
    }
    Ok(url)
}

/// URL-encodes a multi-valued form.
pub fn encode_form(form: &MultiMap) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, values) in form {
        for value in values {
            serializer.append_pair(name, value);
        }
    }
    serializer.finish()
}

/// Sends `request` with `client` and reads the whole response.
pub async fn execute_request(client: &Client, request: &Request) -> Result<Response, HttpExecError> {
    let start = Instant::now();
    let url = build_url(&request.url, &request.query)?;
    debug!(
        tag = %request.tag,
        method = %request.method,
        url = %url,
        header_count = request.headers.len(),
        has_content = request.content.is_some(),
        "http request started"
    );

    let mut builder = client.request(to_reqwest_method(request.method), url.clone());
    if let Some(content) = &request.content {
        builder = apply_content(builder, content).await?;
    }
    builder = apply_headers(builder, &request.headers)?;

    let response = builder.send().await.map_err(|source| {
        warn!(
            tag = %request.tag,
            method = %request.method,
            url = %url,
            error = %source,
            duration_ms = start.elapsed().as_millis(),
            "http request failed"
        );
        HttpExecError::Network {
            method: request.method,
            url: url.to_string(),
            source,
        }
    })?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(|source| HttpExecError::Body {
        url: url.to_string(),
        source,
    })?;

    debug!(
        tag = %request.tag,
        url = %url,
        status,
        body_len = body.len(),
        duration_ms = start.elapsed().as_millis(),
        "http request completed"
    );
    Ok(Response {
        status,
        body: Some(body.to_vec()),
    })
}

fn apply_headers(mut builder: RequestBuilder, headers: &MultiMap) -> Result<RequestBuilder, HttpExecError> {
    for (name, values) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| HttpExecError::InvalidHeader {
            name: name.clone(),
            reason: error.to_string(),
        })?;
        for value in values {
            let header_value = HeaderValue::from_str(value).map_err(|error| HttpExecError::InvalidHeader {
                name: name.clone(),
                reason: error.to_string(),
            })?;
            builder = builder.header(header_name.clone(), header_value);
        }
    }
    Ok(builder)
}

async fn apply_content(builder: RequestBuilder, content: &RequestContent) -> Result<RequestBuilder, HttpExecError> {
    if !content.raw_content.is_empty() {
        return Ok(builder.body(content.raw_content.clone()));
    }
    if let Some(multipart) = &content.multipart {
        let mut form = Form::new();
        for (name, values) in &multipart.form {
            for value in values {
                form = form.text(name.clone(), value.clone());
            }
        }
        for file in &multipart.files {
            if file.field.is_empty() || file.upload_name().is_empty() {
                continue;
            }
            let bytes = match file.disk_path() {
                Some(path) => tokio::fs::read(path).await.map_err(|source| HttpExecError::MultipartFile {
                    path: path.to_string(),
                    source,
                })?,
                None => file.content.clone().into_bytes(),
            };
            let part = Part::bytes(bytes).file_name(file.upload_name().to_string());
            form = form.part(file.field.clone(), part);
        }
        return Ok(builder.multipart(form));
    }
    if !content.form.is_empty() {
        return Ok(builder
            .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(encode_form(&content.form)));
    }
    Ok(builder)
}
