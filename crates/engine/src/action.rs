//! Executable actions compiled from [`ActionSpec`]s.
//!
//! An [`Action`] holds parsed templates for every request field plus the
//! reader it sends through. `perform` renders the templates against one
//! environment, reads the response, and turns regex matches on the body into
//! environment updates.

use std::sync::Arc;

use fanfetch_types::{
    ActionSpec, Env, HttpMethod, MultiMap, MultipartContent, MultipartFile, Request, RequestContent, Response,
};
use rand::seq::index;
use regex::Regex;
use tracing::{debug, info};

use crate::{
    error::ActionError,
    reader::ResponseReader,
    template::Template,
};

type MultiTemplate = Vec<(Template, Vec<Template>)>;

struct FileTemplate {
    field: Template,
    filename: Template,
    content: Template,
}

struct MultipartTemplate {
    form: MultiTemplate,
    files: Vec<FileTemplate>,
}

struct ContentTemplate {
    raw: Template,
    multipart: Option<MultipartTemplate>,
    form: MultiTemplate,
}

/// A compiled, stateless action. Safe to perform concurrently.
pub struct Action {
    tag: Template,
    url: Template,
    method: HttpMethod,
    query: MultiTemplate,
    headers: MultiTemplate,
    content: Option<ContentTemplate>,
    response_templates: Vec<Template>,
    expected_statuses: Vec<u16>,
    must_match: bool,
    max_nr_forks: usize,
    debug: bool,
    reader: Arc<dyn ResponseReader>,
}

impl Action {
    /// Validates `spec` and parses all of its templates.
    pub fn compile(spec: &ActionSpec, reader: Arc<dyn ResponseReader>) -> Result<Self, ActionError> {
        if spec.tag.trim().is_empty() {
            return Err(ActionError::MissingTag);
        }
        let method = spec.method.parse::<HttpMethod>()?;

        let response_templates = spec
            .response_templates
            .iter()
            .enumerate()
            .filter(|(_, source)| !source.is_empty())
            .map(|(index, source)| parse_field(&format!("response-templates[{index}]"), source))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tag: parse_field("tag", &spec.tag)?,
            url: parse_field("url", &spec.url_template)?,
            method,
            query: parse_multi("urlquery", &spec.url_query)?,
            headers: parse_multi("headers", &spec.headers)?,
            content: spec.content.as_ref().map(parse_content).transpose()?,
            response_templates,
            expected_statuses: spec.expected_statuses.clone(),
            must_match: spec.must_match,
            max_nr_forks: spec.max_nr_forks,
            debug: spec.debug,
            reader,
        })
    }

    /// The unrendered tag template, used to name the action in reports.
    pub fn tag_source(&self) -> &str {
        self.tag.source()
    }

    /// Renders every request field against `env`.
    pub fn resolve_request(&self, env: &Env) -> Result<Request, ActionError> {
        let mut request = Request::new(
            render_field("tag", &self.tag, env)?,
            self.method,
            render_field("url", &self.url, env)?,
        );
        request.query = render_multi("urlquery", &self.query, env)?;
        request.headers = render_multi("headers", &self.headers, env)?;
        request.content = self.content.as_ref().map(|content| render_content(content, env)).transpose()?;
        Ok(request)
    }

    /// Runs the action once against `env` and returns the environment updates
    /// it discovered. Forking is left to the caller.
    pub async fn perform(&self, env: &Env) -> Result<Vec<Env>, ActionError> {
        let request = self.resolve_request(env)?;
        if self.debug {
            info!(tag = %request.tag, method = %request.method, url = %request.url, query = ?request.query, "performing action");
        }

        let (response, out_of_band) = self.reader.read_response(&request, env).await?;
        debug!(tag = %request.tag, status = response.status, "response received");

        let matches = self.extract_matches(&response, env)?;
        let matched = !matches.is_empty();
        let matches = sample_matches(matches, self.max_nr_forks);
        let updates = merge_out_of_band(matches, out_of_band);

        let mut failures = Vec::new();
        if !self.expected_statuses.is_empty() && !self.expected_statuses.contains(&response.status) {
            failures.push(ActionError::status_mismatch(&request.url, &self.expected_statuses, response.status));
        }
        if self.must_match && !self.response_templates.is_empty() && !matched {
            failures.push(ActionError::no_match(&request.url));
        }
        if let Some(error) = ActionError::join(failures) {
            return Err(error);
        }

        if self.debug {
            info!(tag = %request.tag, updates = ?updates, "action updates");
        }
        Ok(updates)
    }

    /// Applies response templates in order; the first one producing at least
    /// one named-group match supplies every match.
    fn extract_matches(&self, response: &Response, env: &Env) -> Result<Vec<Env>, ActionError> {
        let Some(body) = response.body.as_deref() else {
            return Ok(Vec::new());
        };
        if self.response_templates.is_empty() {
            return Ok(Vec::new());
        }
        let text = String::from_utf8_lossy(body);

        for (index, template) in self.response_templates.iter().enumerate() {
            let pattern = render_field(&format!("response-templates[{index}]"), template, env)?;
            let regex = Regex::new(&pattern).map_err(|source| ActionError::InvalidPattern {
                index,
                pattern: pattern.clone(),
                source,
            })?;
            let matches = named_matches(&regex, &text);
            if !matches.is_empty() {
                return Ok(matches);
            }
        }
        Ok(Vec::new())
    }
}

/// One environment per regex match, holding that match's named groups.
/// Matches where no named group participated are dropped.
fn named_matches(regex: &Regex, text: &str) -> Vec<Env> {
    let names: Vec<&str> = regex.capture_names().flatten().collect();
    if names.is_empty() {
        return Vec::new();
    }
    regex
        .captures_iter(text)
        .filter_map(|captures| {
            let env: Env = names
                .iter()
                .filter_map(|name| captures.name(name).map(|value| (*name, value.as_str())))
                .collect();
            (!env.is_empty()).then_some(env)
        })
        .collect()
}

/// Picks `limit` matches uniformly at random when there are more; `0` means no limit.
fn sample_matches(matches: Vec<Env>, limit: usize) -> Vec<Env> {
    if limit == 0 || matches.len() <= limit {
        return matches;
    }
    let mut picks = index::sample(&mut rand::thread_rng(), matches.len(), limit).into_vec();
    picks.sort_unstable();
    let mut slots: Vec<Option<Env>> = matches.into_iter().map(Some).collect();
    picks.into_iter().filter_map(|pick| slots[pick].take()).collect()
}

fn merge_out_of_band(matches: Vec<Env>, out_of_band: Env) -> Vec<Env> {
    if matches.is_empty() {
        return if out_of_band.is_empty() { Vec::new() } else { vec![out_of_band] };
    }
    if out_of_band.is_empty() {
        return matches;
    }
    matches
        .into_iter()
        .map(|mut env| {
            env.update([&out_of_band]);
            env
        })
        .collect()
}

fn parse_field(field: &str, source: &str) -> Result<Template, ActionError> {
    Template::parse(source).map_err(|error| ActionError::template(field, error))
}

fn render_field(field: &str, template: &Template, env: &Env) -> Result<String, ActionError> {
    template.render(env).map_err(|error| ActionError::template(field, error))
}

fn parse_multi(field: &str, map: &MultiMap) -> Result<MultiTemplate, ActionError> {
    map.iter()
        .map(|(name, values)| {
            let key = parse_field(field, name)?;
            let values = values
                .iter()
                .map(|value| parse_field(field, value))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((key, values))
        })
        .collect()
}

fn render_multi(field: &str, templates: &MultiTemplate, env: &Env) -> Result<MultiMap, ActionError> {
    let mut rendered = MultiMap::new();
    for (key, values) in templates {
        let key = render_field(field, key, env)?;
        let values = values
            .iter()
            .map(|value| render_field(field, value, env))
            .collect::<Result<Vec<_>, _>>()?;
        rendered.entry(key).or_default().extend(values);
    }
    Ok(rendered)
}

fn parse_content(content: &RequestContent) -> Result<ContentTemplate, ActionError> {
    let multipart = content
        .multipart
        .as_ref()
        .map(|multipart| {
            let files = multipart
                .files
                .iter()
                .map(|file| {
                    Ok(FileTemplate {
                        field: parse_field("content", &file.field)?,
                        filename: parse_field("content", &file.filename)?,
                        content: parse_field("content", &file.content)?,
                    })
                })
                .collect::<Result<Vec<_>, ActionError>>()?;
            Ok::<_, ActionError>(MultipartTemplate {
                form: parse_multi("content", &multipart.form)?,
                files,
            })
        })
        .transpose()?;

    Ok(ContentTemplate {
        raw: parse_field("content", &content.raw_content)?,
        multipart,
        form: parse_multi("content", &content.form)?,
    })
}

fn render_content(content: &ContentTemplate, env: &Env) -> Result<RequestContent, ActionError> {
    let multipart = content
        .multipart
        .as_ref()
        .map(|multipart| {
            let files = multipart
                .files
                .iter()
                .map(|file| {
                    Ok(MultipartFile {
                        field: render_field("content", &file.field, env)?,
                        filename: render_field("content", &file.filename, env)?,
                        content: render_field("content", &file.content, env)?,
                    })
                })
                .collect::<Result<Vec<_>, ActionError>>()?;
            Ok::<_, ActionError>(MultipartContent {
                form: render_multi("content", &multipart.form, env)?,
                files,
            })
        })
        .transpose()?;

    Ok(RequestContent {
        raw_content: render_field("content", &content.raw, env)?,
        multipart,
        form: render_multi("content", &content.form, env)?,
    })
}
