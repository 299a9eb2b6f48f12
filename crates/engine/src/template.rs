//! Placeholder templates rendered against an [`Env`].
//!
//! Syntax is `{{ .name }}`; the leading dot and surrounding whitespace are
//! optional. Everything outside placeholders is copied verbatim. Rendering is
//! strict: a placeholder whose variable is absent from the environment is an
//! error rather than an empty substitution.

use fanfetch_types::Env;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder in '{template}'")]
    Unterminated { template: String },

    #[error("empty placeholder in '{template}'")]
    EmptyPlaceholder { template: String },

    #[error("invalid variable name '{name}'")]
    InvalidName { name: String },

    #[error("no value for variable '{name}'")]
    MissingVariable { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed template. Parsing happens once at action construction; rendering
/// happens per environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open.find("}}").ok_or_else(|| TemplateError::Unterminated {
                template: source.to_string(),
            })?;
            let inner = after_open[..close].trim();
            let name = inner.strip_prefix('.').unwrap_or(inner).trim();
            if name.is_empty() {
                return Err(TemplateError::EmptyPlaceholder {
                    template: source.to_string(),
                });
            }
            if !is_valid_name(name) {
                return Err(TemplateError::InvalidName { name: name.to_string() });
            }
            segments.push(Segment::Variable(name.to_string()));
            rest = &after_open[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, env: &Env) -> Result<String, TemplateError> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Variable(name) => {
                    let value = env
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingVariable { name: name.clone() })?;
                    rendered.push_str(value);
                }
            }
        }
        Ok(rendered)
    }
}

fn is_valid_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_dotted_and_bare_placeholders() {
        let template = Template::parse("http://{{ .host }}/items/{{id}}?q=1").expect("parse");
        let env = Env::from_pairs([("host", "localhost:8080"), ("id", "42")]);
        assert_eq!(template.render(&env).expect("render"), "http://localhost:8080/items/42?q=1");
    }

    #[test]
    fn constant_templates_render_verbatim() {
        let template = Template::parse("value=(?P<value>\\d+)").expect("parse");
        assert_eq!(template.render(&Env::empty()).expect("render"), "value=(?P<value>\\d+)");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let template = Template::parse("{{.user}}").expect("parse");
        assert_eq!(
            template.render(&Env::empty()),
            Err(TemplateError::MissingVariable { name: "user".into() })
        );
    }

    #[test]
    fn rejects_malformed_placeholders() {
        assert!(matches!(Template::parse("a {{ .b"), Err(TemplateError::Unterminated { .. })));
        assert!(matches!(Template::parse("{{ . }}"), Err(TemplateError::EmptyPlaceholder { .. })));
        assert!(matches!(Template::parse("{{ a b }}"), Err(TemplateError::InvalidName { .. })));
    }
}
