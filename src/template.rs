//! Page rendering seam.
//!
//! kindle does not ship a template engine. Anything that can turn a page name
//! plus the request [`Context`] into HTML can be plugged in through
//! [`Templates`]. [`DefaultTemplates`] covers the framework's own fallback
//! pages and is good enough for small apps: pages are plain HTML with
//! `{{Name}}` placeholders filled from [`Context::strings`].

use std::collections::HashMap;

use crate::context::Context;

/// Renders named pages for [`Context::template`].
pub trait Templates: Send + Sync + 'static {
    fn render(&self, name: &str, ctx: &Context) -> Result<String, TemplateError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template `{0}` is not defined")]
    Undefined(String),

    #[error("template `{name}`: {reason}")]
    Render { name: String, reason: String },
}

const BAD_REQUEST: &str = "<!DOCTYPE html><html><head><title>Bad Request</title></head>\
<body><h1>400 Bad Request</h1><p>The request could not be understood.</p></body></html>";

const FORBIDDEN: &str = "<!DOCTYPE html><html><head><title>Forbidden</title></head>\
<body><h1>403 Forbidden</h1><p>You do not have access to this page.</p></body></html>";

const NOT_FOUND: &str = "<!DOCTYPE html><html><head><title>Not Found</title></head>\
<body><h1>404 Not Found</h1><p>The page you requested does not exist.</p></body></html>";

/// Named HTML pages with `{{Name}}` substitution.
pub struct DefaultTemplates {
    pages: HashMap<String, String>,
}

impl DefaultTemplates {
    /// Starts with the `badrequest`, `forbidden`, and `notfound` pages.
    pub fn new() -> Self {
        let pages = [("badrequest", BAD_REQUEST), ("forbidden", FORBIDDEN), ("notfound", NOT_FOUND)]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Self { pages }
    }

    /// Adds a page, replacing any page with the same name.
    pub fn page(mut self, name: &str, html: impl Into<String>) -> Self {
        self.pages.insert(name.to_owned(), html.into());
        self
    }
}

impl Default for DefaultTemplates {
    fn default() -> Self { Self::new() }
}

impl Templates for DefaultTemplates {
    fn render(&self, name: &str, ctx: &Context) -> Result<String, TemplateError> {
        let page = self.pages.get(name).ok_or_else(|| TemplateError::Undefined(name.to_owned()))?;
        substitute(name, page, &ctx.strings)
    }
}

fn substitute(name: &str, page: &str, values: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(page.len());
    let mut rest = page;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| TemplateError::Render {
            name: name.to_owned(),
            reason: "unclosed `{{`".to_owned(),
        })?;
        let key = after[..end].trim();
        let value = values.get(key).ok_or_else(|| TemplateError::Render {
            name: name.to_owned(),
            reason: format!("no value for `{key}`"),
        })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn fills_placeholders() {
        let out = substitute("hi", "<p>Hello, {{ UserDisplayName }}!</p>", &values(&[("UserDisplayName", "ada")]));
        assert_eq!(out.unwrap(), "<p>Hello, ada!</p>");
    }

    #[test]
    fn missing_value_is_a_render_error() {
        let err = substitute("hi", "{{Nope}}", &HashMap::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }

    #[test]
    fn unclosed_placeholder_is_a_render_error() {
        assert!(substitute("hi", "a {{b", &HashMap::new()).is_err());
    }
}
