//! Document template wrapping rendered Markdown.

use minijinja::{context, Environment};

pub use minijinja::Error as TemplateError;

/// Title used when none is configured.
pub const DEFAULT_TITLE: &str = "Markdown Preview";

const TEMPLATE_NAME: &str = "document.html";

/// The HTML shell a rendered fragment is placed into.
///
/// Templates see two variables: `title` (auto-escaped) and `content` (the
/// rendered fragment, to be emitted with `| safe`).
pub struct DocumentTemplate {
    env: Environment<'static>,
}

impl DocumentTemplate {
    /// Create the built-in document template.
    pub fn new() -> Self {
        Self::from_source(DOCUMENT_TEMPLATE.to_string()).expect("Failed to add document template")
    }

    /// Create a template from user-provided minijinja source.
    pub fn from_source(source: String) -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        env.add_template_owned(TEMPLATE_NAME, source)?;

        Ok(Self { env })
    }

    /// Render a complete document.
    pub fn render(&self, title: &str, content: &str) -> Result<String, TemplateError> {
        let tmpl = self.env.get_template(TEMPLATE_NAME)?;

        tmpl.render(context! {
            title => title,
            content => content,
        })
    }
}

impl Default for DocumentTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DocumentTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentTemplate").finish_non_exhaustive()
    }
}

const DOCUMENT_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
  <head><meta charset="UTF-8"><title>{{ title }}</title></head>
  <body>
{{ content | safe }}
  </body>
</html>
"##;
