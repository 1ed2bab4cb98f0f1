//! The read, convert, write step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::markdown::{markdown_to_html, MarkdownOptions};
use crate::template::{DocumentTemplate, TemplateError, DEFAULT_TITLE};

/// Errors that can occur while rendering.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to read source {}: {source}", path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write output {}: {source}", path.display())]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Summary of a completed render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Path the document was written to
    pub output: PathBuf,

    /// Size of the written document in bytes
    pub bytes: usize,
}

/// Renders one Markdown source file into one HTML output file.
#[derive(Debug)]
pub struct Renderer {
    source: PathBuf,
    output: PathBuf,
    title: String,
    options: MarkdownOptions,
    template: DocumentTemplate,
}

impl Renderer {
    /// Create a renderer with the default title, options and template.
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            title: DEFAULT_TITLE.to_string(),
            options: MarkdownOptions::default(),
            template: DocumentTemplate::new(),
        }
    }

    /// Set the document title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the Markdown options.
    pub fn with_options(mut self, options: MarkdownOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the document template.
    pub fn with_template(mut self, template: DocumentTemplate) -> Self {
        self.template = template;
        self
    }

    /// Path of the Markdown source.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Path of the generated HTML document.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Render Markdown text into a complete HTML document.
    pub fn render_document(&self, markdown: &str) -> Result<String, RenderError> {
        let body = markdown_to_html(markdown, &self.options);
        Ok(self.template.render(&self.title, &body)?)
    }

    /// Read the source, render it, and overwrite the output.
    pub fn render(&self) -> Result<Rendered, RenderError> {
        let markdown = fs::read_to_string(&self.source).map_err(|source| RenderError::ReadSource {
            path: self.source.clone(),
            source,
        })?;

        let document = self.render_document(&markdown)?;

        write_atomically(&self.output, document.as_bytes()).map_err(|source| {
            RenderError::WriteOutput {
                path: self.output.clone(),
                source,
            }
        })?;

        tracing::debug!(
            "Rendered {} -> {} ({} bytes)",
            self.source.display(),
            self.output.display(),
            document.len()
        );

        Ok(Rendered {
            output: self.output.clone(),
            bytes: document.len(),
        })
    }
}

/// Write `contents` to a sibling temporary file, then rename it over `path`.
///
/// Readers of `path` see either the previous document or the new one.
pub fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "output path has no file name"))?;

    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".livemd-tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, contents)?;

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn renders_source_to_output() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("HTTPCodes.md");
        let output = temp.path().join("index.html");
        fs::write(&source, "# Title\n\nHello **world**.").unwrap();

        let rendered = Renderer::new(&source, &output).render().unwrap();

        let html = fs::read_to_string(&output).unwrap();
        assert_eq!(rendered.output, output);
        assert_eq!(rendered.bytes, html.len());
        assert!(html.contains("<h1>Title</h1>\n<p>Hello <strong>world</strong>.</p>"));
        assert!(html.contains("<title>Markdown Preview</title>"));
    }

    #[test]
    fn rendering_is_idempotent() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("doc.md");
        let output = temp.path().join("index.html");
        fs::write(&source, "# Heartbeat\n\n- ping\n- pong\n").unwrap();
        let renderer = Renderer::new(&source, &output);

        renderer.render().unwrap();
        let first = fs::read(&output).unwrap();
        renderer.render().unwrap();
        let second = fs::read(&output).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn different_sources_share_the_scaffold() {
        let renderer = Renderer::new("unused.md", "unused.html");

        let a = renderer.render_document("# Publish").unwrap();
        let b = renderer.render_document("# Subscribe").unwrap();

        assert_ne!(a, b);
        let head = |html: &str| html[..html.find("<body>").unwrap()].to_string();
        assert_eq!(head(&a), head(&b));
        assert!(a.contains("<h1>Publish</h1>"));
        assert!(b.contains("<h1>Subscribe</h1>"));
    }

    #[test]
    fn overwrites_previous_output() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("doc.md");
        let output = temp.path().join("index.html");
        fs::write(&output, "stale content that is much longer than the new document").unwrap();
        fs::write(&source, "# A").unwrap();

        Renderer::new(&source, &output).render().unwrap();

        let html = fs::read_to_string(&output).unwrap();
        assert!(!html.contains("stale"));
        assert!(html.contains("<h1>A</h1>"));
    }

    #[test]
    fn applies_title_and_options() {
        let renderer = Renderer::new("unused.md", "unused.html")
            .with_title("TCP")
            .with_options(MarkdownOptions {
                raw_html: true,
                ..Default::default()
            });

        let html = renderer.render_document("<kbd>SYN</kbd>").unwrap();

        assert!(html.contains("<title>TCP</title>"));
        assert!(html.contains("<kbd>SYN</kbd>"));
    }

    #[test]
    fn missing_source_is_a_read_error() {
        let temp = tempdir().unwrap();
        let output = temp.path().join("index.html");

        let result = Renderer::new(temp.path().join("missing.md"), &output).render();

        assert!(matches!(result, Err(RenderError::ReadSource { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn invalid_utf8_is_a_read_error() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("doc.md");
        fs::write(&source, [0xff, 0xfe, 0x00]).unwrap();

        let result = Renderer::new(&source, temp.path().join("index.html")).render();

        assert!(matches!(result, Err(RenderError::ReadSource { .. })));
    }

    #[test]
    fn unwritable_output_is_a_write_error() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("doc.md");
        fs::write(&source, "# A").unwrap();

        let output = temp.path().join("no-such-dir").join("index.html");
        let result = Renderer::new(&source, &output).render();

        let err = result.unwrap_err();
        assert!(matches!(err, RenderError::WriteOutput { .. }));
        assert!(err.to_string().contains("index.html"));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let temp = tempdir().unwrap();
        let output = temp.path().join("index.html");

        write_atomically(&output, b"<p>done</p>").unwrap();

        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read_to_string(&output).unwrap(), "<p>done</p>");
    }
}
