//! Markdown rendering for the livemd preview loop.
//!
//! This crate turns a Markdown source file into a standalone HTML document:
//! the Markdown is converted with pulldown-cmark, wrapped in a small fixed
//! template, and written over the output file.

pub mod markdown;
pub mod renderer;
pub mod template;

pub use markdown::{markdown_to_html, MarkdownOptions};
pub use renderer::{write_atomically, RenderError, Rendered, Renderer};
pub use template::{DocumentTemplate, TemplateError, DEFAULT_TITLE};
