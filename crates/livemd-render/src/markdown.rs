//! Markdown to HTML conversion.

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};

/// Options controlling the Markdown dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkdownOptions {
    /// GFM-style pipe tables
    pub tables: bool,

    /// `~~strikethrough~~` spans
    pub strikethrough: bool,

    /// Pass raw HTML in the source through unescaped
    pub raw_html: bool,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            tables: true,
            strikethrough: true,
            raw_html: false,
        }
    }
}

impl MarkdownOptions {
    fn parser_options(&self) -> Options {
        let mut options = Options::empty();
        if self.tables {
            options.insert(Options::ENABLE_TABLES);
        }
        if self.strikethrough {
            options.insert(Options::ENABLE_STRIKETHROUGH);
        }
        options
    }
}

/// Convert Markdown to an HTML fragment.
///
/// Never fails: unrecognized syntax degrades to text. With `raw_html` off,
/// embedded HTML is emitted as escaped text instead of markup, and an HTML
/// block becomes a paragraph of that text.
pub fn markdown_to_html(source: &str, options: &MarkdownOptions) -> String {
    let parser = Parser::new_ext(source, options.parser_options());

    let events: Vec<Event> = if options.raw_html {
        parser.collect()
    } else {
        escape_html(parser)
    };

    let mut html_output = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut html_output, events.into_iter());

    html_output
}

/// Turn raw HTML events into text events.
fn escape_html<'a>(parser: Parser<'a>) -> Vec<Event<'a>> {
    let mut events = Vec::new();
    let mut block: Option<String> = None;

    for event in parser {
        match event {
            Event::Start(Tag::HtmlBlock) => block = Some(String::new()),
            Event::End(TagEnd::HtmlBlock) => {
                let text = block.take().unwrap_or_default();
                events.push(Event::Start(Tag::Paragraph));
                events.push(Event::Text(CowStr::from(text.trim_end().to_string())));
                events.push(Event::End(TagEnd::Paragraph));
            }
            Event::Html(html) => match block.as_mut() {
                Some(text) => text.push_str(&html),
                None => events.push(Event::Text(html)),
            },
            Event::InlineHtml(html) => events.push(Event::Text(html)),
            other => events.push(other),
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(md: &str) -> String {
        markdown_to_html(md, &MarkdownOptions::default())
    }

    #[test]
    fn renders_heading_and_strong() {
        let html = render("# Title\n\nHello **world**.");

        assert_eq!(html, "<h1>Title</h1>\n<p>Hello <strong>world</strong>.</p>\n");
    }

    #[test]
    fn renders_common_blocks() {
        let md = r#"## Codes

Some *emphasis* and `inline code`.

- one
- two

1. first
2. second

[docs](https://example.com)

```rust
fn main() {}
```

    indented
"#;

        let html = render(md);

        assert!(html.contains("<h2>Codes</h2>"));
        assert!(html.contains("<em>emphasis</em>"));
        assert!(html.contains("<code>inline code</code>"));
        assert!(html.contains("<ul>\n<li>one</li>\n<li>two</li>\n</ul>"));
        assert!(html.contains("<ol>\n<li>first</li>"));
        assert!(html.contains(r#"<a href="https://example.com">docs</a>"#));
        assert!(html.contains(r#"<pre><code class="language-rust">fn main() {}"#));
        assert!(html.contains("<pre><code>indented\n</code></pre>"));
    }

    #[test]
    fn renders_tables_and_strikethrough() {
        let md = "| Code | Meaning |\n|------|---------|\n| 200 | OK |\n\n~~gone~~";

        let html = render(md);

        assert!(html.contains("<table>"));
        assert!(html.contains("<td>200</td>"));
        assert!(html.contains("<del>gone</del>"));
    }

    #[test]
    fn escapes_raw_html_by_default() {
        let html = render("<div>block</div>\n\ntext <b>inline</b>");

        assert_eq!(
            html,
            "<p>&lt;div&gt;block&lt;/div&gt;</p>\n<p>text &lt;b&gt;inline&lt;/b&gt;</p>\n"
        );
    }

    #[test]
    fn escaped_html_block_keeps_its_lines_in_one_paragraph() {
        let html = render("<table>\n<tr><td>x</td></tr>\n</table>\n\nafter");

        assert_eq!(
            html,
            "<p>&lt;table&gt;\n&lt;tr&gt;&lt;td&gt;x&lt;/td&gt;&lt;/tr&gt;\n&lt;/table&gt;</p>\n<p>after</p>\n"
        );
    }

    #[test]
    fn passes_raw_html_when_enabled() {
        let options = MarkdownOptions {
            raw_html: true,
            ..Default::default()
        };

        let html = markdown_to_html("text <b>inline</b>", &options);

        assert!(html.contains("<b>inline</b>"));
    }

    #[test]
    fn disabled_extensions_degrade_to_text() {
        let options = MarkdownOptions {
            tables: false,
            strikethrough: false,
            raw_html: false,
        };

        let html = markdown_to_html("| a | b |\n|---|---|\n\n~~x~~", &options);

        assert!(!html.contains("<table>"));
        assert!(!html.contains("<del>"));
    }

    #[test]
    fn malformed_input_does_not_fail() {
        let html = render("**unclosed [link](\n\n```\nno closing fence");

        assert!(html.contains("**unclosed"));
        assert!(html.contains("<pre><code>no closing fence"));
    }
}
