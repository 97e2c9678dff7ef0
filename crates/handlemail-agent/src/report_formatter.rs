//! Renders an agent's final markdown content into the plain-text and HTML
//! bodies actually sent back to the sender.
//!
//! Grounded on `original_source/mxtoai/scripts/report_formatter.py`'s
//! `ReportFormatter`: the fixed signature block and its stripping regexes,
//! `_to_plain_text`'s markdown-syntax stripping, `_to_html`'s
//! markdown-to-HTML render (here via `comrak` rather than the Python
//! `markdown` package, matching `mcp-agent-mail-server/src/markdown.rs`),
//! and `add_email_header_footer`.

use std::sync::LazyLock;

use regex::Regex;

pub const SIGNATURE_BLOCK: &str = "\n\n---\n\n**handlemail**  \n_Feel free to reply to this email to continue our conversation._\n";

const HTML_STYLE: &str = "\
body { font-family: Arial, sans-serif; line-height: 1.6; color: #333333; max-width: 800px; margin: 0 auto; padding: 20px; }
p { margin-bottom: 1em; }
h1, h2, h3, h4, h5, h6 { color: #2c3e50; margin-top: 1.5em; margin-bottom: 0.5em; }
ul, ol { margin-bottom: 1em; padding-left: 2em; }
li { margin-bottom: 0.5em; }
a { color: #3498db; text-decoration: none; }
a:hover { text-decoration: underline; }
hr { border: none; border-top: 1px solid #e0e0e0; margin: 20px 0; }
.signature { color: #666666; font-style: italic; border-top: 1px solid #e0e0e0; padding-top: 15px; margin-top: 25px; }
code { background-color: #f5f5f5; padding: 2px 4px; border-radius: 3px; font-family: monospace; }
pre { background-color: #f5f5f5; padding: 15px; border-radius: 5px; overflow-x: auto; margin: 1em 0; }
strong { color: #2c3e50; }
em { color: #34495e; }
blockquote { border-left: 4px solid #e0e0e0; margin: 1em 0; padding-left: 1em; color: #666666; }";

static SIGNATURE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\n\s*Warm regards,?\s*\n\s*handlemail\s*\n",
        r"(?i)\n\s*Best regards,?\s*\n\s*handlemail\s*\n",
        r"(?i)\n\s*Best,\s*\n\s*handlemail\s*\n",
        r"(?i)\n\s*Regards,?\s*\n\s*handlemail\s*\n",
        r"(?i)\n\s*Sincerely,?\s*\n\s*handlemail\s*\n",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid signature pattern"))
    .collect()
});

static HEADING_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#+\s+").unwrap());
static BOLD_DOUBLE_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static BOLD_DOUBLE_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__(.*?)__").unwrap());
static ITALIC_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+?)\*").unwrap());
static ITALIC_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_([^_]+?)_").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(.*?)\]\((.*?)\)").unwrap());
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```.*?\n(.*?)```").unwrap());
static HORIZONTAL_RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"---+").unwrap());

/// Output shape a caller requests from `format_report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    PlainText,
    Html,
}

/// Metadata used by `add_email_header_footer`'s reply header block.
#[derive(Debug, Clone, Default)]
pub struct ReportMetadata {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportFormatter;

impl ReportFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Strips any pre-existing signature, optionally appends the canonical
    /// one, then renders in the requested format.
    #[must_use]
    pub fn format_report(&self, content: &str, format: ReportFormat, include_signature: bool) -> String {
        let mut content = self.remove_existing_signatures(content);
        if include_signature {
            content = content.trim_end().to_string() + SIGNATURE_BLOCK;
        }
        match format {
            ReportFormat::Markdown => content,
            ReportFormat::PlainText => self.to_plain_text(&content),
            ReportFormat::Html => self.to_html(&content),
        }
    }

    fn remove_existing_signatures(&self, content: &str) -> String {
        let mut result = content.to_string();
        for pattern in SIGNATURE_PATTERNS.iter() {
            result = pattern.replace_all(&result, "\n").to_string();
        }
        result
    }

    fn to_plain_text(&self, markdown: &str) -> String {
        let text = HEADING_MARKER.replace_all(markdown, "");
        let text = BOLD_DOUBLE_STAR.replace_all(&text, "$1");
        let text = BOLD_DOUBLE_UNDERSCORE.replace_all(&text, "$1");
        let text = ITALIC_STAR.replace_all(&text, "$1");
        let text = ITALIC_UNDERSCORE.replace_all(&text, "$1");
        let text = LINK.replace_all(&text, "$1 ($2)");
        let text = CODE_FENCE.replace_all(&text, "$1");
        HORIZONTAL_RULE.replace_all(&text, "-".repeat(40)).to_string()
    }

    /// Renders through `comrak`, matching the source's preferred path
    /// (the `markdown` package with `tables`/`fenced_code`/`nl2br`); the
    /// source's regex-only fallback for when that package is missing has no
    /// counterpart here since `comrak` is always available.
    fn to_html(&self, markdown: &str) -> String {
        let mut options = comrak::Options::default();
        options.extension.table = true;
        options.render.hardbreaks = true;
        let body = comrak::markdown_to_html(markdown, &options);
        format!("<html>\n<head>\n<style>\n{HTML_STYLE}\n</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n")
    }

    /// Prepends a `Subject`/`From`/`Date` header and appends a generated-by
    /// footer, matching `add_email_header_footer`.
    #[must_use]
    pub fn add_email_header_footer(&self, content: &str, metadata: &ReportMetadata) -> String {
        let mut header = format!("Subject: {}\n", metadata.subject.as_deref().unwrap_or("Research Report"));
        if let Some(from) = &metadata.from {
            header.push_str(&format!("From: {from}\n"));
        }
        if let Some(date) = &metadata.date {
            header.push_str(&format!("Date: {date}\n"));
        }
        header.push('\n');
        header.push_str(&"-".repeat(40));
        header.push_str("\n\n");

        let footer = format!(
            "\n\n{}\nThis report was generated by the handlemail agent.\nIf you have any questions, please reply to this email.\n",
            "-".repeat(40)
        );

        format!("{header}{content}{footer}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_existing_signature_before_appending_canonical_one() {
        let formatter = ReportFormatter::new();
        let content = "Here is your summary.\n\nBest regards,\nhandlemail\n";
        let out = formatter.format_report(content, ReportFormat::Markdown, true);
        assert_eq!(out.matches("Feel free to reply").count(), 1);
        assert!(!out.contains("Best regards,"));
    }

    #[test]
    fn plain_text_strips_markdown_syntax() {
        let formatter = ReportFormatter::new();
        let out = formatter.to_plain_text("# Heading\n\n**bold** and _italic_ and [link](https://example.com)\n\n---\n");
        assert!(!out.contains('#'));
        assert!(!out.contains("**"));
        assert!(out.contains("bold"));
        assert!(out.contains("link (https://example.com)"));
        assert!(out.contains(&"-".repeat(40)));
    }

    #[test]
    fn html_wraps_rendered_body_in_style_block() {
        let formatter = ReportFormatter::new();
        let out = formatter.to_html("# Title\n\nSome **bold** text.");
        assert!(out.contains("<style>"));
        assert!(out.contains("<h1>"));
        assert!(out.contains("Title"));
        assert!(out.contains("<strong>bold</strong>"));
    }

    #[test]
    fn header_footer_wraps_content_with_subject_and_generated_by_line() {
        let formatter = ReportFormatter::new();
        let metadata = ReportMetadata { subject: Some("Re: hi".to_string()), from: Some("alice@example.com".to_string()), date: None };
        let out = formatter.add_email_header_footer("body text", &metadata);
        assert!(out.starts_with("Subject: Re: hi\n"));
        assert!(out.contains("From: alice@example.com"));
        assert!(out.contains("body text"));
        assert!(out.ends_with("If you have any questions, please reply to this email.\n"));
    }

    #[test]
    fn format_report_without_signature_leaves_content_untouched_besides_stripping() {
        let formatter = ReportFormatter::new();
        let out = formatter.format_report("plain content", ReportFormat::Markdown, false);
        assert_eq!(out, "plain content");
    }
}
