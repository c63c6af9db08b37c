//! Direct-fetch fallback for the `scrape` tool.
//!
//! When the scraping tool server fails at the transport level, the manager
//! fetches the page itself and strips it down to readable text. Bounded on
//! every axis: timeout, response size, output length.

use std::sync::OnceLock;
use std::time::Duration;

use mf_domain::error::{Error, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
const MAX_TEXT_CHARS: usize = 250_000;
const USER_AGENT: &str = concat!("miroflow/", env!("CARGO_PKG_VERSION"));

/// Fetch a URL and reduce it to markdown-ish plain text.
pub async fn fetch_as_text(url: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Http(e.to_string()))?;

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Http(format!("HTTP {} fetching {url}", status.as_u16())));
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = resp.bytes().await.map_err(|e| Error::Http(e.to_string()))?;
    let body = &body[..body.len().min(MAX_BODY_BYTES)];
    let text = String::from_utf8_lossy(body);

    let rendered = if content_type.contains("html") || looks_like_html(&text) {
        html_to_text(&text)
    } else {
        text.to_string()
    };

    let mut rendered = rendered.trim().to_string();
    if rendered.is_empty() {
        return Err(Error::Http(format!("no extractable text at {url}")));
    }
    if rendered.chars().count() > MAX_TEXT_CHARS {
        rendered = rendered.chars().take(MAX_TEXT_CHARS).collect();
        rendered.push_str("\n\n[truncated]");
    }
    Ok(rendered)
}

fn looks_like_html(text: &str) -> bool {
    let head = &text[..text.len().min(512)];
    head.contains("<html") || head.contains("<!DOCTYPE") || head.contains("<!doctype")
}

/// Crude HTML → text conversion: drop script/style subtrees, turn block
/// boundaries into newlines, strip remaining tags, decode the common
/// entities, collapse whitespace.
fn html_to_text(html: &str) -> String {
    static SCRIPTS: OnceLock<regex::Regex> = OnceLock::new();
    static BLOCKS: OnceLock<regex::Regex> = OnceLock::new();
    static TAGS: OnceLock<regex::Regex> = OnceLock::new();
    static BLANKS: OnceLock<regex::Regex> = OnceLock::new();

    let scripts = SCRIPTS.get_or_init(|| {
        regex::Regex::new(
            r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<noscript[^>]*>.*?</noscript>|<head[^>]*>.*?</head>",
        )
        .unwrap()
    });
    let blocks = BLOCKS.get_or_init(|| {
        regex::Regex::new(r"(?i)</?(p|div|br|li|tr|h[1-6]|section|article|table)[^>]*>").unwrap()
    });
    let tags = TAGS.get_or_init(|| regex::Regex::new(r"(?s)<[^>]+>").unwrap());
    let blanks = BLANKS.get_or_init(|| regex::Regex::new(r"\n{3,}").unwrap());

    let text = scripts.replace_all(html, "");
    let text = blocks.replace_all(&text, "\n");
    let text = tags.replace_all(&text, " ");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    // Trim each line, then collapse runs of blank lines.
    let joined = text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    blanks.replace_all(&joined, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_tags() {
        let html = r#"<!DOCTYPE html><html><head><title>T</title>
            <script>alert("x")</script></head>
            <body><h1>Heading</h1><p>First &amp; second.</p>
            <style>.x{color:red}</style>
            <div>Third</div></body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("Heading"));
        assert!(text.contains("First & second."));
        assert!(text.contains("Third"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn block_tags_become_line_breaks() {
        let text = html_to_text("<p>one</p><p>two</p>");
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn plain_text_passthrough_detection() {
        assert!(!looks_like_html("just a plain sentence"));
        assert!(looks_like_html("<!DOCTYPE html><html>"));
    }

    #[test]
    fn collapses_blank_runs() {
        let text = html_to_text("<p>a</p>\n\n\n\n<p>b</p>");
        assert!(!text.contains("\n\n\n"));
    }
}
