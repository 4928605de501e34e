//! HTML minifier applied to rendered output
//!
//! `<pre>`, `<code>`, `<script>` and `<textarea>` blocks are set aside before
//! whitespace is collapsed and restored afterwards, so their contents are
//! never touched.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::debug;
use uuid::Uuid;

static PRESERVED: LazyLock<[(&'static str, Regex); 4]> = LazyLock::new(|| {
    [
        ("PRE", Regex::new(r"(?is)<pre[^>]*>.*?</pre>").expect("static regex")),
        ("CODE", Regex::new(r"(?is)<code[^>]*>.*?</code>").expect("static regex")),
        ("SCRIPT", Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("static regex")),
        ("TEXTAREA", Regex::new(r"(?is)<textarea[^>]*>.*?</textarea>").expect("static regex")),
    ]
});
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static TAG_TRAILING_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(</?\w+[^>]*?)[[:space:]]+(/?>)").expect("static regex"));
static BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(<[^<>]+>)[[:space:]]+(</?\w)").expect("static regex"));
static RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[[:space:]]{2,}").expect("static regex"));

const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", "\u{a0}"),
    ("&mdash;", "\u{2014}"),
    ("&ndash;", "\u{2013}"),
    ("&laquo;", "\u{ab}"),
    ("&raquo;", "\u{bb}"),
    ("&bdquo;", "\u{201e}"),
    ("&ldquo;", "\u{201c}"),
];

/// Blocks lifted out of the document, restored in reverse order
struct Stash {
    key: String,
    groups: Vec<(&'static str, Vec<String>)>,
}

impl Stash {
    fn new() -> Self {
        Self {
            key: Uuid::now_v7().simple().to_string(),
            groups: Vec::new(),
        }
    }

    fn take(&mut self, content: &str, label: &'static str, pattern: &Regex) -> String {
        let mut saved = Vec::new();
        let key = &self.key;
        let replaced = pattern.replace_all(content, |caps: &Captures<'_>| {
            saved.push(caps[0].to_string());
            format!("<{}|{}|{}>", label, saved.len() - 1, key)
        });
        let replaced = replaced.into_owned();
        self.groups.push((label, saved));
        replaced
    }

    fn restore(self, mut content: String) -> String {
        for (label, saved) in self.groups.into_iter().rev() {
            for (i, block) in saved.iter().enumerate() {
                content = content.replace(&format!("<{}|{}|{}>", label, i, self.key), block);
            }
        }
        content
    }
}

/// Collapses insignificant whitespace in rendered HTML
///
/// With `keep_comments`, HTML comments survive untouched; otherwise they are
/// removed.
pub fn minify_html(content: &str, keep_comments: bool) -> String {
    debug!(len = content.len(), keep_comments, "minify_html: called");
    let mut stash = Stash::new();

    let mut content = content.to_string();
    for (label, pattern) in PRESERVED.iter() {
        content = stash.take(&content, *label, pattern);
    }

    content = if keep_comments {
        stash.take(&content, "COMMENT", &COMMENT)
    } else {
        COMMENT.replace_all(&content, "").into_owned()
    };

    for (entity, replacement) in ENTITIES {
        content = content.replace(entity, replacement);
    }

    content = TAG_TRAILING_SPACE.replace_all(&content, "$1$2").into_owned();
    while BETWEEN_TAGS.is_match(&content) {
        content = BETWEEN_TAGS.replace_all(&content, "$1$2").into_owned();
    }
    content = RUNS.replace_all(&content, " ").into_owned();

    stash.restore(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace_between_tags() {
        let html = "<ul>\n    <li>One</li>\n    <li>Two   words</li>\n</ul>";
        assert_eq!(minify_html(html, false), "<ul><li>One</li><li>Two words</li></ul>");
    }

    #[test]
    fn test_preserves_pre_script_and_textarea() {
        let html = "<div>\n  <pre>  keep\n   this </pre>\n  <script>\n var a  =  1;\n</script>\n  <textarea>\n x  </textarea>\n</div>";
        let out = minify_html(html, false);
        assert!(out.contains("<pre>  keep\n   this </pre>"));
        assert!(out.contains("<script>\n var a  =  1;\n</script>"));
        assert!(out.contains("<textarea>\n x  </textarea>"));
        assert!(out.starts_with("<div><pre>"));
    }

    #[test]
    fn test_comments_removed_or_kept() {
        let html = "<p>a</p>  <!-- note   here -->  <p>b</p>";
        assert_eq!(minify_html(html, false), "<p>a</p><p>b</p>");
        assert!(minify_html(html, true).contains("<!-- note   here -->"));
    }

    #[test]
    fn test_entities_and_tag_spacing() {
        assert_eq!(minify_html("<p >a&nbsp;&mdash;&laquo;b&raquo;</p >", false), "<p>a\u{a0}—«b»</p>");
        assert_eq!(minify_html("<img src=\"x\"   />", false), "<img src=\"x\"/>");
    }
}
