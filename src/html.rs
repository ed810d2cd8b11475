//! Lightweight HTML slicing
//!
//! Enough structure to pull elements out of a serialized document without a
//! DOM: tag lookup is ASCII case-insensitive and tracks nesting of the same tag.

/// Elements that never have a closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Byte offsets of one element inside a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementSpan {
    /// Start of the opening tag
    pub start: usize,
    /// First byte after the opening tag
    pub content_start: usize,
    /// First byte of the closing tag
    pub content_end: usize,
    /// First byte after the closing tag
    pub end: usize,
}

fn is_name_boundary(byte: Option<&u8>) -> bool {
    match byte {
        None => true,
        Some(b) => b.is_ascii_whitespace() || *b == b'>' || *b == b'/',
    }
}

/// Next `<tag` (not `<tagfoo`) at or after `from`
fn find_open(lower: &str, tag: &str, from: usize) -> Option<usize> {
    let needle = format!("<{}", tag);
    let mut pos = from;
    while let Some(found) = lower.get(pos..)?.find(&needle) {
        let at = pos + found;
        if is_name_boundary(lower.as_bytes().get(at + needle.len())) {
            return Some(at);
        }
        pos = at + needle.len();
    }
    None
}

fn find_close(lower: &str, tag: &str, from: usize) -> Option<usize> {
    let needle = format!("</{}", tag);
    let mut pos = from;
    while let Some(found) = lower.get(pos..)?.find(&needle) {
        let at = pos + found;
        if is_name_boundary(lower.as_bytes().get(at + needle.len())) {
            return Some(at);
        }
        pos = at + needle.len();
    }
    None
}

fn tag_end(lower: &str, from: usize) -> Option<usize> {
    lower.get(from..)?.find('>').map(|i| from + i + 1)
}

/// Locate the first `tag` element starting at or after `from`.
///
/// An element with no closing tag runs to the end of the document.
pub fn find_element_from(html: &str, tag: &str, from: usize) -> Option<ElementSpan> {
    let tag = tag.to_ascii_lowercase();
    let lower = html.to_ascii_lowercase();

    let start = find_open(&lower, &tag, from)?;
    let content_start = tag_end(&lower, start)?;

    if VOID_ELEMENTS.contains(&tag.as_str()) || lower[..content_start].ends_with("/>") {
        return Some(ElementSpan {
            start,
            content_start,
            content_end: content_start,
            end: content_start,
        });
    }

    let mut depth = 1usize;
    let mut pos = content_start;
    loop {
        let next_close = match find_close(&lower, &tag, pos) {
            Some(c) => c,
            None => {
                return Some(ElementSpan {
                    start,
                    content_start,
                    content_end: html.len(),
                    end: html.len(),
                })
            }
        };
        match find_open(&lower, &tag, pos) {
            Some(open) if open < next_close => {
                depth += 1;
                pos = tag_end(&lower, open).unwrap_or(html.len());
            }
            _ => {
                depth -= 1;
                let end = tag_end(&lower, next_close).unwrap_or(html.len());
                if depth == 0 {
                    return Some(ElementSpan {
                        start,
                        content_start,
                        content_end: next_close,
                        end,
                    });
                }
                pos = end;
            }
        }
    }
}

pub fn find_element(html: &str, tag: &str) -> Option<ElementSpan> {
    find_element_from(html, tag, 0)
}

/// Content between the first `tag` element's opening and closing tags
pub fn inner_html<'a>(html: &'a str, tag: &str) -> Option<&'a str> {
    find_element(html, tag).map(|span| &html[span.content_start..span.content_end])
}

/// The first `tag` element including its tags
pub fn outer_html<'a>(html: &'a str, tag: &str) -> Option<&'a str> {
    find_element(html, tag).map(|span| &html[span.start..span.end])
}

/// Remove every element with one of `tags`, contents included
pub fn strip_elements(html: &str, tags: &[&str]) -> String {
    let mut out = html.to_string();
    for tag in tags {
        while let Some(span) = find_element(&out, tag) {
            out.replace_range(span.start..span.end, "");
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Visible text: tags removed, common entities decoded, whitespace collapsed
pub fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    decode_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The first child node of a fragment: an element's outer HTML, or the
/// leading text if the fragment starts with text
pub fn first_child(fragment: &str) -> Option<&str> {
    let trimmed = fragment.trim_start();
    let offset = fragment.len() - trimmed.len();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.starts_with('<') {
        let end = trimmed.find('<').unwrap_or(trimmed.len());
        return Some(trimmed[..end].trim_end());
    }

    let name: String = trimmed[1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if name.is_empty() {
        return None;
    }
    find_element_from(fragment, &name, offset).map(|span| &fragment[span.start..span.end])
}

/// Parse a serialized fragment the way a page's `HTML2DOM` helper does: the
/// whole document element when `is_root`, otherwise the body's first child.
pub fn html_to_dom(html: &str, is_root: bool) -> Option<String> {
    if is_root {
        return Some(match outer_html(html, "html") {
            Some(root) => root.to_string(),
            None => format!("<html><head></head><body>{}</body></html>", html),
        });
    }
    let body = inner_html(html, "body").unwrap_or(html);
    first_child(body).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "<html><head><title>Hi</title></head><BODY class=\"x\"><div id=\"a\"><div>inner</div></div><p>tail</p></BODY></html>";

    #[test]
    fn test_nested_same_tag() {
        assert_eq!(
            outer_html(DOC, "div"),
            Some("<div id=\"a\"><div>inner</div></div>")
        );
    }

    #[test]
    fn test_case_insensitive_body() {
        assert_eq!(
            inner_html(DOC, "body"),
            Some("<div id=\"a\"><div>inner</div></div><p>tail</p>")
        );
    }

    #[test]
    fn test_tag_prefix_is_not_a_match() {
        let html = "<bodyguard>no</bodyguard><body>yes</body>";
        assert_eq!(inner_html(html, "body"), Some("yes"));
    }

    #[test]
    fn test_strip_elements() {
        let html = "<p>a</p><script>var x = '<p>';</script><style>p{}</style><p>b</p>";
        assert_eq!(strip_elements(html, &["script", "style"]), "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("<p>Tom &amp; Jerry</p>\n<p>run</p>"), "Tom & Jerry run");
    }

    #[test]
    fn test_html_to_dom_first_child() {
        assert_eq!(
            html_to_dom("<span>one</span><span>two</span>", false).as_deref(),
            Some("<span>one</span>")
        );
        assert_eq!(html_to_dom("  plain <b>x</b>", false).as_deref(), Some("plain"));
        assert_eq!(html_to_dom("<br><p>x</p>", false).as_deref(), Some("<br>"));
        assert_eq!(html_to_dom("", false), None);
    }

    #[test]
    fn test_html_to_dom_root() {
        assert_eq!(
            html_to_dom("<p>x</p>", true).as_deref(),
            Some("<html><head></head><body><p>x</p></body></html>")
        );
        assert!(html_to_dom(DOC, true).unwrap().starts_with("<html><head>"));
    }
}
