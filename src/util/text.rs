use std::borrow::Cow;

/// Convert an HTML fragment to readable plain text for speech synthesis.
///
/// Single-pass scanner, no DOM: tags are dropped, `<script>`/`<style>`
/// bodies are skipped entirely, block-level closers become newlines, and
/// runs of whitespace collapse to one space. Common named entities and
/// numeric character references are decoded; unknown entities pass through
/// literally.
///
/// The output is meant for a text-to-speech engine, not for display, so
/// layout fidelity is intentionally coarse.
pub fn plain_text_of_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut chars = html.char_indices().peekable();
    let bytes = html.as_bytes();
    let mut pending_space = false;
    let mut pending_break = false;

    while let Some((idx, c)) = chars.next() {
        if c == '<' {
            // Raw-text elements swallow everything up to their closer
            let rest = &html[idx..];
            if let Some(skip) = raw_element_span(rest) {
                for _ in 0..rest[..skip].chars().count().saturating_sub(1) {
                    chars.next();
                }
                continue;
            }

            // Ordinary tag: consume to '>', ignoring '>' inside quoted
            // attribute values
            let mut name = String::new();
            let mut in_name = true;
            let mut quote: Option<char> = None;
            for (_, tc) in chars.by_ref() {
                match quote {
                    Some(q) if tc == q => quote = None,
                    Some(_) => continue,
                    None if tc == '"' || tc == '\'' => quote = Some(tc),
                    None if tc == '>' => break,
                    None => {}
                }
                if in_name {
                    if tc.is_ascii_alphanumeric() || tc == '/' {
                        name.push(tc.to_ascii_lowercase());
                    } else if !name.is_empty() {
                        in_name = false;
                    }
                }
            }
            if is_block_boundary(name.trim_matches('/')) {
                pending_break = !out.is_empty();
                pending_space = false;
            }
            continue;
        }

        if c == '&' {
            // Entity: bounded lookahead to ';'
            let rest = &bytes[idx + 1..];
            let end = rest
                .iter()
                .take(12)
                .position(|&b| b == b';')
                .map(|p| idx + 1 + p);
            if let Some(end) = end {
                let entity = &html[idx + 1..end];
                if let Some(decoded) = decode_entity(entity) {
                    for _ in 0..entity.chars().count() + 1 {
                        chars.next();
                    }
                    flush_separators(&mut out, &mut pending_break, &mut pending_space);
                    out.push_str(&decoded);
                    continue;
                }
            }
            flush_separators(&mut out, &mut pending_break, &mut pending_space);
            out.push('&');
            continue;
        }

        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }

        flush_separators(&mut out, &mut pending_break, &mut pending_space);
        out.push(c);
    }

    out
}

fn flush_separators(out: &mut String, pending_break: &mut bool, pending_space: &mut bool) {
    if *pending_break {
        out.push('\n');
    } else if *pending_space {
        out.push(' ');
    }
    *pending_break = false;
    *pending_space = false;
}

/// If `rest` starts a `<script>` or `<style>` element, return the byte span
/// covering the whole element including its closing tag.
fn raw_element_span(rest: &str) -> Option<usize> {
    let lower = rest.get(..8)?.to_ascii_lowercase();
    let (name, close) = if lower.starts_with("<script") {
        ("script", "</script")
    } else if lower.starts_with("<style") {
        ("style", "</style")
    } else {
        return None;
    };

    let lower_all = rest.to_ascii_lowercase();
    match lower_all.find(close) {
        Some(pos) => {
            // Consume through the closer's '>'
            let tail = &rest[pos..];
            let gt = tail.find('>').map(|g| pos + g + 1).unwrap_or(rest.len());
            Some(gt)
        }
        None => {
            tracing::debug!(element = name, "unterminated raw element in html");
            Some(rest.len())
        }
    }
}

fn is_block_boundary(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "br"
            | "li"
            | "ul"
            | "ol"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "tr"
            | "table"
            | "blockquote"
            | "pre"
            | "section"
            | "article"
            | "figure"
            | "figcaption"
    )
}

fn decode_entity(entity: &str) -> Option<Cow<'static, str>> {
    let decoded = match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "hellip" => "\u{2026}",
        "rsquo" => "\u{2019}",
        "lsquo" => "\u{2018}",
        "rdquo" => "\u{201d}",
        "ldquo" => "\u{201c}",
        _ => {
            let code = if let Some(hex) = entity.strip_prefix("#x").or(entity.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok()?
            } else {
                return None;
            };
            return char::from_u32(code).map(|c| Cow::Owned(c.to_string()));
        }
    };
    Some(Cow::Borrowed(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_strips_tags() {
        assert_eq!(
            plain_text_of_html("<b>Hello</b> <i>world</i>"),
            "Hello world"
        );
    }

    #[test]
    fn test_plain_text_of_plain_input() {
        assert_eq!(plain_text_of_html("already plain"), "already plain");
    }

    #[test]
    fn test_block_tags_become_newlines() {
        assert_eq!(
            plain_text_of_html("<p>First paragraph</p><p>Second one</p>"),
            "First paragraph\nSecond one"
        );
        assert_eq!(plain_text_of_html("line one<br>line two"), "line one\nline two");
        assert_eq!(plain_text_of_html("one<br/>two"), "one\ntwo");
    }

    #[test]
    fn test_whitespace_collapses() {
        assert_eq!(
            plain_text_of_html("a  lot\n\n   of\t\tspace"),
            "a lot of space"
        );
    }

    #[test]
    fn test_no_leading_or_trailing_separator() {
        assert_eq!(plain_text_of_html("<p>only</p>"), "only");
        assert_eq!(plain_text_of_html("  padded  "), "padded");
    }

    #[test]
    fn test_entities_decode() {
        assert_eq!(
            plain_text_of_html("Fish &amp; chips &lt;fresh&gt;"),
            "Fish & chips <fresh>"
        );
        assert_eq!(plain_text_of_html("&#65;&#x42;"), "AB");
        assert_eq!(plain_text_of_html("non&nbsp;breaking"), "non breaking");
    }

    #[test]
    fn test_unknown_entity_passes_through() {
        assert_eq!(plain_text_of_html("&bogus; stays"), "&bogus; stays");
    }

    #[test]
    fn test_script_and_style_bodies_skipped() {
        assert_eq!(
            plain_text_of_html("before<script>var x = \"<p>not text</p>\";</script>after"),
            "beforeafter"
        );
        assert_eq!(
            plain_text_of_html("<style>p { color: red }</style>styled"),
            "styled"
        );
    }

    #[test]
    fn test_unterminated_script_swallows_rest() {
        assert_eq!(plain_text_of_html("ok<script>never closed"), "ok");
    }

    #[test]
    fn test_attributes_do_not_leak() {
        assert_eq!(
            plain_text_of_html(r#"<a href="https://example.com" title="x>y">link</a>"#),
            "link"
        );
        assert_eq!(
            plain_text_of_html(r#"<img src="cat.jpg" alt="a cat">caption"#),
            "caption"
        );
    }

    #[test]
    fn test_nested_structure() {
        let html = "<div><h1>Title</h1><p>Body with <em>emphasis</em>.</p>\
                    <ul><li>one</li><li>two</li></ul></div>";
        assert_eq!(
            plain_text_of_html(html),
            "Title\nBody with emphasis.\none\ntwo"
        );
    }

    #[test]
    fn test_unicode_preserved() {
        assert_eq!(
            plain_text_of_html("<p>日本語のテキスト</p>"),
            "日本語のテキスト"
        );
    }
}
