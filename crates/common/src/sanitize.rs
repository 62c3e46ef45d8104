//! Markup stripping for free text that is fanned out to other participants.
//!
//! Every tag is removed. The contents of elements that never render as
//! text (`script`, `style`, `textarea`, `noscript`, `option`) are dropped
//! along with their tags. Whatever survives is HTML-escaped so a client
//! inserting the text into a page cannot be tricked into parsing markup.

/// Elements whose inner text is discarded together with the element.
const NON_TEXT_ELEMENTS: [&str; 5] = ["script", "style", "textarea", "noscript", "option"];

/// Strip every tag from `input` and escape the remaining text.
#[must_use]
pub fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(lt) = rest.find('<') {
        let (text, tail) = rest.split_at(lt);
        escape_into(&mut out, text);

        if !starts_tag(tail) {
            out.push_str("&lt;");
            rest = tail.get(1..).unwrap_or_default();
            continue;
        }

        // Unterminated tag: nothing after it can be trusted as text.
        let Some(gt) = tail.find('>') else {
            return out;
        };

        let tag = tail.get(1..gt).unwrap_or_default();
        rest = tail.get(gt + 1..).unwrap_or_default();

        if let Some(name) = opening_tag_name(tag) {
            if let Some(element) = NON_TEXT_ELEMENTS
                .iter()
                .find(|e| e.eq_ignore_ascii_case(name))
            {
                rest = skip_past_closing(rest, element);
            }
        }
    }

    escape_into(&mut out, rest);
    out
}

/// Whether the text at a `<` begins a tag, comment, or declaration.
fn starts_tag(s: &str) -> bool {
    matches!(
        s.chars().nth(1),
        Some(c) if c.is_ascii_alphabetic() || c == '/' || c == '!' || c == '?'
    )
}

/// Name of an opening tag (`script` for `<script type="x">`), `None` for
/// closing tags, comments, and declarations.
fn opening_tag_name(tag: &str) -> Option<&str> {
    if tag.starts_with(['/', '!', '?']) {
        return None;
    }
    let end = tag
        .find(|c: char| c.is_ascii_whitespace() || c == '/')
        .unwrap_or(tag.len());
    tag.get(..end)
}

/// Advance past `</element ...>`, or to the end of input if it never closes.
fn skip_past_closing<'a>(s: &'a str, element: &str) -> &'a str {
    let lower = s.to_ascii_lowercase();
    let needle = format!("</{element}");
    match lower.find(&needle) {
        Some(start) => match lower.get(start..).and_then(|t| t.find('>')) {
            Some(gt) => s.get(start + gt + 1..).unwrap_or_default(),
            None => "",
        },
        None => "",
    }
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(strip_markup("hello there"), "hello there");
        assert_eq!(strip_markup(""), "");
    }

    #[test]
    fn test_tags_removed_text_kept() {
        assert_eq!(strip_markup("<b>bold</b> move"), "bold move");
        assert_eq!(
            strip_markup(r#"<a href="http://x">link</a>"#),
            "link"
        );
        assert_eq!(strip_markup("line<br/>break"), "linebreak");
    }

    #[test]
    fn test_script_content_dropped() {
        assert_eq!(strip_markup("<script>alert(1)</script>ok"), "ok");
        assert_eq!(strip_markup("a<STYLE>p{}</Style>b"), "ab");
        assert_eq!(strip_markup("x<script>never closed"), "x");
    }

    #[test]
    fn test_stray_angle_brackets_escaped() {
        assert_eq!(strip_markup("1 < 2 > 0"), "1 &lt; 2 &gt; 0");
        assert_eq!(strip_markup("<3"), "&lt;3");
    }

    #[test]
    fn test_entities_escaped() {
        assert_eq!(strip_markup("Tom & \"Jerry\""), "Tom &amp; &quot;Jerry&quot;");
    }

    #[test]
    fn test_comments_and_unterminated_tags() {
        assert_eq!(strip_markup("a<!-- hidden -->b"), "ab");
        assert_eq!(strip_markup("safe<img src=x onerror=alert(1)"), "safe");
    }

    #[test]
    fn test_multibyte_text_preserved() {
        assert_eq!(strip_markup("<i>héllo 👋</i>"), "héllo 👋");
    }
}
