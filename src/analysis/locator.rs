use super::{encoded_marker, Context, Occurrence, OccurrenceMap, ReflectionLocator};
use crate::transform::Encoder;

/// Finds marker reflections and classifies the HTML context around each one.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkerLocator;

impl ReflectionLocator for MarkerLocator {
    fn locate(&self, text: &str, encoder: Option<&dyn Encoder>) -> OccurrenceMap {
        let marker = encoded_marker(encoder);
        // ASCII lowercasing keeps byte offsets aligned with `text`.
        let lower = text.to_ascii_lowercase();
        let needle = marker.to_ascii_lowercase();
        let mut out = OccurrenceMap::new();
        for (pos, _) in lower.match_indices(&needle) {
            let context = classify(&lower, pos);
            out.insert(pos, Occurrence::new(pos, context));
        }
        out
    }
}

fn open_without_close(text: &str, pos: usize, open: &str, close: &str) -> Option<usize> {
    let head = &text[..pos];
    let start = head.rfind(open)?;
    match head[start..].find(close) {
        Some(_) => None,
        None => Some(start),
    }
}

fn classify(text: &str, pos: usize) -> Context {
    if open_without_close(text, pos, "<!--", "-->").is_some() {
        return Context::Comment;
    }
    if let Some(start) = open_without_close(text, pos, "<script", "</script") {
        let body_start = text[start..pos]
            .find('>')
            .map(|i| start + i + 1)
            .unwrap_or(pos);
        return Context::Script {
            quote: open_quote(&text[body_start..pos]),
        };
    }
    if let Some(start) = open_without_close(text, pos, "<", ">") {
        return attribute_context(&text[start + 1..pos]);
    }
    Context::Html {
        tag: enclosing_tag(&text[..pos]),
    }
}

/// Quote character left open at the end of a script fragment, if any.
fn open_quote(script: &str) -> Option<char> {
    let mut current: Option<char> = None;
    let mut escaped = false;
    for ch in script.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match (current, ch) {
            (_, '\\') => escaped = true,
            (None, '\'' | '"' | '`') => current = Some(ch),
            (Some(q), c) if c == q => current = None,
            _ => {}
        }
    }
    current
}

fn attribute_context(inside: &str) -> Context {
    let tag: String = inside
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '/')
        .collect();
    let rest = &inside[tag.len()..];

    match rest.rfind('=') {
        Some(eq) => {
            let name = rest[..eq]
                .trim_end()
                .rsplit(|c: char| c.is_whitespace())
                .next()
                .unwrap_or_default()
                .to_string();
            let value = rest[eq + 1..].trim_start();
            let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'');
            if let Some(q) = quote {
                if value[1..].contains(q) {
                    // value already closed; the marker sits between attributes
                    return Context::Attribute {
                        tag,
                        name: String::new(),
                        quote: None,
                    };
                }
            }
            Context::Attribute { tag, name, quote }
        }
        None => Context::Attribute {
            tag,
            name: String::new(),
            quote: None,
        },
    }
}

fn enclosing_tag(head: &str) -> String {
    let bytes = head.as_bytes();
    let mut idx = head.len();
    while let Some(lt) = head[..idx].rfind('<') {
        let next = bytes.get(lt + 1).copied().unwrap_or(b' ');
        if next.is_ascii_alphabetic() {
            return head[lt + 1..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
        }
        idx = lt;
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::MARKER;
    use crate::transform::Base64Encoder;

    fn only(text: &str) -> Context {
        let found = MarkerLocator.locate(text, None);
        assert_eq!(found.len(), 1, "{found:?}");
        found.into_values().next().unwrap().context
    }

    #[test]
    fn html_body_reflection() {
        let ctx = only(&format!("<div><p>hello {MARKER}</p></div>"));
        assert_eq!(
            ctx,
            Context::Html {
                tag: "p".to_string()
            }
        );
    }

    #[test]
    fn quoted_attribute_reflection() {
        let ctx = only(&format!(r#"<input type="text" value="{MARKER}">"#));
        assert_eq!(
            ctx,
            Context::Attribute {
                tag: "input".to_string(),
                name: "value".to_string(),
                quote: Some('"'),
            }
        );
    }

    #[test]
    fn script_string_reflection() {
        let ctx = only(&format!("<script>var a = 'it\\'s {MARKER}';</script>"));
        assert_eq!(ctx, Context::Script { quote: Some('\'') });
    }

    #[test]
    fn bare_script_reflection() {
        let ctx = only(&format!("<SCRIPT type=\"text/javascript\">x = {MARKER};</SCRIPT>"));
        assert_eq!(ctx, Context::Script { quote: None });
    }

    #[test]
    fn comment_reflection() {
        assert_eq!(only(&format!("<!-- {MARKER} -->")), Context::Comment);
    }

    #[test]
    fn every_reflection_is_keyed_by_position() {
        let text = format!("{MARKER}<a href='{MARKER}'>x</a>");
        let found = MarkerLocator.locate(&text, None);
        let positions: Vec<usize> = found.keys().copied().collect();
        assert_eq!(positions, vec![0, 15]);
    }

    #[test]
    fn encoded_marker_is_located() {
        let found = MarkerLocator.locate("<b>djNkbTBz</b>", Some(&Base64Encoder));
        assert_eq!(found.len(), 1);
        assert!(MarkerLocator.locate("<b>djNkbTBz</b>", None).is_empty());
    }
}
