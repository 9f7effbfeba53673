use once_cell::sync::Lazy;
use regex::Regex;

static SVG_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(/?)svg\b[^>]*>").expect("valid svg tag regex"));
static SVG_OPEN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^<svg\b[^>]*>").expect("valid svg tag regex"));
static XMLNS_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\sxmlns\s*=\s*["']"#).expect("valid xmlns regex"));

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// The first complete top-level `<svg>` element, nested `<svg>` children
/// included. `None` if the tags never balance.
fn first_svg_element(reply: &str) -> Option<&str> {
    let mut start = None;
    let mut depth = 0usize;
    for tag in SVG_TAG.captures_iter(reply) {
        let whole = tag.get(0)?;
        let closing = tag.get(1).map(|m| !m.as_str().is_empty()).unwrap_or(false);
        let self_closing = whole.as_str().ends_with("/>");
        match start {
            None if closing => continue,
            None if self_closing => return Some(whole.as_str()),
            None => {
                start = Some(whole.start());
                depth = 1;
            }
            Some(begin) if closing => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[begin..whole.end()]);
                }
            }
            Some(_) if self_closing => {}
            Some(_) => depth += 1,
        }
    }
    None
}

/// Pulls the first `<svg>` element out of a model reply and turns it into a
/// standalone document. Returns `None` when the reply holds no complete SVG.
pub fn extract_svg_document(reply: &str) -> Option<String> {
    let element = first_svg_element(reply)?;
    let open_tag = SVG_OPEN_TAG.find(element)?.as_str();

    let mut document = String::with_capacity(element.len() + 96);
    document.push_str(XML_DECLARATION);
    document.push('\n');
    if XMLNS_ATTR.is_match(open_tag) {
        document.push_str(element);
    } else {
        document.push_str(&element[..4]);
        document.push_str(&format!(r#" xmlns="{SVG_NAMESPACE}""#));
        document.push_str(&element[4..]);
    }
    document.push('\n');
    Some(document)
}
