//! Message templates and `{{name}}` placeholder rendering.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{Collectable, Database, Identifiable};
use crate::Result;

pub type TemplateId = Uuid;

/// Subject and body of a message. The plain-text body is derived from the
/// html once, when the template is created.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Template {
    pub id: TemplateId,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Template {
    pub fn new(subject: impl Into<String>, html: impl Into<String>) -> Self {
        let html = html.into();
        Self {
            id: crate::db::new_id(),
            subject: subject.into(),
            text: html_to_text(&html),
            html,
            created_at: Utc::now(),
        }
    }

    pub fn render(&self, vars: &HashMap<&str, String>) -> Rendered {
        Rendered {
            subject: substitute(&self.subject, vars),
            html: substitute(&self.html, vars),
            text: substitute(&self.text, vars),
        }
    }
}

impl Collectable for Template {
    fn get_collection_name() -> &'static str {
        "template"
    }
}

impl Identifiable for Template {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

/// Final message content with all known placeholders replaced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub fn create_template(
    db: &Database,
    subject: impl Into<String>,
    html: impl Into<String>,
) -> Result<Template> {
    let template = Template::new(subject, html);
    db.set(&template)?;
    Ok(template)
}

pub fn get_template(db: &Database, id: TemplateId) -> Result<Option<Template>> {
    db.get(id)
}

/// Replaces every `{{name}}` occurrence for which `vars` holds a value.
///
/// Substitution is a single left-to-right pass, so values containing
/// placeholders are never expanded again. Names match literally, so
/// `{{ email }}` is not `{{email}}`. Unknown placeholders are kept
/// verbatim.
pub fn substitute(input: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Converts an html body into readable plain text.
///
/// This is intentionally simple: markup is stripped, block level elements
/// and `<br>` become line breaks, links keep their target in parentheses and
/// the common entities are decoded. Contents of `head`, `style` and `script`
/// are dropped.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    let mut skip_until: Option<&'static str> = None;
    let mut pending_href: Vec<Option<String>> = Vec::new();

    while let Some(open) = rest.find('<') {
        if skip_until.is_none() {
            push_text(&mut out, &rest[..open]);
        }
        let Some(close) = rest[open..].find('>') else {
            rest = &rest[open..];
            break;
        };
        let tag = &rest[open + 1..open + close];
        rest = &rest[open + close + 1..];

        let closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        if let Some(end) = skip_until {
            if closing && name == end {
                skip_until = None;
            }
            continue;
        }

        match name.as_str() {
            "head" | "style" | "script" if !closing => {
                skip_until = Some(match name.as_str() {
                    "head" => "head",
                    "style" => "style",
                    _ => "script",
                });
            }
            "br" => out.push('\n'),
            "a" if !closing => pending_href.push(attribute(tag, "href")),
            "a" => {
                if let Some(Some(href)) = pending_href.pop() {
                    if !href.starts_with('#') && !out.trim_end().ends_with(href.as_str()) {
                        out.push_str(" (");
                        out.push_str(&href);
                        out.push(')');
                    }
                }
            }
            "li" if !closing => {
                break_line(&mut out);
                out.push_str("- ");
            }
            "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "ul" | "ol" | "tr"
            | "table" | "blockquote" => {
                if closing {
                    break_line(&mut out);
                    out.push('\n');
                } else {
                    break_line(&mut out);
                }
            }
            "li" => break_line(&mut out),
            "hr" => {
                break_line(&mut out);
                out.push_str("---\n");
            }
            _ => (),
        }
    }
    if skip_until.is_none() {
        push_text(&mut out, rest);
    }

    tidy(&out)
}

fn push_text(out: &mut String, raw: &str) {
    let decoded = decode_entities(raw);
    for c in decoded.chars() {
        if c.is_whitespace() {
            if !out.ends_with(|p: char| p.is_whitespace()) && !out.is_empty() {
                out.push(' ');
            }
        } else {
            out.push(c);
        }
    }
}

fn break_line(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Trims every line and collapses runs of blank lines into one.
fn tidy(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let start = lower.find(&format!("{name}="))? + name.len() + 1;
    let value = &tag[start..];
    let value = match value.chars().next()? {
        q @ ('"' | '\'') => value[1..].split(q).next()?,
        _ => value.split_whitespace().next()?,
    };
    Some(decode_entities(value))
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn replaces_every_occurrence() {
        let out = substitute(
            "{{email}} and again {{email}}",
            &vars(&[("email", "a@example.com")]),
        );
        assert_eq!(out, "a@example.com and again a@example.com");
    }

    #[test]
    fn keeps_unknown_and_unterminated_placeholders() {
        let out = substitute("{{who}} {{email", &vars(&[("email", "x")]));
        assert_eq!(out, "{{who}} {{email");
    }

    #[test]
    fn names_match_literally() {
        let out = substitute("{{ email }} {{email}}", &vars(&[("email", "x")]));
        assert_eq!(out, "{{ email }} x");
    }

    #[test]
    fn values_are_not_expanded_twice() {
        let out = substitute(
            "{{email}}",
            &vars(&[("email", "{{unsubscribe}}"), ("unsubscribe", "nope")]),
        );
        assert_eq!(out, "{{unsubscribe}}");
    }

    #[test]
    fn render_touches_subject_and_both_bodies() {
        let template = Template::new("Hi {{email}}", "<p>Leave: {{unsubscribe}}</p>");
        let rendered = template.render(&vars(&[
            ("email", "a@example.com"),
            ("unsubscribe", "https://x/u"),
        ]));
        assert_eq!(rendered.subject, "Hi a@example.com");
        assert_eq!(rendered.html, "<p>Leave: https://x/u</p>");
        assert_eq!(rendered.text, "Leave: https://x/u");
    }

    #[rstest]
    #[case("<p>Hello&nbsp;<b>world</b></p>", "Hello world")]
    #[case("<p>one</p><p>two</p>", "one\n\ntwo")]
    #[case("line<br>break", "line\nbreak")]
    #[case("<ul><li>a</li><li>b</li></ul>", "- a\n- b")]
    #[case(
        "<html><head><title>x</title><style>p{}</style></head><body>hi</body></html>",
        "hi"
    )]
    #[case("<a href=\"https://example.com\">site</a>", "site (https://example.com)")]
    #[case("Fish &amp; chips &lt;3", "Fish & chips <3")]
    fn html_to_text_cases(#[case] html: &str, #[case] text: &str) {
        assert_eq!(html_to_text(html), text);
    }
}
