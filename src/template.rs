//! Strict `{field}` template rendering.
//!
//! Command templates are user-authored and end up in a shell, so every
//! placeholder must name a key the context actually declares. Rendering is
//! all-or-nothing: a template either renders completely or fails before any
//! substitution happens.
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;

/// Flat, allow-listed key/value context for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// Parsed template; `{{` and `}}` render as literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((idx, ch)) = chars.next() {
            match ch {
                '{' => {
                    if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        literal.push('{');
                        continue;
                    }
                    let mut field = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(anyhow!(
                                    "nested '{{' in placeholder starting at offset {idx} of template {source:?}"
                                ));
                            }
                            other => field.push(other),
                        }
                    }
                    if !closed {
                        return Err(anyhow!(
                            "unclosed '{{' at offset {idx} in template {source:?}"
                        ));
                    }
                    if field.trim().is_empty() {
                        return Err(anyhow!(
                            "empty placeholder at offset {idx} in template {source:?}"
                        ));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => {
                    if matches!(chars.peek(), Some((_, '}'))) {
                        chars.next();
                        literal.push('}');
                        continue;
                    }
                    return Err(anyhow!(
                        "single '}}' at offset {idx} in template {source:?}; use '}}}}' for a literal brace"
                    ));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Field names referenced by the template, in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Fail on the first field not admitted by `allowed`.
    pub fn check_fields(&self, allowed: impl Fn(&str) -> bool, available: &str) -> Result<()> {
        for field in self.fields() {
            if !allowed(field) {
                return Err(anyhow!(
                    "template references undeclared field {field:?} (available: {available})"
                ));
            }
        }
        Ok(())
    }

    pub fn render(&self, context: &TemplateContext) -> Result<String> {
        self.check_fields(
            |field| context.contains(field),
            &context.keys().collect::<Vec<_>>().join(", "),
        )?;
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => out.push_str(context.get(name).unwrap_or_default()),
            }
        }
        Ok(out)
    }
}

/// Parse and render in one step.
pub fn render(source: &str, context: &TemplateContext) -> Result<String> {
    Template::parse(source)?.render(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TemplateContext {
        let mut ctx = TemplateContext::new();
        ctx.insert("case_id", "alpha");
        ctx.insert("version", "baseline");
        ctx.insert("params_cell", "adder");
        ctx
    }

    #[test]
    fn renders_declared_fields() {
        let rendered = render("echo {params_cell}-{version} > {case_id}.txt", &context())
            .expect("render template");
        assert_eq!(rendered, "echo adder-baseline > alpha.txt");
    }

    #[test]
    fn undeclared_field_is_named_in_error() {
        let err = render("echo {case_id} {undeclared_field}", &context())
            .expect_err("undeclared field must fail");
        let message = err.to_string();
        assert!(message.contains("undeclared_field"), "{message}");
        assert!(message.contains("params_cell"), "{message}");
    }

    #[test]
    fn dotted_lookup_is_not_traversal() {
        let err = render("{params.cell}", &context()).expect_err("dotted field must fail");
        assert!(err.to_string().contains("params.cell"));
    }

    #[test]
    fn doubled_braces_are_literal() {
        let rendered = render("awk '{{print $1}}' {case_id}", &context()).expect("render");
        assert_eq!(rendered, "awk '{print $1}' alpha");
    }

    #[test]
    fn malformed_templates_fail_to_parse() {
        assert!(Template::parse("echo {case_id").is_err());
        assert!(Template::parse("echo }").is_err());
        assert!(Template::parse("echo {}").is_err());
        assert!(Template::parse("echo {a{b}}").is_err());
    }

    #[test]
    fn fields_lists_placeholders_in_order() {
        let template = Template::parse("{b}{a}{{x}}{b}").expect("parse");
        assert_eq!(template.fields().collect::<Vec<_>>(), vec!["b", "a", "b"]);
    }

    #[test]
    fn template_without_placeholders_renders_verbatim() {
        let rendered = render("true", &TemplateContext::new()).expect("render");
        assert_eq!(rendered, "true");
    }
}
