//! Typed Command Templates
//!
//! A command template is an ordered list of literal segments and named
//! placeholders, parsed once at descriptor construction. Placeholders are
//! written `{name}` where `name` is an identifier; brace pairs that do not
//! enclose a bare identifier (shell constructs like `${VAR}` or `{a,b}`)
//! stay literal text.
//!
//! Rendering binds placeholders to concrete values; an unresolved
//! placeholder is a configuration error, never silently empty text.

use std::collections::HashMap;

use crate::error::{EngineError, Result};

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Verbatim text.
    Literal(String),
    /// A named substitution point.
    Placeholder(String),
}

/// A parsed command template.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    /// Parses a template from its source text.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let segments = scan_segments(&source)?;
        Ok(Self { source, segments })
    }

    /// The original template text (part of the instance fingerprint).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed segments, in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of all placeholders, in first-appearance order, deduplicated.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Renders the template with every placeholder bound.
    pub fn render(&self, bindings: &HashMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match bindings.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(EngineError::Configuration(format!(
                            "unresolved placeholder '{{{}}}' in template '{}'",
                            name, self.source
                        )))
                    }
                },
            }
        }
        Ok(out)
    }
}

/// Scans the source into literal and placeholder segments.
fn scan_segments(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' && (i == 0 || chars[i - 1] != '$') {
            if let Some((name, end)) = scan_identifier(&chars, i + 1) {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
                i = end + 1;
                continue;
            }
        }
        literal.push(chars[i]);
        i += 1;
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Reads an identifier starting at `start` and returns it together with
/// the index of its closing brace. Identifiers are `[A-Za-z_][A-Za-z0-9_]*`.
fn scan_identifier(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    if end == start || end >= chars.len() || chars[end] != '}' {
        return None;
    }
    if chars[start].is_ascii_digit() {
        return None;
    }
    Some((chars[start..end].iter().collect(), end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_literal_only() {
        let tpl = CommandTemplate::parse("echo hello").unwrap();
        assert_eq!(tpl.segments(), &[Segment::Literal("echo hello".to_string())]);
        assert!(tpl.placeholders().is_empty());
    }

    #[test]
    fn test_parse_mixed_segments() {
        let tpl = CommandTemplate::parse("fastqc {reads} -o {outdir}").unwrap();
        assert_eq!(tpl.placeholders(), vec!["reads", "outdir"]);
        assert_eq!(tpl.segments().len(), 4);
    }

    #[test]
    fn test_render_substitutes_all() {
        let tpl = CommandTemplate::parse("cat {input} > {output}").unwrap();
        let rendered = tpl
            .render(&bindings(&[("input", "a.txt"), ("output", "b.txt")]))
            .unwrap();
        assert_eq!(rendered, "cat a.txt > b.txt");
    }

    #[test]
    fn test_render_unresolved_placeholder_fails() {
        let tpl = CommandTemplate::parse("cat {input}").unwrap();
        let result = tpl.render(&bindings(&[]));
        assert!(result.is_err());
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_shell_braces_stay_literal() {
        let tpl = CommandTemplate::parse("echo ${HOME} and {a,b}").unwrap();
        assert!(tpl.placeholders().is_empty());
        assert_eq!(tpl.render(&bindings(&[])).unwrap(), "echo ${HOME} and {a,b}");
    }

    #[test]
    fn test_dollar_brace_stays_literal_next_to_placeholder() {
        let tpl = CommandTemplate::parse("run -t ${FLOWRUNNER_CPUS} {input}").unwrap();
        assert_eq!(tpl.placeholders(), vec!["input"]);
        assert_eq!(
            tpl.render(&bindings(&[("input", "a.txt")])).unwrap(),
            "run -t ${FLOWRUNNER_CPUS} a.txt"
        );
    }

    #[test]
    fn test_repeated_placeholder_dedup_and_render() {
        let tpl = CommandTemplate::parse("cp {f} {f}.bak").unwrap();
        assert_eq!(tpl.placeholders(), vec!["f"]);
        assert_eq!(
            tpl.render(&bindings(&[("f", "x.txt")])).unwrap(),
            "cp x.txt x.txt.bak"
        );
    }

    #[test]
    fn test_unclosed_brace_is_literal() {
        let tpl = CommandTemplate::parse("echo {unclosed").unwrap();
        assert!(tpl.placeholders().is_empty());
    }

    #[test]
    fn test_digit_leading_name_is_literal() {
        let tpl = CommandTemplate::parse("sort {1col}").unwrap();
        assert!(tpl.placeholders().is_empty());
    }

    #[test]
    fn test_source_preserved() {
        let src = "bwa mem {ref} {reads} > {out}";
        let tpl = CommandTemplate::parse(src).unwrap();
        assert_eq!(tpl.source(), src);
    }

    #[test]
    fn test_underscore_names() {
        let tpl = CommandTemplate::parse("trim {reads_1} {reads_2}").unwrap();
        assert_eq!(tpl.placeholders(), vec!["reads_1", "reads_2"]);
    }
}
