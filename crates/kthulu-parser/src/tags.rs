// ABOUTME: Parses `@kthulu:<type>[:<value>] [attrs]` annotations out of comment text
// ABOUTME: Attribute lists are quote-aware; unknown types pass through untouched

use crate::extractor::CommentGroup;
use kthulu_core::{Tag, TagType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Values also accept `-` so hyphenated names like `oauth-sso` survive.
/// The tag must open the comment line; mentions inside prose are not tags.
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*@kthulu:([A-Za-z_][A-Za-z0-9_]*)(?::([A-Za-z0-9_\-]*))?(?:[ \t]+(.*))?$")
        .expect("tag pattern is valid")
});

pub struct TagParser;

impl TagParser {
    /// Parses one comment line whose delimiters are already stripped.
    pub fn parse_line(text: &str, line: u32) -> Option<Tag> {
        let text = text.trim();
        let caps = TAG_PATTERN.captures(text)?;

        let tag_type = TagType::new(caps.get(1)?.as_str());
        let value = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .filter(|v| !v.is_empty());
        let attributes = caps
            .get(3)
            .map(|m| parse_attributes(m.as_str()))
            .unwrap_or_default();

        Some(Tag {
            tag_type,
            value,
            attributes,
            line,
            content: text.to_string(),
            symbol: None,
            file: None,
        })
    }

    /// Parses a raw `//` or `/* */` comment starting at `start_line`.
    pub fn parse_comment(raw: &str, start_line: u32) -> Vec<Tag> {
        strip_comment(raw)
            .into_iter()
            .enumerate()
            .filter_map(|(offset, text)| Self::parse_line(&text, start_line + offset as u32))
            .collect()
    }

    /// Tags of a comment group, attributed to the group's symbol.
    pub fn parse_group(group: &CommentGroup) -> Vec<Tag> {
        group
            .comments
            .iter()
            .flat_map(|(line, raw)| Self::parse_comment(raw, *line))
            .map(|mut tag| {
                tag.symbol = group.symbol.clone();
                tag
            })
            .collect()
    }
}

/// Removes comment delimiters; block comments yield one entry per line.
pub fn strip_comment(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("//") {
        return vec![rest.trim().to_string()];
    }
    if let Some(rest) = raw.strip_prefix("/*") {
        let body = rest.strip_suffix("*/").unwrap_or(rest);
        return body
            .split('\n')
            .map(|l| {
                let l = l.trim();
                l.strip_prefix('*').unwrap_or(l).trim().to_string()
            })
            .collect();
    }
    vec![raw.to_string()]
}

/// Splits on spaces, tabs and commas outside quotes. Bare keys become `true`;
/// a repeated key keeps its last value.
pub fn parse_attributes(input: &str) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    for token in split_quoted(input) {
        let (key, value) = match token.find('=') {
            Some(idx) => (token[..idx].trim(), unquote(token[idx + 1..].trim())),
            None => (token.trim(), "true".to_string()),
        };
        if key.is_empty() {
            continue;
        }
        attrs.insert(key.to_string(), value);
    }
    attrs
}

fn split_quoted(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                ' ' | '\t' | ',' => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(value: &str) -> String {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return value[1..value.len() - 1].to_string();
        }
    }
    // Unterminated quote: drop the opening mark only.
    value.trim_start_matches(|c| c == '"' || c == '\'').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_value_and_attributes() {
        let tag = TagParser::parse_line("@kthulu:module:payments version=2 core", 4).unwrap();
        assert_eq!(tag.tag_type, TagType::MODULE);
        assert_eq!(tag.value.as_deref(), Some("payments"));
        assert_eq!(tag.attribute("version"), Some("2"));
        assert_eq!(tag.attribute("core"), Some("true"));
        assert_eq!(tag.line, 4);
    }

    #[test]
    fn attributes_are_empty_not_missing() {
        let tag = TagParser::parse_line("@kthulu:generated", 1).unwrap();
        assert!(tag.value.is_none());
        assert!(tag.attributes.is_empty());
    }

    #[test]
    fn quotes_protect_separators() {
        let tag = TagParser::parse_line(
            r#"@kthulu:security:billing roles="admin,accountant" condition='tenant=acme, region=eu',level=high"#,
            9,
        )
        .unwrap();
        assert_eq!(tag.attribute("roles"), Some("admin,accountant"));
        assert_eq!(tag.attribute("condition"), Some("tenant=acme, region=eu"));
        assert_eq!(tag.attribute("level"), Some("high"));
    }

    #[test]
    fn unknown_types_survive() {
        let tag = TagParser::parse_line("@kthulu:feature_flag:beta owner=growth", 2).unwrap();
        assert_eq!(tag.tag_type.as_str(), "feature_flag");
        assert!(!tag.tag_type.is_known());
    }

    #[test]
    fn hyphenated_values_are_accepted() {
        let tag = TagParser::parse_line("@kthulu:module:oauth-sso", 1).unwrap();
        assert_eq!(tag.value.as_deref(), Some("oauth-sso"));
    }

    #[test]
    fn non_matching_lines_yield_nothing() {
        assert!(TagParser::parse_line("regular comment", 1).is_none());
        assert!(TagParser::parse_line("@kthulu: spaced", 1).is_none());
        assert!(TagParser::parse_line("@kthulu:9bad", 1).is_none());
    }

    #[test]
    fn mentions_inside_prose_are_not_tags() {
        assert!(TagParser::parse_line("see foo@kthulu:module:x", 1).is_none());
        assert!(TagParser::parse_line("use @kthulu:module:x to name a module", 1).is_none());
        assert!(TagParser::parse_comment("// see foo@kthulu:module:x", 1).is_empty());
        let tags = TagParser::parse_comment("/*\n * docs mention @kthulu:handler:x\n * @kthulu:service:y\n */", 1);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].value.as_deref(), Some("y"));
    }

    #[test]
    fn block_comments_keep_line_offsets() {
        let raw = "/*\n * @kthulu:module:user\n * plain\n * @kthulu:dependency:auth\n */";
        let tags = TagParser::parse_comment(raw, 10);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].line, 11);
        assert_eq!(tags[1].line, 13);
        assert_eq!(tags[1].value.as_deref(), Some("auth"));
    }

    #[test]
    fn inline_block_comment_suffix_is_stripped() {
        let tags = TagParser::parse_comment("/* @kthulu:service:charge */", 3);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].value.as_deref(), Some("charge"));
        assert!(tags[0].attributes.is_empty());
    }

    #[test]
    fn group_tags_carry_symbol() {
        let group = CommentGroup {
            line: 5,
            end_line: 6,
            comments: vec![
                (5, "// OrderHandler serves orders.".to_string()),
                (6, "// @kthulu:handler:orders".to_string()),
            ],
            symbol: Some("OrderHandler".to_string()),
        };
        let tags = TagParser::parse_group(&group);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].symbol.as_deref(), Some("OrderHandler"));
        assert_eq!(tags[0].line, 6);
    }
}
