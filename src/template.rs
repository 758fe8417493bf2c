//! Query templates with `{{ Name }}` placeholders.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::range::{format_timestamp, TimeRange};

pub const START_DATE: &str = "StartDate";
pub const END_DATE: &str = "EndDate";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("malformed template near byte {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("no value for placeholder '{0}'")]
    MissingParameter(String),

    #[error("template must reference both {{{{ StartDate }}}} and {{{{ EndDate }}}}")]
    UnboundRange,

    #[error("'{0}' is reserved for the time range and cannot be set as a parameter")]
    ReservedParameter(String),
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed query template. Parsing validates the syntax once; rendering
/// only has to look values up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    segments: Vec<Segment>,
}

impl QueryTemplate {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut cursor = 0usize;

        for caps in placeholder_re().captures_iter(text) {
            let whole = caps.get(0).expect("group 0 always present");
            check_literal(&text[cursor..whole.start()], cursor)?;
            if whole.start() > cursor {
                segments.push(Segment::Literal(text[cursor..whole.start()].to_string()));
            }
            segments.push(Segment::Placeholder(caps[1].to_string()));
            cursor = whole.end();
        }
        check_literal(&text[cursor..], cursor)?;
        if cursor < text.len() {
            segments.push(Segment::Literal(text[cursor..].to_string()));
        }

        Ok(Self { segments })
    }

    /// Placeholder names in first-seen order, deduplicated.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Placeholder(name) if seen.insert(name.as_str()) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn references(&self, name: &str) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Placeholder(p) if p == name))
    }

    /// Substitutes every placeholder textually. No quoting or escaping is
    /// applied to the values.
    pub fn render(&self, params: &QueryParams) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = params
                        .lookup(name)
                        .ok_or_else(|| TemplateError::MissingParameter(name.clone()))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

/// Only an opening `{{` that did not form a placeholder is an error. A bare
/// `}}` is ordinary query text, as in nested `dynamic({...})` literals.
fn check_literal(literal: &str, base: usize) -> Result<(), TemplateError> {
    match literal.find("{{") {
        Some(pos) => Err(TemplateError::Malformed {
            offset: base + pos,
            reason: "unterminated or invalid placeholder".to_string(),
        }),
        None => Ok(()),
    }
}

/// Named values for one rendering: the time range plus free-form
/// parameters such as table names or extra filter conditions.
///
/// Cloning is how a bisection branch gets its own copy before the range is
/// narrowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    range: TimeRange,
    values: BTreeMap<String, String>,
}

impl QueryParams {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            values: BTreeMap::new(),
        }
    }

    /// Builder form of [`QueryParams::insert`].
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Result<Self, TemplateError> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) -> Result<(), TemplateError> {
        if name == START_DATE || name == END_DATE {
            return Err(TemplateError::ReservedParameter(name.to_string()));
        }
        self.values.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    /// Copy of these parameters bound to a different range.
    pub fn with_range(&self, range: TimeRange) -> Self {
        Self {
            range,
            values: self.values.clone(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            START_DATE => Some(format_timestamp(&self.range.start())),
            END_DATE => Some(format_timestamp(&self.range.end())),
            _ => self.values.get(name).cloned(),
        }
    }
}

/// Parses `KEY=VALUE` as given on the command line.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid parameter '{raw}' (expected KEY=VALUE)"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid parameter '{raw}' (empty key)"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn params() -> QueryParams {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap(),
        )
        .unwrap();
        QueryParams::new(range)
            .with("TableName", "customEvents")
            .unwrap()
    }

    #[test]
    fn renders_range_and_named_values() {
        let template = QueryTemplate::parse(
            "{{ TableName }} | where timestamp >= datetime({{StartDate}}) and timestamp < datetime({{ EndDate }})",
        )
        .unwrap();
        let query = template.render(&params()).unwrap();
        assert_eq!(
            query,
            "customEvents | where timestamp >= datetime(2024-01-01T00:00:00Z) and timestamp < datetime(2024-01-01T02:00:00Z)"
        );
    }

    #[test]
    fn missing_parameter_is_reported_by_name() {
        let template = QueryTemplate::parse("{{ TableName }} | where {{ condition }}").unwrap();
        let err = template.render(&params()).unwrap_err();
        assert_eq!(err, TemplateError::MissingParameter("condition".to_string()));
    }

    #[test]
    fn unterminated_placeholder_is_malformed() {
        let err = QueryTemplate::parse("requests | where x > {{ StartDate").unwrap_err();
        assert!(matches!(err, TemplateError::Malformed { offset: 21, .. }));
    }

    #[test]
    fn nested_dynamic_literal_is_kept_verbatim() {
        let text = r#"print d = dynamic({"a":{"b":1}}) | where t >= datetime({{ StartDate }}) and t < datetime({{ EndDate }})"#;
        let template = QueryTemplate::parse(text).unwrap();
        assert_eq!(template.placeholders(), vec!["StartDate", "EndDate"]);
        assert_eq!(
            template.render(&params()).unwrap(),
            r#"print d = dynamic({"a":{"b":1}}) | where t >= datetime(2024-01-01T00:00:00Z) and t < datetime(2024-01-01T02:00:00Z)"#
        );
    }

    #[test]
    fn stray_closing_braces_are_literal_text() {
        let template = QueryTemplate::parse("requests }} {{ TableName }}").unwrap();
        assert_eq!(template.render(&params()).unwrap(), "requests }} customEvents");
    }

    #[test]
    fn invalid_placeholder_name_is_malformed() {
        assert!(QueryTemplate::parse("{{ 1abc }}").is_err());
        assert!(QueryTemplate::parse("{{}}").is_err());
    }

    #[test]
    fn placeholders_are_deduplicated_in_order() {
        let template =
            QueryTemplate::parse("{{ EndDate }} {{StartDate}} {{ EndDate }} {{ X }}").unwrap();
        assert_eq!(template.placeholders(), vec!["EndDate", "StartDate", "X"]);
        assert!(template.references(START_DATE));
        assert!(!template.references("Y"));
    }

    #[test]
    fn range_names_are_reserved() {
        let err = params().with(START_DATE, "x").unwrap_err();
        assert_eq!(err, TemplateError::ReservedParameter("StartDate".to_string()));
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = QueryTemplate::parse("a {{ StartDate }} b {{ TableName }}").unwrap();
        assert_eq!(
            template.render(&params()).unwrap(),
            template.render(&params()).unwrap()
        );
    }

    #[test]
    fn with_range_does_not_touch_the_original() {
        let original = params();
        let narrowed_range = TimeRange::new(
            original.range().start(),
            original.range().midpoint(),
        )
        .unwrap();
        let narrowed = original.with_range(narrowed_range);
        assert_eq!(narrowed.lookup("TableName"), original.lookup("TableName"));
        assert_ne!(narrowed.lookup(END_DATE), original.lookup(END_DATE));
    }

    #[test]
    fn parse_param_splits_on_first_equals() {
        assert_eq!(
            parse_param("condition=name == \"x\"").unwrap(),
            ("condition".to_string(), "name == \"x\"".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=value").is_err());
    }
}
