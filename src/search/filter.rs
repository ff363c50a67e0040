//! Metadata filter parsing and compilation.
//!
//! The JSON filter payload is parsed at the boundary into a typed
//! [`MetadataFilter`]: a recursive [`FilterNode`] tree plus optional creation
//! date bounds. [`compile`] then turns it into a [`Predicate`] that the storage
//! engine renders into its own query language.
//!
//! ```json
//! {
//!   "where": {"jsonpath": "$.tag", "and": [{"jsonpath": "$.status"}]},
//!   "start_date": "2024-01-01",
//!   "end_date": "2024-01-31T23:59:59Z"
//! }
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::jsonpath::JsonPath;
use crate::error::FilterError;

/// A boolean tree over metadata path conditions.
///
/// Precedence is exactly the nesting of the tree; no normalization is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// Holds when the path selects at least one value in the metadata document.
    Path(JsonPath),
    /// Holds when every child holds.
    All(Vec<FilterNode>),
    /// Holds when any child holds.
    Any(Vec<FilterNode>),
}

/// Inclusive bounds on a record's creation timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateBounds {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// A parsed metadata filter payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    pub root: Option<FilterNode>,
    pub dates: DateBounds,
}

/// A composable condition over stored messages.
///
/// Produced by [`compile`] and by the query assembler; rendered by the storage
/// engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    SessionIs(String),
    NotDeleted,
    JsonPathExists(JsonPath),
    CreatedAtOrAfter(DateTime<Utc>),
    CreatedAtOrBefore(DateTime<Utc>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

/// Wire shape of a filter node: `{"jsonpath": "...", "and": [...], "or": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFilterNode {
    #[serde(default)]
    jsonpath: Option<String>,
    #[serde(default)]
    and: Option<Vec<RawFilterNode>>,
    #[serde(default)]
    or: Option<Vec<RawFilterNode>>,
}

impl FilterNode {
    /// Parse a `where` payload into a filter tree.
    pub fn from_json(value: &Value) -> Result<Self, FilterError> {
        let raw = RawFilterNode::deserialize(value)
            .map_err(|e| FilterError::InvalidNode(e.to_string()))?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawFilterNode> for FilterNode {
    type Error = FilterError;

    /// A node's own path, its `and` group and its `or` group are conjoined.
    fn try_from(raw: RawFilterNode) -> Result<Self, Self::Error> {
        let mut parts = Vec::new();

        if let Some(path) = raw.jsonpath.filter(|p| !p.trim().is_empty()) {
            parts.push(FilterNode::Path(JsonPath::parse(&path)?));
        }
        let and = raw.and.unwrap_or_default();
        if !and.is_empty() {
            let children = and
                .into_iter()
                .map(FilterNode::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            parts.push(FilterNode::All(children));
        }
        let or = raw.or.unwrap_or_default();
        if !or.is_empty() {
            let children = or
                .into_iter()
                .map(FilterNode::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            parts.push(FilterNode::Any(children));
        }

        match parts.len() {
            0 => Err(FilterError::EmptyNode),
            1 => Ok(parts.remove(0)),
            _ => Ok(FilterNode::All(parts)),
        }
    }
}

impl MetadataFilter {
    /// Parse a metadata filter payload. `null` is an empty filter.
    pub fn parse(payload: &Value) -> Result<Self, FilterError> {
        let map = match payload {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            _ => return Err(FilterError::NotAnObject),
        };

        let mut filter = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "where" if value.is_null() => {}
                "where" => filter.root = Some(FilterNode::from_json(value)?),
                "start_date" => filter.dates.start = parse_timestamp("start_date", value)?,
                "end_date" => filter.dates.end = parse_timestamp("end_date", value)?,
                other => return Err(FilterError::UnknownKey(other.to_string())),
            }
        }

        if let (Some(start), Some(end)) = (filter.dates.start, filter.dates.end) {
            if end < start {
                return Err(FilterError::InvalidDate {
                    key: "end_date",
                    reason: format!("{end} precedes start_date {start}"),
                });
            }
        }

        Ok(filter)
    }

    /// `true` when the filter constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.root.is_none() && self.dates.start.is_none() && self.dates.end.is_none()
    }

    pub fn compile(&self) -> Option<Predicate> {
        compile(self.root.as_ref(), self.dates)
    }
}

/// Compile a filter tree and date bounds into a single predicate.
///
/// Date bounds are conjoined with the tree and apply even without one.
/// Returns `None` when there is nothing to constrain.
pub fn compile(root: Option<&FilterNode>, dates: DateBounds) -> Option<Predicate> {
    let mut terms = Vec::new();
    if let Some(node) = root {
        terms.push(compile_node(node));
    }
    if let Some(start) = dates.start {
        terms.push(Predicate::CreatedAtOrAfter(start));
    }
    if let Some(end) = dates.end {
        terms.push(Predicate::CreatedAtOrBefore(end));
    }

    match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(Predicate::All(terms)),
    }
}

fn compile_node(node: &FilterNode) -> Predicate {
    match node {
        FilterNode::Path(path) => Predicate::JsonPathExists(path.clone()),
        FilterNode::All(children) => Predicate::All(children.iter().map(compile_node).collect()),
        FilterNode::Any(children) => Predicate::Any(children.iter().map(compile_node).collect()),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD[T| ]HH:MM:SS[.f]` (UTC), `YYYY-MM-DD`
/// (midnight UTC) or integer unix seconds. `null` means unbounded.
fn parse_timestamp(
    key: &'static str,
    value: &Value,
) -> Result<Option<DateTime<Utc>>, FilterError> {
    let invalid = |reason: String| FilterError::InvalidDate { key, reason };

    match value {
        Value::Null => Ok(None),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(Some(ts.with_timezone(&Utc)));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
                    return Ok(Some(ts.and_utc()));
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|ts| Some(ts.and_utc()))
                .ok_or_else(|| invalid(format!("`{s}` is not a recognised timestamp")))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(Some)
            .ok_or_else(|| invalid(format!("{n} is not a valid unix timestamp"))),
        other => Err(invalid(format!("expected a timestamp, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn compile_raw(payload: &Value) -> Result<Option<Predicate>, FilterError> {
        Ok(MetadataFilter::parse(payload)?.compile())
    }

    fn jp(s: &str) -> JsonPath {
        JsonPath::parse(s).unwrap()
    }

    #[test]
    fn leaf_node_parses_to_path() {
        let node = FilterNode::from_json(&json!({"jsonpath": "$.tag"})).unwrap();
        assert_eq!(node, FilterNode::Path(jp("$.tag")));
    }

    #[test]
    fn path_with_children_is_conjoined_with_groups() {
        let node = FilterNode::from_json(&json!({
            "jsonpath": "$.tag",
            "and": [{"jsonpath": "$.status"}],
            "or": [{"jsonpath": "$.a"}, {"jsonpath": "$.b"}]
        }))
        .unwrap();
        assert_eq!(
            node,
            FilterNode::All(vec![
                FilterNode::Path(jp("$.tag")),
                FilterNode::All(vec![FilterNode::Path(jp("$.status"))]),
                FilterNode::Any(vec![FilterNode::Path(jp("$.a")), FilterNode::Path(jp("$.b"))]),
            ])
        );
    }

    #[test]
    fn malformed_nodes_are_rejected() {
        assert_eq!(
            FilterNode::from_json(&json!({})).unwrap_err(),
            FilterError::EmptyNode
        );
        assert!(matches!(
            FilterNode::from_json(&json!({"jsonpath": "$.a", "not": []})).unwrap_err(),
            FilterError::InvalidNode(_)
        ));
        assert!(matches!(
            FilterNode::from_json(&json!({"and": {"jsonpath": "$.a"}})).unwrap_err(),
            FilterError::InvalidNode(_)
        ));
        assert!(matches!(
            FilterNode::from_json(&json!("$.a")).unwrap_err(),
            FilterError::InvalidNode(_)
        ));
        assert!(matches!(
            FilterNode::from_json(&json!({"jsonpath": "tag"})).unwrap_err(),
            FilterError::JsonPath { .. }
        ));
        // Errors deep in the tree surface too.
        assert!(matches!(
            FilterNode::from_json(&json!({"or": [{"jsonpath": "$.ok"}, {"and": [{}]}]})).unwrap_err(),
            FilterError::EmptyNode
        ));
    }

    #[test]
    fn metadata_payload_with_dates() {
        let filter = MetadataFilter::parse(&json!({
            "where": {"jsonpath": "$.tag"},
            "start_date": "2024-01-01",
            "end_date": "2024-01-31T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(filter.root, Some(FilterNode::Path(jp("$.tag"))));
        assert_eq!(
            filter.dates.start,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            filter.dates.end,
            Some(Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap())
        );
        assert!(!filter.is_empty());
    }

    #[test]
    fn timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 8, 30, 0).unwrap();
        for value in [
            json!("2024-03-05T08:30:00Z"),
            json!("2024-03-05T10:30:00+02:00"),
            json!("2024-03-05T08:30:00"),
            json!("2024-03-05 08:30:00"),
            json!(expected.timestamp()),
        ] {
            assert_eq!(parse_timestamp("start_date", &value).unwrap(), Some(expected), "{value}");
        }
        assert_eq!(parse_timestamp("start_date", &Value::Null).unwrap(), None);
        assert!(parse_timestamp("start_date", &json!("yesterday")).is_err());
        assert!(parse_timestamp("end_date", &json!(true)).is_err());
    }

    #[test]
    fn rejects_unknown_keys_and_inverted_ranges() {
        assert_eq!(
            MetadataFilter::parse(&json!({"foo": 1})).unwrap_err(),
            FilterError::UnknownKey("foo".into())
        );
        assert_eq!(
            MetadataFilter::parse(&json!([1, 2])).unwrap_err(),
            FilterError::NotAnObject
        );
        assert!(matches!(
            MetadataFilter::parse(&json!({"start_date": "2024-02-01", "end_date": "2024-01-01"}))
                .unwrap_err(),
            FilterError::InvalidDate { key: "end_date", .. }
        ));
    }

    #[test]
    fn empty_payloads() {
        assert!(MetadataFilter::parse(&Value::Null).unwrap().is_empty());
        assert!(MetadataFilter::parse(&json!({})).unwrap().is_empty());
        assert!(MetadataFilter::parse(&json!({"where": null})).unwrap().is_empty());
        assert_eq!(compile_raw(&json!({})).unwrap(), None);
    }

    #[test]
    fn compile_mirrors_tree_shape() {
        let node = FilterNode::All(vec![
            FilterNode::Path(jp("$.tag")),
            FilterNode::Any(vec![FilterNode::Path(jp("$.a")), FilterNode::Path(jp("$.b"))]),
        ]);
        assert_eq!(
            compile(Some(&node), DateBounds::default()),
            Some(Predicate::All(vec![
                Predicate::JsonPathExists(jp("$.tag")),
                Predicate::Any(vec![
                    Predicate::JsonPathExists(jp("$.a")),
                    Predicate::JsonPathExists(jp("$.b")),
                ]),
            ]))
        );
    }

    #[test]
    fn dates_compile_without_a_tree() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let bounds = DateBounds {
            start: Some(start),
            end: Some(end),
        };
        assert_eq!(
            compile(None, bounds),
            Some(Predicate::All(vec![
                Predicate::CreatedAtOrAfter(start),
                Predicate::CreatedAtOrBefore(end),
            ]))
        );
        assert_eq!(
            compile(None, DateBounds { start: None, end: Some(end) }),
            Some(Predicate::CreatedAtOrBefore(end))
        );
        assert_eq!(compile(None, DateBounds::default()), None);
    }

    #[test]
    fn dates_are_conjoined_with_tree() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let predicate = compile_raw(&json!({
            "where": {"jsonpath": "$.tag"},
            "start_date": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(
            predicate,
            Some(Predicate::All(vec![
                Predicate::JsonPathExists(jp("$.tag")),
                Predicate::CreatedAtOrAfter(start),
            ]))
        );
    }
}
