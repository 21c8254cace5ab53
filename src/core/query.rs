//! Query parameters, filters and pagination utilities
//!
//! List endpoints accept a flat query string:
//!
//! ```text
//! GET /users?filter[role]=admin&filter[age][gte]=18&sort=-createdAt,name&limit=10&page=2&include=posts
//! ```
//!
//! [`validate_query_params`] turns it into a [`ParsedQuery`] the driver can run.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

/// Comparison operators supported in `filter[field][op]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Equals,
    Not,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
}

impl FilterOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "eq" | "equals" => Some(FilterOp::Equals),
            "ne" | "not" => Some(FilterOp::Not),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            "contains" => Some(FilterOp::Contains),
            "startsWith" => Some(FilterOp::StartsWith),
            "endsWith" => Some(FilterOp::EndsWith),
            "in" => Some(FilterOp::In),
            "notIn" => Some(FilterOp::NotIn),
            _ => None,
        }
    }

    pub fn takes_list(self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }
}

/// A condition on one field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Condition {
    /// Exact match
    Literal(Value),
    /// Operator map, all of which must hold
    Ops(IndexMap<FilterOp, Value>),
}

/// Field name to condition, all of which must hold
pub type Where = IndexMap<String, Condition>;

/// Filter selecting a single record by id
pub fn where_id(id: impl Into<Value>) -> Where {
    IndexMap::from([("id".to_string(), Condition::Literal(id.into()))])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Parsed list query
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub filter: Where,
    pub sort: IndexMap<String, SortOrder>,
    pub take: usize,
    pub skip: usize,
    pub include: IndexMap<String, bool>,
}

impl Default for ParsedQuery {
    fn default() -> Self {
        Self {
            filter: IndexMap::new(),
            sort: IndexMap::new(),
            take: DEFAULT_LIMIT,
            skip: 0,
            include: IndexMap::new(),
        }
    }
}

impl ParsedQuery {
    pub fn include_names(&self) -> Vec<String> {
        self.include
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn filter_key_regex() -> &'static Regex {
    static FILTER_REGEX: OnceLock<Regex> = OnceLock::new();
    FILTER_REGEX.get_or_init(|| Regex::new(r"^filter\[([^\]]+)\](?:\[([^\]]+)\])?$").unwrap())
}

/// Coerce a raw query value into a JSON scalar
pub fn coerce_value(raw: &str) -> Value {
    static INT_REGEX: OnceLock<Regex> = OnceLock::new();
    static FLOAT_REGEX: OnceLock<Regex> = OnceLock::new();
    let int_regex = INT_REGEX.get_or_init(|| Regex::new(r"^-?\d+$").unwrap());
    let float_regex = FLOAT_REGEX.get_or_init(|| Regex::new(r"^-?\d+\.\d+$").unwrap());

    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        s if int_regex.is_match(s) => s
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(s.to_string())),
        s if float_regex.is_match(s) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(s.to_string())),
        s => Value::String(s.to_string()),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

/// Parse list-endpoint query parameters
pub fn validate_query_params(query: &IndexMap<String, String>) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();

    for (key, raw) in query {
        let Some(captures) = filter_key_regex().captures(key) else {
            continue;
        };
        let field = captures[1].to_string();

        match captures.get(2) {
            None => {
                parsed.filter.insert(field, Condition::Literal(coerce_value(raw)));
            }
            Some(op) => {
                let Some(op) = FilterOp::parse(op.as_str()) else {
                    tracing::debug!(key = %key, "ignoring unknown filter operator");
                    continue;
                };
                let value = if op.takes_list() {
                    Value::Array(split_list(raw).map(coerce_value).collect())
                } else {
                    coerce_value(raw)
                };

                let slot = parsed
                    .filter
                    .entry(field)
                    .or_insert_with(|| Condition::Ops(IndexMap::new()));
                match slot {
                    Condition::Ops(ops) => {
                        ops.insert(op, value);
                    }
                    Condition::Literal(_) => {
                        *slot = Condition::Ops(IndexMap::from([(op, value)]));
                    }
                }
            }
        }
    }

    if let Some(sort) = query.get("sort").or_else(|| query.get("orderBy")) {
        for token in split_list(sort) {
            let (field, order) = match token.as_bytes()[0] {
                b'-' => (&token[1..], SortOrder::Desc),
                b'+' => (&token[1..], SortOrder::Asc),
                _ => (token, SortOrder::Asc),
            };
            if !field.is_empty() {
                parsed.sort.insert(field.to_string(), order);
            }
        }
    }

    if let Some(limit) = query
        .get("limit")
        .or_else(|| query.get("take"))
        .and_then(|raw| parse_int(raw))
    {
        parsed.take = limit.clamp(1, MAX_LIMIT as i64) as usize;
    }

    if let Some(offset) = query
        .get("offset")
        .or_else(|| query.get("skip"))
        .and_then(|raw| parse_int(raw))
    {
        parsed.skip = offset.max(0) as usize;
    }

    // page is applied last so it wins over offset
    if let Some(page) = query.get("page").and_then(|raw| parse_int(raw)) {
        parsed.skip = (page.max(1) as usize - 1).saturating_mul(parsed.take);
    }

    if let Some(include) = query.get("include") {
        for name in split_list(include) {
            parsed.include.insert(name.to_string(), true);
        }
    }

    parsed
}

/// Response envelope for list endpoints
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationMeta {
    /// Total number of records matching the filter
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let parsed = validate_query_params(&IndexMap::new());
        assert_eq!(parsed, ParsedQuery::default());
        assert_eq!(parsed.take, 20);
        assert_eq!(parsed.skip, 0);
    }

    #[test]
    fn test_huge_page_saturates_skip() {
        let parsed = validate_query_params(&query(&[
            ("page", "999999999999999999"),
            ("limit", "100"),
        ]));
        assert_eq!(parsed.take, 100);
        assert_eq!(parsed.skip, usize::MAX);
    }

    #[test]
    fn test_value_coercion() {
        assert_eq!(coerce_value("true"), json!(true));
        assert_eq!(coerce_value("false"), json!(false));
        assert_eq!(coerce_value("null"), Value::Null);
        assert_eq!(coerce_value("42"), json!(42));
        assert_eq!(coerce_value("-7"), json!(-7));
        assert_eq!(coerce_value("3.5"), json!(3.5));
        assert_eq!(coerce_value("3."), json!("3."));
        assert_eq!(coerce_value("alice"), json!("alice"));
    }

    #[test]
    fn test_bare_and_operator_filters() {
        let parsed = validate_query_params(&query(&[
            ("filter[email]", "a@b.co"),
            ("filter[age][gte]", "18"),
            ("filter[age][lt]", "65"),
            ("filter[role][in]", "admin, editor"),
            ("filter[name][bogus]", "x"),
        ]));

        assert_eq!(parsed.filter["email"], Condition::Literal(json!("a@b.co")));
        match &parsed.filter["age"] {
            Condition::Ops(ops) => {
                assert_eq!(ops[&FilterOp::Gte], json!(18));
                assert_eq!(ops[&FilterOp::Lt], json!(65));
            }
            other => panic!("expected ops, got {:?}", other),
        }
        match &parsed.filter["role"] {
            Condition::Ops(ops) => assert_eq!(ops[&FilterOp::In], json!(["admin", "editor"])),
            other => panic!("expected ops, got {:?}", other),
        }
        assert!(!parsed.filter.contains_key("name"));
    }

    #[test]
    fn test_ne_and_not_are_aliases() {
        let a = validate_query_params(&query(&[("filter[status][ne]", "draft")]));
        let b = validate_query_params(&query(&[("filter[status][not]", "draft")]));
        assert_eq!(a.filter, b.filter);
    }

    #[test]
    fn test_sort_parsing() {
        let parsed = validate_query_params(&query(&[("sort", "-createdAt,+name,age")]));
        let sort: Vec<_> = parsed.sort.into_iter().collect();
        assert_eq!(
            sort,
            vec![
                ("createdAt".to_string(), SortOrder::Desc),
                ("name".to_string(), SortOrder::Asc),
                ("age".to_string(), SortOrder::Asc),
            ]
        );

        let parsed = validate_query_params(&query(&[("orderBy", "-score")]));
        assert_eq!(parsed.sort["score"], SortOrder::Desc);
    }

    #[test]
    fn test_limit_clamping() {
        assert_eq!(validate_query_params(&query(&[("limit", "1000")])).take, 100);
        assert_eq!(validate_query_params(&query(&[("limit", "0")])).take, 1);
        assert_eq!(validate_query_params(&query(&[("take", "-5")])).take, 1);
        assert_eq!(validate_query_params(&query(&[("limit", "abc")])).take, 20);
        assert_eq!(validate_query_params(&query(&[("offset", "-3")])).skip, 0);
        assert_eq!(validate_query_params(&query(&[("skip", "15")])).skip, 15);
    }

    #[test]
    fn test_page_wins_over_offset() {
        let parsed = validate_query_params(&query(&[("page", "3"), ("limit", "10"), ("offset", "5")]));
        assert_eq!(parsed.take, 10);
        assert_eq!(parsed.skip, 20);

        let parsed = validate_query_params(&query(&[("offset", "5"), ("page", "0")]));
        assert_eq!(parsed.skip, 0);
    }

    #[test]
    fn test_include_flags() {
        let parsed = validate_query_params(&query(&[("include", "posts, profile")]));
        assert_eq!(parsed.include_names(), vec!["posts", "profile"]);
    }
}
