//! Static SQL analysis.
//!
//! Rules run over the statement text with string literals masked out, so a
//! keyword inside a quoted value never triggers a rule. The analysis is a
//! heuristic over text, not a parse: it grades shapes, it does not validate SQL.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static SELECT_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\s+(?:DISTINCT\s+)?\*").expect("select-star pattern"));

static LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b|\bFETCH\s+FIRST\b").expect("limit pattern"));

static WHERE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("where pattern"));

static ORDER_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("order-by pattern"));

static LEFT_JOIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLEFT\s+(?:OUTER\s+)?JOIN\b").expect("left-join pattern"));

static IS_NULL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bIS\s+NULL\b").expect("is-null pattern"));

static JOIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bJOIN\b").expect("join pattern"));

static SUBQUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*SELECT\b").expect("subquery pattern"));

// A column wrapped in a function and compared for equality cannot use a plain index.
static FUNCTION_EQUALITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:LOWER|UPPER|TRIM|LTRIM|RTRIM|DATE|YEAR|MONTH|DAY|SUBSTR|SUBSTRING|CAST|COALESCE|ABS|ROUND)\s*\(\s*[A-Za-z_][\w.]*[^()]*\)\s*(?:=|<>|!=)",
    )
    .expect("function-equality pattern")
});

// Matched against the unmasked text: the wildcard lives inside the literal.
static LEADING_WILDCARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIKE\s+'%").expect("leading-wildcard pattern"));

static VOLATILE_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:NOW|CURRENT_TIMESTAMP|CURRENT_DATE|CURRENT_TIME|RANDOM|RAND|UUID|GEN_RANDOM_UUID|SYSDATE)\b",
    )
    .expect("volatile-function pattern")
});

const COMPLEX_JOIN_COUNT: usize = 3;
const COMPLEX_SUBQUERY_COUNT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Coarse cost estimate.
///
/// WHERE/LIMIT grading (`Excellent`, `Good`, `Poor`) only applies to
/// SELECT, UPDATE and DELETE. Other statements (INSERT, DDL, anything
/// unrecognized) are `Fair` unless their joins or subqueries make them
/// `Complex`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Performance {
    Excellent,
    Good,
    Fair,
    Poor,
    Complex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl StatementKind {
    /// Classify by leading keyword. `WITH` is treated as a read.
    pub fn detect(sql: &str) -> Self {
        let keyword = sql
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "SELECT" | "WITH" => StatementKind::Select,
            "INSERT" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            _ => StatementKind::Other,
        }
    }

    fn is_destructive(self) -> bool {
        matches!(self, StatementKind::Update | StatementKind::Delete)
    }
}

/// One rule hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub rule: &'static str,
    pub message: String,
    pub severity: Severity,
}

impl Suggestion {
    fn new(rule: &'static str, message: &str, severity: Severity) -> Self {
        Self {
            rule,
            message: message.to_string(),
            severity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub statement: StatementKind,
    /// Rule hits in rule order.
    pub suggestions: Vec<Suggestion>,
    /// 0–100; results scoring above 50 are eligible for caching.
    pub cacheability_score: u8,
    pub performance: Performance,
    pub risk: RiskLevel,
    /// The statement as sent to the executor.
    pub optimized_sql: String,
    pub join_count: usize,
    pub subquery_count: usize,
}

/// Run the rule set over `sql`.
pub fn analyze_query(sql: &str, params: &[Value]) -> QueryAnalysis {
    let optimized_sql = normalize_sql(sql);
    let masked = mask_literals(&optimized_sql);
    let statement = StatementKind::detect(&masked);

    let has_select_star = SELECT_STAR.is_match(&masked);
    let has_limit = LIMIT.is_match(&masked);
    let where_count = WHERE.find_iter(&masked).count();
    let has_where = where_count > 0;
    let join_count = JOIN.find_iter(&masked).count();
    let subquery_count = SUBQUERY.find_iter(&masked).count();

    let mut suggestions = Vec::new();
    if has_select_star && !has_limit {
        suggestions.push(Suggestion::new(
            "select_star",
            "SELECT * without LIMIT reads every column of every row; name the columns you need",
            Severity::Medium,
        ));
    }
    if ORDER_BY.is_match(&masked) && !has_where {
        suggestions.push(Suggestion::new(
            "order_without_where",
            "ORDER BY without WHERE sorts the whole table; filter first",
            Severity::Medium,
        ));
    }
    if statement == StatementKind::Select && !has_limit {
        suggestions.push(Suggestion::new(
            "missing_limit",
            "SELECT without LIMIT can return an unbounded result set",
            Severity::Low,
        ));
    }
    if LEFT_JOIN.is_match(&masked) && IS_NULL.is_match(&masked) {
        suggestions.push(Suggestion::new(
            "left_join_null_filter",
            "LEFT JOIN filtered on IS NULL is an anti-join; NOT EXISTS is usually cheaper",
            Severity::Medium,
        ));
    }
    if FUNCTION_EQUALITY.is_match(&masked) || LEADING_WILDCARD.is_match(&optimized_sql) {
        suggestions.push(Suggestion::new(
            "function_on_indexed_column",
            "function-wrapped column or leading-wildcard LIKE in a filter prevents index use",
            Severity::High,
        ));
    }

    let mut score = 0u8;
    if statement == StatementKind::Select {
        score += 40;
    }
    if params.is_empty() {
        score += 30;
    }
    if !VOLATILE_FUNCTION.is_match(&masked) {
        score += 20;
    }
    if where_count == 1 {
        score += 10;
    }

    let performance = if join_count > COMPLEX_JOIN_COUNT || subquery_count > COMPLEX_SUBQUERY_COUNT {
        Performance::Complex
    } else if !matches!(
        statement,
        StatementKind::Select | StatementKind::Update | StatementKind::Delete
    ) {
        Performance::Fair
    } else if has_where && has_limit {
        Performance::Excellent
    } else if has_where || has_limit {
        Performance::Good
    } else {
        Performance::Poor
    };

    let high = suggestions.iter().any(|s| s.severity == Severity::High);
    let medium = suggestions
        .iter()
        .filter(|s| s.severity == Severity::Medium)
        .count();
    let risk = if high {
        RiskLevel::High
    } else if medium >= 2 || statement.is_destructive() {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    QueryAnalysis {
        statement,
        suggestions,
        cacheability_score: score,
        performance,
        risk,
        optimized_sql,
        join_count,
        subquery_count,
    }
}

/// Collapse whitespace outside string literals and drop a trailing `;`.
pub fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut pending_space = false;

    for c in sql.trim().chars() {
        if in_literal {
            out.push(c);
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if c == '\'' {
            in_literal = true;
        }
        out.push(c);
    }

    while out.ends_with(';') || out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Replace the contents of single-quoted literals with `_`.
fn mask_literals(sql: &str) -> String {
    let mut in_literal = false;
    sql.chars()
        .map(|c| {
            if c == '\'' {
                in_literal = !in_literal;
                c
            } else if in_literal {
                '_'
            } else {
                c
            }
        })
        .collect()
}
