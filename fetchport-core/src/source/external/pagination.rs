//! Dialect-specific chunk query construction.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::models::DatabaseType;
use crate::{FetchportError, Result};

/// No-op ordering required by SQL Server before `OFFSET ... FETCH`.
pub const MSSQL_NOOP_ORDER_BY: &str = "ORDER BY (SELECT NULL)";

/// How a dialect expresses a bounded window of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `LIMIT n OFFSET o`
    LimitOffset,
    /// `OFFSET o ROWS FETCH NEXT n ROWS ONLY`
    OffsetFetch,
}

impl PaginationStyle {
    /// Pagination syntax for a dialect.
    pub const fn for_dialect(db_type: &DatabaseType) -> Self {
        match db_type {
            DatabaseType::PostgreSQL | DatabaseType::MySQL => Self::LimitOffset,
            DatabaseType::SqlServer | DatabaseType::Other(_) => Self::OffsetFetch,
        }
    }
}

/// A user query prepared for repeated chunk requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    base: String,
    style: PaginationStyle,
}

impl ChunkPlan {
    /// Prepares `query` for chunked reads against `db_type`.
    ///
    /// Trailing statement terminators are removed. For SQL Server a no-op
    /// `ORDER BY` is added when the query has none. Dialects without a known
    /// syntax use the SQL-standard form and log a warning.
    ///
    /// # Errors
    /// Returns a validation error if nothing remains of the query.
    pub fn new(db_type: &DatabaseType, query: &str) -> Result<Self> {
        let trimmed = strip_statement_terminator(query);
        if trimmed.is_empty() {
            return Err(FetchportError::validation("sql_query cannot be empty"));
        }

        let style = PaginationStyle::for_dialect(db_type);
        let base = match db_type {
            DatabaseType::SqlServer if !has_order_by(trimmed) => {
                format!("{} {}", trimmed, MSSQL_NOOP_ORDER_BY)
            }
            DatabaseType::Other(name) => {
                warn!(
                    "No pagination profile for dialect '{}'; using OFFSET/FETCH NEXT, compatibility unverified",
                    name
                );
                trimmed.to_string()
            }
            _ => trimmed.to_string(),
        };

        Ok(Self { base, style })
    }

    /// Query text without the pagination clause.
    pub fn base_query(&self) -> &str {
        &self.base
    }

    /// Pagination syntax in use.
    pub const fn style(&self) -> PaginationStyle {
        self.style
    }

    /// SQL for the chunk starting at `offset`.
    pub fn chunk_sql(&self, offset: u64, size: u64) -> String {
        match self.style {
            PaginationStyle::LimitOffset => {
                format!("{} LIMIT {} OFFSET {}", self.base, size, offset)
            }
            PaginationStyle::OffsetFetch => format!(
                "{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                self.base, offset, size
            ),
        }
    }
}

/// Removes surrounding whitespace and any trailing `;` terminators.
pub fn strip_statement_terminator(query: &str) -> &str {
    query.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// True if the query has a top-level `ORDER BY` clause.
///
/// Clauses inside parentheses (window functions, subqueries), string
/// literals, quoted identifiers and comments do not count.
pub fn has_order_by(query: &str) -> bool {
    static ORDER_BY: OnceLock<Option<Regex>> = OnceLock::new();
    let outer = top_level_text(query);
    ORDER_BY
        .get_or_init(|| Regex::new(r"(?i)\border\s+by\b").ok())
        .as_ref()
        .map_or_else(
            || outer.to_ascii_lowercase().contains("order by"),
            |re| re.is_match(&outer),
        )
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Copy of `query` with everything below the outermost level blanked out.
fn top_level_text(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut state = Lexeme::Code;
    let mut depth: usize = 0;
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        let mut keep = false;
        match state {
            Lexeme::Code => match c {
                '\'' | '"' => state = Lexeme::Quoted(c),
                '[' => state = Lexeme::Quoted(']'),
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    out.push(' ');
                    state = Lexeme::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push(' ');
                    state = Lexeme::BlockComment;
                }
                '(' => depth = depth.saturating_add(1),
                ')' => depth = depth.saturating_sub(1),
                _ => keep = depth == 0,
            },
            // A doubled quote closes and immediately reopens the literal.
            Lexeme::Quoted(close) if c == close => state = Lexeme::Code,
            Lexeme::Quoted(_) => {}
            Lexeme::LineComment if c == '\n' => state = Lexeme::Code,
            Lexeme::LineComment => {}
            Lexeme::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                chars.next();
                out.push(' ');
                state = Lexeme::Code;
            }
            Lexeme::BlockComment => {}
        }
        out.push(if keep { c } else { ' ' });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_offset_dialects() {
        for db_type in [DatabaseType::PostgreSQL, DatabaseType::MySQL] {
            let plan = ChunkPlan::new(&db_type, "SELECT * FROM orders;").unwrap();
            assert_eq!(
                plan.chunk_sql(200, 100),
                "SELECT * FROM orders LIMIT 100 OFFSET 200"
            );
        }
    }

    #[test]
    fn test_mssql_injects_order_by() {
        let plan = ChunkPlan::new(&DatabaseType::SqlServer, "SELECT id, total FROM orders").unwrap();
        assert_eq!(
            plan.chunk_sql(0, 50),
            "SELECT id, total FROM orders ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 50 ROWS ONLY"
        );
    }

    #[test]
    fn test_mssql_keeps_existing_order_by() {
        let query = "SELECT id, total FROM orders\nORDER  BY id DESC";
        let plan = ChunkPlan::new(&DatabaseType::SqlServer, query).unwrap();
        assert_eq!(plan.base_query(), query);
        assert_eq!(
            plan.chunk_sql(10, 10),
            format!("{} OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY", query)
        );
        assert!(!plan.chunk_sql(10, 10).contains(MSSQL_NOOP_ORDER_BY));
    }

    #[test]
    fn test_other_dialect_uses_standard_form() {
        let plan = ChunkPlan::new(&DatabaseType::Other("oracle".into()), "SELECT * FROM t").unwrap();
        assert_eq!(plan.style(), PaginationStyle::OffsetFetch);
        assert_eq!(
            plan.chunk_sql(5, 5),
            "SELECT * FROM t OFFSET 5 ROWS FETCH NEXT 5 ROWS ONLY"
        );
    }

    #[test]
    fn test_strip_statement_terminator() {
        assert_eq!(strip_statement_terminator("SELECT 1;"), "SELECT 1");
        assert_eq!(strip_statement_terminator("  SELECT 1 ; ;\n"), "SELECT 1");
        assert_eq!(strip_statement_terminator("SELECT ';'"), "SELECT ';'");
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(ChunkPlan::new(&DatabaseType::PostgreSQL, " ; ").is_err());
    }

    #[test]
    fn test_order_by_detection() {
        assert!(has_order_by("select * from t order by 1"));
        assert!(has_order_by("SELECT * FROM t ORDER\tBY id"));
        assert!(!has_order_by("SELECT border_by FROM t"));
        assert!(!has_order_by("SELECT * FROM orders"));
    }

    #[test]
    fn test_nested_order_by_is_not_top_level() {
        assert!(!has_order_by(
            "SELECT id, ROW_NUMBER() OVER (ORDER BY id) AS rn FROM t"
        ));
        assert!(!has_order_by(
            "SELECT * FROM (SELECT TOP 5 id FROM t ORDER BY id) AS recent"
        ));
        assert!(!has_order_by("SELECT 'order by' AS label, [order by] FROM t"));
        assert!(!has_order_by("SELECT id FROM t -- order by id\n"));
        assert!(!has_order_by("SELECT id /* order by id */ FROM t"));
        assert!(has_order_by(
            "SELECT id, SUM(x) OVER (PARTITION BY g ORDER BY id) FROM t ORDER BY id"
        ));
        assert!(has_order_by("SELECT 'it''s' AS s FROM t ORDER BY s"));
    }

    #[test]
    fn test_mssql_injects_order_by_after_window_function() {
        let query = "SELECT id, ROW_NUMBER() OVER (ORDER BY id) AS rn FROM t";
        let plan = ChunkPlan::new(&DatabaseType::SqlServer, query).unwrap();
        assert_eq!(
            plan.chunk_sql(0, 10),
            format!(
                "{} ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY",
                query
            )
        );
    }
}
