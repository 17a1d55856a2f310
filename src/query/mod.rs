//! Query-string helpers shared by the REST list endpoints.

pub mod ordering;

use sqlx::{QueryBuilder, Sqlite};

/// Appends an `AND <column> LIKE '%value%'` condition for a `__contains`
/// style filter. `column` must be a trusted identifier; the value is bound.
pub fn push_contains(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, value: Option<&str>) {
    if let Some(value) = value {
        qb.push(format!(" AND {column} LIKE "));
        qb.push_bind(format!("%{}%", escape_like(value)));
        qb.push(" ESCAPE '\\'");
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
