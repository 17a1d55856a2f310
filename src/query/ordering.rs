//! `ordering` query parameter translation.
//!
//! Supports plain column names plus dotted paths into JSON columns, e.g.
//! `ordering=-descriptor.general.species`. Dotted paths become
//! `json_extract` expressions with the path carried as a bound parameter,
//! cast to TEXT so values compare the way their serialized form reads.
//! Fields that are not allowlisted are dropped without error.

use sqlx::{QueryBuilder, Sqlite};

/// Columns a list endpoint accepts in its `ordering` parameter.
pub struct OrderingFields {
    pub columns: &'static [&'static str],
    /// Columns holding JSON documents, addressable with dotted paths.
    pub json_columns: &'static [&'static str],
}

/// Appends an ORDER BY clause for `ordering` to `qb`.
///
/// Returns whether any clause was emitted; callers typically fall back to a
/// stable default ordering otherwise.
pub fn push_order_by(
    qb: &mut QueryBuilder<'_, Sqlite>,
    ordering: Option<&str>,
    fields: &OrderingFields,
) -> bool {
    let Some(ordering) = ordering else {
        return false;
    };

    let mut pushed = false;
    for term in ordering.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        let (field, direction) = match term.strip_prefix('-') {
            Some(field) => (field, " DESC"),
            None => (term, " ASC"),
        };

        if let Some((column, path)) = field.split_once('.') {
            if !fields.json_columns.contains(&column) {
                continue;
            }
            qb.push(if pushed { ", " } else { " ORDER BY " });
            qb.push("CAST(json_extract(");
            qb.push(column);
            qb.push(", ");
            qb.push_bind(json_path_expr(path));
            qb.push(") AS TEXT)");
            qb.push(direction);
        } else {
            if !fields.columns.contains(&field) {
                continue;
            }
            qb.push(if pushed { ", " } else { " ORDER BY " });
            qb.push(field);
            qb.push(direction);
        }
        pushed = true;
    }
    pushed
}

/// Builds a `json_extract` path like `$."general"."species"`. Quoting each
/// segment keeps dots and spaces inside keys intact; the whole expression is
/// bound as a parameter, never spliced into SQL.
fn json_path_expr(path: &str) -> String {
    let mut expr = String::from("$");
    for segment in path.split('.') {
        expr.push_str(".\"");
        expr.push_str(&segment.replace('"', ""));
        expr.push('"');
    }
    expr
}
