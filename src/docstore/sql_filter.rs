//! Translation of [`Query`] into SQLite JSON1 predicates over `documents.body`.
//!
//! [`exact`] yields a predicate with the same truth value as
//! [`Query::matches`] for every document, or `None`. [`prefilter`] yields a
//! predicate true for at least every matching document, so rows it passes
//! must still be checked in process. Numbers are never translated: JSON
//! equality distinguishes `1` from `1.0`, SQLite does not.

use serde_json::Value;

use super::Query;

/// Predicate equivalent to `query`, if one can be written.
pub fn exact(query: &Query) -> Option<String> {
    match query {
        Query::MatchAll => Some("1".to_string()),
        Query::Exists { field } => present(field),
        Query::Term { field, value } => {
            let path = json_path(field)?;
            let scalar = scalar_test(
                &format!("json_type(documents.body, {})", path),
                &format!("json_extract(documents.body, {})", path),
                value,
            )?;
            let element = scalar_test("e.type", "e.value", value)?;
            Some(format!(
                "coalesce(CASE json_type(documents.body, {p}) \
                 WHEN 'array' THEN EXISTS (SELECT 1 FROM json_each(documents.body, {p}) AS e WHERE {element}) \
                 ELSE {scalar} END, 0)",
                p = path,
                element = element,
                scalar = scalar,
            ))
        }
        Query::Not(inner) => exact(inner).map(|s| format!("NOT ({})", s)),
        Query::And(all) => join(all.iter().map(exact).collect::<Option<Vec<_>>>()?, "AND"),
        Query::Or(any) => join(any.iter().map(exact).collect::<Option<Vec<_>>>()?, "OR"),
        Query::Range { .. } | Query::IsBefore { .. } => None,
    }
}

/// Predicate implied by `query`. `None` means no restriction.
pub fn prefilter(query: &Query) -> Option<String> {
    if let Some(sql) = exact(query) {
        return Some(sql);
    }
    match query {
        Query::Range { field, .. } => present(field),
        Query::IsBefore { field, other } => join(vec![present(field)?, present(other)?], "AND"),
        Query::And(all) => {
            let parts: Vec<String> = all.iter().filter_map(prefilter).collect();
            if parts.is_empty() {
                None
            } else {
                join(parts, "AND")
            }
        }
        Query::Or(any) => join(any.iter().map(prefilter).collect::<Option<Vec<_>>>()?, "OR"),
        _ => None,
    }
}

/// Field is present and not JSON null.
fn present(field: &str) -> Option<String> {
    let path = json_path(field)?;
    Some(format!("coalesce(json_type(documents.body, {}) <> 'null', 0)", path))
}

fn join(parts: Vec<String>, op: &str) -> Option<String> {
    if parts.is_empty() {
        // Empty AND is true, empty OR is false.
        return Some(if op == "AND" { "1" } else { "0" }.to_string());
    }
    Some(format!(
        "({})",
        parts
            .iter()
            .map(|p| format!("({})", p))
            .collect::<Vec<_>>()
            .join(&format!(" {} ", op))
    ))
}

/// Equality with a scalar, given SQL for the JSON type and the value.
fn scalar_test(type_expr: &str, value_expr: &str, value: &Value) -> Option<String> {
    match value {
        Value::Bool(true) => Some(format!("{} = 'true'", type_expr)),
        Value::Bool(false) => Some(format!("{} = 'false'", type_expr)),
        Value::Null => Some(format!("{} = 'null'", type_expr)),
        Value::String(s) => Some(format!(
            "({} = 'text' AND {} = {})",
            type_expr,
            value_expr,
            quote(s)
        )),
        _ => None,
    }
}

/// `'$.a.b'` for a dotted field of plain keys.
fn json_path(field: &str) -> Option<String> {
    let plain = field
        .split('.')
        .all(|key| !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    plain.then(|| format!("'$.{}'", field))
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_and_odd_keys_are_not_translated() {
        assert!(exact(&Query::term("status_code", 200)).is_none());
        assert!(exact(&Query::exists("a-b")).is_none());
        assert!(exact(&Query::exists("a..b")).is_none());
    }

    #[test]
    fn strings_are_quoted() {
        let sql = exact(&Query::term("name", "o'brien")).unwrap();
        assert!(sql.contains("'o''brien'"));
        assert!(sql.contains("'$.name'"));
    }

    #[test]
    fn negation_needs_an_exact_inner_predicate() {
        assert!(exact(&Query::not(Query::exists("a"))).is_some());
        assert!(prefilter(&Query::not(Query::is_before("a", "b"))).is_none());
    }

    #[test]
    fn due_style_query_is_prefiltered() {
        let query = Query::or(vec![
            Query::not(Query::exists("s")),
            Query::not(Query::term("s.should", false)),
            Query::is_before("s.last", "last_modified"),
        ]);
        assert!(exact(&query).is_none());
        let sql = prefilter(&query).unwrap();
        assert!(sql.contains("'$.s.last'"));
        assert!(sql.contains("'$.last_modified'"));
    }

    #[test]
    fn and_keeps_the_translatable_part() {
        let query = Query::and(vec![Query::term("status_code", 200), Query::exists("url")]);
        let sql = prefilter(&query).unwrap();
        assert!(sql.contains("'$.url'"));
        assert!(!sql.contains("status_code"));
    }
}
