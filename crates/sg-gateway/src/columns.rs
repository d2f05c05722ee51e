//! Column order of a Cypher query's result.
//!
//! The bolt driver hands rows over as maps, so the order of the columns has
//! to be recovered from the query text itself: the result columns are the
//! items of the last top-level `RETURN`, named by their alias or, without
//! one, by the expression text as written.

/// Returns the result column names of `query`, in order.
///
/// `None` when the query has no top-level `RETURN` or projects `*`; the
/// server orders `RETURN *` columns by name.
pub(crate) fn return_columns(query: &str) -> Option<Vec<String>> {
    let query = strip_comments(query);
    let query = query.as_str();
    let bytes = query.as_bytes();
    let top = top_level_mask(bytes);

    let ret = rfind_keyword(bytes, &top, "RETURN")?;
    let mut start = skip_whitespace(bytes, ret + "RETURN".len());
    if keyword_at(bytes, &top, start, "DISTINCT") {
        start += "DISTINCT".len();
    }

    let end = ["ORDER", "SKIP", "LIMIT", "UNION"]
        .iter()
        .filter_map(|kw| find_keyword(bytes, &top, start, kw))
        .chain((start..bytes.len()).find(|&i| top[i] && bytes[i] == b';'))
        .min()
        .unwrap_or(bytes.len());

    let mut columns = Vec::new();
    let mut item_start = start;
    for i in start..=end {
        if i == end || (top[i] && bytes[i] == b',') {
            let name = column_name(query, &top, item_start, i)?;
            columns.push(name);
            item_start = i + 1;
        }
    }
    Some(columns)
}

/// Name of the projection item in `query[start..end]`.
fn column_name(query: &str, top: &[bool], start: usize, end: usize) -> Option<String> {
    let bytes = query.as_bytes();
    let alias_at = (start..end)
        .rev()
        .find(|&i| keyword_at(bytes, top, i, "AS") && i + 2 <= end);

    let name = match alias_at {
        Some(i) => query[i + 2..end].trim(),
        None => query[start..end].trim(),
    };

    if name.is_empty() || name == "*" {
        return None;
    }
    Some(unquote_identifier(name))
}

fn unquote_identifier(name: &str) -> String {
    match name.strip_prefix('`').and_then(|n| n.strip_suffix('`')) {
        Some(inner) if !inner.is_empty() => inner.replace("``", "`"),
        _ => name.to_string(),
    }
}

/// Marks the bytes that are query text at nesting depth zero, outside
/// strings and quoted identifiers. Brackets themselves are not marked.
fn top_level_mask(bytes: &[u8]) -> Vec<bool> {
    let mut mask = vec![false; bytes.len()];
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, quote);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => mask[i] = depth == 0,
        }
        i += 1;
    }
    mask
}

/// Replaces `//` and `/* */` comments with a single space.
fn strip_comments(query: &str) -> String {
    let bytes = query.as_bytes();
    let mut out = String::with_capacity(query.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => i = skip_quoted(bytes, i, quote),
            b'/' if matches!(bytes.get(i + 1), Some(&(b'/' | b'*'))) => {
                let end = if bytes[i + 1] == b'/' {
                    (i..bytes.len())
                        .find(|&j| bytes[j] == b'\n')
                        .unwrap_or(bytes.len())
                } else {
                    (i + 2..bytes.len().saturating_sub(1))
                        .find(|&j| &bytes[j..j + 2] == b"*/")
                        .map_or(bytes.len(), |j| j + 2)
                };
                out.push_str(&query[copied..i]);
                out.push(' ');
                copied = end;
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&query[copied..]);
    out
}

/// Returns the index just past the literal or identifier opened at `start`.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' && quote != b'`' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            // `` inside a quoted identifier is an escaped backtick
            if quote == b'`' && bytes.get(i + 1) == Some(&b'`') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn keyword_at(bytes: &[u8], top: &[bool], i: usize, keyword: &str) -> bool {
    let end = i + keyword.len();
    if end > bytes.len() || !top[i..end].iter().all(|&t| t) {
        return false;
    }
    if !bytes[i..end].eq_ignore_ascii_case(keyword.as_bytes()) {
        return false;
    }
    let before_ok = i == 0 || !(is_word_byte(bytes[i - 1]) || matches!(bytes[i - 1], b'.' | b'$'));
    let after_ok = end == bytes.len() || !is_word_byte(bytes[end]);
    before_ok && after_ok
}

fn find_keyword(bytes: &[u8], top: &[bool], from: usize, keyword: &str) -> Option<usize> {
    (from..bytes.len()).find(|&i| keyword_at(bytes, top, i, keyword))
}

fn rfind_keyword(bytes: &[u8], top: &[bool], keyword: &str) -> Option<usize> {
    (0..bytes.len()).rev().find(|&i| keyword_at(bytes, top, i, keyword))
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(query: &str) -> Option<Vec<String>> {
        return_columns(query)
    }

    #[test]
    fn test_plain_and_aliased_items() {
        assert_eq!(
            columns("MATCH (c:Compound) RETURN c.name, c.chembl_id AS id"),
            Some(vec!["c.name".to_string(), "id".to_string()])
        );
    }

    #[test]
    fn test_order_is_as_written_not_alphabetical() {
        assert_eq!(
            columns("MATCH (t:Target) RETURN t.name AS zz_name, t.uuid AS aa_id LIMIT 10"),
            Some(vec!["zz_name".to_string(), "aa_id".to_string()])
        );
    }

    #[test]
    fn test_nested_commas_and_keywords_are_ignored() {
        let query = "MATCH (n) WITH n, [x IN n.tags WHERE x <> 'a, b' | x] AS tags \
                     RETURN DISTINCT coalesce(n.name, 'RETURN x') AS display, size(tags) \
                     ORDER BY display SKIP 5 LIMIT 20";
        assert_eq!(
            columns(query),
            Some(vec!["display".to_string(), "size(tags)".to_string()])
        );
    }

    #[test]
    fn test_subquery_return_is_not_the_result() {
        let query = "CALL { MATCH (c:Compound) RETURN c LIMIT 5 } RETURN c.name AS name, c.id AS id";
        assert_eq!(
            columns(query),
            Some(vec!["name".to_string(), "id".to_string()])
        );
    }

    #[test]
    fn test_quoted_aliases_and_lowercase_keywords() {
        assert_eq!(
            columns("match (n) return n.name as `display name`, n.id as `a``b`;"),
            Some(vec!["display name".to_string(), "a`b".to_string()])
        );
    }

    #[test]
    fn test_property_named_like_a_keyword() {
        assert_eq!(
            columns("MATCH (n) RETURN n.limit, n.as"),
            Some(vec!["n.limit".to_string(), "n.as".to_string()])
        );
    }

    #[test]
    fn test_star_and_missing_return() {
        assert_eq!(columns("MATCH (n) RETURN *"), None);
        assert_eq!(columns("CREATE (n:Compound {name: 'x'})"), None);
    }

    #[test]
    fn test_union_uses_first_branch_names() {
        // Both branches must project the same names.
        assert_eq!(
            columns("RETURN 1 AS b, 2 AS a UNION RETURN 3 AS b, 4 AS a"),
            Some(vec!["b".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            columns("MATCH (n) /* RETURN n.c, */ RETURN n.b, n.a // RETURN n.d"),
            Some(vec!["n.b".to_string(), "n.a".to_string()])
        );
    }
}
