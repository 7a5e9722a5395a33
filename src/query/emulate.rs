use crate::catalog::types::Value;
use crate::driver::Params;

/// SQL literal for a bound value, as it would appear in an emulated query.
pub fn quote(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Integer(v) => v.to_string(),
        Value::Float(v) => {
            if v.is_finite() {
                v.to_string()
            } else {
                "NULL".into()
            }
        }
        Value::Boolean(v) => i64::from(*v).to_string(),
        Value::Text(v) => format!("'{}'", v.replace('\'', "''")),
        Value::Blob(v) => format!("X'{}'", hex::encode(v)),
    }
}

/// Quotes an identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Substitutes placeholders with quoted literals.
///
/// Handles `?`, `?N` (1-based) and `:name`. Placeholders inside quoted
/// regions are left alone, as are placeholders with no matching parameter.
pub fn emulate(sql: &str, params: &Params) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut quote_char: Option<char> = None;
    let mut next_positional = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote_char {
            out.push(c);
            if c == q {
                quote_char = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote_char = Some(c);
                out.push(c);
                i += 1;
            }
            '?' => {
                let digits_end = scan(&chars, i + 1, |ch| ch.is_ascii_digit());
                let index = if digits_end > i + 1 {
                    chars[i + 1..digits_end]
                        .iter()
                        .collect::<String>()
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                } else {
                    let idx = next_positional;
                    next_positional += 1;
                    Some(idx)
                };
                match index.and_then(|idx| positional(params, idx)) {
                    Some(value) => out.push_str(&quote(value)),
                    None => out.extend(&chars[i..digits_end]),
                }
                i = digits_end;
            }
            ':' if chars.get(i + 1).is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_')
                && (i == 0 || chars[i - 1] != ':') =>
            {
                let end = scan(&chars, i + 1, |ch| ch.is_ascii_alphanumeric() || ch == '_');
                let name: String = chars[i + 1..end].iter().collect();
                match named(params, &name) {
                    Some(value) => out.push_str(&quote(value)),
                    None => out.extend(&chars[i..end]),
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn scan(chars: &[char], start: usize, pred: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && pred(chars[end]) {
        end += 1;
    }
    end
}

fn positional(params: &Params, index: usize) -> Option<&Value> {
    match params {
        Params::Positional(values) => values.get(index),
        Params::Named(_) => None,
    }
}

fn named<'a>(params: &'a Params, name: &str) -> Option<&'a Value> {
    match params {
        Params::Named(pairs) => pairs
            .iter()
            .find(|(k, _)| k.trim_start_matches([':', '@', '$']) == name)
            .map(|(_, v)| v),
        Params::Positional(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{emulate, quote, quote_ident};
    use crate::catalog::types::Value;
    use crate::driver::Params;

    #[test]
    fn positional_and_numbered_placeholders() {
        let params = Params::Positional(vec![Value::from("O'Brien"), Value::Integer(4)]);
        assert_eq!(
            emulate("SELECT * FROM t WHERE name = ? AND id = ?", &params),
            "SELECT * FROM t WHERE name = 'O''Brien' AND id = 4"
        );
        assert_eq!(emulate("SELECT ?2, ?1", &params), "SELECT 4, 'O''Brien'");
    }

    #[test]
    fn named_placeholders_skip_quoted_regions_and_casts() {
        let params = Params::Named(vec![("id".into(), Value::Integer(9))]);
        assert_eq!(
            emulate("SELECT ':id', x::text FROM t WHERE id = :id", &params),
            "SELECT ':id', x::text FROM t WHERE id = 9"
        );
    }

    #[test]
    fn unmatched_placeholders_are_kept() {
        let params = Params::Positional(vec![Value::Null]);
        assert_eq!(emulate("VALUES (?, ?)", &params), "VALUES (NULL, ?)");
        assert_eq!(emulate("WHERE a = :a", &params), "WHERE a = :a");
    }

    #[test]
    fn literals_follow_sql_quoting() {
        assert_eq!(quote(&Value::Boolean(true)), "1");
        assert_eq!(quote(&Value::Blob(vec![0xab, 0x01])), "X'ab01'");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
