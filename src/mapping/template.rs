//! Subject/object template handling.
//!
//! R2RML templates are strings with `{column}` placeholders, e.g.
//! `http://ex.org/airline/{id}`. Templates are compiled once into segments
//! so expansion over rows and inverse matching against grounded IRIs are
//! both cheap.

use crate::term::{Row, Scalar};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Column(String),
}

/// A compiled `{col}`-placeholder template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' if matches!(chars.peek(), Some('{') | Some('}')) => {
                    // escaped brace belongs to the literal text
                    literal.push(chars.next().unwrap());
                }
                '{' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let mut column = String::new();
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                        column.push(c);
                    }
                    segments.push(Segment::Column(column));
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Template {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Column names referenced by the template, in order of appearance
    pub fn columns(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Column(c) => Some(c.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Expand the template over a row. `None` when a referenced column is
    /// missing or null (R2RML generates no term for such rows).
    pub fn expand(&self, row: &Row) -> Option<String> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Column(c) => match row.get(c.as_str()) {
                    None | Some(Scalar::Null) => return None,
                    Some(value) => out.push_str(&value.to_string()),
                },
            }
        }
        Some(out)
    }

    /// Inverse-match a grounded IRI against the template, recovering the
    /// column values as strings. Used to turn grounded subjects into
    /// equality pushdowns.
    pub fn match_iri(&self, iri: &str) -> Option<HashMap<String, String>> {
        let mut pattern = String::from("^");
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => pattern.push_str(&regex::escape(s)),
                Segment::Column(_) => pattern.push_str("(.+?)"),
            }
        }
        pattern.push('$');

        let re = Regex::new(&pattern).ok()?;
        let caps = re.captures(iri)?;

        let mut out = HashMap::new();
        let mut group = 1;
        for segment in &self.segments {
            if let Segment::Column(c) = segment {
                out.insert(c.clone(), caps.get(group)?.as_str().to_string());
                group += 1;
            }
        }
        Some(out)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_columns() {
        let t = Template::parse("http://ex.org/airline/{id}/{country}");
        assert_eq!(t.columns(), vec!["id", "country"]);
    }

    #[test]
    fn test_expand() {
        let t = Template::parse("http://ex.org/airline/{id}");
        let mut row = Row::new();
        row.insert("id".to_string(), Scalar::Long(42));
        assert_eq!(
            t.expand(&row).unwrap(),
            "http://ex.org/airline/42".to_string()
        );
    }

    #[test]
    fn test_expand_missing_column() {
        let t = Template::parse("http://ex.org/airline/{id}");
        assert_eq!(t.expand(&Row::new()), None);

        let mut row = Row::new();
        row.insert("id".to_string(), Scalar::Null);
        assert_eq!(t.expand(&row), None);
    }

    #[test]
    fn test_match_iri() {
        let t = Template::parse("http://ex.org/airline/{id}");
        let cols = t.match_iri("http://ex.org/airline/42").unwrap();
        assert_eq!(cols.get("id").map(String::as_str), Some("42"));
        assert!(t.match_iri("http://ex.org/route/42").is_none());
    }

    #[test]
    fn test_match_iri_two_columns() {
        let t = Template::parse("http://ex.org/route/{src}-{dst}");
        let cols = t.match_iri("http://ex.org/route/JFK-LAX").unwrap();
        assert_eq!(cols.get("src").map(String::as_str), Some("JFK"));
        assert_eq!(cols.get("dst").map(String::as_str), Some("LAX"));
    }
}
