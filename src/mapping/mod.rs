//! # R2RML Mapping Model
//!
//! An R2RML document describes how rows of a logical table become RDF
//! triples: a subject template, an optional class, and predicate/object
//! bindings. Parsing (Turtle or JSON-LD) lives in [`parser`]; this module
//! holds the immutable model consumed by routing and execution.

pub mod parser;
pub mod template;

pub use parser::parse_mapping;
pub use template::Template;

use crate::term::Term;
use std::collections::BTreeMap;

/// How a predicate's object value is produced from a row
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectMap {
    /// Value of a column, optionally coerced via `rr:datatype`
    Column {
        name: String,
        datatype: Option<String>,
    },
    /// IRI template over row columns
    Template {
        template: Template,
        datatype: Option<String>,
    },
    /// A constant term
    Constant { term: Term },
    /// Reference to another TriplesMap through join conditions
    Ref(RefObjectMap),
}

impl ObjectMap {
    /// The column backing this object map, if it is column-kind.
    /// Only column-kind bindings are eligible for pushdown.
    pub fn column(&self) -> Option<&str> {
        match self {
            ObjectMap::Column { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn datatype(&self) -> Option<&str> {
        match self {
            ObjectMap::Column { datatype, .. } | ObjectMap::Template { datatype, .. } => {
                datatype.as_deref()
            }
            _ => None,
        }
    }

    /// Columns this object map reads from a row
    pub fn columns(&self) -> Vec<String> {
        match self {
            ObjectMap::Column { name, .. } => vec![name.clone()],
            ObjectMap::Template { template, .. } => {
                template.columns().iter().map(|c| (*c).to_string()).collect()
            }
            ObjectMap::Constant { .. } => Vec::new(),
            ObjectMap::Ref(r) => r.child_columns.clone(),
        }
    }
}

/// An `rr:parentTriplesMap` reference with its join conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefObjectMap {
    /// IRI of the referenced TriplesMap
    pub parent_triples_map: String,
    pub child_columns: Vec<String>,
    pub parent_columns: Vec<String>,
}

/// One R2RML TriplesMap: logical table + subject template + class +
/// predicate bindings. Immutable after parse.
#[derive(Debug, Clone, PartialEq)]
pub struct TriplesMapping {
    /// IRI (or blank id) of the TriplesMap node in the document
    pub iri: String,
    /// Logical table name, stripped of quoting
    pub table: String,
    pub subject_template: Template,
    pub class: Option<String>,
    /// Predicate IRI → object map, iteration order stable
    pub predicates: BTreeMap<String, ObjectMap>,
}

impl TriplesMapping {
    pub fn object_map(&self, predicate: &str) -> Option<&ObjectMap> {
        self.predicates.get(predicate)
    }

    pub fn has_predicate(&self, predicate: &str) -> bool {
        self.predicates.contains_key(predicate)
    }

    /// All RefObjectMaps declared by this mapping, with their FK predicate
    pub fn ref_object_maps(&self) -> impl Iterator<Item = (&str, &RefObjectMap)> {
        self.predicates.iter().filter_map(|(p, om)| match om {
            ObjectMap::Ref(r) => Some((p.as_str(), r)),
            _ => None,
        })
    }
}

/// Parsed mapping set keyed by table name
pub type MappingSet = BTreeMap<String, TriplesMapping>;

/// Strip SQL-style quoting from a logical table name
pub fn table_key(table_name: &str) -> String {
    table_name
        .trim()
        .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_key_strips_quoting() {
        assert_eq!(table_key("\"airlines\""), "airlines");
        assert_eq!(table_key("`routes`"), "routes");
        assert_eq!(table_key("[dbo]"), "dbo");
        assert_eq!(table_key("plain"), "plain");
    }

    #[test]
    fn test_object_map_column_eligibility() {
        let col = ObjectMap::Column {
            name: "country".to_string(),
            datatype: None,
        };
        assert_eq!(col.column(), Some("country"));

        let tmpl = ObjectMap::Template {
            template: Template::parse("http://ex.org/{id}"),
            datatype: None,
        };
        assert_eq!(tmpl.column(), None);
        assert_eq!(tmpl.columns(), vec!["id".to_string()]);
    }
}
