//! R2RML document reader.
//!
//! Accepts Turtle or JSON-LD; the format is detected heuristically (JSON-LD
//! starts with `{` or `[` after trimming). Both formats land in the same
//! subject-keyed triple store before TriplesMap extraction, so the
//! extraction rules are written once.

use super::template::Template;
use super::{table_key, MappingSet, ObjectMap, RefObjectMap, TriplesMapping};
use crate::error::{VgError, VgResult};
use crate::term::{Scalar, Term};
use std::collections::{BTreeMap, HashMap};

const RR: &str = "http://www.w3.org/ns/r2rml#";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Parse an R2RML document (Turtle or JSON-LD) into table-keyed mappings
pub fn parse_mapping(input: &str) -> VgResult<MappingSet> {
    let trimmed = input.trim_start();
    let store = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        JsonLdReader::new().read(trimmed)?
    } else {
        TurtleParser::new(input).parse()?
    };
    extract_mappings(&store)
}

// ============================================================================
// Triple store shared by both readers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Iri(String),
    Literal(String),
    Blank(String),
}

impl Node {
    fn id(&self) -> &str {
        match self {
            Node::Iri(s) | Node::Literal(s) | Node::Blank(s) => s,
        }
    }

    fn as_literal(&self) -> Option<&str> {
        match self {
            Node::Literal(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct TripleStore {
    /// subject id → (predicate IRI, object)
    triples: HashMap<String, Vec<(String, Node)>>,
    /// subject ids in document order, for deterministic extraction
    order: Vec<String>,
}

impl TripleStore {
    fn insert(&mut self, subject: String, predicate: String, object: Node) {
        if !self.triples.contains_key(&subject) {
            self.order.push(subject.clone());
        }
        self.triples
            .entry(subject)
            .or_default()
            .push((predicate, object));
    }

    fn objects<'a>(&'a self, subject: &str, predicate: &str) -> Vec<&'a Node> {
        self.triples
            .get(subject)
            .map(|po| {
                po.iter()
                    .filter(|(p, _)| p == predicate)
                    .map(|(_, o)| o)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn object<'a>(&'a self, subject: &str, predicate: &str) -> Option<&'a Node> {
        self.objects(subject, predicate).into_iter().next()
    }

    fn subjects_of_type(&self, type_iri: &str) -> Vec<&str> {
        self.order
            .iter()
            .filter(|s| {
                self.objects(s, RDF_TYPE)
                    .iter()
                    .any(|o| matches!(o, Node::Iri(iri) if iri == type_iri))
            })
            .map(String::as_str)
            .collect()
    }
}

// ============================================================================
// Turtle subset parser
// ============================================================================

struct TurtleParser<'a> {
    input: &'a [u8],
    pos: usize,
    prefixes: HashMap<String, String>,
    blank_counter: usize,
    store: TripleStore,
}

impl<'a> TurtleParser<'a> {
    fn new(input: &'a str) -> Self {
        TurtleParser {
            input: input.as_bytes(),
            pos: 0,
            prefixes: HashMap::new(),
            blank_counter: 0,
            store: TripleStore::default(),
        }
    }

    fn parse(mut self) -> VgResult<TripleStore> {
        loop {
            self.skip_ws();
            if self.at_end() {
                break;
            }
            if self.peek_str("@prefix") || self.peek_str("PREFIX") {
                self.parse_prefix()?;
            } else {
                let subject = self.parse_subject()?;
                self.parse_predicate_object_list(&subject)?;
                self.skip_ws();
                self.expect(b'.')?;
            }
        }
        Ok(self.store)
    }

    fn parse_prefix(&mut self) -> VgResult<()> {
        // "@prefix rr: <http://...> ." or SPARQL-style "PREFIX rr: <...>"
        let sparql_style = self.peek_str("PREFIX");
        if sparql_style {
            self.pos += "PREFIX".len();
        } else {
            self.pos += "@prefix".len();
        }
        self.skip_ws();
        let name = self.take_while(|c| c != b':');
        self.expect(b':')?;
        self.skip_ws();
        let iri = self.parse_iri_ref()?;
        self.prefixes.insert(name, iri);
        if !sparql_style {
            self.skip_ws();
            self.expect(b'.')?;
        }
        Ok(())
    }

    fn parse_subject(&mut self) -> VgResult<String> {
        self.skip_ws();
        match self.peek() {
            Some(b'<') => Ok(self.parse_iri_ref()?),
            Some(b'[') => self.parse_blank_node(),
            Some(b'_') => self.parse_blank_label(),
            _ => {
                let node = self.parse_prefixed_name()?;
                Ok(node)
            }
        }
    }

    fn parse_predicate_object_list(&mut self, subject: &str) -> VgResult<()> {
        loop {
            self.skip_ws();
            let predicate = self.parse_predicate()?;
            loop {
                self.skip_ws();
                let object = self.parse_object()?;
                self.store
                    .insert(subject.to_string(), predicate.clone(), object);
                self.skip_ws();
                if self.peek() == Some(b',') {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.peek() == Some(b';') {
                self.pos += 1;
                self.skip_ws();
                // trailing ';' before '.' or ']' is legal Turtle
                if matches!(self.peek(), Some(b'.') | Some(b']')) {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn parse_predicate(&mut self) -> VgResult<String> {
        if self.peek_str("a") {
            // bare 'a' only when followed by whitespace
            let next = self.input.get(self.pos + 1).copied();
            if next.map_or(false, |c| c.is_ascii_whitespace()) {
                self.pos += 1;
                return Ok(RDF_TYPE.to_string());
            }
        }
        if self.peek() == Some(b'<') {
            self.parse_iri_ref()
        } else {
            self.parse_prefixed_name()
        }
    }

    fn parse_object(&mut self) -> VgResult<Node> {
        match self.peek() {
            Some(b'<') => Ok(Node::Iri(self.parse_iri_ref()?)),
            Some(b'"') => {
                let value = self.parse_string_literal()?;
                // consume optional ^^<datatype> or @lang annotation
                if self.peek_str("^^") {
                    self.pos += 2;
                    if self.peek() == Some(b'<') {
                        self.parse_iri_ref()?;
                    } else {
                        self.parse_prefixed_name()?;
                    }
                } else if self.peek() == Some(b'@') {
                    self.pos += 1;
                    self.take_while(|c| c.is_ascii_alphanumeric() || c == b'-');
                }
                Ok(Node::Literal(value))
            }
            Some(b'[') => {
                let id = self.parse_blank_node()?;
                Ok(Node::Blank(id))
            }
            Some(b'_') => {
                let id = self.parse_blank_label()?;
                Ok(Node::Blank(id))
            }
            Some(c) if c.is_ascii_digit() || c == b'-' || c == b'+' => {
                let num = self.take_while(|c| {
                    c.is_ascii_digit() || c == b'.' || c == b'-' || c == b'+' || c == b'e'
                });
                Ok(Node::Literal(num))
            }
            _ => {
                if self.peek_str("true") {
                    self.pos += 4;
                    Ok(Node::Literal("true".to_string()))
                } else if self.peek_str("false") {
                    self.pos += 5;
                    Ok(Node::Literal("false".to_string()))
                } else {
                    Ok(Node::Iri(self.parse_prefixed_name()?))
                }
            }
        }
    }

    fn parse_blank_node(&mut self) -> VgResult<String> {
        self.expect(b'[')?;
        let id = format!("_:b{}", self.blank_counter);
        self.blank_counter += 1;
        self.skip_ws();
        if self.peek() != Some(b']') {
            self.parse_predicate_object_list(&id)?;
            self.skip_ws();
        }
        self.expect(b']')?;
        Ok(id)
    }

    fn parse_blank_label(&mut self) -> VgResult<String> {
        // _:label
        self.expect(b'_')?;
        self.expect(b':')?;
        let label = self.take_while(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'-');
        Ok(format!("_:{label}"))
    }

    fn parse_iri_ref(&mut self) -> VgResult<String> {
        self.expect(b'<')?;
        let iri = self.take_while(|c| c != b'>');
        self.expect(b'>')?;
        Ok(iri)
    }

    fn parse_prefixed_name(&mut self) -> VgResult<String> {
        let prefix = self.take_while(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'-');
        self.expect(b':')?;
        let local = self.take_while(|c| {
            c.is_ascii_alphanumeric() || c == b'_' || c == b'-' || c == b'.' || c == b'%'
        });
        let base = self.prefixes.get(&prefix).ok_or_else(|| {
            VgError::InvalidMapping(format!("undeclared prefix '{prefix}:' at byte {}", self.pos))
        })?;
        Ok(format!("{base}{local}"))
    }

    fn parse_string_literal(&mut self) -> VgResult<String> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.next() {
                None => {
                    return Err(VgError::InvalidMapping(
                        "unterminated string literal".to_string(),
                    ))
                }
                Some(b'"') => break,
                Some(b'\\') => match self.next() {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(c) => out.push(c as char),
                    None => {
                        return Err(VgError::InvalidMapping(
                            "unterminated escape in string literal".to_string(),
                        ))
                    }
                },
                Some(c) => out.push(c as char),
            }
        }
        Ok(out)
    }

    // --- cursor helpers -----------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s.as_bytes())
    }

    fn expect(&mut self, c: u8) -> VgResult<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(VgError::InvalidMapping(format!(
                "expected '{}' at byte {}, found {:?}",
                c as char,
                self.pos,
                self.peek().map(|b| b as char)
            )))
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if pred(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }
}

// ============================================================================
// JSON-LD reader
// ============================================================================

struct JsonLdReader {
    prefixes: HashMap<String, String>,
    blank_counter: usize,
    store: TripleStore,
}

impl JsonLdReader {
    fn new() -> Self {
        let mut prefixes = HashMap::new();
        // rr: and rdf: are implied even without an explicit @context
        prefixes.insert("rr".to_string(), RR.to_string());
        prefixes.insert(
            "rdf".to_string(),
            "http://www.w3.org/1999/02/22-rdf-syntax-ns#".to_string(),
        );
        JsonLdReader {
            prefixes,
            blank_counter: 0,
            store: TripleStore::default(),
        }
    }

    fn read(mut self, input: &str) -> VgResult<TripleStore> {
        let doc: serde_json::Value = serde_json::from_str(input)?;

        if let serde_json::Value::Object(obj) = &doc {
            if let Some(context) = obj.get("@context") {
                self.read_context(context);
            }
        }
        let nodes: Vec<serde_json::Value> = match doc {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(mut obj) => match obj.remove("@graph") {
                Some(serde_json::Value::Array(items)) => items,
                Some(other) => vec![other],
                None => vec![serde_json::Value::Object(obj)],
            },
            _ => {
                return Err(VgError::InvalidMapping(
                    "JSON-LD document must be an object or array".to_string(),
                ))
            }
        };

        for node in &nodes {
            self.flatten(node)?;
        }
        Ok(self.store)
    }

    fn read_context(&mut self, context: &serde_json::Value) {
        if let serde_json::Value::Object(obj) = context {
            for (key, value) in obj {
                if let serde_json::Value::String(iri) = value {
                    self.prefixes.insert(key.clone(), iri.clone());
                }
            }
        }
    }

    fn expand(&self, name: &str) -> String {
        if let Some((prefix, local)) = name.split_once(':') {
            if let Some(base) = self.prefixes.get(prefix) {
                return format!("{base}{local}");
            }
        }
        name.to_string()
    }

    /// Flatten a JSON node into triples, returning its id
    fn flatten(&mut self, node: &serde_json::Value) -> VgResult<String> {
        let obj = match node {
            serde_json::Value::Object(obj) => obj,
            other => {
                return Err(VgError::InvalidMapping(format!(
                    "expected JSON object, found {other}"
                )))
            }
        };

        let id = match obj.get("@id").and_then(|v| v.as_str()) {
            Some(id) => self.expand(id),
            None => {
                let id = format!("_:j{}", self.blank_counter);
                self.blank_counter += 1;
                id
            }
        };

        for (key, value) in obj {
            if key == "@id" || key == "@context" {
                continue;
            }
            let predicate = if key == "@type" {
                RDF_TYPE.to_string()
            } else {
                self.expand(key)
            };

            let values = match value {
                serde_json::Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            };

            for value in values {
                let object = self.flatten_value(key, value)?;
                self.store.insert(id.clone(), predicate.clone(), object);
            }
        }

        Ok(id)
    }

    fn flatten_value(&mut self, key: &str, value: &serde_json::Value) -> VgResult<Node> {
        match value {
            serde_json::Value::Object(obj) => {
                if let Some(v) = obj.get("@value") {
                    return Ok(Node::Literal(json_literal(v)));
                }
                if obj.len() == 1 {
                    if let Some(id) = obj.get("@id").and_then(|v| v.as_str()) {
                        return Ok(Node::Iri(self.expand(id)));
                    }
                }
                let id = self.flatten(value)?;
                Ok(if id.starts_with("_:") {
                    Node::Blank(id)
                } else {
                    Node::Iri(id)
                })
            }
            serde_json::Value::String(s) => {
                // @type values and strings with a declared prefix reference
                // nodes; everything else stays a literal (template strings
                // contain "://" and must not be promoted to IRIs)
                if key == "@type" {
                    Ok(Node::Iri(self.expand(s)))
                } else if s.split_once(':').map_or(false, |(prefix, _)| {
                    self.prefixes.contains_key(prefix)
                }) {
                    Ok(Node::Iri(self.expand(s)))
                } else {
                    Ok(Node::Literal(s.clone()))
                }
            }
            other => Ok(Node::Literal(json_literal(other))),
        }
    }
}

fn json_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// TriplesMap extraction
// ============================================================================

fn extract_mappings(store: &TripleStore) -> VgResult<MappingSet> {
    let rr_triples_map = format!("{RR}TriplesMap");
    let subjects = store.subjects_of_type(&rr_triples_map);
    if subjects.is_empty() {
        return Err(VgError::InvalidMapping(
            "document contains no rr:TriplesMap".to_string(),
        ));
    }

    let mut mappings = MappingSet::new();
    for subject in subjects {
        let mapping = extract_triples_map(store, subject)?;
        mappings.insert(mapping.table.clone(), mapping);
    }
    Ok(mappings)
}

fn rr(local: &str) -> String {
    format!("{RR}{local}")
}

fn extract_triples_map(store: &TripleStore, subject: &str) -> VgResult<TriplesMapping> {
    let logical_table = store.object(subject, &rr("logicalTable")).ok_or_else(|| {
        VgError::InvalidMapping(format!("{subject}: missing rr:logicalTable"))
    })?;
    let table_name = store
        .object(logical_table.id(), &rr("tableName"))
        .and_then(Node::as_literal)
        .ok_or_else(|| VgError::InvalidMapping(format!("{subject}: missing rr:tableName")))?;

    let subject_map = store
        .object(subject, &rr("subjectMap"))
        .ok_or_else(|| VgError::InvalidMapping(format!("{subject}: missing rr:subjectMap")))?;
    let template = store
        .object(subject_map.id(), &rr("template"))
        .and_then(Node::as_literal)
        .ok_or_else(|| {
            VgError::InvalidMapping(format!("{subject}: subjectMap has no rr:template"))
        })?;
    let class = store
        .object(subject_map.id(), &rr("class"))
        .map(|n| n.id().to_string());

    let mut predicates = BTreeMap::new();
    for pom in store.objects(subject, &rr("predicateObjectMap")) {
        let predicate = store
            .object(pom.id(), &rr("predicate"))
            .ok_or_else(|| {
                VgError::InvalidMapping(format!("{subject}: predicateObjectMap has no rr:predicate"))
            })?
            .id()
            .to_string();
        let object_map_node = store.object(pom.id(), &rr("objectMap")).ok_or_else(|| {
            VgError::InvalidMapping(format!("{subject}: predicateObjectMap has no rr:objectMap"))
        })?;
        let object_map = extract_object_map(store, object_map_node)?;
        predicates.insert(predicate, object_map);
    }

    Ok(TriplesMapping {
        iri: subject.to_string(),
        table: table_key(table_name),
        subject_template: Template::parse(template),
        class,
        predicates,
    })
}

fn extract_object_map(store: &TripleStore, node: &Node) -> VgResult<ObjectMap> {
    let id = node.id();
    let datatype = store
        .object(id, &rr("datatype"))
        .map(|n| n.id().to_string());

    if let Some(parent) = store.object(id, &rr("parentTriplesMap")) {
        let mut child_columns = Vec::new();
        let mut parent_columns = Vec::new();
        for condition in store.objects(id, &rr("joinCondition")) {
            let child = store
                .object(condition.id(), &rr("child"))
                .and_then(Node::as_literal)
                .ok_or_else(|| {
                    VgError::InvalidMapping(format!("{id}: joinCondition missing rr:child"))
                })?;
            let parent_col = store
                .object(condition.id(), &rr("parent"))
                .and_then(Node::as_literal)
                .ok_or_else(|| {
                    VgError::InvalidMapping(format!("{id}: joinCondition missing rr:parent"))
                })?;
            child_columns.push(child.to_string());
            parent_columns.push(parent_col.to_string());
        }
        if child_columns.is_empty() {
            return Err(VgError::InvalidMapping(format!(
                "{id}: rr:parentTriplesMap without rr:joinCondition"
            )));
        }
        return Ok(ObjectMap::Ref(RefObjectMap {
            parent_triples_map: parent.id().to_string(),
            child_columns,
            parent_columns,
        }));
    }

    if let Some(column) = store.object(id, &rr("column")).and_then(Node::as_literal) {
        return Ok(ObjectMap::Column {
            name: column.to_string(),
            datatype,
        });
    }

    if let Some(template) = store.object(id, &rr("template")).and_then(Node::as_literal) {
        return Ok(ObjectMap::Template {
            template: Template::parse(template),
            datatype,
        });
    }

    if let Some(constant) = store.object(id, &rr("constant")) {
        let term = match constant {
            Node::Iri(iri) => Term::Iri(iri.clone()),
            Node::Literal(s) => Term::Literal(Scalar::string(s.clone())),
            Node::Blank(b) => Term::Blank(b.clone()),
        };
        return Ok(ObjectMap::Constant { term });
    }

    Err(VgError::InvalidMapping(format!(
        "{id}: objectMap needs rr:column, rr:template, rr:constant, or rr:parentTriplesMap"
    )))
}
