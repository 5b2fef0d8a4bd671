//! # Routing Index & Join Graph
//!
//! Both structures are built once at registration from the parsed mappings.
//! The routing index answers "which table can serve this class/predicate";
//! the join graph records the RefObjectMap-derived foreign keys between
//! tables. Edges live in a flat vector with side indexes, so cyclic
//! references between mappings are representable without a pointer graph.

use crate::error::{VgError, VgResult};
use crate::mapping::MappingSet;
use std::collections::HashMap;

/// A foreign-key edge derived from an R2RML RefObjectMap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEdge {
    pub child_table: String,
    pub parent_table: String,
    pub child_columns: Vec<String>,
    pub parent_columns: Vec<String>,
    /// Predicate IRI of the enclosing predicateObjectMap
    pub predicate: String,
}

impl JoinEdge {
    pub fn touches(&self, table: &str) -> bool {
        self.child_table == table || self.parent_table == table
    }

    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.child_table == a && self.parent_table == b)
            || (self.child_table == b && self.parent_table == a)
    }
}

/// All join edges of a virtual graph, with side indexes
#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    edges: Vec<JoinEdge>,
    by_table: HashMap<String, Vec<usize>>,
    by_triples_map_iri: HashMap<String, String>,
}

impl JoinGraph {
    /// Derive the join graph from RefObjectMap declarations.
    ///
    /// Fails when a RefObjectMap references a TriplesMap that does not
    /// exist in the mapping set.
    pub fn from_mappings(mappings: &MappingSet) -> VgResult<Self> {
        let mut graph = JoinGraph::default();
        for mapping in mappings.values() {
            graph
                .by_triples_map_iri
                .insert(mapping.iri.clone(), mapping.table.clone());
        }

        for mapping in mappings.values() {
            for (predicate, ref_map) in mapping.ref_object_maps() {
                let parent_table = graph
                    .by_triples_map_iri
                    .get(&ref_map.parent_triples_map)
                    .cloned()
                    .ok_or_else(|| {
                        VgError::InvalidMapping(format!(
                            "{}: rr:parentTriplesMap {} does not exist",
                            mapping.iri, ref_map.parent_triples_map
                        ))
                    })?;
                let edge = JoinEdge {
                    child_table: mapping.table.clone(),
                    parent_table,
                    child_columns: ref_map.child_columns.clone(),
                    parent_columns: ref_map.parent_columns.clone(),
                    predicate: predicate.to_string(),
                };
                graph.push(edge);
            }
        }
        Ok(graph)
    }

    fn push(&mut self, edge: JoinEdge) {
        let idx = self.edges.len();
        self.by_table
            .entry(edge.child_table.clone())
            .or_default()
            .push(idx);
        if edge.parent_table != edge.child_table {
            self.by_table
                .entry(edge.parent_table.clone())
                .or_default()
                .push(idx);
        }
        self.edges.push(edge);
    }

    pub fn has_join_edges(&self) -> bool {
        !self.edges.is_empty()
    }

    pub fn edges(&self) -> &[JoinEdge] {
        &self.edges
    }

    /// Edges where `table` appears as child or parent
    pub fn edges_for_table(&self, table: &str) -> Vec<&JoinEdge> {
        self.by_table
            .get(table)
            .map(|indexes| indexes.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Edges linking the two tables, in either direction
    pub fn edges_between(&self, a: &str, b: &str) -> Vec<&JoinEdge> {
        self.edges_for_table(a)
            .into_iter()
            .filter(|e| e.links(a, b))
            .collect()
    }

    /// Table behind a TriplesMap IRI (fast rr:parentTriplesMap resolution)
    pub fn table_for_triples_map(&self, iri: &str) -> Option<&str> {
        self.by_triples_map_iri.get(iri).map(String::as_str)
    }
}

/// Class/predicate → mapping lookup
#[derive(Debug, Clone, Default)]
pub struct RoutingIndex {
    by_class: HashMap<String, Vec<String>>,
    by_predicate: HashMap<String, Vec<String>>,
}

impl RoutingIndex {
    pub fn build(mappings: &MappingSet) -> Self {
        let mut index = RoutingIndex::default();
        for mapping in mappings.values() {
            if let Some(class) = &mapping.class {
                index
                    .by_class
                    .entry(class.clone())
                    .or_default()
                    .push(mapping.table.clone());
            }
            for predicate in mapping.predicates.keys() {
                index
                    .by_predicate
                    .entry(predicate.clone())
                    .or_default()
                    .push(mapping.table.clone());
            }
        }
        index
    }

    pub fn mappings_for_class(&self, class: &str) -> &[String] {
        self.by_class.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn mappings_for_predicate(&self, predicate: &str) -> &[String] {
        self.by_predicate
            .get(predicate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolve a class to its unique serving table.
    ///
    /// Multiple matches are rejected until their semantics are specified;
    /// silently picking the first would make results depend on map order.
    pub fn route_class(&self, class: &str) -> VgResult<Option<&str>> {
        Self::unique(self.mappings_for_class(class), class)
    }

    /// Resolve a predicate to its unique serving table
    pub fn route_predicate(&self, predicate: &str) -> VgResult<Option<&str>> {
        Self::unique(self.mappings_for_predicate(predicate), predicate)
    }

    fn unique<'a>(tables: &'a [String], key: &str) -> VgResult<Option<&'a str>> {
        match tables {
            [] => Ok(None),
            [one] => Ok(Some(one)),
            many => Err(VgError::InvalidConfig {
                field: key.to_string(),
                reason: format!(
                    "ambiguous routing: predicate/class maps to tables {}",
                    many.join(", ")
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::parse_mapping;

    const DOC: &str = r#"
@prefix rr: <http://www.w3.org/ns/r2rml#> .
@prefix ex: <http://example.org/> .

ex:AirlineMap a rr:TriplesMap ;
    rr:logicalTable [ rr:tableName "airlines" ] ;
    rr:subjectMap [ rr:template "http://example.org/airline/{id}" ; rr:class ex:Airline ] ;
    rr:predicateObjectMap [ rr:predicate ex:name ; rr:objectMap [ rr:column "name" ] ] .

ex:RouteMap a rr:TriplesMap ;
    rr:logicalTable [ rr:tableName "routes" ] ;
    rr:subjectMap [ rr:template "http://example.org/route/{rid}" ; rr:class ex:Route ] ;
    rr:predicateObjectMap [ rr:predicate ex:src ; rr:objectMap [ rr:column "src" ] ] ;
    rr:predicateObjectMap [
        rr:predicate ex:operatedBy ;
        rr:objectMap [
            rr:parentTriplesMap ex:AirlineMap ;
            rr:joinCondition [ rr:child "airline_id" ; rr:parent "id" ]
        ]
    ] .
"#;

    #[test]
    fn test_routing_index() {
        let mappings = parse_mapping(DOC).unwrap();
        let index = RoutingIndex::build(&mappings);

        assert_eq!(
            index.route_class("http://example.org/Airline").unwrap(),
            Some("airlines")
        );
        assert_eq!(
            index
                .route_predicate("http://example.org/operatedBy")
                .unwrap(),
            Some("routes")
        );
        assert_eq!(index.route_predicate("http://example.org/nope").unwrap(), None);
    }

    #[test]
    fn test_join_graph_edges() {
        let mappings = parse_mapping(DOC).unwrap();
        let graph = JoinGraph::from_mappings(&mappings).unwrap();

        assert!(graph.has_join_edges());
        assert_eq!(graph.edges().len(), 1);

        let edge = &graph.edges()[0];
        assert_eq!(edge.child_table, "routes");
        assert_eq!(edge.parent_table, "airlines");
        assert_eq!(edge.predicate, "http://example.org/operatedBy");

        assert_eq!(graph.edges_between("routes", "airlines").len(), 1);
        assert_eq!(graph.edges_between("airlines", "routes").len(), 1);
        assert_eq!(graph.edges_for_table("airlines").len(), 1);
        assert_eq!(
            graph.table_for_triples_map("http://example.org/AirlineMap"),
            Some("airlines")
        );
    }

    #[test]
    fn test_ambiguous_routing_is_an_error() {
        let doc = r#"
@prefix rr: <http://www.w3.org/ns/r2rml#> .
@prefix ex: <http://example.org/> .
ex:A a rr:TriplesMap ;
    rr:logicalTable [ rr:tableName "t1" ] ;
    rr:subjectMap [ rr:template "http://example.org/a/{id}" ] ;
    rr:predicateObjectMap [ rr:predicate ex:name ; rr:objectMap [ rr:column "name" ] ] .
ex:B a rr:TriplesMap ;
    rr:logicalTable [ rr:tableName "t2" ] ;
    rr:subjectMap [ rr:template "http://example.org/b/{id}" ] ;
    rr:predicateObjectMap [ rr:predicate ex:name ; rr:objectMap [ rr:column "name" ] ] .
"#;
        let mappings = parse_mapping(doc).unwrap();
        let index = RoutingIndex::build(&mappings);
        assert_eq!(index.mappings_for_predicate("http://example.org/name").len(), 2);
        assert!(index.route_predicate("http://example.org/name").is_err());
    }

    #[test]
    fn test_dangling_parent_triples_map_fails() {
        let doc = r#"
@prefix rr: <http://www.w3.org/ns/r2rml#> .
@prefix ex: <http://example.org/> .
ex:R a rr:TriplesMap ;
    rr:logicalTable [ rr:tableName "routes" ] ;
    rr:subjectMap [ rr:template "http://example.org/route/{rid}" ] ;
    rr:predicateObjectMap [
        rr:predicate ex:operatedBy ;
        rr:objectMap [
            rr:parentTriplesMap ex:Nowhere ;
            rr:joinCondition [ rr:child "a" ; rr:parent "b" ]
        ]
    ] .
"#;
        let mappings = parse_mapping(doc).unwrap();
        assert!(JoinGraph::from_mappings(&mappings).is_err());
    }
}
