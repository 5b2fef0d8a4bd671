//! Shared fixtures: an OpenFlights-flavored warehouse (airlines + routes)
//! and the R2RML mapping that exposes it as a graph.
#![allow(dead_code)] // each test binary uses a different subset

use std::path::Path;
use vgraph::{DataType, Row, Scalar, TableWriter};

pub const EX: &str = "http://example.org/";

pub const MAPPING: &str = r#"
@prefix rr: <http://www.w3.org/ns/r2rml#> .
@prefix ex: <http://example.org/> .

ex:AirlineMap a rr:TriplesMap ;
    rr:logicalTable [ rr:tableName "airlines" ] ;
    rr:subjectMap [
        rr:template "http://example.org/airline/{id}" ;
        rr:class ex:Airline
    ] ;
    rr:predicateObjectMap [ rr:predicate ex:airlineId ; rr:objectMap [ rr:column "id" ] ] ;
    rr:predicateObjectMap [ rr:predicate ex:name ; rr:objectMap [ rr:column "name" ] ] ;
    rr:predicateObjectMap [ rr:predicate ex:country ; rr:objectMap [ rr:column "country" ] ] ;
    rr:predicateObjectMap [ rr:predicate ex:active ; rr:objectMap [ rr:column "active" ] ] .

ex:RouteMap a rr:TriplesMap ;
    rr:logicalTable [ rr:tableName "routes" ] ;
    rr:subjectMap [
        rr:template "http://example.org/route/{rid}" ;
        rr:class ex:Route
    ] ;
    rr:predicateObjectMap [ rr:predicate ex:src ; rr:objectMap [ rr:column "src" ] ] ;
    rr:predicateObjectMap [ rr:predicate ex:dst ; rr:objectMap [ rr:column "dst" ] ] ;
    rr:predicateObjectMap [
        rr:predicate ex:operatedBy ;
        rr:objectMap [
            rr:parentTriplesMap ex:AirlineMap ;
            rr:joinCondition [ rr:child "airline_id" ; rr:parent "id" ]
        ]
    ] .
"#;

pub fn ex(local: &str) -> String {
    format!("{EX}{local}")
}

fn airline(id: i64, name: &str, country: &str, active: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), Scalar::Long(id));
    row.insert("name".to_string(), Scalar::string(name));
    row.insert("country".to_string(), Scalar::string(country));
    row.insert("active".to_string(), Scalar::string(active));
    row
}

fn route(rid: i64, src: &str, dst: &str, airline_id: i64) -> Row {
    let mut row = Row::new();
    row.insert("rid".to_string(), Scalar::Long(rid));
    row.insert("src".to_string(), Scalar::string(src));
    row.insert("dst".to_string(), Scalar::string(dst));
    row.insert("airline_id".to_string(), Scalar::Long(airline_id));
    row
}

pub fn airline_columns() -> Vec<(String, DataType)> {
    vec![
        ("id".to_string(), DataType::Long),
        ("name".to_string(), DataType::String),
        ("country".to_string(), DataType::String),
        ("active".to_string(), DataType::String),
    ]
}

pub fn route_columns() -> Vec<(String, DataType)> {
    vec![
        ("rid".to_string(), DataType::Long),
        ("src".to_string(), DataType::String),
        ("dst".to_string(), DataType::String),
        ("airline_id".to_string(), DataType::Long),
    ]
}

/// Four airlines (two US, one German, one inactive Canadian) and four
/// routes. Returns the first snapshot id of the airlines table.
pub fn build_warehouse(warehouse: &Path) -> i64 {
    let mut airlines = TableWriter::create(
        warehouse,
        "airlines",
        airline_columns(),
        vec!["active".to_string()],
    )
    .expect("create airlines table");
    airlines
        .append_rows(&[
            airline(1, "United Airlines", "United States", "Y"),
            airline(2, "Lufthansa", "Germany", "Y"),
            airline(3, "American Airlines", "United States", "Y"),
            airline(4, "Ghost Air", "Canada", "N"),
        ])
        .expect("append airlines");
    let snapshot = airlines.commit().expect("commit airlines");

    let mut routes =
        TableWriter::create(warehouse, "routes", route_columns(), Vec::new())
            .expect("create routes table");
    routes
        .append_rows(&[
            route(10, "JFK", "LAX", 1),
            route(11, "FRA", "JFK", 2),
            route(12, "ORD", "DFW", 3),
            route(13, "JFK", "SFO", 1),
        ])
        .expect("append routes");
    routes.commit().expect("commit routes");

    snapshot
}
