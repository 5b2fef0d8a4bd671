//! Executor integration: join-edge traversal, Cartesian cap, anti-joins,
//! transitive paths, the finalize chain, and row/columnar equivalence.

mod common;

use std::sync::Arc;
use tempfile::TempDir;
use vgraph::{
    AggFunc, CmpOp, CreateVg, DataType, Expr, GraphSettings, IcebergConfig, IcebergDatabase,
    MemoryNameservice, OrderKey, PathMod, Row, Scalar, SelectQuery, Selector, Solution,
    TableWriter, Term, TermPattern, TriplePattern, VgError, VgRegistry, WherePattern, RDF_TYPE,
};

fn triple(s: &str, p: &str, o: TermPattern) -> WherePattern {
    WherePattern::Triple(TriplePattern::new(
        TermPattern::var(s),
        TermPattern::iri(common::ex(p)),
        o,
    ))
}

fn class_pattern(s: &str, class: &str) -> WherePattern {
    WherePattern::Triple(TriplePattern::new(
        TermPattern::var(s),
        TermPattern::iri(RDF_TYPE),
        TermPattern::iri(common::ex(class)),
    ))
}

fn open_db(warehouse: &std::path::Path, settings: GraphSettings) -> IcebergDatabase {
    let config = IcebergConfig {
        warehouse_path: Some(warehouse.to_path_buf()),
        mapping_inline: Some(common::MAPPING.to_string()),
        ..Default::default()
    };
    IcebergDatabase::open("flights:main".to_string(), &config, settings).unwrap()
}

fn sorted(mut solutions: Vec<Solution>) -> Vec<Solution> {
    solutions.sort_by_key(|s| format!("{s:?}"));
    solutions
}

fn string_of(solution: &Solution, var: &str) -> String {
    match solution.get(var) {
        Some(Term::Literal(Scalar::String(v))) => v.clone(),
        other => panic!("expected string binding for ?{var}, got {other:?}"),
    }
}

/// SELECT ?route_src ?name WHERE {
///   ?r a ex:Route ; ex:src ?route_src ; ex:operatedBy ?a .
///   ?a ex:name ?name }
fn join_query() -> SelectQuery {
    SelectQuery {
        select: vec![
            Selector::Var("route_src".to_string()),
            Selector::Var("name".to_string()),
        ],
        patterns: vec![
            class_pattern("r", "Route"),
            triple("r", "src", TermPattern::var("route_src")),
            triple("r", "operatedBy", TermPattern::var("a")),
            triple("a", "name", TermPattern::var("name")),
        ],
        ..Default::default()
    }
}

#[test]
fn test_join_traversal_via_ref_object_map() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    let solutions = db.query(join_query()).unwrap();
    assert_eq!(solutions.len(), 4);

    let mut pairs: Vec<(String, String)> = solutions
        .iter()
        .map(|s| (string_of(s, "route_src"), string_of(s, "name")))
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("FRA".to_string(), "Lufthansa".to_string()),
            ("JFK".to_string(), "United Airlines".to_string()),
            ("JFK".to_string(), "United Airlines".to_string()),
            ("ORD".to_string(), "American Airlines".to_string()),
        ]
    );

    // the plan reports a traversed hash join, not a Cartesian product
    let plan = db.explain(join_query()).unwrap();
    assert_eq!(plan.joins.len(), 1);
    assert_eq!(plan.joins[0].kind, "hash-join");
    assert_eq!(
        plan.joins[0].predicate.as_deref(),
        Some(common::ex("operatedBy").as_str())
    );
}

#[test]
fn test_without_fk_pattern_falls_back_to_cartesian() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    // same two tables, no ex:operatedBy pattern
    let query = SelectQuery {
        select: vec![
            Selector::Var("route_src".to_string()),
            Selector::Var("name".to_string()),
        ],
        patterns: vec![
            class_pattern("r", "Route"),
            triple("r", "src", TermPattern::var("route_src")),
            triple("a", "name", TermPattern::var("name")),
        ],
        ..Default::default()
    };

    let solutions = db.query(query.clone()).unwrap();
    assert_eq!(solutions.len(), 16); // 4 routes x 4 airlines

    let plan = db.explain(query.clone()).unwrap();
    assert_eq!(plan.joins[0].kind, "cartesian");

    // a cap below the product size fails with both table names
    let mut settings = GraphSettings::standard();
    settings.exec.cartesian_cap = Some(15);
    let capped = open_db(dir.path(), settings);
    match capped.query(query.clone()) {
        Err(VgError::CartesianProductTooLarge {
            left_table,
            right_table,
            cap,
            ..
        }) => {
            assert_eq!(left_table, "routes");
            assert_eq!(right_table, "airlines");
            assert_eq!(cap, 15);
        }
        other => panic!("expected CartesianProductTooLarge, got {other:?}"),
    }

    // exactly at the cap succeeds
    let mut settings = GraphSettings::standard();
    settings.exec.cartesian_cap = Some(16);
    let at_cap = open_db(dir.path(), settings);
    assert_eq!(at_cap.query(query).unwrap().len(), 16);
}

#[test]
fn test_row_and_columnar_agree() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());

    let row_db = open_db(dir.path(), GraphSettings::standard());
    let mut columnar_settings = GraphSettings::standard();
    columnar_settings.exec.columnar = true;
    let col_db = open_db(dir.path(), columnar_settings);

    for query in [join_query()] {
        let row_solutions = sorted(row_db.query(query.clone()).unwrap());
        let col_solutions = sorted(col_db.query(query).unwrap());
        assert_eq!(row_solutions, col_solutions);
    }

    // single-table query agrees as well
    let single = SelectQuery {
        select: vec![Selector::Var("n".to_string())],
        patterns: vec![
            class_pattern("a", "Airline"),
            triple("a", "name", TermPattern::var("n")),
        ],
        ..Default::default()
    };
    assert_eq!(
        sorted(row_db.query(single.clone()).unwrap()),
        sorted(col_db.query(single).unwrap())
    );
}

#[test]
fn test_grounded_subject_scans_one_entity() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    let query = SelectQuery {
        select: vec![Selector::Var("n".to_string())],
        patterns: vec![WherePattern::Triple(TriplePattern::new(
            TermPattern::iri(format!("{}airline/2", common::EX)),
            TermPattern::iri(common::ex("name")),
            TermPattern::var("n"),
        ))],
        ..Default::default()
    };
    let solutions = db.query(query).unwrap();
    assert_eq!(solutions.len(), 1);
    assert_eq!(string_of(&solutions[0], "n"), "Lufthansa");
}

#[test]
fn test_grounded_fk_object_constrains_child_scan() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    // routes operated by airline/1, via the RefObjectMap inverse template
    let query = SelectQuery {
        select: vec![Selector::Var("s".to_string())],
        patterns: vec![
            triple("r", "src", TermPattern::var("s")),
            triple(
                "r",
                "operatedBy",
                TermPattern::iri(format!("{}airline/1", common::EX)),
            ),
        ],
        ..Default::default()
    };
    let solutions = db.query(query).unwrap();
    let mut srcs: Vec<String> = solutions.iter().map(|s| string_of(s, "s")).collect();
    srcs.sort();
    assert_eq!(srcs, vec!["JFK".to_string(), "JFK".to_string()]);
}

#[test]
fn test_not_exists_anti_join() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    // SELECT ?a WHERE { ?a a ex:Airline .
    //   FILTER NOT EXISTS { ?a ex:country "United States" } }
    let query = SelectQuery {
        select: vec![Selector::Var("a".to_string())],
        patterns: vec![
            class_pattern("a", "Airline"),
            WherePattern::NotExists(vec![triple(
                "a",
                "country",
                TermPattern::Literal(Scalar::string("United States")),
            )]),
        ],
        ..Default::default()
    };

    let solutions = db.query(query).unwrap();
    let mut iris: Vec<&str> = solutions
        .iter()
        .filter_map(|s| s.get("a").and_then(Term::as_iri))
        .collect();
    iris.sort_unstable();
    // US airlines (1 and 3) are excluded; 2 and 4 remain
    assert_eq!(
        iris,
        vec![
            "http://example.org/airline/2",
            "http://example.org/airline/4"
        ]
    );
}

#[test]
fn test_exists_keeps_only_matching() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    // airlines that operate at least one route out of JFK
    let query = SelectQuery {
        select: vec![Selector::Var("n".to_string())],
        patterns: vec![
            class_pattern("a", "Airline"),
            triple("a", "name", TermPattern::var("n")),
            WherePattern::Exists(vec![
                triple("r", "operatedBy", TermPattern::var("a")),
                triple("r", "src", TermPattern::Literal(Scalar::string("JFK"))),
            ]),
        ],
        ..Default::default()
    };
    let solutions = db.query(query).unwrap();
    assert_eq!(
        solutions
            .iter()
            .map(|s| string_of(s, "n"))
            .collect::<Vec<_>>(),
        vec!["United Airlines".to_string()]
    );
}

#[test]
fn test_minus_removes_compatible() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    let query = SelectQuery {
        select: vec![Selector::Var("a".to_string())],
        patterns: vec![
            class_pattern("a", "Airline"),
            WherePattern::Minus(vec![triple(
                "a",
                "country",
                TermPattern::Literal(Scalar::string("Germany")),
            )]),
        ],
        ..Default::default()
    };
    let solutions = db.query(query).unwrap();
    assert_eq!(solutions.len(), 3);
    assert!(solutions
        .iter()
        .all(|s| s.get("a").and_then(Term::as_iri) != Some("http://example.org/airline/2")));
}

#[test]
fn test_aggregation_group_by_having() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    // SELECT ?name (COUNT(?r) AS ?routes) WHERE {
    //   ?r ex:operatedBy ?a . ?a ex:name ?name }
    // GROUP BY ?name HAVING (?routes > 1)
    let query = SelectQuery {
        select: vec![
            Selector::Var("name".to_string()),
            Selector::Aggregate {
                func: AggFunc::Count,
                var: Some("r".to_string()),
                distinct: false,
                alias: "routes".to_string(),
                separator: None,
            },
        ],
        patterns: vec![
            triple("r", "operatedBy", TermPattern::var("a")),
            triple("a", "name", TermPattern::var("name")),
        ],
        group_by: vec!["name".to_string()],
        having: Some(Expr::cmp(
            CmpOp::Gt,
            Expr::var("routes"),
            Expr::Const(Scalar::Long(1)),
        )),
        ..Default::default()
    };

    let solutions = db.query(query).unwrap();
    assert_eq!(solutions.len(), 1);
    assert_eq!(string_of(&solutions[0], "name"), "United Airlines");
    assert_eq!(
        solutions[0].get("routes"),
        Some(&Term::Literal(Scalar::Long(2)))
    );
}

#[test]
fn test_finalize_ordering_distinct_order_limit() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    // countries, deduplicated, ordered descending, top 2
    let query = SelectQuery {
        select: vec![Selector::Var("c".to_string())],
        distinct: true,
        patterns: vec![triple("a", "country", TermPattern::var("c"))],
        order_by: vec![OrderKey {
            var: "c".to_string(),
            descending: true,
        }],
        limit: Some(2),
        ..Default::default()
    };
    let solutions = db.query(query).unwrap();
    assert_eq!(
        solutions
            .iter()
            .map(|s| string_of(s, "c"))
            .collect::<Vec<_>>(),
        vec!["United States".to_string(), "Germany".to_string()]
    );
}

#[test]
fn test_bind_then_residual_filter_order() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    // BIND(?i * 10 AS ?x) FILTER(?x > 20): the filter must see the bound
    // value, so BIND runs first in the finalize chain
    let query = SelectQuery {
        select: vec![Selector::Var("n".to_string()), Selector::Var("x".to_string())],
        patterns: vec![
            triple("a", "name", TermPattern::var("n")),
            triple("a", "airlineId", TermPattern::var("i")),
            WherePattern::Bind {
                var: "x".to_string(),
                expr: Expr::Arith(
                    vgraph::query::ArithOp::Mul,
                    Box::new(Expr::var("i")),
                    Box::new(Expr::Const(Scalar::Long(10))),
                ),
            },
            WherePattern::Filter(Expr::cmp(
                CmpOp::Gt,
                Expr::var("x"),
                Expr::Const(Scalar::Long(20)),
            )),
        ],
        ..Default::default()
    };

    let solutions = db.query(query).unwrap();
    // ids 3 and 4 pass (30, 40); 1 and 2 do not
    let mut names: Vec<String> = solutions.iter().map(|s| string_of(s, "n")).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["American Airlines".to_string(), "Ghost Air".to_string()]
    );
    for solution in &solutions {
        match solution.get("x") {
            Some(Term::Literal(Scalar::Long(v))) => assert!(*v > 20),
            other => panic!("expected bound ?x, got {other:?}"),
        }
    }
}

#[test]
fn test_unmapped_predicate_is_no_mapping() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    let query = SelectQuery {
        select: vec![Selector::Var("x".to_string())],
        patterns: vec![triple("a", "fleetSize", TermPattern::var("x"))],
        ..Default::default()
    };
    match db.query(query) {
        Err(VgError::NoMapping(p)) => assert_eq!(p, common::ex("fleetSize")),
        other => panic!("expected NoMapping, got {other:?}"),
    }
}

#[test]
fn test_transitive_path_over_routes() {
    let dir = TempDir::new().unwrap();

    // a dedicated hop table: a -> b -> c -> d, plus e isolated
    let mut writer = TableWriter::create(
        dir.path(),
        "hops",
        vec![
            ("src".to_string(), DataType::String),
            ("dst".to_string(), DataType::String),
        ],
        Vec::new(),
    )
    .unwrap();
    let hop = |s: &str, d: &str| -> Row {
        let mut r = Row::new();
        r.insert("src".to_string(), Scalar::string(s));
        r.insert("dst".to_string(), Scalar::string(d));
        r
    };
    writer
        .append_rows(&[hop("a", "b"), hop("b", "c"), hop("c", "d")])
        .unwrap();
    writer.commit().unwrap();

    let mapping = r#"
@prefix rr: <http://www.w3.org/ns/r2rml#> .
@prefix ex: <http://example.org/> .
ex:HopMap a rr:TriplesMap ;
    rr:logicalTable [ rr:tableName "hops" ] ;
    rr:subjectMap [ rr:template "http://example.org/node/{src}" ; rr:class ex:Node ] ;
    rr:predicateObjectMap [ rr:predicate ex:next ;
        rr:objectMap [ rr:template "http://example.org/node/{dst}" ] ] .
"#;
    let config = IcebergConfig {
        warehouse_path: Some(dir.path().to_path_buf()),
        mapping_inline: Some(mapping.to_string()),
        ..Default::default()
    };
    let db =
        IcebergDatabase::open("hops:main".to_string(), &config, GraphSettings::standard())
            .unwrap();

    let node = |n: &str| format!("{}node/{n}", common::EX);

    // one-or-more from a reaches b, c, d
    let plus = SelectQuery {
        select: vec![Selector::Var("o".to_string())],
        patterns: vec![WherePattern::Triple(
            TriplePattern::new(
                TermPattern::iri(node("a")),
                TermPattern::iri(common::ex("next")),
                TermPattern::var("o"),
            )
            .with_path(PathMod::OneOrMore),
        )],
        ..Default::default()
    };
    let solutions = db.query(plus).unwrap();
    let mut reached: Vec<&str> = solutions
        .iter()
        .filter_map(|s| s.get("o").and_then(Term::as_iri))
        .collect();
    reached.sort_unstable();
    assert_eq!(
        reached,
        vec![node("b"), node("c"), node("d")]
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
    );

    // zero-or-more also emits the zero-step identity
    let star = SelectQuery {
        select: vec![Selector::Var("o".to_string())],
        patterns: vec![WherePattern::Triple(
            TriplePattern::new(
                TermPattern::iri(node("a")),
                TermPattern::iri(common::ex("next")),
                TermPattern::var("o"),
            )
            .with_path(PathMod::ZeroOrMore),
        )],
        ..Default::default()
    };
    let solutions = db.query(star).unwrap();
    assert_eq!(solutions.len(), 4); // a itself plus b, c, d

    // p* between two provided, disconnected-but-equal endpoints yields
    // exactly the zero-step binding
    let identity = SelectQuery {
        patterns: vec![WherePattern::Triple(
            TriplePattern::new(
                TermPattern::iri(node("d")),
                TermPattern::iri(common::ex("next")),
                TermPattern::iri(node("d")),
            )
            .with_path(PathMod::ZeroOrMore),
        )],
        ..Default::default()
    };
    let solutions = db.query(identity).unwrap();
    assert_eq!(solutions.len(), 1);
}

#[test]
fn test_streaming_finalize() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());
    let db = open_db(dir.path(), GraphSettings::standard());

    let rewritten = db.reorder(join_query()).unwrap();
    let stream = db.finalize_stream(rewritten);
    let solutions = stream.collect().unwrap();
    assert_eq!(solutions.len(), 4);

    // errors surface on the dedicated error channel
    let bad = SelectQuery {
        select: vec![Selector::Var("x".to_string())],
        patterns: vec![triple("a", "fleetSize", TermPattern::var("x"))],
        ..Default::default()
    };
    let stream = db.finalize_stream(bad);
    assert!(matches!(stream.collect(), Err(VgError::NoMapping(_))));
}

#[test]
fn test_registry_end_to_end_query() {
    let dir = TempDir::new().unwrap();
    common::build_warehouse(dir.path());

    let registry = VgRegistry::new(
        Arc::new(MemoryNameservice::new()),
        GraphSettings::standard(),
    );
    registry
        .create(CreateVg {
            name: "flights".to_string(),
            vg_type: "iceberg".to_string(),
            config: serde_json::json!({
                "warehouse-path": dir.path().to_str().unwrap(),
                "mappingInline": common::MAPPING,
            }),
            dependencies: vec![],
        })
        .unwrap();

    let vg = registry.resolve("flights").unwrap();
    let solutions = vg.query(join_query()).unwrap();
    assert_eq!(solutions.len(), 4);
}
