//! Columnar Arrow-batch execution (opt-in).
//!
//! The plan is a tree of `ScanOp` and `HashJoinOp` over `RecordBatch`es.
//! Scans stream vectorized-filtered batches of only the columns the query
//! needs; joins build a hash table keyed by the join-edge columns,
//! copying build-side rows out of scan batches (copy-on-build, so scans
//! may close their batches), then stream the probe side and gather
//! matches into fresh batches. At the root, batches become row maps and
//! then SPARQL solutions through the same materializer as the row engine,
//! so the two modes agree on every valid input.
//!
//! Compilation succeeds only when every adjacent group pair is connected
//! by a traversed join edge; otherwise the caller falls back to the row
//! engine (which also covers the Cartesian cases).

use super::pipeline::QueryDeadline;
use super::rowjoin::{build_scan_request, materialize_solution, traversed_edge, TableGroup};
use super::GraphContext;
use crate::error::{VgError, VgResult};
use crate::planner::QueryContext;
use crate::source::{ScanOptions, TableSchema};
use crate::term::arrow_convert::{rows_to_batch, scalar_from_array};
use crate::term::{DataType, Row, Scalar, Solution};
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const OUTPUT_BATCH_ROWS: usize = 1024;

/// Qualified column layout of an operator's output
type ColSchema = Vec<(String, DataType)>;

fn qualify(prefix: usize, column: &str) -> String {
    format!("g{prefix}__{column}")
}

/// Execute the group chain columnar; `None` when the plan does not compile
/// (a pair of adjacent groups has no traversed join edge).
pub fn try_execute(
    gc: &GraphContext<'_>,
    groups: &[TableGroup],
    ctx: &QueryContext,
    deadline: &QueryDeadline,
) -> VgResult<Option<Vec<Solution>>> {
    let Some(plan) = compile(gc, groups, ctx)? else {
        return Ok(None);
    };

    // per-group materialization state, computed once
    let mut materializers = Vec::with_capacity(groups.len());
    for group in groups {
        let mapping = gc
            .mappings
            .get(&group.table)
            .ok_or_else(|| VgError::NoMapping(group.table.clone()))?;
        let source = gc
            .sources
            .get(&group.table)
            .ok_or_else(|| VgError::MissingSource(group.table.clone()))?;
        let table_schema = source.get_schema(&ScanOptions {
            time_travel: gc.time_travel,
            ..Default::default()
        })?;
        // compile() already proved every group satisfiable
        let Some(request) = build_scan_request(gc, mapping, &table_schema, group, ctx)? else {
            return Ok(Some(Vec::new()));
        };
        materializers.push((mapping, request));
    }

    let mut solutions = Vec::new();
    let schema = plan.schema();
    for batch in plan.execute(deadline)? {
        deadline.check()?;
        for row_idx in 0..batch.num_rows() {
            let mut merged = Some(Solution::new());
            for (group_idx, (mapping, request)) in materializers.iter().enumerate() {
                let prefix = format!("g{group_idx}__");
                let mut row = Row::new();
                for (col_idx, (name, _)) in schema.iter().enumerate() {
                    if let Some(bare) = name.strip_prefix(&prefix) {
                        row.insert(
                            bare.to_string(),
                            scalar_from_array(batch.column(col_idx).as_ref(), row_idx)?,
                        );
                    }
                }
                let solution = materialize_solution(
                    gc,
                    mapping,
                    request.subject_var.as_deref(),
                    &request.bindings,
                    &row,
                );
                merged = match (merged, solution) {
                    (Some(acc), Some(s)) => acc.merged(&s),
                    _ => None,
                };
                if merged.is_none() {
                    break;
                }
            }
            if let Some(solution) = merged {
                solutions.push(solution);
            }
        }
    }
    Ok(Some(solutions))
}

// ============================================================================
// Plan compilation
// ============================================================================

enum Op {
    Scan(ScanOp),
    Join(HashJoinOp),
}

struct ScanOp {
    source: Arc<dyn crate::source::TableSource>,
    opts: ScanOptions,
    /// bare → qualified rename applied to every emitted batch
    schema: ColSchema,
    bare_columns: Vec<String>,
}

struct HashJoinOp {
    build: Box<Op>,
    probe: Box<Op>,
    build_keys: Vec<String>,
    probe_keys: Vec<String>,
    schema: ColSchema,
}

impl Op {
    fn schema(&self) -> ColSchema {
        match self {
            Op::Scan(s) => s.schema.clone(),
            Op::Join(j) => j.schema.clone(),
        }
    }

    fn execute(&self, deadline: &QueryDeadline) -> VgResult<Vec<RecordBatch>> {
        match self {
            Op::Scan(scan) => scan.execute(deadline),
            Op::Join(join) => join.execute(deadline),
        }
    }
}

impl ScanOp {
    fn execute(&self, deadline: &QueryDeadline) -> VgResult<Vec<RecordBatch>> {
        let mut out = Vec::new();
        for batch in self.source.scan_batches(&self.opts)? {
            deadline.check()?;
            let batch = batch?;
            out.push(self.rename(batch)?);
        }
        Ok(out)
    }

    /// Reorder to the requested columns and apply qualified names
    fn rename(&self, batch: RecordBatch) -> VgResult<RecordBatch> {
        let input_schema = batch.schema();
        let mut arrays = Vec::with_capacity(self.bare_columns.len());
        for bare in &self.bare_columns {
            let (idx, _) = input_schema.column_with_name(bare).ok_or_else(|| {
                VgError::InvalidConfig {
                    field: bare.clone(),
                    reason: "scan did not produce a projected column".to_string(),
                }
            })?;
            arrays.push(batch.column(idx).clone());
        }
        let fields: Vec<arrow::datatypes::Field> = self
            .schema
            .iter()
            .map(|(name, dt)| arrow::datatypes::Field::new(name, dt.to_arrow(), true))
            .collect();
        Ok(RecordBatch::try_new(
            Arc::new(arrow::datatypes::Schema::new(fields)),
            arrays,
        )?)
    }
}

impl HashJoinOp {
    fn execute(&self, deadline: &QueryDeadline) -> VgResult<Vec<RecordBatch>> {
        let build_schema = self.build.schema();
        let key_indices: Vec<usize> = self
            .build_keys
            .iter()
            .filter_map(|k| build_schema.iter().position(|(n, _)| n == k))
            .collect();

        // build side: copy rows out of scan batches so they may close
        let mut table: HashMap<Vec<Scalar>, Vec<Vec<Scalar>>> = HashMap::new();
        let mut build_rows = 0usize;
        for batch in self.build.execute(deadline)? {
            deadline.check()?;
            for row_idx in 0..batch.num_rows() {
                let mut row = Vec::with_capacity(batch.num_columns());
                for col_idx in 0..batch.num_columns() {
                    row.push(scalar_from_array(batch.column(col_idx).as_ref(), row_idx)?);
                }
                let key: Vec<Scalar> = key_indices.iter().map(|&i| row[i].clone()).collect();
                if key.iter().any(Scalar::is_null) {
                    continue;
                }
                table.entry(key).or_default().push(row);
                build_rows += 1;
            }
        }
        debug!(build_rows, keys = table.len(), "columnar join build complete");

        let probe_schema = self.probe.schema();
        let probe_key_indices: Vec<usize> = self
            .probe_keys
            .iter()
            .filter_map(|k| probe_schema.iter().position(|(n, _)| n == k))
            .collect();

        // probe side streams; matches gather into fresh output batches
        let mut out = Vec::new();
        let mut pending: Vec<Row> = Vec::new();
        for batch in self.probe.execute(deadline)? {
            deadline.check()?;
            for row_idx in 0..batch.num_rows() {
                let mut probe_row = Vec::with_capacity(batch.num_columns());
                for col_idx in 0..batch.num_columns() {
                    probe_row.push(scalar_from_array(batch.column(col_idx).as_ref(), row_idx)?);
                }
                let key: Vec<Scalar> = probe_key_indices
                    .iter()
                    .map(|&i| probe_row[i].clone())
                    .collect();
                if key.iter().any(Scalar::is_null) {
                    continue;
                }
                let Some(matches) = table.get(&key) else {
                    continue;
                };
                for build_row in matches {
                    let mut row = Row::with_capacity(self.schema.len());
                    for ((name, _), value) in probe_schema.iter().zip(&probe_row) {
                        row.insert(name.clone(), value.clone());
                    }
                    for ((name, _), value) in build_schema.iter().zip(build_row) {
                        row.insert(name.clone(), value.clone());
                    }
                    pending.push(row);
                    if pending.len() >= OUTPUT_BATCH_ROWS {
                        out.push(rows_to_batch(&self.schema, &pending)?);
                        pending.clear();
                    }
                }
            }
        }
        if !pending.is_empty() {
            out.push(rows_to_batch(&self.schema, &pending)?);
        }
        Ok(out)
    }
}

/// Compile the chain: scan for the first group, then one hash join per
/// additional group, keyed by the traversed edge's columns.
fn compile(
    gc: &GraphContext<'_>,
    groups: &[TableGroup],
    ctx: &QueryContext,
) -> VgResult<Option<Op>> {
    if groups.is_empty() {
        return Ok(None);
    }

    let mut plan = match compile_scan(gc, &groups[0], 0, ctx)? {
        Some(op) => op,
        None => return Ok(None),
    };
    let mut planned: Vec<(usize, &TableGroup)> = vec![(0, &groups[0])];

    for (idx, group) in groups.iter().enumerate().skip(1) {
        // the new group must join some already-planned group via an edge
        // the query traverses
        let mut join_spec: Option<(Vec<String>, Vec<String>)> = None;
        for (planned_idx, planned_group) in &planned {
            if let Some(edge) = traversed_edge(gc, planned_group, group) {
                let (acc_cols, new_cols) = if edge.child_table == group.table {
                    (&edge.parent_columns, &edge.child_columns)
                } else {
                    (&edge.child_columns, &edge.parent_columns)
                };
                join_spec = Some((
                    acc_cols.iter().map(|c| qualify(*planned_idx, c)).collect(),
                    new_cols.iter().map(|c| qualify(idx, c)).collect(),
                ));
                break;
            }
        }
        let Some((probe_keys, build_keys)) = join_spec else {
            debug!(table = %group.table, "no traversed edge; falling back to row engine");
            return Ok(None);
        };

        let Some(build) = compile_scan(gc, group, idx, ctx)? else {
            return Ok(None);
        };

        let mut schema = plan.schema();
        schema.extend(build.schema());
        plan = Op::Join(HashJoinOp {
            build: Box::new(build),
            probe: Box::new(plan),
            build_keys,
            probe_keys,
            schema,
        });
        planned.push((idx, group));
    }
    Ok(Some(plan))
}

fn compile_scan(
    gc: &GraphContext<'_>,
    group: &TableGroup,
    group_idx: usize,
    ctx: &QueryContext,
) -> VgResult<Option<Op>> {
    let mapping = gc
        .mappings
        .get(&group.table)
        .ok_or_else(|| VgError::NoMapping(group.table.clone()))?;
    let source = gc
        .sources
        .get(&group.table)
        .ok_or_else(|| VgError::MissingSource(group.table.clone()))?;

    let table_schema: TableSchema = source.get_schema(&ScanOptions {
        time_travel: gc.time_travel,
        ..Default::default()
    })?;
    let Some(request) = build_scan_request(gc, mapping, &table_schema, group, ctx)? else {
        // unsatisfiable scan: an empty plan would also work, but the row
        // engine already short-circuits this case
        return Ok(None);
    };

    // join columns of every edge touching this table must survive
    // projection so downstream joins can key on them
    let mut columns: Vec<String> = request.columns.iter().cloned().collect();
    for edge in gc.join_graph.edges_for_table(&group.table) {
        let edge_cols = if edge.child_table == group.table {
            &edge.child_columns
        } else {
            &edge.parent_columns
        };
        for col in edge_cols {
            if !columns.contains(col) {
                columns.push(col.clone());
            }
        }
    }

    let mut schema = ColSchema::new();
    for col in &columns {
        let Some(dt) = table_schema.column_type(col) else {
            return Err(VgError::InvalidConfig {
                field: col.clone(),
                reason: format!("column not in schema of table '{}'", group.table),
            });
        };
        schema.push((qualify(group_idx, col), dt));
    }

    Ok(Some(Op::Scan(ScanOp {
        source: Arc::clone(source),
        opts: ScanOptions {
            columns: columns.clone(),
            predicates: request.predicates.clone(),
            time_travel: gc.time_travel,
            limit: None,
        },
        schema,
        bare_columns: columns,
    })))
}
