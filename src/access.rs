//! Shift-register accesses and flow dependences
//!
//! Walks a region in execution order, records every `read_shift_reg` and
//! `write_shift_reg`, and turns each (write, read) pair of a variable into a
//! constant distance vector.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::error::{CompileError, CompileResult};
use crate::ir::{Expr, RegId, ScalarType, Stmt};
use crate::simplify::{const_difference, simplify, substitute};

/// One read or write of a shift register
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub is_write: bool,
    pub var: String,
    pub args: Vec<Expr>,
    /// `args` with loop names reduced to their last token
    pub canonical_args: Vec<Expr>,
    pub ty: ScalarType,
}

/// A write-to-read relation of one variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDependence {
    /// Per-dimension `write - read`, innermost dimension first
    pub distance: Vec<i64>,
    /// The write comes lexically after the read, including a write whose
    /// value reads the same variable.
    pub is_up: bool,
}

/// Everything known about one variable's dependences
#[derive(Debug, Clone, PartialEq)]
pub struct FlowDependences {
    pub write_args: Vec<Expr>,
    pub canonical_write_args: Vec<Expr>,
    pub dependences: Vec<FlowDependence>,
    pub ty: ScalarType,
}

/// `C.s0.kkk` -> `kkk`
pub fn canonical_loop_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Loop-name canonicalization for the loops entered so far.
#[derive(Debug, Clone, Default)]
pub struct LoopNames {
    map: HashMap<String, Expr>,
}

impl LoopNames {
    pub fn enter(&mut self, name: &str) {
        self.map
            .entry(name.to_string())
            .or_insert_with(|| Expr::var(canonical_loop_name(name)));
    }

    pub fn canonicalize(&self, args: &[Expr]) -> Vec<Expr> {
        args.iter().map(|a| substitute(a, &self.map)).collect()
    }
}

pub(crate) fn join_args(args: &[Expr]) -> String {
    args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

/// Constant distance vector from a write to a read.
pub fn distance_between(
    var: &str,
    write: &[Expr],
    read: &[Expr],
) -> CompileResult<Vec<i64>> {
    if write.len() != read.len() {
        return Err(CompileError::internal(format!(
            "accesses of {} have {} and {} indices",
            var,
            write.len(),
            read.len()
        )));
    }
    write
        .iter()
        .zip(read)
        .enumerate()
        .map(|(dim, (w, r))| {
            const_difference(w, r).ok_or_else(|| CompileError::NonConstantDistance {
                var: var.to_string(),
                write: join_args(write),
                read: join_args(read),
                dim,
                distance: simplify(&(w.clone() - r.clone())).to_string(),
            })
        })
        .collect()
}

/// Outermost-first causality: the first non-zero entry must be positive;
/// an all-zero vector needs the read after the write.
fn check_causality(distance: &[i64], is_up: bool) -> Result<(), String> {
    for (k, &d) in distance.iter().enumerate().rev() {
        if d > 0 {
            return Ok(());
        }
        if d < 0 {
            return Err(format!("{}'th element = {} is negative", k, d));
        }
    }
    if is_up {
        Err("distance vector is 0 but read lexically appears before write".to_string())
    } else {
        Ok(())
    }
}

#[derive(Default)]
struct AccessCollector {
    names: LoopNames,
    accesses: Vec<Access>,
}

impl AccessCollector {
    fn record(&mut self, is_write: bool, reg: &RegId, ty: ScalarType, args: &[Expr]) {
        self.accesses.push(Access {
            is_write,
            var: reg.base.clone(),
            args: args.to_vec(),
            canonical_args: self.names.canonicalize(args),
            ty,
        });
    }

    fn visit_expr(&mut self, expr: &Expr) {
        // Operands first: reads inside a write's value precede the write.
        expr.for_each_child(|child| self.visit_expr(child));
        match expr {
            Expr::ReadShiftReg { reg, ty, indices } => self.record(false, reg, *ty, indices),
            Expr::WriteShiftReg { reg, ty, indices, .. } => self.record(true, reg, *ty, indices),
            _ => {}
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::For { name, min, extent, body, .. } => {
                self.visit_expr(min);
                self.visit_expr(extent);
                self.names.enter(name);
                self.visit_stmt(body);
            }
            Stmt::Realize { body, .. } | Stmt::Produce { body, .. } => self.visit_stmt(body),
            Stmt::Block(stmts) => stmts.iter().for_each(|s| self.visit_stmt(s)),
            Stmt::Evaluate(expr) => self.visit_expr(expr),
            Stmt::Provide { indices, value, .. } => {
                indices.iter().for_each(|e| self.visit_expr(e));
                self.visit_expr(value);
            }
        }
    }
}

/// All shift-register accesses of a region, in execution order.
pub fn collect_accesses(region: &Stmt) -> Vec<Access> {
    let mut collector = AccessCollector::default();
    collector.visit_stmt(region);
    collector.accesses
}

/// Flow dependences of every variable written in a region.
pub fn collect_dependences(region: &Stmt) -> CompileResult<BTreeMap<String, FlowDependences>> {
    let accesses = collect_accesses(region);
    let mut result = BTreeMap::new();

    for (i, write) in accesses.iter().enumerate().filter(|(_, a)| a.is_write) {
        if accesses[i + 1..].iter().any(|a| a.is_write && a.var == write.var) {
            return Err(CompileError::MultipleWrites { var: write.var.clone() });
        }

        let mut dependences = Vec::new();
        for (j, read) in accesses.iter().enumerate() {
            if j == i || read.var != write.var {
                continue;
            }
            if read.args.len() != write.args.len() || read.ty != write.ty {
                return Err(CompileError::internal(format!(
                    "access {}({}) does not match write {}({})",
                    read.var,
                    join_args(&read.args),
                    write.var,
                    join_args(&write.args)
                )));
            }
            let distance =
                distance_between(&write.var, &write.canonical_args, &read.canonical_args)?;
            let is_up = i > j;
            if let Err(reason) = check_causality(&distance, is_up) {
                return Err(CompileError::AcausalDependence {
                    var: write.var.clone(),
                    write: join_args(&write.args),
                    read: join_args(&read.args),
                    distance,
                    reason,
                });
            }
            dependences.push(FlowDependence { distance, is_up });
        }

        if dependences.is_empty() {
            debug!("{} is written but never read; left untouched", write.var);
            continue;
        }
        result.insert(
            write.var.clone(),
            FlowDependences {
                write_args: write.args.clone(),
                canonical_write_args: write.canonical_args.clone(),
                dependences,
                ty: write.ty,
            },
        );
    }
    Ok(result)
}
