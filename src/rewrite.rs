//! Rewriting of shift-register accesses and insertion of maintenance code
//!
//! Every `realize` of an allocated register gets the minimized bounds, every
//! access gets the indices chosen by [`ShiftRegAlloc::map_args`], and the
//! loop carrying the innermost dimension of each linearized group gets the
//! code that shifts or rotates that group at the start of its body:
//!
//! ```text
//! tmp(pe) = R[..][L-1][..][pe]                         // rotate only
//! unrolled for (l, 0, L-1) { R[..][L-1-l][..][pe] = R[..][L-2-l][..][pe] }
//! R[..][0][..][pe] = tmp(pe)                           // rotate only
//! ```

use std::collections::BTreeMap;

use log::trace;

use crate::access::{canonical_loop_name, distance_between, LoopNames};
use crate::alloc::{GroupRole, RegStrategy, ShiftRegAlloc};
use crate::error::CompileResult;
use crate::ir::{Expr, ForType, Range, RegId, RegRole, ScalarType, Stmt};
use crate::simplify::simplify;

/// Scratch buffer used by a rotation
#[derive(Debug, Clone)]
struct Temporary {
    buf: RegId,
    ty: ScalarType,
    bounds: Vec<Range>,
}

/// A fresh loop wrapped around maintenance code
struct FreshLoop {
    name: String,
    min: i64,
    extent: i64,
}

pub struct Rewriter<'a> {
    allocations: &'a BTreeMap<String, ShiftRegAlloc>,
    regions: &'a [Vec<String>],
    next_region: usize,
    /// Allocations of the region being rewritten
    active: Option<Vec<&'a ShiftRegAlloc>>,
    names: LoopNames,
    temporaries: Vec<Temporary>,
    fresh: usize,
}

impl<'a> Rewriter<'a> {
    /// `regions[i]` names the variables allocated in the i'th systolic region.
    pub fn new(allocations: &'a BTreeMap<String, ShiftRegAlloc>, regions: &'a [Vec<String>]) -> Self {
        Self {
            allocations,
            regions,
            next_region: 0,
            active: None,
            names: LoopNames::default(),
            temporaries: Vec::new(),
            fresh: 0,
        }
    }

    pub fn rewrite(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        if stmt.contains_produce() {
            self.stmt(stmt)
        } else {
            self.region(stmt)
        }
    }

    /// Rewrite one region and realize its temporaries around it.
    fn region(&mut self, body: &Stmt) -> CompileResult<Stmt> {
        let allocations = self.allocations;
        let active = self
            .regions
            .get(self.next_region)
            .map(|names| names.iter().filter_map(|n| allocations.get(n)).collect())
            .unwrap_or_default();
        self.next_region += 1;
        self.active = Some(active);
        let result = self.stmt(body);
        self.active = None;

        let mut stmt = result?;
        for temp in std::mem::take(&mut self.temporaries) {
            stmt = Stmt::realize(temp.buf, temp.ty, temp.bounds, stmt);
        }
        Ok(stmt)
    }

    fn stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        Ok(match stmt {
            Stmt::Produce { name, body } if self.active.is_none() => {
                Stmt::produce(name.clone(), self.region(body)?)
            }
            Stmt::Produce { name, body } => Stmt::produce(name.clone(), self.stmt(body)?),
            Stmt::Realize { reg, ty, bounds, body } => {
                let bounds = match self.allocation(reg) {
                    Some(alloc) => alloc.bounds(),
                    None => bounds.clone(),
                };
                Stmt::realize(reg.clone(), *ty, bounds, self.stmt(body)?)
            }
            Stmt::For { name, min, extent, for_type, body } => {
                self.names.enter(name);
                let body = self.stmt(body)?;
                let mut stmts = self.maintenance_at(name);
                stmts.push(body);
                Stmt::For {
                    name: name.clone(),
                    min: min.clone(),
                    extent: extent.clone(),
                    for_type: *for_type,
                    body: Box::new(Stmt::block(stmts)),
                }
            }
            Stmt::Block(stmts) => {
                Stmt::Block(stmts.iter().map(|s| self.stmt(s)).collect::<CompileResult<_>>()?)
            }
            Stmt::Evaluate(expr) => Stmt::Evaluate(self.expr(expr)?),
            Stmt::Provide { buf, indices, value } => Stmt::Provide {
                buf: buf.clone(),
                indices: self.exprs(indices)?,
                value: self.expr(value)?,
            },
        })
    }

    fn allocation(&self, reg: &RegId) -> Option<&'a ShiftRegAlloc> {
        if reg.role == RegRole::Shreg {
            self.allocations.get(&reg.base)
        } else {
            None
        }
    }

    fn exprs(&mut self, exprs: &[Expr]) -> CompileResult<Vec<Expr>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn new_indices(&self, alloc: &ShiftRegAlloc, indices: &[Expr]) -> CompileResult<Vec<Expr>> {
        let canonical = self.names.canonicalize(indices);
        let distance = distance_between(&alloc.name, &alloc.canonical_write_args, &canonical)?;
        alloc.map_args(indices, &distance)
    }

    fn expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
        Ok(match expr {
            Expr::ReadShiftReg { reg, ty, indices } => match self.allocation(reg) {
                Some(alloc) => Expr::read(reg.clone(), *ty, self.new_indices(alloc, indices)?),
                None => Expr::read(reg.clone(), *ty, self.exprs(indices)?),
            },
            Expr::WriteShiftReg { reg, ty, indices, value } => {
                let value = self.expr(value)?;
                match self.allocation(reg) {
                    Some(alloc) => Expr::write(reg.clone(), *ty, self.new_indices(alloc, indices)?, value),
                    None => Expr::write(reg.clone(), *ty, self.exprs(indices)?, value),
                }
            }
            Expr::Binary { op, lhs, rhs } => Expr::binary(*op, self.expr(lhs)?, self.expr(rhs)?),
            Expr::Not(inner) => Expr::Not(Box::new(self.expr(inner)?)),
            Expr::Select { cond, then, otherwise } => {
                Expr::select(self.expr(cond)?, self.expr(then)?, self.expr(otherwise)?)
            }
            Expr::Load { buf, ty, indices } => Expr::Load {
                buf: buf.clone(),
                ty: *ty,
                indices: self.exprs(indices)?,
            },
            Expr::Call { name, ty, args } => Expr::Call {
                name: name.clone(),
                ty: *ty,
                args: self.exprs(args)?,
            },
            Expr::IntImm(_) | Expr::Var(_) => expr.clone(),
        })
    }

    /// Maintenance code of every group whose innermost loop is `loop_name`.
    fn maintenance_at(&mut self, loop_name: &str) -> Vec<Stmt> {
        let Some(active) = self.active.clone() else {
            return Vec::new();
        };
        let mut stmts = Vec::new();
        for alloc in active {
            for (index, group) in alloc.groups.iter().enumerate() {
                if group.needs_maintenance() && alloc.dims[group.innermost()].loop_name == loop_name {
                    trace!(
                        "{} {} group {} at loop {}",
                        group.strategy,
                        alloc.name,
                        index,
                        loop_name
                    );
                    stmts.push(self.maintain_group(alloc, index));
                }
            }
        }
        stmts
    }

    fn maintain_group(&mut self, alloc: &ShiftRegAlloc, index: usize) -> Stmt {
        let tag = format!("{}.sr{}", alloc.name, self.fresh);
        self.fresh += 1;
        let group = &alloc.groups[index];
        let inner = group.innermost();

        let mut serial = Vec::new();
        let mut unrolled = Vec::new();
        let fresh_var = |loops: &mut Vec<FreshLoop>, name: String, min: i64, extent: i64| {
            let var = Expr::var(name.clone());
            loops.push(FreshLoop { name, min, extent });
            var
        };

        // Indices before and after the slot of the group being moved
        let mut before = Vec::new();
        let mut after = Vec::new();
        if let (true, Some((min, extent))) = (alloc.vectorized_dim_is_space, alloc.vectorized_range) {
            before.push(if extent == 1 {
                Expr::int(min)
            } else {
                fresh_var(&mut serial, format!("{}.v", tag), min, extent)
            });
        }
        for (k, other) in alloc.groups.iter().enumerate() {
            if k == index {
                continue;
            }
            let encloses = other.innermost() > inner;
            let arg = if other.extent == 1 {
                Expr::int(other.min)
            } else if encloses && !(group.role == GroupRole::Zero && other.role == GroupRole::Time) {
                // Only the slot of the current iteration moves.
                match other.strategy {
                    RegStrategy::DirectAccess => alloc.write_args[other.innermost()].clone(),
                    _ => Expr::int(other.min),
                }
            } else {
                fresh_var(&mut serial, format!("{}.l{}", tag, k), other.min, other.extent)
            };
            if k < index {
                before.push(arg);
            } else {
                after.push(arg);
            }
        }
        let mut pe_args = Vec::new();
        for (i, &dim) in alloc.pe_dims.iter().enumerate() {
            if dim > inner {
                pe_args.push(alloc.write_args[dim].clone());
            } else {
                let name = format!("{}.pe_{}", tag, canonical_loop_name(&alloc.dims[dim].loop_name));
                pe_args.push(fresh_var(&mut unrolled, name, alloc.pe_mins[i], alloc.pe_extents[i]));
            }
        }

        let reg = RegId::shreg(alloc.name.clone());
        let ty = alloc.ty;
        let at = |slot: Expr| -> Vec<Expr> {
            let mut args = before.clone();
            args.push(slot);
            args.extend(after.iter().cloned());
            args.extend(pe_args.iter().cloned());
            args
        };

        let extent = group.extent;
        let lx_name = format!("{}.l{}", tag, index);
        let lx = Expr::var(lx_name.clone());
        let copy = Stmt::Evaluate(Expr::write(
            reg.clone(),
            ty,
            at(simplify(&(Expr::int(extent - 1) - lx.clone()))),
            Expr::read(reg.clone(), ty, at(simplify(&(Expr::int(extent - 2) - lx)))),
        ));
        let shift = Stmt::for_loop(lx_name, 0, extent - 1, ForType::Unrolled, copy);

        let mut stmt = if group.strategy == RegStrategy::Rotate {
            let temp = RegId::temp(format!("{}_rot{}", alloc.name, self.temporaries.len()));
            let bounds = alloc
                .pe_mins
                .iter()
                .zip(&alloc.pe_extents)
                .map(|(&min, &extent)| Range::new(min, extent))
                .collect();
            self.temporaries.push(Temporary { buf: temp.clone(), ty, bounds });
            Stmt::block(vec![
                Stmt::Provide {
                    buf: temp.clone(),
                    indices: pe_args.clone(),
                    value: Expr::read(reg.clone(), ty, at(Expr::int(extent - 1))),
                },
                shift,
                Stmt::Evaluate(Expr::write(
                    reg.clone(),
                    ty,
                    at(Expr::int(0)),
                    Expr::Load { buf: temp, ty, indices: pe_args.clone() },
                )),
            ])
        } else {
            shift
        };

        for l in unrolled.into_iter().rev() {
            stmt = Stmt::for_loop(l.name, l.min, l.extent, ForType::Unrolled, stmt);
        }
        for l in serial.into_iter().rev() {
            stmt = Stmt::for_loop(l.name, l.min, l.extent, ForType::Serial, stmt);
        }
        stmt
    }
}

/// Rewrite a whole tree given the per-region allocation decisions.
pub fn rewrite(
    stmt: &Stmt,
    allocations: &BTreeMap<String, ShiftRegAlloc>,
    regions: &[Vec<String>],
) -> CompileResult<Stmt> {
    Rewriter::new(allocations, regions).rewrite(stmt)
}
