//! Loop context of a systolic region
//!
//! Records every loop of the region with its bounds and kind, the single
//! vectorized loop, and a conservative constant interval per loop variable
//! for bounding loops whose extents depend on outer loops.

use std::collections::HashMap;

use crate::error::{CompileError, CompileResult};
use crate::ir::{Expr, ForType, Stmt};
use crate::simplify::{bounds_of, simplify};

/// One loop of the region
#[derive(Debug, Clone, PartialEq)]
pub struct LoopInfo {
    pub name: String,
    pub min: Expr,
    pub extent: Expr,
    pub for_type: ForType,
}

impl LoopInfo {
    /// `(min, extent)` when both are compile-time constants
    pub fn const_range(&self) -> Option<(i64, i64)> {
        Some((self.min.as_int()?, self.extent.as_int()?))
    }
}

/// Loop information gathered from one region, discarded with it
#[derive(Debug, Clone, Default)]
pub struct LoopContext {
    /// Loops in the order they are entered
    pub loops: Vec<LoopInfo>,
    pub vectorized: Option<String>,
    index: HashMap<String, usize>,
    /// Conservative inclusive `[min, max]` of each loop variable
    global_bounds: HashMap<String, (i64, i64)>,
}

impl LoopContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&LoopInfo> {
        self.index.get(name).map(|&i| &self.loops[i])
    }

    pub fn global_bounds(&self, name: &str) -> Option<(i64, i64)> {
        self.global_bounds.get(name).copied()
    }

    /// A constant `(min, extent)` covering every iteration of the loop:
    /// exact when the loop bounds are constant, otherwise derived from the
    /// global interval of its variable.
    pub fn conservative_range(&self, name: &str) -> Option<(i64, i64)> {
        if let Some(range) = self.get(name).and_then(LoopInfo::const_range) {
            return Some(range);
        }
        let (lo, hi) = self.global_bounds(name)?;
        Some((lo, hi.checked_sub(lo)?.checked_add(1)?))
    }

    fn add_loop(&mut self, info: LoopInfo) -> CompileResult<()> {
        if info.for_type == ForType::Vectorized {
            if let Some(first) = &self.vectorized {
                return Err(CompileError::MultipleVectorizedLoops {
                    first: first.clone(),
                    second: info.name.clone(),
                });
            }
            self.vectorized = Some(info.name.clone());
        }

        let last = simplify(&(info.min.clone() + info.extent.clone() - Expr::int(1)));
        let lo = bounds_of(&info.min, &self.global_bounds).map(|(lo, _)| lo);
        let hi = bounds_of(&last, &self.global_bounds).map(|(_, hi)| hi);
        if let (Some(lo), Some(hi)) = (lo, hi) {
            self.global_bounds.insert(info.name.clone(), (lo, hi));
        }

        self.index.insert(info.name.clone(), self.loops.len());
        self.loops.push(info);
        Ok(())
    }

    fn visit(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::For { name, min, extent, for_type, body } => {
                self.add_loop(LoopInfo {
                    name: name.clone(),
                    min: min.clone(),
                    extent: extent.clone(),
                    for_type: *for_type,
                })?;
                self.visit(body)
            }
            Stmt::Realize { body, .. } | Stmt::Produce { body, .. } => self.visit(body),
            Stmt::Block(stmts) => stmts.iter().try_for_each(|s| self.visit(s)),
            Stmt::Evaluate(_) | Stmt::Provide { .. } => Ok(()),
        }
    }
}

/// Collect the loops of a region.
pub fn collect_loop_info(region: &Stmt) -> CompileResult<LoopContext> {
    let mut ctx = LoopContext::new();
    ctx.visit(region)?;
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collect_nest() {
        let src = r#"
            serial for (C.s0.k, 0, 4) {
              unrolled for (C.s0.iii, 0, 3) {
                vectorized for (C.s0.kkk, 0, 8) {
                  emit(C.s0.kkk);
                }
              }
            }
        "#;
        let ctx = collect_loop_info(&parse(src).unwrap()).unwrap();
        let names: Vec<&str> = ctx.loops.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["C.s0.k", "C.s0.iii", "C.s0.kkk"]);
        assert_eq!(ctx.get("C.s0.iii").unwrap().for_type, ForType::Unrolled);
        assert_eq!(ctx.vectorized.as_deref(), Some("C.s0.kkk"));
        assert_eq!(ctx.global_bounds("C.s0.kkk"), Some((0, 7)));
    }

    #[test]
    fn test_triangular_loop_bounds() {
        let src = r#"
            serial for (k, 0, 8) {
              unrolled for (j, k, 8 - k) {
                emit(j);
              }
            }
        "#;
        let ctx = collect_loop_info(&parse(src).unwrap()).unwrap();
        assert_eq!(ctx.get("j").unwrap().const_range(), None);
        assert_eq!(ctx.global_bounds("j"), Some((0, 7)));
        assert_eq!(ctx.conservative_range("j"), Some((0, 8)));
        assert_eq!(ctx.conservative_range("k"), Some((0, 8)));
    }

    #[test]
    fn test_two_vectorized_loops_rejected() {
        let src = r#"
            vectorized for (a, 0, 4) {
              vectorized for (b, 0, 4) {
                emit(a);
              }
            }
        "#;
        let err = collect_loop_info(&parse(src).unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::MultipleVectorizedLoops { .. }));
    }
}
