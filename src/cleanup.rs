//! Removal of unit dimensions from shift registers
//!
//! A dimension of extent 1 can only ever be indexed at its minimum, so it is
//! dropped from the `realize` and from every access to that register.

use crate::ir::{Expr, RegId, RegRole, Stmt};

struct UnitBounds {
    /// Dimensions removed from each enclosing realization, innermost last
    scopes: Vec<(RegId, Vec<usize>)>,
}

fn purge<T: Clone>(items: &[T], removed: &[usize]) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter(|(i, _)| !removed.contains(i))
        .map(|(_, item)| item.clone())
        .collect()
}

impl UnitBounds {
    fn removed(&self, reg: &RegId) -> Option<&[usize]> {
        self.scopes
            .iter()
            .rev()
            .find(|(r, _)| r == reg)
            .map(|(_, dims)| dims.as_slice())
    }

    fn indices(&self, reg: &RegId, indices: &[Expr]) -> Vec<Expr> {
        let mapped: Vec<Expr> = indices.iter().map(|e| self.expr(e)).collect();
        match self.removed(reg) {
            Some(dims) if !dims.is_empty() => purge(&mapped, dims),
            _ => mapped,
        }
    }

    fn expr(&self, expr: &Expr) -> Expr {
        match expr {
            Expr::ReadShiftReg { reg, ty, indices } => Expr::ReadShiftReg {
                reg: reg.clone(),
                ty: *ty,
                indices: self.indices(reg, indices),
            },
            Expr::WriteShiftReg { reg, ty, indices, value } => Expr::WriteShiftReg {
                reg: reg.clone(),
                ty: *ty,
                indices: self.indices(reg, indices),
                value: Box::new(self.expr(value)),
            },
            Expr::Binary { op, lhs, rhs } => Expr::binary(*op, self.expr(lhs), self.expr(rhs)),
            Expr::Not(inner) => Expr::Not(Box::new(self.expr(inner))),
            Expr::Select { cond, then, otherwise } => {
                Expr::select(self.expr(cond), self.expr(then), self.expr(otherwise))
            }
            Expr::Load { buf, ty, indices } => Expr::Load {
                buf: buf.clone(),
                ty: *ty,
                indices: indices.iter().map(|e| self.expr(e)).collect(),
            },
            Expr::Call { name, ty, args } => Expr::Call {
                name: name.clone(),
                ty: *ty,
                args: args.iter().map(|e| self.expr(e)).collect(),
            },
            Expr::IntImm(_) | Expr::Var(_) => expr.clone(),
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Stmt {
        match stmt {
            Stmt::Realize { reg, ty, bounds, body } if reg.role == RegRole::Shreg => {
                let unit: Vec<usize> = bounds
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.extent.is_const(1))
                    .map(|(i, _)| i)
                    .collect();
                let new_bounds = purge(bounds, &unit);
                self.scopes.push((reg.clone(), unit));
                let body = self.stmt(body);
                self.scopes.pop();
                Stmt::realize(reg.clone(), *ty, new_bounds, body)
            }
            Stmt::Realize { reg, ty, bounds, body } => {
                Stmt::realize(reg.clone(), *ty, bounds.clone(), self.stmt(body))
            }
            Stmt::For { name, min, extent, for_type, body } => Stmt::For {
                name: name.clone(),
                min: min.clone(),
                extent: extent.clone(),
                for_type: *for_type,
                body: Box::new(self.stmt(body)),
            },
            Stmt::Produce { name, body } => Stmt::produce(name.clone(), self.stmt(body)),
            Stmt::Block(stmts) => Stmt::Block(stmts.iter().map(|s| self.stmt(s)).collect()),
            Stmt::Evaluate(expr) => Stmt::Evaluate(self.expr(expr)),
            Stmt::Provide { buf, indices, value } => Stmt::Provide {
                buf: buf.clone(),
                indices: indices.iter().map(|e| self.expr(e)).collect(),
                value: self.expr(value),
            },
        }
    }
}

/// Drop every extent-1 dimension of every shift register.
pub fn remove_unit_bounds(stmt: &Stmt) -> Stmt {
    UnitBounds { scopes: Vec::new() }.stmt(stmt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unit_dims_removed_from_realize_and_accesses() {
        let src = r#"
            realize C.shreg<i32>([0, 1], [0, 4], [0, 3]) {
              unrolled for (C.s0.iii, 0, 3) {
                write_shift_reg("C.shreg", 0, 2, C.s0.iii, read_shift_reg("C.shreg", 0, 1, C.s0.iii));
              }
            }
        "#;
        let expected = r#"
            realize C.shreg<i32>([0, 4], [0, 3]) {
              unrolled for (C.s0.iii, 0, 3) {
                write_shift_reg("C.shreg", 2, C.s0.iii, read_shift_reg("C.shreg", 1, C.s0.iii));
              }
            }
        "#;
        assert_eq!(remove_unit_bounds(&parse(src).unwrap()), parse(expected).unwrap());
    }

    #[test]
    fn test_shadowing_realize() {
        let src = r#"
            realize V.shreg<i32>([0, 1]) {
              realize V.shreg<i32>([0, 2]) {
                emit(read_shift_reg("V.shreg", 1));
              }
              emit(read_shift_reg("V.shreg", 0));
            }
        "#;
        let expected = r#"
            realize V.shreg<i32>() {
              realize V.shreg<i32>([0, 2]) {
                emit(read_shift_reg("V.shreg", 1));
              }
              emit(read_shift_reg("V.shreg"));
            }
        "#;
        assert_eq!(remove_unit_bounds(&parse(src).unwrap()), parse(expected).unwrap());
    }

    #[test]
    fn test_temporaries_untouched() {
        let src = r#"
            realize V_rot0.temp<i32>([0, 1]) {
              V_rot0.temp(0) = 1;
            }
        "#;
        let stmt = parse(src).unwrap();
        assert_eq!(remove_unit_bounds(&stmt), stmt);
    }
}
