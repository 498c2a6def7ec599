//! Integer arithmetic on index expressions
//!
//! Loop indices in this IR are affine in the loop variables almost
//! everywhere, so the simplifier normalises affine trees into
//! `constant + Σ coeff·var` and otherwise only folds constants.

use std::collections::{BTreeMap, HashMap};

use crate::ir::{BinOp, Expr};

/// An affine expression `constant + Σ coeff·var`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affine {
    pub constant: i64,
    pub terms: BTreeMap<String, i64>,
}

impl Affine {
    pub fn constant(value: i64) -> Self {
        Self { constant: value, terms: BTreeMap::new() }
    }

    pub fn from_expr(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::IntImm(v) => Some(Self::constant(*v)),
            Expr::Var(name) => {
                let mut terms = BTreeMap::new();
                terms.insert(name.clone(), 1);
                Some(Self { constant: 0, terms })
            }
            Expr::Binary { op, lhs, rhs } => {
                let a = Self::from_expr(lhs)?;
                let b = Self::from_expr(rhs)?;
                match op {
                    BinOp::Add => a.plus(&b, 1),
                    BinOp::Sub => a.plus(&b, -1),
                    BinOp::Mul => match (a.as_constant(), b.as_constant()) {
                        (Some(c), _) => b.scaled(c),
                        (_, Some(c)) => a.scaled(c),
                        _ => None,
                    },
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        if self.terms.is_empty() {
            Some(self.constant)
        } else {
            None
        }
    }

    /// `self + factor * other`; `None` on overflow
    fn plus(mut self, other: &Affine, factor: i64) -> Option<Self> {
        self.constant = self.constant.checked_add(factor.checked_mul(other.constant)?)?;
        for (name, coeff) in &other.terms {
            let entry = self.terms.entry(name.clone()).or_insert(0);
            *entry = entry.checked_add(factor.checked_mul(*coeff)?)?;
            if *entry == 0 {
                self.terms.remove(name);
            }
        }
        Some(self)
    }

    fn scaled(mut self, factor: i64) -> Option<Self> {
        if factor == 0 {
            return Some(Self::constant(0));
        }
        self.constant = self.constant.checked_mul(factor)?;
        for coeff in self.terms.values_mut() {
            *coeff = coeff.checked_mul(factor)?;
        }
        Some(self)
    }

    /// Rebuild an expression: variables in name order, constant last.
    pub fn to_expr(&self) -> Expr {
        let mut acc: Option<Expr> = None;
        let mut constant_used = false;
        for (name, &coeff) in &self.terms {
            let var = Expr::var(name.clone());
            // i64::MIN has no positive counterpart and is added as is.
            let (negative, magnitude) = match coeff.checked_neg() {
                Some(neg) if coeff < 0 => (true, neg),
                _ => (false, coeff),
            };
            let term = if magnitude == 1 { var } else { var * Expr::int(magnitude) };
            acc = Some(match acc {
                None if negative => {
                    constant_used = true;
                    Expr::int(self.constant) - term
                }
                None => term,
                Some(prev) if negative => prev - term,
                Some(prev) => prev + term,
            });
        }
        match acc {
            None => Expr::int(self.constant),
            Some(e) if constant_used || self.constant == 0 => e,
            Some(e) => match self.constant.checked_neg() {
                Some(neg) if self.constant < 0 => e - Expr::int(neg),
                _ => e + Expr::int(self.constant),
            },
        }
    }
}

/// Evaluate a binary operator on constants with the IR's semantics
/// (Euclidean division, booleans as 0/1). `None` on overflow or division
/// by zero.
pub(crate) fn fold_binary(op: BinOp, a: i64, b: i64) -> Option<i64> {
    let v = match op {
        BinOp::Add => a.checked_add(b)?,
        BinOp::Sub => a.checked_sub(b)?,
        BinOp::Mul => a.checked_mul(b)?,
        BinOp::Div => a.checked_div_euclid(b)?,
        BinOp::Mod => a.checked_rem_euclid(b)?,
        BinOp::Min => a.min(b),
        BinOp::Max => a.max(b),
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::And => (a != 0 && b != 0) as i64,
        BinOp::Or => (a != 0 || b != 0) as i64,
    };
    Some(v)
}

/// Simplify an expression.
pub fn simplify(expr: &Expr) -> Expr {
    if let Some(affine) = Affine::from_expr(expr) {
        return affine.to_expr();
    }
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            let a = simplify(lhs);
            let b = simplify(rhs);
            if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
                if let Some(v) = fold_binary(*op, x, y) {
                    return Expr::int(v);
                }
            }
            let rebuilt = Expr::binary(*op, a, b);
            match Affine::from_expr(&rebuilt) {
                Some(affine) => affine.to_expr(),
                None => rebuilt,
            }
        }
        Expr::Not(inner) => match simplify(inner) {
            Expr::IntImm(v) => Expr::int((v == 0) as i64),
            other => Expr::Not(Box::new(other)),
        },
        Expr::Select { cond, then, otherwise } => match simplify(cond) {
            Expr::IntImm(0) => simplify(otherwise),
            Expr::IntImm(_) => simplify(then),
            c => Expr::select(c, simplify(then), simplify(otherwise)),
        },
        Expr::ReadShiftReg { reg, ty, indices } => Expr::ReadShiftReg {
            reg: reg.clone(),
            ty: *ty,
            indices: indices.iter().map(simplify).collect(),
        },
        Expr::WriteShiftReg { reg, ty, indices, value } => Expr::WriteShiftReg {
            reg: reg.clone(),
            ty: *ty,
            indices: indices.iter().map(simplify).collect(),
            value: Box::new(simplify(value)),
        },
        Expr::Load { buf, ty, indices } => Expr::Load {
            buf: buf.clone(),
            ty: *ty,
            indices: indices.iter().map(simplify).collect(),
        },
        Expr::Call { name, ty, args } => Expr::Call {
            name: name.clone(),
            ty: *ty,
            args: args.iter().map(simplify).collect(),
        },
        Expr::IntImm(_) | Expr::Var(_) => expr.clone(),
    }
}

/// `a - b` when it is a compile-time constant.
pub fn const_difference(a: &Expr, b: &Expr) -> Option<i64> {
    let a = Affine::from_expr(a)?;
    let b = Affine::from_expr(b)?;
    a.plus(&b, -1)?.as_constant()
}

/// Replace variables by expressions.
pub fn substitute(expr: &Expr, map: &HashMap<String, Expr>) -> Expr {
    match expr {
        Expr::Var(name) => map.get(name).cloned().unwrap_or_else(|| expr.clone()),
        Expr::IntImm(_) => expr.clone(),
        Expr::Binary { op, lhs, rhs } => {
            Expr::binary(*op, substitute(lhs, map), substitute(rhs, map))
        }
        Expr::Not(inner) => Expr::Not(Box::new(substitute(inner, map))),
        Expr::Select { cond, then, otherwise } => Expr::select(
            substitute(cond, map),
            substitute(then, map),
            substitute(otherwise, map),
        ),
        Expr::ReadShiftReg { reg, ty, indices } => Expr::ReadShiftReg {
            reg: reg.clone(),
            ty: *ty,
            indices: indices.iter().map(|e| substitute(e, map)).collect(),
        },
        Expr::WriteShiftReg { reg, ty, indices, value } => Expr::WriteShiftReg {
            reg: reg.clone(),
            ty: *ty,
            indices: indices.iter().map(|e| substitute(e, map)).collect(),
            value: Box::new(substitute(value, map)),
        },
        Expr::Load { buf, ty, indices } => Expr::Load {
            buf: buf.clone(),
            ty: *ty,
            indices: indices.iter().map(|e| substitute(e, map)).collect(),
        },
        Expr::Call { name, ty, args } => Expr::Call {
            name: name.clone(),
            ty: *ty,
            args: args.iter().map(|e| substitute(e, map)).collect(),
        },
    }
}

/// Conservative inclusive interval `[lo, hi]` of `expr`, given intervals of
/// the free variables.
pub fn bounds_of(expr: &Expr, vars: &HashMap<String, (i64, i64)>) -> Option<(i64, i64)> {
    match expr {
        Expr::IntImm(v) => Some((*v, *v)),
        Expr::Var(name) => vars.get(name).copied(),
        Expr::Binary { op, lhs, rhs } => {
            let (a_lo, a_hi) = bounds_of(lhs, vars)?;
            let (b_lo, b_hi) = bounds_of(rhs, vars)?;
            match op {
                BinOp::Add => Some((a_lo.checked_add(b_lo)?, a_hi.checked_add(b_hi)?)),
                BinOp::Sub => Some((a_lo.checked_sub(b_hi)?, a_hi.checked_sub(b_lo)?)),
                BinOp::Mul => {
                    let corners = [
                        a_lo.checked_mul(b_lo)?,
                        a_lo.checked_mul(b_hi)?,
                        a_hi.checked_mul(b_lo)?,
                        a_hi.checked_mul(b_hi)?,
                    ];
                    Some((*corners.iter().min()?, *corners.iter().max()?))
                }
                BinOp::Min => Some((a_lo.min(b_lo), a_hi.min(b_hi))),
                BinOp::Max => Some((a_lo.max(b_lo), a_hi.max(b_hi))),
                _ => None,
            }
        }
        Expr::Select { then, otherwise, .. } => {
            let (t_lo, t_hi) = bounds_of(then, vars)?;
            let (o_lo, o_hi) = bounds_of(otherwise, vars)?;
            Some((t_lo.min(o_lo), t_hi.max(o_hi)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(name: &str) -> Expr {
        Expr::var(name)
    }

    #[test]
    fn test_constant_difference() {
        // kkk vs kkk + KKK - 1 with KKK = 4
        let write = v("kkk");
        let read = v("kkk") + Expr::int(4) - Expr::int(1);
        assert_eq!(const_difference(&write, &read), Some(-3));
        assert_eq!(const_difference(&v("x"), &(v("x") - Expr::int(1))), Some(1));
        assert_eq!(const_difference(&v("x"), &v("y")), None);
    }

    #[test]
    fn test_simplify_affine() {
        let e = (v("x") + Expr::int(3)) - (v("x") - Expr::int(2)) * Expr::int(1);
        assert_eq!(simplify(&e), Expr::int(5));
        let e = Expr::int(4) - Expr::int(1) - v("l");
        assert_eq!(simplify(&e), Expr::int(3) - v("l"));
        assert_eq!(simplify(&e).to_string(), "3 - l");
        let e = v("b") - v("a") * Expr::int(2);
        assert_eq!(simplify(&e).to_string(), "0 - a * 2 + b");
    }

    #[test]
    fn test_simplify_folds_non_affine() {
        let e = Expr::binary(BinOp::Min, Expr::int(3), Expr::int(7));
        assert_eq!(simplify(&e), Expr::int(3));
        let e = Expr::select(Expr::binary(BinOp::Lt, Expr::int(1), Expr::int(2)), v("a"), v("b"));
        assert_eq!(simplify(&e), v("a"));
        let e = Expr::binary(BinOp::Mod, Expr::int(-1), Expr::int(4));
        assert_eq!(simplify(&e), Expr::int(3));
    }

    #[test]
    fn test_overflowing_affine_is_not_folded() {
        let far = v("x") - Expr::int(i64::MAX) - Expr::int(2);
        assert_eq!(Affine::from_expr(&far), None);
        assert_eq!(const_difference(&v("x"), &far), None);
        let e = v("x") * Expr::int(i64::MIN) + Expr::int(i64::MIN);
        assert_eq!(simplify(&e), e);
    }

    #[test]
    fn test_substitute() {
        let mut map = HashMap::new();
        map.insert("C.s0.k".to_string(), v("k"));
        let e = v("C.s0.k") - Expr::int(1);
        assert_eq!(substitute(&e, &map), v("k") - Expr::int(1));
    }

    #[test]
    fn test_bounds_of_triangular_extent() {
        let mut vars = HashMap::new();
        vars.insert("k".to_string(), (0, 7));
        let extent = Expr::int(8) - v("k");
        assert_eq!(bounds_of(&extent, &vars), Some((1, 8)));
        assert_eq!(bounds_of(&v("j"), &vars), None);
    }
}
