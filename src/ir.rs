//! Intermediate representation consumed and produced by the minimizer
//!
//! A small subset of a Halide-style loop IR: realizations of register
//! arrays, tagged loops, and the `read_shift_reg`/`write_shift_reg`
//! intrinsics. `Display` prints the textual form accepted by the parser.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a register or call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Int(u8),
    UInt(u8),
    Float(u8),
}

impl ScalarType {
    pub fn parse(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let kind = chars.next()?;
        let bits: u8 = chars.as_str().parse().ok()?;
        match kind {
            'i' => Some(ScalarType::Int(bits)),
            'u' => Some(ScalarType::UInt(bits)),
            'f' => Some(ScalarType::Float(bits)),
            _ => None,
        }
    }
}

impl Default for ScalarType {
    fn default() -> Self {
        ScalarType::Int(32)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Int(bits) => write!(f, "i{}", bits),
            ScalarType::UInt(bits) => write!(f, "u{}", bits),
            ScalarType::Float(bits) => write!(f, "f{}", bits),
        }
    }
}

/// What a register array is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegRole {
    /// Shift registers of a systolic variable
    Shreg,
    /// Scratch buffer used while rotating registers
    Temp,
}

/// Identity of a register array: the logical variable and its role.
///
/// The textual suffix (`V.shreg`, `V.temp`) is only interpreted by
/// [`RegId::parse`]; everything else compares these values directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegId {
    pub base: String,
    pub role: RegRole,
}

impl RegId {
    pub fn shreg(base: impl Into<String>) -> Self {
        Self { base: base.into(), role: RegRole::Shreg }
    }

    pub fn temp(base: impl Into<String>) -> Self {
        Self { base: base.into(), role: RegRole::Temp }
    }

    pub fn parse(name: &str) -> Option<Self> {
        if let Some(base) = name.strip_suffix(".shreg") {
            Some(Self::shreg(base))
        } else {
            name.strip_suffix(".temp").map(Self::temp)
        }
    }
}

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            RegRole::Shreg => write!(f, "{}.shreg", self.base),
            RegRole::Temp => write!(f, "{}.temp", self.base),
        }
    }
}

/// Loop execution kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForType {
    Serial,
    /// Fully unrolled: every iteration is a separate PE
    Unrolled,
    Vectorized,
}

impl fmt::Display for ForType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForType::Serial => write!(f, "serial"),
            ForType::Unrolled => write!(f, "unrolled"),
            ForType::Vectorized => write!(f, "vectorized"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// Binding strength for infix printing; `None` for call-style operators.
    fn precedence(self) -> Option<u8> {
        match self {
            BinOp::Or => Some(1),
            BinOp::And => Some(2),
            BinOp::Eq | BinOp::Ne => Some(3),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Some(4),
            BinOp::Add | BinOp::Sub => Some(5),
            BinOp::Mul | BinOp::Div | BinOp::Mod => Some(6),
            BinOp::Min | BinOp::Max => None,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    IntImm(i64),
    Var(String),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    /// `select(cond, then, otherwise)`; only the chosen branch is evaluated
    Select {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    ReadShiftReg {
        reg: RegId,
        ty: ScalarType,
        indices: Vec<Expr>,
    },
    /// Writes `value` and yields it
    WriteShiftReg {
        reg: RegId,
        ty: ScalarType,
        indices: Vec<Expr>,
        value: Box<Expr>,
    },
    /// Read of a temporary buffer
    Load {
        buf: RegId,
        ty: ScalarType,
        indices: Vec<Expr>,
    },
    /// Opaque external call
    Call {
        name: String,
        ty: ScalarType,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::IntImm(value)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn select(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Select {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn read(reg: RegId, ty: ScalarType, indices: Vec<Expr>) -> Self {
        Expr::ReadShiftReg { reg, ty, indices }
    }

    pub fn write(reg: RegId, ty: ScalarType, indices: Vec<Expr>, value: Expr) -> Self {
        Expr::WriteShiftReg { reg, ty, indices, value: Box::new(value) }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::IntImm(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&str> {
        match self {
            Expr::Var(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_const(&self, value: i64) -> bool {
        self.as_int() == Some(value)
    }

    /// Call `f` on every direct child expression, in evaluation order.
    pub fn for_each_child(&self, mut f: impl FnMut(&Expr)) {
        match self {
            Expr::IntImm(_) | Expr::Var(_) => {}
            Expr::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Expr::Not(inner) => f(inner),
            Expr::Select { cond, then, otherwise } => {
                f(cond);
                f(then);
                f(otherwise);
            }
            Expr::ReadShiftReg { indices, .. } | Expr::Load { indices, .. } => {
                indices.iter().for_each(f)
            }
            Expr::WriteShiftReg { indices, value, .. } => {
                indices.iter().for_each(&mut f);
                f(value);
            }
            Expr::Call { args, .. } => args.iter().for_each(f),
        }
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, self, rhs)
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Sub, self, rhs)
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mul, self, rhs)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::IntImm(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::IntImm(value.into())
    }
}

/// Half-open range `[min, min + extent)` of one dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub min: Expr,
    pub extent: Expr,
}

impl Range {
    pub fn new(min: impl Into<Expr>, extent: impl Into<Expr>) -> Self {
        Self { min: min.into(), extent: extent.into() }
    }
}

/// Statements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    Realize {
        reg: RegId,
        ty: ScalarType,
        bounds: Vec<Range>,
        body: Box<Stmt>,
    },
    For {
        name: String,
        min: Expr,
        extent: Expr,
        for_type: ForType,
        body: Box<Stmt>,
    },
    /// One systolic region
    Produce {
        name: String,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Evaluate(Expr),
    /// Write of a temporary buffer
    Provide {
        buf: RegId,
        indices: Vec<Expr>,
        value: Expr,
    },
}

impl Stmt {
    pub fn realize(reg: RegId, ty: ScalarType, bounds: Vec<Range>, body: Stmt) -> Self {
        Stmt::Realize { reg, ty, bounds, body: Box::new(body) }
    }

    pub fn for_loop(
        name: impl Into<String>,
        min: impl Into<Expr>,
        extent: impl Into<Expr>,
        for_type: ForType,
        body: Stmt,
    ) -> Self {
        Stmt::For {
            name: name.into(),
            min: min.into(),
            extent: extent.into(),
            for_type,
            body: Box::new(body),
        }
    }

    pub fn produce(name: impl Into<String>, body: Stmt) -> Self {
        Stmt::Produce { name: name.into(), body: Box::new(body) }
    }

    /// Sequence statements, flattening nested blocks.
    pub fn block(stmts: Vec<Stmt>) -> Self {
        let mut flat = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            match stmt {
                Stmt::Block(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or(Stmt::Block(Vec::new()))
        } else {
            Stmt::Block(flat)
        }
    }

    /// Bounds of the innermost-visible realization of `reg`, if any.
    pub fn find_realize(&self, reg: &RegId) -> Option<&[Range]> {
        match self {
            Stmt::Realize { reg: r, bounds, body, .. } => {
                if r == reg {
                    Some(bounds)
                } else {
                    body.find_realize(reg)
                }
            }
            Stmt::For { body, .. } | Stmt::Produce { body, .. } => body.find_realize(reg),
            Stmt::Block(stmts) => stmts.iter().find_map(|s| s.find_realize(reg)),
            Stmt::Evaluate(_) | Stmt::Provide { .. } => None,
        }
    }

    pub fn contains_produce(&self) -> bool {
        match self {
            Stmt::Produce { .. } => true,
            Stmt::Realize { body, .. } | Stmt::For { body, .. } => body.contains_produce(),
            Stmt::Block(stmts) => stmts.iter().any(Stmt::contains_produce),
            Stmt::Evaluate(_) | Stmt::Provide { .. } => false,
        }
    }

    /// Systolic regions in program order: the body of every outermost
    /// `produce`, or the whole tree when there is none.
    pub fn regions(&self) -> Vec<&Stmt> {
        fn collect<'a>(stmt: &'a Stmt, out: &mut Vec<&'a Stmt>) {
            match stmt {
                Stmt::Produce { body, .. } => out.push(body),
                Stmt::Realize { body, .. } | Stmt::For { body, .. } => collect(body, out),
                Stmt::Block(stmts) => stmts.iter().for_each(|s| collect(s, out)),
                Stmt::Evaluate(_) | Stmt::Provide { .. } => {}
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        if out.is_empty() {
            out.push(self);
        }
        out
    }
}

/// Number of elements covered by `bounds`, when every extent is constant
/// and the product fits in an `i64`.
pub fn element_count(bounds: &[Range]) -> Option<i64> {
    bounds.iter().try_fold(1i64, |acc, r| acc.checked_mul(r.extent.as_int()?))
}

// ── Printing ──────────────────────────────────────────────────────────────

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl Expr {
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parent: u8, right: bool) -> fmt::Result {
        let needs_parens = match self {
            Expr::Binary { op, .. } => match op.precedence() {
                Some(p) => p < parent || (right && p == parent),
                None => false,
            },
            Expr::IntImm(v) => *v < 0 && right,
            _ => false,
        };
        if needs_parens {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntImm(v) => write!(f, "{}", v),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Binary { op, lhs, rhs } => match op.precedence() {
                Some(p) => {
                    lhs.fmt_operand(f, p, false)?;
                    write!(f, " {} ", op.symbol())?;
                    rhs.fmt_operand(f, p, true)
                }
                None => write!(f, "{}({}, {})", op.symbol(), lhs, rhs),
            },
            Expr::Not(inner) => match inner.as_ref() {
                Expr::Binary { op, .. } if op.precedence().is_some() => write!(f, "!({})", inner),
                _ => write!(f, "!{}", inner),
            },
            Expr::Select { cond, then, otherwise } => {
                write!(f, "select({}, {}, {})", cond, then, otherwise)
            }
            Expr::ReadShiftReg { reg, indices, .. } => {
                write!(f, "read_shift_reg(\"{}\"", reg)?;
                for index in indices {
                    write!(f, ", {}", index)?;
                }
                write!(f, ")")
            }
            Expr::WriteShiftReg { reg, indices, value, .. } => {
                write!(f, "write_shift_reg(\"{}\"", reg)?;
                for index in indices {
                    write!(f, ", {}", index)?;
                }
                write!(f, ", {})", value)
            }
            Expr::Load { buf, indices, .. } => {
                write!(f, "{}(", buf)?;
                write_list(f, indices)?;
                write!(f, ")")
            }
            Expr::Call { name, args, .. } => {
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
        }
    }
}

impl Stmt {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            Stmt::Realize { reg, ty, bounds, body } => {
                write!(f, "{}realize {}<{}>(", pad, reg, ty)?;
                for (i, b) in bounds.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{}, {}]", b.min, b.extent)?;
                }
                writeln!(f, ") {{")?;
                body.fmt_indented(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
            Stmt::For { name, min, extent, for_type, body } => {
                writeln!(f, "{}{} for ({}, {}, {}) {{", pad, for_type, name, min, extent)?;
                body.fmt_indented(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
            Stmt::Produce { name, body } => {
                writeln!(f, "{}produce {} {{", pad, name)?;
                body.fmt_indented(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
            Stmt::Block(stmts) => {
                for stmt in stmts {
                    stmt.fmt_indented(f, indent)?;
                }
                Ok(())
            }
            Stmt::Evaluate(expr) => writeln!(f, "{}{};", pad, expr),
            Stmt::Provide { buf, indices, value } => {
                write!(f, "{}{}(", pad, buf)?;
                write_list(f, indices)?;
                writeln!(f, ") = {};", value)
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reg_id_roles() {
        assert_eq!(RegId::parse("C.shreg"), Some(RegId::shreg("C")));
        assert_eq!(RegId::parse("C_rot0.temp"), Some(RegId::temp("C_rot0")));
        assert_eq!(RegId::parse("C.s0.k"), None);
        assert_eq!(RegId::shreg("A.b").to_string(), "A.b.shreg");
    }

    #[test]
    fn test_scalar_type_round_trip() {
        for ty in [ScalarType::Int(32), ScalarType::UInt(8), ScalarType::Float(64)] {
            assert_eq!(ScalarType::parse(&ty.to_string()), Some(ty));
        }
        assert_eq!(ScalarType::parse("x32"), None);
    }

    #[test]
    fn test_print_minimal_parens() {
        let x = Expr::var("x");
        let e = (x.clone() - Expr::int(1)) * Expr::int(2);
        assert_eq!(e.to_string(), "(x - 1) * 2");
        let e = x.clone() - (Expr::var("y") - Expr::int(1));
        assert_eq!(e.to_string(), "x - (y - 1)");
        let e = x - Expr::int(-3);
        assert_eq!(e.to_string(), "x - (-3)");
    }

    #[test]
    fn test_print_stmt() {
        let body = Stmt::Evaluate(Expr::write(
            RegId::shreg("V"),
            ScalarType::Int(32),
            vec![Expr::var("x")],
            Expr::int(7),
        ));
        let s = Stmt::realize(
            RegId::shreg("V"),
            ScalarType::Int(32),
            vec![Range::new(0, 4)],
            Stmt::for_loop("x", 0, 4, ForType::Serial, body),
        );
        assert_eq!(
            s.to_string(),
            "realize V.shreg<i32>([0, 4]) {\n  serial for (x, 0, 4) {\n    write_shift_reg(\"V.shreg\", x, 7);\n  }\n}\n"
        );
    }

    #[test]
    fn test_block_flattens() {
        let e = || Stmt::Evaluate(Expr::int(0));
        let b = Stmt::block(vec![e(), Stmt::Block(vec![e(), e()])]);
        assert!(matches!(b, Stmt::Block(ref v) if v.len() == 3));
        assert_eq!(Stmt::block(vec![e()]), e());
    }

    #[test]
    fn test_regions() {
        let e = || Stmt::Evaluate(Expr::int(0));
        let flat = Stmt::block(vec![e(), e()]);
        assert_eq!(flat.regions().len(), 1);
        assert!(!flat.contains_produce());

        let nested = Stmt::block(vec![
            Stmt::produce("A", Stmt::produce("inner", e())),
            Stmt::for_loop("x", 0, 2, ForType::Serial, Stmt::produce("B", e())),
        ]);
        let regions = nested.regions();
        assert_eq!(regions.len(), 2);
        assert!(matches!(regions[0], Stmt::Produce { name, .. } if name == "inner"));
        assert_eq!(regions[1], &e());
    }

    #[test]
    fn test_element_count() {
        assert_eq!(element_count(&[Range::new(0, 4), Range::new(2, 3)]), Some(12));
        assert_eq!(element_count(&[Range::new(0, Expr::var("n"))]), None);
        assert_eq!(element_count(&[]), Some(1));
        let huge = Range::new(0, 3_037_000_500i64);
        assert_eq!(element_count(&[huge.clone(), huge]), None);
    }
}
