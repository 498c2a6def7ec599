//! Reference interpreter
//!
//! Executes the IR sequentially and records every value passed to the
//! external call `emit`. Running a program before and after minimization and
//! comparing the two traces checks that the rewrite preserved its meaning.

use std::collections::HashMap;

use crate::error::{CompileError, CompileResult};
use crate::ir::{BinOp, Expr, Range, RegId, Stmt};
use crate::simplify::fold_binary;

/// A realized register or temporary, zero-filled
#[derive(Debug, Clone)]
struct Buffer {
    mins: Vec<i64>,
    extents: Vec<i64>,
    data: Vec<i64>,
}

impl Buffer {
    fn new(mins: Vec<i64>, extents: Vec<i64>) -> CompileResult<Self> {
        let size = extents
            .iter()
            .try_fold(1usize, |acc, &e| acc.checked_mul(usize::try_from(e).ok()?))
            .ok_or_else(|| CompileError::eval(format!("invalid buffer extents {:?}", extents)))?;
        Ok(Self { mins, extents, data: vec![0; size] })
    }

    /// Flat offset, first index fastest
    fn offset(&self, reg: &RegId, indices: &[i64]) -> CompileResult<usize> {
        if indices.len() != self.extents.len() {
            return Err(CompileError::eval(format!(
                "{} has {} dimensions but is accessed with {} indices",
                reg,
                self.extents.len(),
                indices.len()
            )));
        }
        let mut offset = 0i64;
        let mut stride = 1i64;
        for ((&i, &min), &extent) in indices.iter().zip(&self.mins).zip(&self.extents) {
            let local = i.checked_sub(min).filter(|&o| o >= 0 && o < extent).ok_or_else(|| {
                CompileError::eval(format!(
                    "{}{:?} is out of bounds (mins {:?}, extents {:?})",
                    reg, indices, self.mins, self.extents
                ))
            })?;
            // The buffer was allocated, so its size fits and so do these.
            offset += local * stride;
            stride *= extent;
        }
        Ok(offset as usize)
    }
}

#[derive(Debug, Default)]
pub struct Interpreter {
    vars: HashMap<String, i64>,
    /// Innermost realization last
    buffers: HashMap<RegId, Vec<Buffer>>,
    trace: Vec<i64>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a program and return its `emit` trace.
    pub fn run(mut self, stmt: &Stmt) -> CompileResult<Vec<i64>> {
        self.exec(stmt)?;
        Ok(self.trace)
    }

    fn exec(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Realize { reg, bounds, body, .. } => {
                let buffer = self.realize(bounds)?;
                self.buffers.entry(reg.clone()).or_default().push(buffer);
                let result = self.exec(body);
                if let Some(stack) = self.buffers.get_mut(reg) {
                    stack.pop();
                }
                result
            }
            Stmt::For { name, min, extent, body, .. } => {
                let min = self.eval(min)?;
                let extent = self.eval(extent)?;
                let saved = self.vars.get(name).copied();
                let mut result = Ok(());
                for i in min..min.saturating_add(extent) {
                    self.vars.insert(name.clone(), i);
                    result = self.exec(body);
                    if result.is_err() {
                        break;
                    }
                }
                match saved {
                    Some(v) => self.vars.insert(name.clone(), v),
                    None => self.vars.remove(name),
                };
                result
            }
            Stmt::Produce { body, .. } => self.exec(body),
            Stmt::Block(stmts) => stmts.iter().try_for_each(|s| self.exec(s)),
            Stmt::Evaluate(expr) => self.eval(expr).map(|_| ()),
            Stmt::Provide { buf, indices, value } => {
                let indices = self.eval_all(indices)?;
                let value = self.eval(value)?;
                self.store(buf, &indices, value)
            }
        }
    }

    fn realize(&mut self, bounds: &[Range]) -> CompileResult<Buffer> {
        let mut mins = Vec::with_capacity(bounds.len());
        let mut extents = Vec::with_capacity(bounds.len());
        for range in bounds {
            mins.push(self.eval(&range.min)?);
            extents.push(self.eval(&range.extent)?);
        }
        Buffer::new(mins, extents)
    }

    fn buffer(&mut self, reg: &RegId) -> CompileResult<&mut Buffer> {
        self.buffers
            .get_mut(reg)
            .and_then(|stack| stack.last_mut())
            .ok_or_else(|| CompileError::eval(format!("{} is accessed outside its realize", reg)))
    }

    fn load(&mut self, reg: &RegId, indices: &[i64]) -> CompileResult<i64> {
        let buffer = self.buffer(reg)?;
        let offset = buffer.offset(reg, indices)?;
        Ok(buffer.data[offset])
    }

    fn store(&mut self, reg: &RegId, indices: &[i64], value: i64) -> CompileResult<()> {
        let buffer = self.buffer(reg)?;
        let offset = buffer.offset(reg, indices)?;
        buffer.data[offset] = value;
        Ok(())
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> CompileResult<Vec<i64>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval(&mut self, expr: &Expr) -> CompileResult<i64> {
        match expr {
            Expr::IntImm(v) => Ok(*v),
            Expr::Var(name) => self
                .vars
                .get(name)
                .copied()
                .ok_or_else(|| CompileError::eval(format!("unbound variable {}", name))),
            Expr::Binary { op: BinOp::And, lhs, rhs } => {
                Ok((self.eval(lhs)? != 0 && self.eval(rhs)? != 0) as i64)
            }
            Expr::Binary { op: BinOp::Or, lhs, rhs } => {
                Ok((self.eval(lhs)? != 0 || self.eval(rhs)? != 0) as i64)
            }
            Expr::Binary { op, lhs, rhs } => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                apply(*op, a, b)
            }
            Expr::Not(inner) => Ok((self.eval(inner)? == 0) as i64),
            Expr::Select { cond, then, otherwise } => {
                if self.eval(cond)? != 0 {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::ReadShiftReg { reg, indices, .. } | Expr::Load { buf: reg, indices, .. } => {
                let indices = self.eval_all(indices)?;
                self.load(reg, &indices)
            }
            Expr::WriteShiftReg { reg, indices, value, .. } => {
                let value = self.eval(value)?;
                let indices = self.eval_all(indices)?;
                self.store(reg, &indices, value)?;
                Ok(value)
            }
            Expr::Call { name, args, .. } if name == "emit" && args.len() == 1 => {
                let value = self.eval(&args[0])?;
                self.trace.push(value);
                Ok(value)
            }
            Expr::Call { name, args, .. } => Err(CompileError::eval(format!(
                "cannot evaluate external call {}/{}",
                name,
                args.len()
            ))),
        }
    }
}

fn apply(op: BinOp, a: i64, b: i64) -> CompileResult<i64> {
    match op {
        BinOp::Add => Ok(a.wrapping_add(b)),
        BinOp::Sub => Ok(a.wrapping_sub(b)),
        BinOp::Mul => Ok(a.wrapping_mul(b)),
        _ => fold_binary(op, a, b)
            .ok_or_else(|| CompileError::eval(format!("{:?}({}, {}) is undefined", op, a, b))),
    }
}

/// Run a program and return the values it emitted, in order.
pub fn run(stmt: &Stmt) -> CompileResult<Vec<i64>> {
    Interpreter::new().run(stmt)
}

/// Check that two programs emit the same values.
pub fn check_equivalence(before: &Stmt, after: &Stmt) -> CompileResult<()> {
    let expected = run(before)?;
    let actual = run(after)?;
    let len = expected.len().max(actual.len());
    match (0..len).find(|&i| expected.get(i) != actual.get(i)) {
        Some(index) => Err(CompileError::Mismatch {
            index,
            expected: expected.get(index).copied(),
            actual: actual.get(index).copied(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_emit_trace() {
        let src = r#"
            serial for (x, 1, 3) {
              emit(x * 10 + x % 2);
            }
        "#;
        assert_eq!(run(&parse(src).unwrap()).unwrap(), vec![11, 20, 31]);
    }

    #[test]
    fn test_registers_and_lazy_select() {
        let src = r#"
            realize V.shreg<i32>([0, 4]) {
              serial for (x, 0, 4) {
                write_shift_reg("V.shreg", x, select(x == 0, 1, read_shift_reg("V.shreg", x - 1) * 2));
                emit(read_shift_reg("V.shreg", x));
              }
            }
        "#;
        assert_eq!(run(&parse(src).unwrap()).unwrap(), vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_temporaries() {
        let src = r#"
            realize T.temp<i32>([2, 2]) {
              T.temp(3) = 5;
              emit(T.temp(3) + T.temp(2));
            }
        "#;
        assert_eq!(run(&parse(src).unwrap()).unwrap(), vec![5]);
    }

    #[test]
    fn test_out_of_bounds() {
        let src = r#"
            realize V.shreg<i32>([0, 2]) {
              emit(read_shift_reg("V.shreg", 2));
            }
        "#;
        let err = run(&parse(src).unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::Eval { .. }));
    }

    #[test]
    fn test_operator_semantics() {
        let src = "emit((0 - 7) / 2); emit((0 - 7) % 2); emit(9223372036854775807 + 1); emit(min(3, 2) < 3);";
        assert_eq!(run(&parse(src).unwrap()).unwrap(), vec![-4, 1, i64::MIN, 1]);
        let err = run(&parse("emit(7 / 0);").unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::Eval { ref message } if message.contains("Div(7, 0)")));
    }

    #[test]
    fn test_unknown_call() {
        let err = run(&parse("emit(f(1));").unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::Eval { ref message } if message.contains("f/1")));
    }

    #[test]
    fn test_mismatch_reports_first_difference() {
        let before = parse("serial for (x, 0, 3) { emit(x); }").unwrap();
        let after = parse("serial for (x, 0, 2) { emit(x * x); }").unwrap();
        let err = check_equivalence(&before, &after).unwrap_err();
        match err {
            CompileError::Mismatch { index, expected, actual } => {
                assert_eq!((index, expected, actual), (2, Some(2), None));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(check_equivalence(&before, &before).is_ok());
    }
}
