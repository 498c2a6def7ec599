//! Shift Register Minimizer
//!
//! A pass over a loop-nest IR for systolic arrays. Every variable written
//! once per iteration and read by later iterations starts out with a naive
//! register file as large as its whole iteration space. This library shrinks
//! each one to the values actually alive at once and inserts the code that
//! shifts or rotates them as the loops advance.
//!
//! # Example
//!
//! ```rust
//! use shreg_minimize::minimize_source;
//!
//! let src = r#"
//!     realize V.shreg<i32>([0, 100]) {
//!       serial for (V.s0.x, 0, 100) {
//!         write_shift_reg("V.shreg", V.s0.x, V.s0.x);
//!         emit(select(V.s0.x >= 1, read_shift_reg("V.shreg", V.s0.x - 1), 0));
//!       }
//!     }
//! "#;
//! let result = minimize_source(src).unwrap();
//! assert_eq!(result.allocations["V"].groups[0].extent, 2);
//! println!("{}", result.stmt);
//! ```

pub mod access;
pub mod alloc;
pub mod cleanup;
pub mod error;
pub mod eval;
pub mod ir;
pub mod lexer;
pub mod loops;
pub mod parser;
pub mod report;
pub mod rewrite;
pub mod simplify;

use std::collections::BTreeMap;

use log::info;

pub use access::{collect_dependences, FlowDependence, FlowDependences};
pub use alloc::{decide_allocation, GroupRole, LinearGroup, RegStrategy, ShiftRegAlloc};
pub use error::{CompileError, CompileResult};
pub use eval::{check_equivalence, run};
pub use ir::{Expr, ForType, Range, RegId, ScalarType, Stmt};
pub use loops::collect_loop_info;
pub use parser::{parse, Parser};
pub use report::{MinimizeReport, RegisterReport};

/// Result of the pass
#[derive(Debug, Clone)]
pub struct Minimized {
    pub stmt: Stmt,
    /// Allocation decision of every minimized variable, for later code
    /// generators
    pub allocations: BTreeMap<String, ShiftRegAlloc>,
}

impl Minimized {
    pub fn report(&self, before: &Stmt) -> MinimizeReport {
        MinimizeReport::new(before, &self.allocations)
    }
}

/// Main entry point: minimize every shift register of a program.
pub fn minimize_shift_registers(stmt: &Stmt) -> CompileResult<Minimized> {
    let mut allocations = BTreeMap::new();
    let mut regions = Vec::new();

    // Each region gets its own dependence and loop context
    for (index, region) in stmt.regions().into_iter().enumerate() {
        let deps = collect_dependences(region)?;
        let mut names = Vec::with_capacity(deps.len());
        if !deps.is_empty() {
            let ctx = collect_loop_info(region)?;
            for (name, flow) in &deps {
                let alloc = decide_allocation(name, flow, &ctx)?;
                if allocations.insert(name.clone(), alloc).is_some() {
                    return Err(CompileError::DuplicateAllocation { var: name.clone() });
                }
                names.push(name.clone());
            }
        }
        info!("Region {}: {} shift register(s) to minimize", index, names.len());
        regions.push(names);
    }

    let rewritten = rewrite::rewrite(stmt, &allocations, &regions)?;
    Ok(Minimized {
        stmt: cleanup::remove_unit_bounds(&rewritten),
        allocations,
    })
}

/// Parse a textual program and minimize it
pub fn minimize_source(source: &str) -> CompileResult<Minimized> {
    let stmt = parse(source)?;
    minimize_shift_registers(&stmt)
}
