//! Summary of what the pass did to each register
//!
//! Serializable with serde so downstream tools can consume the allocation
//! decisions as JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::alloc::ShiftRegAlloc;
use crate::ir::{element_count, RegId, Stmt};

/// One minimized register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterReport {
    pub name: String,
    /// Elements of the naive register; `None` when its bounds are not constant
    pub naive_elements: Option<i64>,
    pub minimized_elements: i64,
    pub allocation: ShiftRegAlloc,
}

impl RegisterReport {
    pub fn ratio(&self) -> Option<f64> {
        match self.naive_elements {
            Some(naive) if self.minimized_elements > 0 => {
                Some(naive as f64 / self.minimized_elements as f64)
            }
            _ => None,
        }
    }
}

/// Report over every register the pass allocated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimizeReport {
    pub registers: Vec<RegisterReport>,
}

impl MinimizeReport {
    /// `before` is the program the allocations were decided on.
    pub fn new(before: &Stmt, allocations: &BTreeMap<String, ShiftRegAlloc>) -> Self {
        let registers = allocations
            .values()
            .map(|alloc| RegisterReport {
                name: alloc.name.clone(),
                naive_elements: before
                    .find_realize(&RegId::shreg(alloc.name.clone()))
                    .and_then(element_count),
                minimized_elements: element_count(&alloc.bounds()).unwrap_or(0),
                allocation: alloc.clone(),
            })
            .collect();
        Self { registers }
    }

    pub fn total_naive(&self) -> Option<i64> {
        self.registers
            .iter()
            .try_fold(0i64, |acc, r| acc.checked_add(r.naive_elements?))
    }

    pub fn total_minimized(&self) -> i64 {
        self.registers
            .iter()
            .fold(0i64, |acc, r| acc.saturating_add(r.minimized_elements))
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for MinimizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Minimized {} shift register(s)", self.registers.len())?;
        for reg in &self.registers {
            let alloc = &reg.allocation;
            match reg.naive_elements {
                Some(naive) => write!(f, "  {}: {} -> {} elements", reg.name, naive, reg.minimized_elements)?,
                None => write!(f, "  {}: ? -> {} elements", reg.name, reg.minimized_elements)?,
            }
            match reg.ratio() {
                Some(ratio) => writeln!(f, " ({:.1}x smaller)", ratio)?,
                None => writeln!(f)?,
            }
            if let (true, Some((min, extent))) = (alloc.vectorized_dim_is_space, alloc.vectorized_range) {
                writeln!(f, "    vectorized lane: [{}, {}]", min, extent)?;
            }
            for group in &alloc.groups {
                let loops: Vec<String> =
                    group.dims.iter().map(|&d| alloc.dims[d].loop_name.clone()).collect();
                writeln!(
                    f,
                    "    {} x{} over ({})",
                    group.strategy,
                    group.extent,
                    loops.join(", ")
                )?;
            }
            if !alloc.pe_dims.is_empty() {
                writeln!(f, "    PE extents: {:?}", alloc.pe_extents)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimize_source;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    const SRC: &str = r#"
        realize V.shreg<i32>([0, 100]) {
          serial for (V.s0.x, 0, 100) {
            write_shift_reg("V.shreg", V.s0.x, V.s0.x);
            emit(select(V.s0.x >= 1, read_shift_reg("V.shreg", V.s0.x - 1), 0));
          }
        }
    "#;

    #[test]
    fn test_counts() {
        let minimized = minimize_source(SRC).unwrap();
        let report = MinimizeReport::new(&parse(SRC).unwrap(), &minimized.allocations);
        assert_eq!(report.registers.len(), 1);
        assert_eq!(report.registers[0].naive_elements, Some(100));
        assert_eq!(report.registers[0].minimized_elements, 2);
        assert_eq!(report.total_naive(), Some(100));
        assert_eq!(report.total_minimized(), 2);
        assert_eq!(report.registers[0].ratio(), Some(50.0));
    }

    #[test]
    fn test_summary_and_json() {
        let minimized = minimize_source(SRC).unwrap();
        let report = MinimizeReport::new(&parse(SRC).unwrap(), &minimized.allocations);
        let text = report.to_string();
        assert!(text.contains("V: 100 -> 2 elements (50.0x smaller)"));
        assert!(text.contains("shift x2 over (V.s0.x)"));

        let json = report.to_json().unwrap();
        let back: MinimizeReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
