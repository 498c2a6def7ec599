//! Register allocation decision for one shift-register variable
//!
//! Dimensions are numbered innermost first, following the write's indices.
//! The minimized register is laid out as
//!
//! ```text
//! V.shreg[vectorized lane?][linearized group 0]...[linearized group n][PE dims]
//! ```
//!
//! where a linearized group folds several loop dimensions into one
//! mixed-radix index. Groups are either runs of dimensions at which every
//! distance is zero ("zero" groups, rotated as the run advances) or the
//! remaining dimensions that carry the dependences ("time" group, shifted or
//! rotated each time step).

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::access::{FlowDependence, FlowDependences};
use crate::error::{CompileError, CompileResult};
use crate::ir::{Expr, ForType, Range, ScalarType};
use crate::loops::LoopContext;
use crate::simplify::simplify;

/// How the registers of a linearized group are kept up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegStrategy {
    /// Circular: the evicted top value re-enters at slot 0
    Rotate,
    /// Plain delay line: slot `i` moves to `i + 1`
    Shift,
    /// The loop variable indexes the register directly
    DirectAccess,
}

impl fmt::Display for RegStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegStrategy::Rotate => write!(f, "rotate"),
            RegStrategy::Shift => write!(f, "shift"),
            RegStrategy::DirectAccess => write!(f, "direct access"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupRole {
    /// Every distance is zero at these dimensions
    Zero,
    /// Dimensions carrying the dependences
    Time,
}

/// Several loop dimensions folded into one register index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearGroup {
    /// Dimension indices, innermost first
    pub dims: Vec<usize>,
    pub min: i64,
    pub extent: i64,
    pub strategy: RegStrategy,
    pub role: GroupRole,
}

impl LinearGroup {
    pub fn innermost(&self) -> usize {
        self.dims[0]
    }

    /// Whether registers must be moved when the group advances
    pub fn needs_maintenance(&self) -> bool {
        self.extent > 1 && self.strategy != RegStrategy::DirectAccess
    }
}

/// One dimension of the naive register: the loop indexed there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimInfo {
    pub loop_name: String,
    pub for_type: ForType,
    pub min: Expr,
    pub extent: Expr,
    /// Constant `(min, extent)` covering the loop, exact or conservative
    pub range: Option<(i64, i64)>,
}

impl DimInfo {
    pub fn const_extent(&self) -> Option<i64> {
        self.extent.as_int()
    }

    fn is_constant(&self) -> bool {
        self.min.as_int().is_some() && self.extent.as_int().is_some()
    }
}

/// The allocation decision for one variable. Built once, then read by the
/// rewriter and the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftRegAlloc {
    pub name: String,
    pub ty: ScalarType,
    pub write_args: Vec<Expr>,
    pub canonical_write_args: Vec<Expr>,
    pub dims: Vec<DimInfo>,
    pub vectorized_dim: Option<usize>,
    pub vectorized_dim_is_space: bool,
    /// Constant `(min, extent)` of the vectorized lane dimension
    pub vectorized_range: Option<(i64, i64)>,
    /// Ordered by innermost dimension
    pub groups: Vec<LinearGroup>,
    pub pe_dims: Vec<usize>,
    pub pe_mins: Vec<i64>,
    pub pe_extents: Vec<i64>,
}

impl ShiftRegAlloc {
    /// Bounds of the minimized register
    pub fn bounds(&self) -> Vec<Range> {
        let mut bounds = Vec::new();
        if let (true, Some((min, extent))) = (self.vectorized_dim_is_space, self.vectorized_range) {
            bounds.push(Range::new(min, extent));
        }
        for group in &self.groups {
            bounds.push(Range::new(group.min, group.extent));
        }
        for (&min, &extent) in self.pe_mins.iter().zip(&self.pe_extents) {
            bounds.push(Range::new(min, extent));
        }
        bounds
    }

    /// Number of indices of the minimized register
    pub fn rank(&self) -> usize {
        self.vectorized_dim_is_space as usize + self.groups.len() + self.pe_dims.len()
    }

    /// Linearize `distance` over `dims`: mixed radix, innermost fastest.
    pub fn linearized_distance(&self, distance: &[i64], dims: &[usize]) -> CompileResult<i64> {
        linearize(&self.name, &self.dims, distance, dims)
    }

    /// New indices of an access with the given raw indices and distance
    /// from the write.
    pub fn map_args(&self, args: &[Expr], distance: &[i64]) -> CompileResult<Vec<Expr>> {
        let mut new_args = Vec::with_capacity(self.rank());
        if self.vectorized_dim_is_space {
            if let Some(v) = self.vectorized_dim {
                new_args.push(simplify(&(self.write_args[v].clone() - Expr::int(distance[v]))));
            }
        }
        for group in &self.groups {
            if group.strategy == RegStrategy::DirectAccess {
                new_args.push(simplify(&args[group.dims[0]]));
                continue;
            }
            let mut lin = self.linearized_distance(distance, &group.dims)?;
            if lin > group.extent || (lin == group.extent && group.strategy != RegStrategy::Rotate) {
                return Err(CompileError::internal(format!(
                    "linearized distance {} of {} exceeds register extent {}",
                    lin, self.name, group.extent
                )));
            }
            if lin == group.extent {
                lin = 0;
            }
            new_args.push(Expr::int(lin));
        }
        for &dim in &self.pe_dims {
            new_args.push(simplify(&args[dim]));
        }
        Ok(new_args)
    }
}

fn linearize(var: &str, dims: &[DimInfo], distance: &[i64], group: &[usize]) -> CompileResult<i64> {
    let overflow = |d: usize| CompileError::ExtentOverflow {
        var: var.to_string(),
        loop_name: dims[d].loop_name.clone(),
    };
    let mut lin = 0i64;
    for (pos, &d) in group.iter().enumerate() {
        if distance[d] == 0 {
            continue;
        }
        let mut coefficient = 1i64;
        for &inner in &group[..pos] {
            let extent = dims[inner].const_extent().ok_or_else(|| CompileError::NonConstantExtent {
                var: var.to_string(),
                loop_name: dims[d].loop_name.clone(),
            })?;
            coefficient = coefficient.checked_mul(extent).ok_or_else(|| overflow(inner))?;
        }
        lin = coefficient
            .checked_mul(distance[d])
            .and_then(|step| lin.checked_add(step))
            .ok_or_else(|| overflow(d))?;
    }
    Ok(lin)
}

fn all_zero_at(deps: &[FlowDependence], dim: usize) -> bool {
    deps.iter().all(|d| d.distance[dim] == 0)
}

/// Outermost-first sign of a vector
fn is_positive(v: &[i64]) -> bool {
    v.iter().rev().find(|&&x| x != 0).map_or(false, |&x| x > 0)
}

/// Runs of all-zero dimensions in `start..end`. A dimension with a
/// non-constant loop becomes its own direct-access group.
fn make_zero_groups(
    var: &str,
    dims: &[DimInfo],
    deps: &[FlowDependence],
    start: usize,
    end: usize,
) -> CompileResult<Vec<LinearGroup>> {
    let mut groups = Vec::new();
    let mut i = start;
    while i < end {
        if !all_zero_at(deps, i) {
            i += 1;
            continue;
        }
        if !dims[i].is_constant() {
            let (min, extent) = dims[i].range.ok_or_else(|| CompileError::NonConstantExtent {
                var: var.to_string(),
                loop_name: dims[i].loop_name.clone(),
            })?;
            groups.push(LinearGroup {
                dims: vec![i],
                min,
                extent,
                strategy: RegStrategy::DirectAccess,
                role: GroupRole::Zero,
            });
            i += 1;
            continue;
        }
        let mut run = vec![i];
        let mut extent = dims[i].const_extent().unwrap_or(1);
        i += 1;
        while i < end && all_zero_at(deps, i) && dims[i].is_constant() {
            extent = extent
                .checked_mul(dims[i].const_extent().unwrap_or(1))
                .ok_or_else(|| CompileError::ExtentOverflow {
                    var: var.to_string(),
                    loop_name: dims[i].loop_name.clone(),
                })?;
            run.push(i);
            i += 1;
        }
        groups.push(LinearGroup {
            dims: run,
            min: 0,
            extent,
            strategy: RegStrategy::Rotate,
            role: GroupRole::Zero,
        });
    }
    Ok(groups)
}

fn make_time_group(
    var: &str,
    dims: &[DimInfo],
    deps: &[FlowDependence],
    time_dims: Vec<usize>,
    pe_dims: &[usize],
) -> CompileResult<LinearGroup> {
    let mut live_simultaneously = false;
    let mut max_distance = 0;
    for dep in deps {
        let intra_pe = pe_dims.iter().all(|&p| dep.distance[p] == 0);
        // An inter-PE read sees an old value while its producer writes a new
        // one; an intra-PE read after the write sees both in one iteration.
        if !intra_pe || (!dep.is_up && is_positive(&dep.distance)) {
            live_simultaneously = true;
        }
        let lin = linearize(var, dims, &dep.distance, &time_dims)?;
        if lin < 0 {
            return Err(CompileError::internal(format!(
                "negative linearized time distance {} for {} with distance {:?}",
                lin, var, dep.distance
            )));
        }
        max_distance = max_distance.max(lin);
    }
    let (extent, strategy) = if live_simultaneously {
        let extent = max_distance.checked_add(1).ok_or_else(|| CompileError::ExtentOverflow {
            var: var.to_string(),
            loop_name: dims[time_dims[0]].loop_name.clone(),
        })?;
        (extent, RegStrategy::Shift)
    } else {
        (max_distance.max(1), RegStrategy::Rotate)
    };
    Ok(LinearGroup {
        dims: time_dims,
        min: 0,
        extent,
        strategy,
        role: GroupRole::Time,
    })
}

/// Decide the minimized register layout of `name`.
pub fn decide_allocation(
    name: &str,
    deps: &FlowDependences,
    ctx: &LoopContext,
) -> CompileResult<ShiftRegAlloc> {
    let mut dims = Vec::with_capacity(deps.write_args.len());
    for arg in &deps.write_args {
        let info = arg.as_var().and_then(|v| ctx.get(v)).ok_or_else(|| {
            CompileError::WriteIndexNotLoopVar {
                var: name.to_string(),
                index: arg.to_string(),
            }
        })?;
        dims.push(DimInfo {
            loop_name: info.name.clone(),
            for_type: info.for_type,
            min: info.min.clone(),
            extent: info.extent.clone(),
            range: ctx.conservative_range(&info.name),
        });
    }
    let range_of = |dim: usize| -> CompileResult<(i64, i64)> {
        dims[dim].range.ok_or_else(|| CompileError::NonConstantExtent {
            var: name.to_string(),
            loop_name: dims[dim].loop_name.clone(),
        })
    };
    let deps_list = &deps.dependences;

    let pe_dims: Vec<usize> = (0..dims.len())
        .filter(|&i| dims[i].for_type == ForType::Unrolled)
        .collect();

    let mut vectorized_dim = None;
    let mut vectorized_dim_is_space = false;
    let mut vectorized_range = None;
    if let Some(pos) = dims.iter().position(|d| d.for_type == ForType::Vectorized) {
        if pos != 0 {
            return Err(CompileError::VectorizedNotInnermost {
                var: name.to_string(),
                loop_name: dims[pos].loop_name.clone(),
            });
        }
        vectorized_dim = Some(0);
        vectorized_dim_is_space = all_zero_at(deps_list, 0);
        if vectorized_dim_is_space {
            vectorized_range = Some(range_of(0)?);
        }
    }

    let outermost_non_zero = (0..dims.len()).rev().find(|&i| !all_zero_at(deps_list, i));

    let mut groups = Vec::new();
    if let Some(onz) = outermost_non_zero {
        let after_pe = pe_dims.last().map_or(0, |&p| p + 1);
        let after_vec = vectorized_dim_is_space as usize;
        groups = make_zero_groups(name, &dims, deps_list, after_pe.max(after_vec), onz)?;

        let time_dims: Vec<usize> = (0..=onz)
            .filter(|i| !pe_dims.contains(i))
            .filter(|&i| !(vectorized_dim_is_space && vectorized_dim == Some(i)))
            .filter(|i| !groups.iter().any(|g| g.dims.contains(i)))
            .collect();
        if !time_dims.is_empty() {
            let time = make_time_group(name, &dims, deps_list, time_dims, &pe_dims)?;
            if let Some(v) = vectorized_dim {
                if time.dims.contains(&v) && time.extent > 1 {
                    return Err(CompileError::UnsupportedVectorizedTime {
                        var: name.to_string(),
                        extent: time.extent,
                    });
                }
            }
            groups.push(time);
        }
        groups.sort_by_key(LinearGroup::innermost);
    }

    let mut pe_mins = Vec::with_capacity(pe_dims.len());
    let mut pe_extents = Vec::with_capacity(pe_dims.len());
    for &p in &pe_dims {
        let (min, extent) = range_of(p)?;
        pe_mins.push(min);
        pe_extents.push(extent);
    }

    let alloc = ShiftRegAlloc {
        name: name.to_string(),
        ty: deps.ty,
        write_args: deps.write_args.clone(),
        canonical_write_args: deps.canonical_write_args.clone(),
        dims,
        vectorized_dim,
        vectorized_dim_is_space,
        vectorized_range,
        groups,
        pe_dims,
        pe_mins,
        pe_extents,
    };
    debug!("{}", AllocSummary(&alloc));
    Ok(alloc)
}

/// Multi-line description used for debug logging
struct AllocSummary<'a>(&'a ShiftRegAlloc);

impl fmt::Display for AllocSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alloc = self.0;
        let names = |dims: &[usize]| -> String {
            dims.iter()
                .map(|&d| alloc.write_args[d].to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "Register allocation for {}:", alloc.name)?;
        if let (true, Some(v)) = (alloc.vectorized_dim_is_space, alloc.vectorized_dim) {
            write!(f, "\n\tVectorized dim: {}", alloc.write_args[v])?;
        }
        for group in &alloc.groups {
            write!(
                f,
                "\n\tLinearized dims: {}\n\t\tLinearized extent: {}\n\t\tStrategy: {}",
                names(&group.dims),
                group.extent,
                group.strategy
            )?;
        }
        write!(f, "\n\tPE_dims: {}\n\t\tExtents: {:?}", names(&alloc.pe_dims), alloc.pe_extents)
    }
}
