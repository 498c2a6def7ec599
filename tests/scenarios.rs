// End-to-end minimization scenarios.
//
// Each program is minimized, its register layout checked, and both versions
// run through the interpreter to confirm they emit the same values.

use pretty_assertions::assert_eq;
use shreg_minimize::ir::element_count;
use shreg_minimize::{
    check_equivalence, minimize_source, parse, run, CompileError, GroupRole, LinearGroup, Range,
    RegId, RegStrategy,
};

fn assert_equivalent(src: &str) -> shreg_minimize::Minimized {
    let before = parse(src).unwrap();
    let minimized = minimize_source(src).unwrap();
    if let Err(e) = check_equivalence(&before, &minimized.stmt) {
        panic!("{}\nminimized program:\n{}", e, minimized.stmt);
    }
    minimized
}

// ── Single time loop ────────────────────────────────────────────────────────

const DELAY_LINE: &str = r#"
realize V.shreg<i32>([0, 100]) {
  serial for (V.s0.x, 0, 100) {
    write_shift_reg("V.shreg", V.s0.x, V.s0.x * 7 + 1);
    emit(select(V.s0.x >= 1, read_shift_reg("V.shreg", V.s0.x - 1), 0));
  }
}
"#;

#[test]
fn single_loop_shrinks_to_two_registers() {
    let minimized = assert_equivalent(DELAY_LINE);
    let alloc = &minimized.allocations["V"];
    assert_eq!(alloc.bounds(), vec![Range::new(0, 2)]);
    assert_eq!(alloc.groups[0].strategy, RegStrategy::Shift);
    assert_eq!(
        minimized.stmt.find_realize(&RegId::shreg("V")),
        Some(&[Range::new(0, 2)][..])
    );
}

#[test]
fn delay_line_trace() {
    let minimized = minimize_source(DELAY_LINE).unwrap();
    let trace = run(&minimized.stmt).unwrap();
    assert_eq!(trace.len(), 100);
    assert_eq!(&trace[..4], &[0, 1, 8, 15]);
}

// ── GEMM on a PE array ──────────────────────────────────────────────────────

const GEMM: &str = r#"
realize C.shreg<i32>([0, 4], [0, 5], [0, 3], [0, 2], [0, 2], [0, 2], [0, 2]) {
  serial for (C.s0.k, 0, 2) {
    serial for (C.s0.kk, 0, 2) {
      serial for (C.s0.ii, 0, 2) {
        serial for (C.s0.jj, 0, 2) {
          unrolled for (C.s0.iii, 0, 3) {
            unrolled for (C.s0.jjj, 0, 5) {
              vectorized for (C.s0.kkk, 0, 4) {
                write_shift_reg("C.shreg", C.s0.kkk, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk, C.s0.k,
                  select(C.s0.kkk == 0 && C.s0.kk == 0 && C.s0.k == 0, 0,
                    select(C.s0.kkk == 0,
                      select(C.s0.kk == 0,
                        read_shift_reg("C.shreg", C.s0.kkk + 3, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk + 1, C.s0.k - 1),
                        read_shift_reg("C.shreg", C.s0.kkk + 3, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk - 1, C.s0.k)),
                      read_shift_reg("C.shreg", C.s0.kkk - 1, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk, C.s0.k)))
                  + (C.s0.iii + C.s0.ii * 3 + 1) * (C.s0.jjj + C.s0.jj * 5 + C.s0.kkk + C.s0.kk * 4));
                emit(read_shift_reg("C.shreg", C.s0.kkk, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk, C.s0.k));
              }
            }
          }
        }
      }
    }
  }
}
"#;

#[test]
fn gemm_keeps_one_accumulator_per_pe_and_tile() {
    let minimized = assert_equivalent(GEMM);
    let alloc = &minimized.allocations["C"];
    assert_eq!(alloc.pe_dims, vec![1, 2]);
    assert_eq!(alloc.pe_extents, vec![5, 3]);
    assert!(!alloc.vectorized_dim_is_space);

    let time = alloc.groups.iter().find(|g| g.role == GroupRole::Time).unwrap();
    assert_eq!(time.dims, vec![0, 5, 6]);
    assert_eq!(time.extent, 1);
    let tiles = alloc.groups.iter().find(|g| g.role == GroupRole::Zero).unwrap();
    assert_eq!(tiles.dims, vec![3, 4]);
    assert_eq!((tiles.extent, tiles.strategy), (4, RegStrategy::Rotate));

    // The unit time dimension disappears from the emitted realize.
    let bounds = minimized.stmt.find_realize(&RegId::shreg("C")).unwrap();
    assert_eq!(bounds, &[Range::new(0, 4), Range::new(0, 5), Range::new(0, 3)][..]);
    assert_eq!(element_count(bounds), Some(60));
}

#[test]
fn gemm_rotation_temporary_is_realized() {
    let minimized = minimize_source(GEMM).unwrap();
    let bounds = minimized.stmt.find_realize(&RegId::temp("C_rot0")).unwrap();
    assert_eq!(bounds, &[Range::new(0, 5), Range::new(0, 3)][..]);
}

// ── Rejected programs ───────────────────────────────────────────────────────

#[test]
fn acausal_read_is_rejected() {
    let src = r#"
        realize V.shreg<i32>([0, 8]) {
          serial for (V.s0.x, 0, 8) {
            write_shift_reg("V.shreg", V.s0.x, 1);
            emit(read_shift_reg("V.shreg", V.s0.x + 1));
          }
        }
    "#;
    let err = minimize_source(src).unwrap_err();
    assert!(err.is_user_error());
    match err {
        CompileError::AcausalDependence { var, distance, reason, .. } => {
            assert_eq!(var, "V");
            assert_eq!(distance, vec![-1]);
            assert_eq!(reason, "0'th element = -1 is negative");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn register_in_two_regions_is_rejected() {
    let src = r#"
        realize V.shreg<i32>([0, 4]) {
          produce A {
            serial for (V.s0.x, 0, 4) {
              write_shift_reg("V.shreg", V.s0.x, 1);
              emit(read_shift_reg("V.shreg", V.s0.x));
            }
          }
          produce B {
            serial for (V.s1.x, 0, 4) {
              write_shift_reg("V.shreg", V.s1.x, 2);
              emit(read_shift_reg("V.shreg", V.s1.x));
            }
          }
        }
    "#;
    let err = minimize_source(src).unwrap_err();
    assert!(matches!(err, CompileError::DuplicateAllocation { ref var } if var == "V"));
}

// ── Other layouts ───────────────────────────────────────────────────────────

#[test]
fn recurrence_rotates() {
    let src = r#"
        realize F.shreg<i32>([0, 20]) {
          serial for (F.s0.n, 0, 20) {
            write_shift_reg("F.shreg", F.s0.n,
              select(F.s0.n < 2, 1,
                read_shift_reg("F.shreg", F.s0.n - 1) + read_shift_reg("F.shreg", F.s0.n - 2)));
            emit(read_shift_reg("F.shreg", F.s0.n));
          }
        }
    "#;
    let minimized = assert_equivalent(src);
    let alloc = &minimized.allocations["F"];
    assert_eq!(alloc.groups[0].strategy, RegStrategy::Rotate);
    assert_eq!(alloc.bounds(), vec![Range::new(0, 2)]);
    let trace = run(&minimized.stmt).unwrap();
    assert_eq!(&trace[..6], &[1, 1, 2, 3, 5, 8]);
}

#[test]
fn vectorized_lane_stays_in_space() {
    let src = r#"
        realize V.shreg<i32>([0, 4], [0, 10]) {
          serial for (V.s0.t, 0, 10) {
            vectorized for (V.s0.v, 0, 4) {
              write_shift_reg("V.shreg", V.s0.v, V.s0.t,
                select(V.s0.t >= 2, read_shift_reg("V.shreg", V.s0.v, V.s0.t - 2), V.s0.v) + 1);
              emit(read_shift_reg("V.shreg", V.s0.v, V.s0.t));
            }
          }
        }
    "#;
    let minimized = assert_equivalent(src);
    assert_eq!(
        minimized.allocations["V"].bounds(),
        vec![Range::new(0, 4), Range::new(0, 2)]
    );
}

#[test]
fn systolic_chain_shifts_between_pes() {
    let src = r#"
        realize V.shreg<i32>([0, 4], [0, 6]) {
          serial for (V.s0.t, 0, 6) {
            unrolled for (V.s0.p, 0, 4) {
              write_shift_reg("V.shreg", V.s0.p, V.s0.t,
                select(V.s0.p == 0 || V.s0.t == 0, V.s0.t * 10 + V.s0.p,
                  read_shift_reg("V.shreg", V.s0.p - 1, V.s0.t - 1) + 1));
              emit(read_shift_reg("V.shreg", V.s0.p, V.s0.t));
            }
          }
        }
    "#;
    let minimized = assert_equivalent(src);
    assert_eq!(
        minimized.allocations["V"].bounds(),
        vec![Range::new(0, 2), Range::new(0, 4)]
    );
}

#[test]
fn triangular_loop_uses_direct_access() {
    let src = r#"
        realize V.shreg<i32>([0, 4], [0, 4], [0, 3]) {
          serial for (V.s0.t, 0, 3) {
            serial for (V.s0.k, 0, 4) {
              serial for (V.s0.j, V.s0.k, 4 - V.s0.k) {
                write_shift_reg("V.shreg", V.s0.j, V.s0.k, V.s0.t,
                  select(V.s0.t == 0, V.s0.j * 4 + V.s0.k,
                    read_shift_reg("V.shreg", V.s0.j, V.s0.k, V.s0.t - 1) + V.s0.t));
                emit(read_shift_reg("V.shreg", V.s0.j, V.s0.k, V.s0.t));
              }
            }
          }
        }
    "#;
    let minimized = assert_equivalent(src);
    let alloc = &minimized.allocations["V"];
    assert_eq!(alloc.groups[0].strategy, RegStrategy::DirectAccess);
    assert_eq!(
        minimized.stmt.find_realize(&RegId::shreg("V")),
        Some(&[Range::new(0, 4), Range::new(0, 4)][..])
    );
}

// ── Zero groups next to a multi-slot time group ─────────────────────────────

fn group(dims: &[usize], extent: i64, strategy: RegStrategy, role: GroupRole) -> LinearGroup {
    LinearGroup { dims: dims.to_vec(), min: 0, extent, strategy, role }
}

#[test]
fn zero_loop_inside_time_loop() {
    // Every t step shifts all four z slots; every z step rotates all three
    // t slots.
    let src = r#"
        realize V.shreg<i32>([0, 4], [0, 6]) {
          serial for (V.s0.t, 0, 6) {
            serial for (V.s0.z, 0, 4) {
              write_shift_reg("V.shreg", V.s0.z, V.s0.t, V.s0.t * 10 + V.s0.z);
              emit(select(V.s0.t >= 2, read_shift_reg("V.shreg", V.s0.z, V.s0.t - 2), 0 - 1));
            }
          }
        }
    "#;
    let minimized = assert_equivalent(src);
    assert_eq!(
        minimized.allocations["V"].groups,
        vec![
            group(&[0], 4, RegStrategy::Rotate, GroupRole::Zero),
            group(&[1], 3, RegStrategy::Shift, GroupRole::Time),
        ]
    );
    let trace = run(&minimized.stmt).unwrap();
    assert_eq!(&trace[8..12], &[0, 1, 2, 3]);
    assert_eq!(&trace[20..], &[30, 31, 32, 33]);
}

#[test]
fn zero_loop_between_time_loops() {
    // The time group spans x and y; only the z slot being visited shifts.
    let src = r#"
        realize V.shreg<i32>([0, 2], [0, 4], [0, 3]) {
          serial for (V.s0.y, 0, 3) {
            serial for (V.s0.z, 0, 4) {
              serial for (V.s0.x, 0, 2) {
                write_shift_reg("V.shreg", V.s0.x, V.s0.z, V.s0.y, V.s0.y * 100 + V.s0.z * 10 + V.s0.x);
                emit(select(V.s0.x >= 1 && V.s0.y >= 1,
                  read_shift_reg("V.shreg", V.s0.x - 1, V.s0.z, V.s0.y - 1), 0 - 1));
              }
            }
          }
        }
    "#;
    let minimized = assert_equivalent(src);
    assert_eq!(
        minimized.allocations["V"].groups,
        vec![
            group(&[0, 2], 4, RegStrategy::Shift, GroupRole::Time),
            group(&[1], 4, RegStrategy::Rotate, GroupRole::Zero),
        ]
    );
    assert_eq!(
        minimized.stmt.find_realize(&RegId::shreg("V")),
        Some(&[Range::new(0, 4), Range::new(0, 4)][..])
    );
    let trace = run(&minimized.stmt).unwrap();
    assert_eq!(&trace[8..12], &[-1, 0, -1, 10]);
}

#[test]
fn independent_regions_are_minimized_separately() {
    let src = r#"
        realize A.shreg<i32>([0, 8]) {
          produce A {
            serial for (A.s0.x, 0, 8) {
              write_shift_reg("A.shreg", A.s0.x, A.s0.x);
              emit(select(A.s0.x >= 2, read_shift_reg("A.shreg", A.s0.x - 2), 0));
            }
          }
        }
        realize B.shreg<i32>([0, 8]) {
          produce B {
            serial for (B.s0.x, 0, 8) {
              write_shift_reg("B.shreg", B.s0.x,
                select(B.s0.x == 0, 1, read_shift_reg("B.shreg", B.s0.x - 1) * 2));
              emit(read_shift_reg("B.shreg", B.s0.x));
            }
          }
        }
    "#;
    let minimized = assert_equivalent(src);
    assert_eq!(minimized.allocations["A"].bounds(), vec![Range::new(0, 3)]);
    assert_eq!(minimized.allocations["B"].bounds(), vec![Range::new(0, 1)]);
    // B needs a single register and therefore no realize dimension at all.
    assert_eq!(minimized.stmt.find_realize(&RegId::shreg("B")), Some(&[][..]));
}

#[test]
fn written_but_never_read_is_untouched() {
    let src = r#"
        realize W.shreg<i32>([0, 4]) {
          serial for (W.s0.x, 0, 4) {
            write_shift_reg("W.shreg", W.s0.x, W.s0.x);
          }
        }
    "#;
    let minimized = minimize_source(src).unwrap();
    assert!(minimized.allocations.is_empty());
    assert_eq!(minimized.stmt, parse(src).unwrap());
}
