//! Example: GEMM on a 3x5 PE array
//!
//! Minimizes the accumulator registers of a tiled matrix multiplication
//! whose reduction loop is split into `k`, `kk` and a vectorized `kkk`,
//! then checks that the minimized program still produces the same results.
//!
//! Run with: cargo run --example gemm_pe_array

use shreg_minimize::{check_equivalence, minimize_shift_registers, parse, run};

const GEMM: &str = r#"
realize C.shreg<i32>([0, 4], [0, 5], [0, 3], [0, 2], [0, 2], [0, 2], [0, 2]) {
  produce C {
    serial for (C.s0.k, 0, 2) {
      serial for (C.s0.kk, 0, 2) {
        serial for (C.s0.ii, 0, 2) {
          serial for (C.s0.jj, 0, 2) {
            unrolled for (C.s0.iii, 0, 3) {
              unrolled for (C.s0.jjj, 0, 5) {
                vectorized for (C.s0.kkk, 0, 4) {
                  // A(i, k) * B(k, j) with synthetic operands
                  write_shift_reg("C.shreg", C.s0.kkk, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk, C.s0.k,
                    select(C.s0.kkk == 0 && C.s0.kk == 0 && C.s0.k == 0, 0,
                      select(C.s0.kkk == 0,
                        select(C.s0.kk == 0,
                          read_shift_reg("C.shreg", C.s0.kkk + 3, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk + 1, C.s0.k - 1),
                          read_shift_reg("C.shreg", C.s0.kkk + 3, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk - 1, C.s0.k)),
                        read_shift_reg("C.shreg", C.s0.kkk - 1, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk, C.s0.k)))
                    + (C.s0.iii + C.s0.ii * 3 + C.s0.kkk) * (C.s0.jjj + C.s0.jj * 5 - C.s0.kk - C.s0.k * 2));
                  select(C.s0.kkk == 3 && C.s0.kk == 1 && C.s0.k == 1,
                    emit(read_shift_reg("C.shreg", C.s0.kkk, C.s0.jjj, C.s0.iii, C.s0.jj, C.s0.ii, C.s0.kk, C.s0.k)),
                    0);
                }
              }
            }
          }
        }
      }
    }
  }
}
"#;

fn main() {
    println!("=== GEMM on a 3x5 PE array ===\n");

    let program = parse(GEMM).unwrap();
    let result = minimize_shift_registers(&program).unwrap();

    println!("Allocation:");
    println!("{}", result.report(&program));

    println!("Minimized program:");
    println!("{}", result.stmt);

    let outputs = run(&result.stmt).unwrap();
    println!("Emitted {} accumulators", outputs.len());
    println!("First PE row: {:?}\n", &outputs[..outputs.len().min(5)]);

    match check_equivalence(&program, &result.stmt) {
        Ok(()) => println!("Minimized program matches the original"),
        Err(e) => println!("Mismatch: {}", e),
    }
}
