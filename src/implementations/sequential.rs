use std::mem;

use tracing::{debug, info};

use crate::grid::Grid;
use crate::stencil::average_neighbours;
use crate::RelaxReport;

/*
  Single-threaded reference engine (Jacobi).

  Every pass reads one frozen snapshot and writes the other buffer, so the
  result does not depend on the order cells are visited in. The parallel
  engines are checked against this one.
*/

/// One Jacobi pass from `current` into `next`. True when nothing moved by more
/// than `precision`.
pub fn jacobi_step(current: &Grid, next: &mut Grid, precision: f64) -> bool {
    let d = current.dimension();
    let src = &current.data;
    let mut balanced = true;

    for x in 1..d - 1 {
        for y in 1..d - 1 {
            let idx = x * d + y;
            let average = average_neighbours(src, d, x, y);
            if balanced && (average - src[idx]).abs() > precision {
                balanced = false;
            }
            next.data[idx] = average;
        }
    }

    balanced
}

pub fn relax(grid: Grid, precision: f64) -> RelaxReport {
    let mut current = grid;
    let mut next = current.clone();
    let mut passes = 0;

    loop {
        let balanced = jacobi_step(&current, &mut next, precision);
        passes += 1;
        mem::swap(&mut current, &mut next);

        if balanced {
            break;
        }
        if passes % 1000 == 0 {
            debug!(passes, "sequential relaxation still running");
        }
    }

    info!(passes, dimension = current.dimension(), "sequential relaxation converged");
    RelaxReport {
        grid: current,
        passes,
    }
}
