use std::fmt;
use std::ops::Range;

use crate::config::validate_dimension;
use crate::error::ConfigError;

pub const TOP_VALUE: f64 = 1.0; // 上境界
pub const LEFT_VALUE: f64 = 1.0; // 左境界
pub const BOTTOM_VALUE: f64 = 0.0; // 下境界
pub const RIGHT_VALUE: f64 = 0.0; // 右境界

/// Square `dimension × dimension` field, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    dimension: usize,
    pub data: Vec<f64>,
}

impl Grid {
    /// Builds the field with its fixed boundary and a zeroed interior.
    ///
    /// The top and left edges win at the two corners they share with the
    /// bottom and right edges.
    pub fn new(dimension: usize) -> Result<Self, ConfigError> {
        validate_dimension(dimension)?;
        let mut data = vec![0.0; dimension * dimension];
        for x in 0..dimension {
            for y in 0..dimension {
                data[x * dimension + y] = initial_value(dimension, x, y);
            }
        }
        Ok(Grid { dimension, data })
    }

    pub(crate) fn from_parts(dimension: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), dimension * dimension);
        Grid { dimension, data }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[x * self.dimension + y]
    }

    pub fn row(&self, x: usize) -> &[f64] {
        &self.data[x * self.dimension..(x + 1) * self.dimension]
    }

    pub fn rows(&self, rows: Range<usize>) -> &[f64] {
        &self.data[rows.start * self.dimension..rows.end * self.dimension]
    }

    pub fn interior(&self) -> Range<usize> {
        1..self.dimension - 1
    }

    /// True while every boundary cell still holds its initial value.
    pub fn boundary_intact(&self) -> bool {
        (0..self.dimension).all(|i| {
            let last = self.dimension - 1;
            [(0, i), (i, 0), (last, i), (i, last)]
                .iter()
                .all(|&(x, y)| self.get(x, y) == initial_value(self.dimension, x, y))
        })
    }

    /// Largest absolute difference between two grids' interior cells, or
    /// `None` when the dimensions differ.
    pub fn max_interior_difference(&self, other: &Grid) -> Option<f64> {
        if self.dimension != other.dimension {
            return None;
        }
        let mut max = 0.0_f64;
        for x in self.interior() {
            for y in self.interior() {
                max = max.max((self.get(x, y) - other.get(x, y)).abs());
            }
        }
        Some(max)
    }

    // 格子の値を表示
    pub fn print(&self) {
        print!("{}", self);
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for x in 0..self.dimension {
            let line = self
                .row(x)
                .iter()
                .map(|value| format!("{:.6}", value))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

fn initial_value(dimension: usize, x: usize, y: usize) -> f64 {
    if x == 0 {
        TOP_VALUE
    } else if y == 0 {
        LEFT_VALUE
    } else if x == dimension - 1 {
        BOTTOM_VALUE
    } else if y == dimension - 1 {
        RIGHT_VALUE
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_layout() {
        let grid = Grid::new(4).unwrap();
        assert_eq!(grid.row(0), &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(grid.row(1), &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(grid.row(2), &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(grid.row(3), &[1.0, 0.0, 0.0, 0.0]);
        assert!(grid.boundary_intact());
    }

    #[test]
    fn rejects_small_dimension() {
        assert_eq!(Grid::new(2), Err(ConfigError::Dimension(2)));
    }

    #[test]
    fn difference_needs_matching_dimensions() {
        let mut a = Grid::new(4).unwrap();
        let b = Grid::new(4).unwrap();
        a.data[5] = 0.5;
        assert_eq!(a.max_interior_difference(&b), Some(0.5));
        assert_eq!(a.max_interior_difference(&Grid::new(5).unwrap()), None);
    }

    #[test]
    fn prints_fixed_decimal_rows() {
        let grid = Grid::new(3).unwrap();
        assert_eq!(
            grid.to_string(),
            "1.000000 1.000000 1.000000\n1.000000 0.000000 0.000000\n1.000000 0.000000 0.000000\n"
        );
    }
}
