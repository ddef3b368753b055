//! Four-neighbour average shared by every engine.
//!
//! All engines sum in the same order (up, down, left, right) so that two
//! Jacobi engines fed the same snapshot agree bit for bit.

#[inline]
pub fn average_of(up: f64, down: f64, left: f64, right: f64) -> f64 {
    (up + down + left + right) / 4.0
}

/// Average around column `y` of `row`, with its neighbours taken from the rows
/// directly above and below. `y` must not be the first or last column.
#[inline]
pub fn average_from_rows(above: &[f64], row: &[f64], below: &[f64], y: usize) -> f64 {
    average_of(above[y], below[y], row[y - 1], row[y + 1])
}

/// Same average on a row-major field `width` values wide.
#[inline]
pub fn average_neighbours(field: &[f64], width: usize, x: usize, y: usize) -> f64 {
    let row = |i: usize| &field[i * width..(i + 1) * width];
    average_from_rows(row(x - 1), row(x), row(x + 1), y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_orthogonal_neighbours() {
        #[rustfmt::skip]
        let field = [
            0.0, 1.0, 0.0,
            2.0, 9.0, 3.0,
            0.0, 4.0, 0.0,
        ];
        assert_eq!(average_neighbours(&field, 3, 1, 1), 2.5);
        assert_eq!(average_from_rows(&field[0..3], &field[3..6], &field[6..9], 1), 2.5);
        assert_eq!(average_of(1.0, 4.0, 2.0, 3.0), 2.5);
    }

    #[test]
    fn slice_and_field_forms_agree_bit_for_bit() {
        // 丸め誤差が出やすい値で加算順序の一致を確認
        let width = 4;
        let field: Vec<f64> = (0..16).map(|i| 0.1 * i as f64 + 1e-17 * i as f64).collect();
        for x in 1..3 {
            for y in 1..3 {
                let rows = |i: usize| &field[i * width..(i + 1) * width];
                assert_eq!(
                    average_neighbours(&field, width, x, y).to_bits(),
                    average_from_rows(rows(x - 1), rows(x), rows(x + 1), y).to_bits()
                );
            }
        }
    }
}
