//! Small dense linear algebra for the Levenberg-Marquardt normal equations.
//! Gauss-Jordan elimination with partial pivoting; for the handful of fit
//! parameters this beats pulling in a full linear-algebra stack.

/// Solve `a x = b`. Returns `None` for a (numerically) singular matrix.
pub(super) fn solve<const N: usize>(a: &[[f64; N]; N], b: &[f64; N]) -> Option<[f64; N]> {
    let mut aug = [[0.0; N]; N];
    let mut x = *b;
    aug.copy_from_slice(a);

    for col in 0..N {
        let pivot_row = (col..N)
            .max_by(|&i, &j| aug[i][col].abs().total_cmp(&aug[j][col].abs()))?;
        if aug[pivot_row][col].abs() < f64::EPSILON {
            return None;
        }
        aug.swap(col, pivot_row);
        x.swap(col, pivot_row);

        let pivot = aug[col][col];
        for k in col..N {
            aug[col][k] /= pivot;
        }
        x[col] /= pivot;

        for row in 0..N {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..N {
                aug[row][k] -= factor * aug[col][k];
            }
            x[row] -= factor * x[col];
        }
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Invert a symmetric positive-definite-ish matrix. Returns `None` when
/// singular or when the result is not finite.
pub(super) fn invert<const N: usize>(a: &[[f64; N]; N]) -> Option<[[f64; N]; N]> {
    let mut aug = [[0.0; N]; N];
    let mut inv = [[0.0; N]; N];
    aug.copy_from_slice(a);
    #[allow(clippy::needless_range_loop)]
    for i in 0..N {
        inv[i][i] = 1.0;
    }

    for col in 0..N {
        let pivot_row = (col..N)
            .max_by(|&i, &j| aug[i][col].abs().total_cmp(&aug[j][col].abs()))?;
        if aug[pivot_row][col].abs() < f64::EPSILON {
            return None;
        }
        aug.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let pivot = aug[col][col];
        for k in 0..N {
            aug[col][k] /= pivot;
            inv[col][k] /= pivot;
        }

        for row in 0..N {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..N {
                aug[row][k] -= factor * aug[col][k];
                inv[row][k] -= factor * inv[col][k];
            }
        }
    }
    inv.iter()
        .flatten()
        .all(|v| v.is_finite())
        .then_some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn solve_3x3() {
        let a = [[2.0, 1.0, -1.0], [-3.0, -1.0, 2.0], [-2.0, 1.0, 2.0]];
        let b = [8.0, -11.0, -3.0];
        let x = solve(&a, &b).unwrap();
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 3.0, epsilon = 1e-12);
        assert_relative_eq!(x[2], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let a = [[1.0, 2.0], [2.0, 4.0]];
        assert!(solve(&a, &[1.0, 2.0]).is_none());
        assert!(invert(&a).is_none());
    }

    #[test]
    fn invert_round_trip() {
        let a = [[4.0, 1.0, 0.0], [1.0, 3.0, -1.0], [0.0, -1.0, 2.0]];
        let inv = invert(&a).unwrap();
        // a * inv == identity
        for i in 0..3 {
            for j in 0..3 {
                let product: f64 = (0..3).map(|k| a[i][k] * inv[k][j]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(product, expected, epsilon = 1e-12);
            }
        }
    }
}
