//! Fixed-Size Matrix Operations
//!
//! The Kalman filter here only needs 2×2 covariances and 1×2 measurement rows,
//! so matrices are plain const-generic arrays with no heap allocation and no
//! linear algebra dependency.

use crate::constants::kalman::PSD_TOLERANCE;

/// Matrix type using const generics
pub type Matrix<const R: usize, const C: usize> = [[f32; C]; R];

/// Square matrix type
pub type SquareMatrix<const N: usize> = Matrix<N, N>;

/// Vector type
pub type Vector<const N: usize> = [f32; N];

/// Identity matrix
pub fn identity<const N: usize>() -> SquareMatrix<N> {
    let mut result = [[0.0; N]; N];
    for (i, row) in result.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    result
}

/// Diagonal matrix from its diagonal entries
pub fn diagonal<const N: usize>(entries: Vector<N>) -> SquareMatrix<N> {
    let mut result = [[0.0; N]; N];
    for (i, value) in entries.into_iter().enumerate() {
        result[i][i] = value;
    }
    result
}

/// Matrix multiplication: A[R×K] × B[K×C]
pub fn multiply<const R: usize, const K: usize, const C: usize>(
    a: &Matrix<R, K>,
    b: &Matrix<K, C>,
) -> Matrix<R, C> {
    let mut result = [[0.0; C]; R];
    for i in 0..R {
        for j in 0..C {
            for k in 0..K {
                result[i][j] += a[i][k] * b[k][j];
            }
        }
    }
    result
}

/// Matrix transpose
pub fn transpose<const R: usize, const C: usize>(a: &Matrix<R, C>) -> Matrix<C, R> {
    let mut result = [[0.0; R]; C];
    for i in 0..R {
        for j in 0..C {
            result[j][i] = a[i][j];
        }
    }
    result
}

/// Element-wise addition
pub fn add<const R: usize, const C: usize>(a: &Matrix<R, C>, b: &Matrix<R, C>) -> Matrix<R, C> {
    let mut result = *a;
    for i in 0..R {
        for j in 0..C {
            result[i][j] += b[i][j];
        }
    }
    result
}

/// Element-wise subtraction
pub fn subtract<const R: usize, const C: usize>(
    a: &Matrix<R, C>,
    b: &Matrix<R, C>,
) -> Matrix<R, C> {
    let mut result = *a;
    for i in 0..R {
        for j in 0..C {
            result[i][j] -= b[i][j];
        }
    }
    result
}

/// Multiply every element by a scalar
pub fn scale<const R: usize, const C: usize>(a: &Matrix<R, C>, factor: f32) -> Matrix<R, C> {
    let mut result = *a;
    for row in result.iter_mut() {
        for value in row.iter_mut() {
            *value *= factor;
        }
    }
    result
}

/// Matrix-vector multiplication: y = A × x
pub fn matvec<const R: usize, const C: usize>(matrix: &Matrix<R, C>, vector: &Vector<C>) -> Vector<R> {
    let mut result = [0.0; R];
    for i in 0..R {
        for j in 0..C {
            result[i] += matrix[i][j] * vector[j];
        }
    }
    result
}

/// Make matrix symmetric: A = (A + Aᵀ) / 2
pub fn make_symmetric<const N: usize>(matrix: &mut SquareMatrix<N>) {
    for i in 0..N {
        for j in i + 1..N {
            let avg = (matrix[i][j] + matrix[j][i]) * 0.5;
            matrix[i][j] = avg;
            matrix[j][i] = avg;
        }
    }
}

/// All elements finite
pub fn is_finite<const R: usize, const C: usize>(matrix: &Matrix<R, C>) -> bool {
    matrix.iter().all(|row| row.iter().all(|v| v.is_finite()))
}

/// Check a symmetric matrix is positive semi-definite within `PSD_TOLERANCE`
///
/// Runs a Cholesky factorization that tolerates zero pivots. A pivot below
/// `-PSD_TOLERANCE` (scaled by the diagonal) means a negative eigenvalue.
pub fn is_positive_semidefinite<const N: usize>(matrix: &SquareMatrix<N>) -> bool {
    if !is_finite(matrix) {
        return false;
    }

    let magnitude = matrix
        .iter()
        .enumerate()
        .map(|(i, row)| row[i].abs())
        .fold(1.0f32, f32::max);
    let tolerance = PSD_TOLERANCE * magnitude;

    let mut lower = [[0.0f32; N]; N];
    for j in 0..N {
        let mut pivot = matrix[j][j];
        for k in 0..j {
            pivot -= lower[j][k] * lower[j][k];
        }

        if pivot < -tolerance {
            return false;
        }

        if pivot <= tolerance {
            // Zero pivot: the rest of the column must vanish too
            for i in j + 1..N {
                let mut off = matrix[i][j];
                for k in 0..j {
                    off -= lower[i][k] * lower[j][k];
                }
                if off.abs() > libm::sqrtf(tolerance * magnitude) {
                    return false;
                }
            }
            continue;
        }

        let root = libm::sqrtf(pivot);
        lower[j][j] = root;
        for i in j + 1..N {
            let mut off = matrix[i][j];
            for k in 0..j {
                off -= lower[i][k] * lower[j][k];
            }
            lower[i][j] = off / root;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_operations() {
        let a = [[1.0, 2.0], [3.0, 4.0]];
        let b = [[5.0, 6.0], [7.0, 8.0]];

        assert_eq!(multiply(&a, &b), [[19.0, 22.0], [43.0, 50.0]]);
        assert_eq!(transpose(&a), [[1.0, 3.0], [2.0, 4.0]]);
        assert_eq!(add(&a, &b), [[6.0, 8.0], [10.0, 12.0]]);
        assert_eq!(subtract(&b, &a), [[4.0, 4.0], [4.0, 4.0]]);
        assert_eq!(scale(&a, 2.0), [[2.0, 4.0], [6.0, 8.0]]);
        assert_eq!(matvec(&a, &[1.0, 1.0]), [3.0, 7.0]);
        assert_eq!(multiply(&identity::<2>(), &a), a);
    }

    #[test]
    fn non_square_shapes() {
        let h = [[0.5, -1.0]];
        let p = diagonal([4.0, 1.0]);

        let hp = multiply(&h, &p);
        assert_eq!(hp, [[2.0, -1.0]]);

        let s = multiply(&hp, &transpose(&h));
        assert_eq!(s, [[2.0]]);
    }

    #[test]
    fn symmetrize() {
        let mut m = [[1.0, 2.0], [4.0, 1.0]];
        make_symmetric(&mut m);
        assert_eq!(m[0][1], 3.0);
        assert_eq!(m[1][0], 3.0);
    }

    #[test]
    fn psd_check() {
        assert!(is_positive_semidefinite(&[[4.0, 1.0], [1.0, 2.0]]));
        assert!(is_positive_semidefinite(&[[1.0, 1.0], [1.0, 1.0]]));
        assert!(is_positive_semidefinite(&[[0.0, 0.0], [0.0, 0.0]]));

        // Negative eigenvalue
        assert!(!is_positive_semidefinite(&[[1.0, 2.0], [2.0, 1.0]]));
        assert!(!is_positive_semidefinite(&[[-1.0, 0.0], [0.0, 1.0]]));
        assert!(!is_positive_semidefinite(&[[f32::NAN, 0.0], [0.0, 1.0]]));
    }
}
