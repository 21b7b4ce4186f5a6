//! Feedback matrix constructors.
//!
//! Every "orthogonal family" construction yields `M · Mᵗ ≈ I`, which is
//! what keeps the recirculating network from gaining energy on the mix
//! step. All constructors are deterministic for a fixed `(n, seed, type)`;
//! the PRNG is a seeded ChaCha8 consuming Box-Muller normal deviates.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Closed set of matrix topologies.
///
/// Replaces string-keyed dispatch: unknown names fail at preset parse
/// time instead of silently falling back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackMatrixType {
    RandomOrthogonal,
    SpecialOrthogonal,
    CirculantOrthogonal,
    Circulant4,
    Circulant8,
    Circulant16,
    Circulant32,
    UpperTriangularPositive,
    UpperTriangularNegative,
    LowerTriangularPositive,
    LowerTriangularNegative,
    SchroederPositive,
    SchroederNegative,
    AbsorbentPositive,
    AbsorbentNegative,
    Hadamard,
    Conference,
}

/// Square matrix in flat row-major storage.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedbackMatrix {
    n: usize,
    data: Vec<f64>,
}

impl FeedbackMatrix {
    pub fn zero(n: usize) -> Self {
        assert!(n >= 1, "feedback matrix: size must be >= 1, got {n}");
        Self { n, data: vec![0.0; n * n] }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zero(n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Build a matrix of the given topology. Deterministic per
    /// `(ty, n, seed)`.
    pub fn generate(ty: FeedbackMatrixType, n: usize, seed: u64) -> Self {
        use FeedbackMatrixType::*;
        match ty {
            RandomOrthogonal => random_orthogonal(n, seed),
            SpecialOrthogonal => random_special_orthogonal(n, seed),
            CirculantOrthogonal => random_circulant_orthogonal(n, seed, n),
            Circulant4 => random_circulant_orthogonal(n, seed, 4),
            Circulant8 => random_circulant_orthogonal(n, seed, 8),
            Circulant16 => random_circulant_orthogonal(n, seed, 16),
            Circulant32 => random_circulant_orthogonal(n, seed, 32),
            UpperTriangularPositive => random_upper_triangular(n, seed, 0.0, 1.0),
            UpperTriangularNegative => random_upper_triangular(n, seed, -1.0, 0.0),
            LowerTriangularPositive => random_lower_triangular(n, seed, 0.0, 1.0),
            LowerTriangularNegative => random_lower_triangular(n, seed, -1.0, 0.0),
            SchroederPositive => random_schroeder(n, seed, 0.0, 1.0),
            SchroederNegative => random_schroeder(n, seed, -1.0, 0.0),
            AbsorbentPositive => random_absorbent(n, seed, 0.0, 1.0),
            AbsorbentNegative => random_absorbent(n, seed, -1.0, 0.0),
            Hadamard => hadamard_sylvester(n),
            Conference => conference(n),
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n + col]
    }

    #[inline]
    fn at_mut(&mut self, row: usize, col: usize) -> &mut f64 {
        &mut self.data[row * self.n + col]
    }

    /// `out = M · v`. Lengths must equal the matrix size.
    #[inline]
    pub fn mul_vec(&self, v: &[f64], out: &mut [f64]) {
        debug_assert_eq!(v.len(), self.n);
        debug_assert_eq!(out.len(), self.n);
        for i in 0..self.n {
            let row = &self.data[i * self.n..(i + 1) * self.n];
            let mut acc = 0.0;
            for (m, x) in row.iter().zip(v.iter()) {
                acc += m * x;
            }
            out[i] = acc;
        }
    }
}

fn normal_dist(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.random();
    let u2: f64 = rng.random();
    (-2.0 * (1.0 - u1).ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn uniform_dist(rng: &mut ChaCha8Rng, low: f64, high: f64) -> f64 {
    rng.random::<f64>() * (high - low) + low
}

/// Random orthogonal matrix via iterated Householder reflections.
///
/// Port of `scipy.stats.ortho_group`: accumulate reflections against
/// progressively shorter random vectors, starting from identity.
pub fn random_orthogonal(n: usize, seed: u64) -> FeedbackMatrix {
    random_orthogonal_blend(n, seed, true, 1.0)
}

/// Variant of [`random_orthogonal`] that blends toward identity.
///
/// With `full_random = false`, `identity_amount` near 0 keeps the result
/// close to the identity matrix (weak cross-coupling); 1 is fully random.
pub fn random_orthogonal_blend(
    n: usize,
    seed: u64,
    full_random: bool,
    identity_amount: f64,
) -> FeedbackMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut matrix = FeedbackMatrix::identity(n);
    let identity_amount = if full_random { 1.0 } else { identity_amount };

    let mut x = vec![0.0; n];
    for step in 0..n {
        let x_range = n - step;

        x[0] = if full_random { normal_dist(&mut rng) } else { 1.0 };
        for xi in x.iter_mut().take(x_range).skip(1) {
            *xi = identity_amount * normal_dist(&mut rng);
        }

        let mut norm2 = 0.0;
        for &xi in x.iter().take(x_range) {
            norm2 += xi * xi;
        }
        let x0 = x[0];

        let d = if x0 >= 0.0 { 1.0 } else { -1.0 };
        x[0] += d * norm2.sqrt();

        let denom = ((norm2 - x0 * x0 + x[0] * x[0]) / 2.0).sqrt();
        for xi in x.iter_mut().take(x_range) {
            *xi /= denom;
        }

        for row in 0..n {
            let mut dot_h = 0.0;
            for col in 0..x_range {
                dot_h += matrix.at(col, row) * x[col];
            }
            for col in 0..x_range {
                *matrix.at_mut(col, row) = d * (matrix.at(col, row) - dot_h * x[col]);
            }
        }
    }

    matrix
}

/// Random special orthogonal matrix (`det = +1`).
///
/// Port of `scipy.stats.special_ortho_group`: the per-step sign flags are
/// folded back so the determinant is always +1, removing the parity flip
/// a plain orthogonal draw can carry.
pub fn random_special_orthogonal(n: usize, seed: u64) -> FeedbackMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut matrix = FeedbackMatrix::identity(n);

    let mut x = vec![0.0; n];
    let mut d = vec![0.0; n];
    for step in 0..n {
        let x_range = n - step;
        for xi in x.iter_mut().take(x_range) {
            *xi = normal_dist(&mut rng);
        }

        let mut norm2 = 0.0;
        for &xi in x.iter().take(x_range) {
            norm2 += xi * xi;
        }
        let x0 = x[0];

        d[step] = if x0 >= 0.0 { 1.0 } else { -1.0 };
        x[0] += d[step] * norm2.sqrt();

        let denom = ((norm2 - x0 * x0 + x[0] * x[0]) / 2.0).sqrt();
        for xi in x.iter_mut().take(x_range) {
            *xi /= denom;
        }

        for row in 0..n {
            let mut dot_h = 0.0;
            for col in 0..x_range {
                dot_h += matrix.at(col, row) * x[col];
            }
            for col in 0..x_range {
                *matrix.at_mut(col, row) -= dot_h * x[col];
            }
        }
    }

    let back = n - 1;
    d[back] = if back % 2 == 0 { 1.0 } else { -1.0 };
    for i in 0..back {
        d[back] *= d[i];
    }

    for row in 0..n {
        for col in 0..n {
            *matrix.at_mut(col, row) *= d[row];
        }
    }

    matrix
}

/// Circulant-structure orthogonal matrix after Rocchesso & Smith (1997),
/// eq. (24)/(25): `M[i][i] = s·gᵢ − 1`, `M[i][j] = s·sqrt(gᵢ·gⱼ)` with
/// `s = 2 / Σg`. `band < n` restricts the nonzero coefficient band.
pub fn random_circulant_orthogonal(n: usize, seed: u64, band: usize) -> FeedbackMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut matrix = FeedbackMatrix::zero(n);

    let (left, band) = if band >= n { (0, n) } else { (1, band) };

    let mut source: Vec<f64> = vec![0.0; n];
    let mut sum = 0.0;
    while sum == 0.0 {
        // Zero sum would divide by zero below; redraw (practically never loops).
        for si in source.iter_mut().take(band).skip(left) {
            *si = rng.random();
            sum += *si;
        }
    }
    let scale = 2.0 / sum;

    let sqrts: Vec<f64> = source.iter().map(|v| v.sqrt()).collect();

    for row in 0..n {
        for col in 0..n {
            *matrix.at_mut(row, col) = if row == col {
                scale * source[row] - 1.0
            } else {
                scale * sqrts[row] * sqrts[col]
            };
        }
    }

    matrix
}

/// Random upper triangular matrix, columns normalized with the same
/// `2/sum − 1` diagonal trick as the circulant construction.
pub fn random_upper_triangular(n: usize, seed: u64, low: f64, high: f64) -> FeedbackMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (low, high) = if low > high { (high, low) } else { (low, high) };
    let mut matrix = FeedbackMatrix::zero(n);

    for row in 0..n {
        for col in row..n {
            *matrix.at_mut(row, col) = uniform_dist(&mut rng, low, high);
        }
    }
    for col in 0..n {
        let mut sum = 0.0;
        for row in 0..=col {
            sum += matrix.at(row, col);
        }
        let scale = 2.0 / sum;
        *matrix.at_mut(col, col) = scale * matrix.at(col, col) - 1.0;
        for row in 0..col {
            *matrix.at_mut(row, col) *= scale;
        }
    }

    matrix
}

/// Transpose counterpart of [`random_upper_triangular`].
pub fn random_lower_triangular(n: usize, seed: u64, low: f64, high: f64) -> FeedbackMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (low, high) = if low > high { (high, low) } else { (low, high) };
    let mut matrix = FeedbackMatrix::zero(n);

    for row in 0..n {
        for col in 0..=row {
            *matrix.at_mut(row, col) = uniform_dist(&mut rng, low, high);
        }
    }
    for col in 0..n {
        let mut sum = 0.0;
        for row in col..n {
            sum += matrix.at(row, col);
        }
        let scale = 2.0 / sum;
        *matrix.at_mut(col, col) = scale * matrix.at(col, col) - 1.0;
        for row in col + 1..n {
            *matrix.at_mut(row, col) *= scale;
        }
    }

    matrix
}

/// Series-allpass ("Schroeder") feedback structure from Schlecht & Habets
/// (2016), section IV.A, with the last two rows normalized for stability
/// at short delay times.
pub fn random_schroeder(n: usize, seed: u64, low: f64, high: f64) -> FeedbackMatrix {
    assert!(n >= 2, "schroeder matrix: size must be >= 2, got {n}");

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (low, high) = if low > high { (high, low) } else { (low, high) };
    let mut matrix = FeedbackMatrix::zero(n);

    for idx in 0..n {
        *matrix.at_mut(idx, idx) = uniform_dist(&mut rng, low, high);
    }

    let para_gain = matrix.at(n - 2, n - 2);
    let last_gain = 1.0 - para_gain * para_gain;
    let scale2 = 2.0 / ((n - 2) as f64 + para_gain);
    let scale1 = 2.0 / ((n - 2) as f64 * para_gain + last_gain + matrix.at(n - 1, n - 1));
    for col in 0..n - 1 {
        *matrix.at_mut(n - 2, col) = scale2;
        *matrix.at_mut(n - 1, col) = -para_gain * scale1;
    }
    *matrix.at_mut(n - 1, n - 2) = last_gain * scale1;

    matrix
}

/// Nested-allpass ("absorbent") block structure from Schlecht & Habets
/// (2016), section IV.B:
///
/// ```text
/// [[-A·G   , A],
///  [ I − G², G]]
/// ```
///
/// with `A` random orthogonal and `G` diagonal allpass gains.
pub fn random_absorbent(n: usize, seed: u64, low: f64, high: f64) -> FeedbackMatrix {
    assert!(n >= 2, "absorbent matrix: size must be >= 2, got {n}");
    assert!(n % 2 == 0, "absorbent matrix: size must be even, got {n}");

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (low, high) = if low > high { (high, low) } else { (low, high) };
    let half = n / 2;

    let mut matrix = FeedbackMatrix::zero(n);
    let a = random_orthogonal(half, seed);

    for col in 0..half {
        let gain = uniform_dist(&mut rng, low, high);
        *matrix.at_mut(half + col, half + col) = gain;
        *matrix.at_mut(half + col, col) = 1.0 - gain * gain;
        for row in 0..half {
            *matrix.at_mut(row, half + col) = a.at(row, col);
            *matrix.at_mut(row, col) = -a.at(row, col) * gain;
        }
    }

    matrix
}

/// Sylvester's construction of a normalized Hadamard matrix.
pub fn hadamard_sylvester(n: usize) -> FeedbackMatrix {
    assert!(
        n >= 1 && n & (n - 1) == 0,
        "hadamard matrix: size must be a power of 2, got {n}"
    );

    let mut matrix = FeedbackMatrix::zero(n);
    *matrix.at_mut(0, 0) = 1.0 / (n as f64).sqrt();

    let mut start = 1;
    while start < n {
        let end = 2 * start;
        for row in start..end {
            for col in start..end {
                let value = matrix.at(row - start, col - start);
                *matrix.at_mut(row - start, col) = value;
                *matrix.at_mut(row, col - start) = value;
                *matrix.at_mut(row, col) = -value;
            }
        }
        start = end;
    }

    matrix
}

/// Conference matrix via Paley's quadratic-residue construction.
///
/// The filled block size is the largest candidate order `≤ n` from OEIS
/// A000952; rows/columns beyond it stay zero.
pub fn conference(n: usize) -> FeedbackMatrix {
    const CANDIDATES: &[usize] = &[
        398, 390, 378, 374, 370, 366, 362, 354, 350, 338, 334, 326, 318, 314, 306, 294,
        290, 282, 278, 270, 266, 262, 258, 246, 242, 234, 230, 226, 222, 206, 198, 194,
        186, 182, 174, 170, 158, 154, 150, 146, 138, 126, 122, 118, 114, 110, 102, 98,
        90, 86, 82, 74, 66, 62, 54, 50, 46, 42, 38, 30, 26, 18, 14, 10, 6, 2,
    ];

    let dimension = *CANDIDATES
        .iter()
        .find(|&&c| c <= n)
        .unwrap_or_else(|| panic!("conference matrix: size too small, got {n}"));
    let modulo = dimension - 1;

    let mut is_residue = vec![false; modulo.max(1)];
    for i in 1..modulo {
        is_residue[(i * i) % modulo] = true;
    }
    is_residue[0] = false;

    let value = 1.0 / (modulo as f64).sqrt();
    let mut symbol = vec![0.0; modulo];
    for i in 1..modulo {
        symbol[i] = if is_residue[i] { value } else { -value };
    }

    let mut matrix = FeedbackMatrix::zero(n);
    for i in 1..dimension {
        *matrix.at_mut(0, i) = value;
        *matrix.at_mut(i, 0) = value;
    }
    for row in 1..dimension {
        for col in 1..dimension {
            *matrix.at_mut(row, col) = symbol[col - 1];
        }
        symbol.rotate_right(1);
    }

    matrix
}

/// Householder reflection `I − 2vvᵗ/(vᵗv)` from a seed vector.
///
/// A near-zero vector is a valid bypass request, not an error: the result
/// degenerates to the zero matrix, or identity when `non_zero` is set.
pub fn householder_from_vector(v: &[f64], non_zero: bool) -> FeedbackMatrix {
    let n = v.len();
    let denom: f64 = v.iter().map(|x| x * x).sum();

    if denom <= f64::EPSILON {
        return if non_zero {
            FeedbackMatrix::identity(n)
        } else {
            FeedbackMatrix::zero(n)
        };
    }

    let scale = -2.0 / denom;
    let mut matrix = FeedbackMatrix::zero(n);
    for i in 0..n {
        *matrix.at_mut(i, i) = 1.0 + scale * v[i] * v[i];
        for j in i + 1..n {
            let value = scale * v[i] * v[j];
            *matrix.at_mut(i, j) = value;
            *matrix.at_mut(j, i) = value;
        }
    }

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transpose(m: &FeedbackMatrix) -> FeedbackMatrix {
        let n = m.size();
        let mut t = FeedbackMatrix::zero(n);
        for i in 0..n {
            for j in 0..n {
                *t.at_mut(j, i) = m.at(i, j);
            }
        }
        t
    }

    fn mat_mul(a: &FeedbackMatrix, b: &FeedbackMatrix) -> FeedbackMatrix {
        let n = a.size();
        let mut c = FeedbackMatrix::zero(n);
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    *c.at_mut(i, j) += a.at(i, k) * b.at(k, j);
                }
            }
        }
        c
    }

    fn assert_identity(m: &FeedbackMatrix, tol: f64, label: &str) {
        let n = m.size();
        for i in 0..n {
            for j in 0..n {
                let expected = if i == j { 1.0 } else { 0.0 };
                let got = m.at(i, j);
                assert!(
                    (got - expected).abs() <= tol,
                    "{label}: [{i}][{j}] = {got}, expected {expected}"
                );
            }
        }
    }

    /// Determinant via Gaussian elimination with partial pivoting.
    fn determinant(m: &FeedbackMatrix) -> f64 {
        let n = m.size();
        let mut a: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| m.at(i, j)).collect())
            .collect();
        let mut det = 1.0;
        for k in 0..n {
            let pivot = (k..n)
                .max_by(|&x, &y| a[x][k].abs().partial_cmp(&a[y][k].abs()).unwrap())
                .unwrap();
            if a[pivot][k] == 0.0 {
                return 0.0;
            }
            if pivot != k {
                a.swap(pivot, k);
                det = -det;
            }
            det *= a[k][k];
            for i in k + 1..n {
                let factor = a[i][k] / a[k][k];
                for j in k..n {
                    a[i][j] -= factor * a[k][j];
                }
            }
        }
        det
    }

    #[test]
    fn orthogonal_family_is_orthogonal() {
        for &n in &[2usize, 4, 8, 16] {
            for (label, m) in [
                ("random", random_orthogonal(n, 42)),
                ("special", random_special_orthogonal(n, 42)),
                ("circulant", random_circulant_orthogonal(n, 42, n)),
                ("hadamard", hadamard_sylvester(n)),
            ] {
                let product = mat_mul(&m, &transpose(&m));
                assert_identity(&product, 1e-9, &format!("{label} n={n}"));
            }
        }
    }

    #[test]
    fn conference_is_orthogonal() {
        // Orders whose block size minus one is prime, where the
        // quadratic-residue symbols form a proper Legendre sequence.
        for &n in &[6usize, 14, 18] {
            let m = conference(n);
            let product = mat_mul(&m, &transpose(&m));
            assert_identity(&product, 1e-9, &format!("conference n={n}"));
        }
    }

    #[test]
    fn banded_circulant_is_orthogonal() {
        let m = random_circulant_orthogonal(8, 3, 4);
        let product = mat_mul(&m, &transpose(&m));
        assert_identity(&product, 1e-9, "circulant band=4");
    }

    #[test]
    fn special_orthogonal_determinant_is_plus_one() {
        for &n in &[2usize, 4, 8, 16] {
            for seed in 0..4 {
                let m = random_special_orthogonal(n, seed);
                let det = determinant(&m);
                assert!((det - 1.0).abs() < 1e-6, "n={n} seed={seed}: det={det}");
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        use FeedbackMatrixType::*;
        for ty in [
            RandomOrthogonal,
            SpecialOrthogonal,
            CirculantOrthogonal,
            UpperTriangularPositive,
            SchroederNegative,
            AbsorbentPositive,
        ] {
            let a = FeedbackMatrix::generate(ty, 8, 1234);
            let b = FeedbackMatrix::generate(ty, 8, 1234);
            assert_eq!(a, b, "{ty:?} not deterministic");
            let c = FeedbackMatrix::generate(ty, 8, 1235);
            assert_ne!(a, c, "{ty:?} ignores seed");
        }
    }

    #[test]
    fn identity_blend_stays_near_identity() {
        let m = random_orthogonal_blend(8, 7, false, 1e-4);
        for i in 0..8 {
            for j in 0..8 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (m.at(i, j).abs() - expected).abs() < 0.01,
                    "[{i}][{j}] = {}",
                    m.at(i, j)
                );
            }
        }
        // Still orthogonal.
        let product = mat_mul(&m, &transpose(&m));
        assert_identity(&product, 1e-9, "identity blend");
    }

    #[test]
    fn householder_from_vector_reflects() {
        let v = [1.0, 2.0, -0.5, 0.25];
        let m = householder_from_vector(&v, false);
        let product = mat_mul(&m, &transpose(&m));
        assert_identity(&product, 1e-9, "householder");
    }

    #[test]
    fn householder_zero_vector_is_bypass() {
        let z = [0.0; 4];
        assert_eq!(householder_from_vector(&z, false), FeedbackMatrix::zero(4));
        assert_eq!(householder_from_vector(&z, true), FeedbackMatrix::identity(4));
    }

    #[test]
    #[should_panic(expected = "must be even")]
    fn absorbent_rejects_odd_size() {
        random_absorbent(5, 1, 0.0, 1.0);
    }

    #[test]
    #[should_panic(expected = "must be >= 2")]
    fn schroeder_rejects_size_one() {
        random_schroeder(1, 1, 0.0, 1.0);
    }

    #[test]
    #[should_panic(expected = "power of 2")]
    fn hadamard_rejects_non_power_of_two() {
        hadamard_sylvester(6);
    }

    #[test]
    fn triangular_matrices_have_expected_shape() {
        let upper = random_upper_triangular(6, 9, 0.0, 1.0);
        for row in 0..6 {
            for col in 0..row {
                assert_eq!(upper.at(row, col), 0.0);
            }
        }
        let lower = random_lower_triangular(6, 9, -1.0, 0.0);
        for row in 0..6 {
            for col in row + 1..6 {
                assert_eq!(lower.at(row, col), 0.0);
            }
        }
    }

    #[test]
    fn mul_vec_matches_manual_product() {
        let m = random_orthogonal(4, 3);
        let v = [0.5, -1.0, 2.0, 0.25];
        let mut out = [0.0; 4];
        m.mul_vec(&v, &mut out);
        for i in 0..4 {
            let mut acc = 0.0;
            for j in 0..4 {
                acc += m.at(i, j) * v[j];
            }
            assert!((out[i] - acc).abs() < 1e-15);
        }
    }
}
