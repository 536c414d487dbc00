use nalgebra::{DMatrix, SymmetricEigen};

/// Eigen-decomposition of a reversible generator.
///
/// With `D = diag(π)`, the matrix `S = D^{1/2} Q D^{-1/2}` is symmetric, so
/// `S = V Λ Vᵀ` and `exp(Qt) = D^{-1/2} V exp(Λt) Vᵀ D^{1/2}`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SpectralDecomposition {
    eigenvalues: Vec<f64>,
    left: DMatrix<f64>,
    right: DMatrix<f64>,
}

impl SpectralDecomposition {
    pub(crate) fn new(generator: &DMatrix<f64>, frequencies: &[f64]) -> Self {
        let n = frequencies.len();
        let sqrt_pi: Vec<f64> = frequencies.iter().map(|p| p.sqrt()).collect();
        let mut symmetric = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                symmetric[(i, j)] = if sqrt_pi[i] > 0.0 && sqrt_pi[j] > 0.0 {
                    sqrt_pi[i] * generator[(i, j)] / sqrt_pi[j]
                } else {
                    0.0
                };
            }
        }
        // Remove rounding asymmetry before the symmetric solver sees it.
        let symmetric = (&symmetric + symmetric.transpose()) * 0.5;
        let eigen = SymmetricEigen::new(symmetric);

        let mut left = eigen.eigenvectors.clone();
        let mut right = eigen.eigenvectors.transpose();
        for i in 0..n {
            let (inv, fwd) = if sqrt_pi[i] > 0.0 {
                (1.0 / sqrt_pi[i], sqrt_pi[i])
            } else {
                (0.0, 0.0)
            };
            for k in 0..n {
                left[(i, k)] *= inv;
                right[(k, i)] *= fwd;
            }
        }
        Self {
            eigenvalues: eigen.eigenvalues.iter().copied().collect(),
            left,
            right,
        }
    }

    /// `Σ_k left[:,k] · f(λ_k) · right[k,:]`
    fn combine(&self, f: impl Fn(f64) -> f64) -> DMatrix<f64> {
        let n = self.eigenvalues.len();
        let mut scaled = self.left.clone();
        for k in 0..n {
            let w = f(self.eigenvalues[k]);
            for i in 0..n {
                scaled[(i, k)] *= w;
            }
        }
        scaled * &self.right
    }

    pub(crate) fn transition_probabilities(&self, t: f64) -> DMatrix<f64> {
        let mut p = self.combine(|l| (l * t).exp());
        // Round-off can leave tiny negative entries.
        p.iter_mut().for_each(|x| {
            if *x < 0.0 {
                *x = 0.0;
            }
        });
        p
    }

    pub(crate) fn first_derivative(&self, t: f64) -> DMatrix<f64> {
        self.combine(|l| l * (l * t).exp())
    }

    pub(crate) fn second_derivative(&self, t: f64) -> DMatrix<f64> {
        self.combine(|l| l * l * (l * t).exp())
    }
}
