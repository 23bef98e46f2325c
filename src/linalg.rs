//! Factor-once / solve-many linear system owned by the participant.
//!
//! Symmetric Jacobians (aerothermal, aeroelastic) go through `sprs-ldl`.
//! The thermo-elastic Jacobian is non-symmetric, so it is handed to
//! `nalgebra`'s partially-pivoted LU instead.

use crate::types::{AnalysisKind, CouplingError, Result};
use nalgebra::{DMatrix, DVector, Dyn, LU};
use sprs::{CsMat, CsMatView, FillInReduction, SymmetryCheck};
use sprs_ldl::{Ldl, LdlNumeric};

// ─────────────────────────────────────────────────────────────
//  Factorisation strategy
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorisationStrategy {
    /// Symmetric system: sparse LDLᵀ with RCM fill-in reduction.
    Ldl,
    /// General system: dense LU with partial pivoting.
    Lu,
}

impl FactorisationStrategy {
    pub fn for_kind(kind: AnalysisKind) -> Self {
        if kind.jacobian_is_symmetric() {
            Self::Ldl
        } else {
            Self::Lu
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Dense LU
// ─────────────────────────────────────────────────────────────

/// LU factors of a sparse matrix expanded to dense storage.
#[derive(Debug, Clone)]
pub struct DenseLu {
    lu: LU<f64, Dyn, Dyn>,
}

impl DenseLu {
    pub fn factor(a: CsMatView<f64>) -> Result<Self> {
        let mut dense = DMatrix::<f64>::zeros(a.rows(), a.cols());
        for (&val, (row, col)) in a.iter() {
            dense[(row, col)] += val;
        }

        let lu = dense.lu();
        if let Some(column) = lu.u().diagonal().iter().position(|&d| d == 0.0) {
            return Err(CouplingError::SingularPivot { column });
        }
        Ok(Self { lu })
    }

    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let b = DVector::from_column_slice(rhs);
        let x = self.lu.solve(&b).ok_or_else(|| {
            let column = self
                .lu
                .u()
                .diagonal()
                .iter()
                .position(|&d| d == 0.0)
                .unwrap_or(0);
            CouplingError::SingularPivot { column }
        })?;
        Ok(x.as_slice().to_vec())
    }
}

// ─────────────────────────────────────────────────────────────
//  Factorization
// ─────────────────────────────────────────────────────────────

pub enum Factorization {
    Ldl(LdlNumeric<f64, usize>),
    Lu(DenseLu),
}

impl std::fmt::Debug for Factorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ldl(_) => write!(f, "Factorization::Ldl(...)"),
            Self::Lu(_) => write!(f, "Factorization::Lu(...)"),
        }
    }
}

impl Factorization {
    pub fn new(a: CsMatView<f64>, strategy: FactorisationStrategy) -> Result<Self> {
        match strategy {
            FactorisationStrategy::Ldl => {
                let ldl = Ldl::new()
                    .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
                    .check_symmetry(SymmetryCheck::DontCheckSymmetry)
                    .numeric(a)?;
                Ok(Self::Ldl(ldl))
            }
            FactorisationStrategy::Lu => Ok(Self::Lu(DenseLu::factor(a)?)),
        }
    }

    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        match self {
            Self::Ldl(ldl) => Ok(ldl.solve(rhs)),
            Self::Lu(lu) => lu.solve(rhs),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Linear system
// ─────────────────────────────────────────────────────────────

/// Factored Jacobian (or its transpose) and its dimension.
#[derive(Debug, Default)]
pub struct LinearSystem {
    dim: usize,
    factorization: Option<Factorization>,
    transposed: bool,
}

impl LinearSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factor `matrix`, replacing any previous factors.  On failure the
    /// system is left unfactored rather than holding stale factors.
    pub fn factor(
        &mut self,
        matrix: CsMat<f64>,
        strategy: FactorisationStrategy,
        transposed: bool,
    ) -> Result<()> {
        self.factorization = None;
        self.dim = 0;
        let factorization = Factorization::new(matrix.view(), strategy)?;
        self.dim = matrix.rows();
        self.factorization = Some(factorization);
        self.transposed = transposed;
        Ok(())
    }

    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let factorization = self
            .factorization
            .as_ref()
            .ok_or(CouplingError::MissingFactorization)?;
        if rhs.len() != self.dim {
            return Err(CouplingError::Shape(format!(
                "right-hand side has {} entries, system has {}",
                rhs.len(),
                self.dim
            )));
        }
        factorization.solve(rhs)
    }

    pub fn is_factored(&self) -> bool {
        self.factorization.is_some()
    }

    /// Whether the current factors are of Jᵀ rather than J.
    pub fn is_transposed(&self) -> bool {
        self.transposed
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

// ─────────────────────────────────────────────────────────────
//  Strided field helpers
// ─────────────────────────────────────────────────────────────

/// Entries `offset, offset + stride, …` of `src`.
pub fn gather(src: &[f64], offset: usize, stride: usize) -> impl Iterator<Item = f64> + '_ {
    src.iter().skip(offset).step_by(stride).copied()
}

/// `dst[offset::stride] += values`
pub fn scatter_add(dst: &mut [f64], offset: usize, stride: usize, values: impl Iterator<Item = f64>) {
    for (d, v) in dst.iter_mut().skip(offset).step_by(stride).zip(values) {
        *d += v;
    }
}

/// `dst[offset::stride] = values`
pub fn scatter(dst: &mut [f64], offset: usize, stride: usize, values: impl Iterator<Item = f64>) {
    for (d, v) in dst.iter_mut().skip(offset).step_by(stride).zip(values) {
        *d = v;
    }
}
