//! Boundary to the finite-element library that owns element physics.
//!
//! The participant orchestrates assembly, factorization and solves through
//! this trait but never looks inside an element.  [`crate::structure`]
//! provides a bar-network implementation.

use crate::functions::StructuralFunction;
use crate::types::Result;
use sprs::CsMat;

pub trait StructuralAssembler {
    fn num_nodes(&self) -> usize;

    /// State entries per node.
    fn vars_per_node(&self) -> usize;

    fn num_design_vars(&self) -> usize;

    fn num_state_vars(&self) -> usize {
        self.num_nodes() * self.vars_per_node()
    }

    /// Node coordinates, 3 per node.
    fn nodes(&self) -> &[f64];

    fn set_nodes(&mut self, coords: &[f64]) -> Result<()>;

    /// Temperature held at Dirichlet nodes and published before any solve.
    fn reference_temperature(&self) -> f64;

    fn design_vars(&self) -> &[f64];

    fn set_design_vars(&mut self, x: &[f64]) -> Result<()>;

    /// Internal residual R(state) without external loads or fluxes.
    fn assemble_residual(&self, state: &[f64]) -> Vec<f64>;

    /// ∂R/∂state (or its transpose) with Dirichlet rows and columns replaced
    /// by the identity.
    fn assemble_jacobian(&self, transpose: bool) -> CsMat<f64>;

    /// Zero `vec` at every Dirichlet dof.
    fn apply_bcs(&self, vec: &mut [f64]);

    /// Write the prescribed Dirichlet values into `state`.
    fn set_bcs(&self, state: &mut [f64]);

    fn eval_functions(&self, funcs: &[StructuralFunction], state: &[f64]) -> Vec<f64>;

    /// `out += ∂f/∂state`
    fn add_sv_sens(&self, func: &StructuralFunction, state: &[f64], out: &mut [f64]);

    /// `out += ∂f/∂x`
    fn add_dv_sens(&self, func: &StructuralFunction, state: &[f64], out: &mut [f64]);

    /// `out += ∂f/∂X`
    fn add_xpt_sens(&self, func: &StructuralFunction, state: &[f64], out: &mut [f64]);

    /// `out += ψᵀ ∂R/∂x`
    fn add_adjoint_res_product(&self, psi: &[f64], state: &[f64], out: &mut [f64]);

    /// `out += ψᵀ ∂R/∂X`
    fn add_adjoint_res_xpt_sens_product(&self, psi: &[f64], state: &[f64], out: &mut [f64]);
}
