//! Reference structural model: a thermo-elastic bar network.
//!
//! Each bar couples its two end nodes through
//!   - an axial stiffness  k = E t w / L  acting on every displacement component,
//!   - a conductance       c = κ t w / L  acting on the temperature,
//!   - a thermal force     F = E t w α (T̄ − T_ref)  along the bar axis,
//!
//! where `t` is the thickness of the bar's component (one design variable per
//! component).  The thermal force makes ∂R_u/∂T non-zero while ∂R_T/∂u = 0,
//! so the thermo-elastic Jacobian is non-symmetric.
//!
//! Fixed nodes carry Dirichlet conditions on all their dofs: zero
//! displacement and `T_ref` temperature.

use crate::assembler::StructuralAssembler;
use crate::functions::{self, StructuralFunction};
use crate::gradients;
use crate::model::DEFAULT_REFERENCE_TEMPERATURE;
use crate::types::{AnalysisKind, CouplingError, FieldLayout, Result};
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

// ─────────────────────────────────────────────────────────────
//  Material
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub elastic_modulus: f64,
    pub density: f64,
    pub thermal_expansion: f64,
    pub conductivity: f64,
    pub allowable_stress: f64,
    /// Out-of-plane section width; bar area is `thickness * section_width`.
    pub section_width: f64,
    pub reference_temperature: f64,
}

impl Default for Material {
    fn default() -> Self {
        // 2024-T3 aluminium
        Self {
            elastic_modulus: 70.0e9,
            density: 2780.0,
            thermal_expansion: 23.0e-6,
            conductivity: 121.0,
            allowable_stress: 270.0e6,
            section_width: 0.1,
            reference_temperature: DEFAULT_REFERENCE_TEMPERATURE,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Topology
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub start: usize,
    pub end: usize,
    /// Index of the design variable that sets this bar's thickness.
    pub component: usize,
}

/// End-to-end vector and length of a bar.
#[derive(Debug, Clone, Copy)]
pub struct BarGeometry {
    pub delta: [f64; 3],
    pub length: f64,
}

impl BarGeometry {
    pub fn unit(&self) -> [f64; 3] {
        [
            self.delta[0] / self.length,
            self.delta[1] / self.length,
            self.delta[2] / self.length,
        ]
    }
}

pub(crate) fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

// ─────────────────────────────────────────────────────────────
//  Bar network
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BarNetwork {
    layout: FieldLayout,
    material: Material,
    coords: Vec<f64>,
    bars: Vec<Bar>,
    fixed: Vec<bool>,
    bc_dofs: Vec<usize>,
    thickness: Vec<f64>,
}

impl BarNetwork {
    /// Build a network for `kind`.
    ///
    /// `coords` holds 3 entries per node, `thickness` one entry per component.
    pub fn new(
        kind: AnalysisKind,
        coords: Vec<f64>,
        bars: Vec<Bar>,
        fixed_nodes: &[usize],
        thickness: Vec<f64>,
        material: Material,
    ) -> Result<Self> {
        if coords.len() % 3 != 0 {
            return Err(CouplingError::Shape(format!(
                "coordinate array length {} is not a multiple of 3",
                coords.len()
            )));
        }
        let num_nodes = coords.len() / 3;
        for (k, bar) in bars.iter().enumerate() {
            if bar.start >= num_nodes || bar.end >= num_nodes || bar.start == bar.end {
                return Err(CouplingError::Shape(format!(
                    "bar {k} connects invalid nodes ({}, {})",
                    bar.start, bar.end
                )));
            }
            if bar.component >= thickness.len() {
                return Err(CouplingError::Shape(format!(
                    "bar {k} references component {} of {}",
                    bar.component,
                    thickness.len()
                )));
            }
        }

        let layout = kind.layout();
        let ndof = layout.dof_per_node();
        let mut fixed = vec![false; num_nodes];
        for &node in fixed_nodes {
            if node >= num_nodes {
                return Err(CouplingError::Shape(format!(
                    "fixed node {node} out of range ({num_nodes} nodes)"
                )));
            }
            fixed[node] = true;
        }
        let bc_dofs = fixed
            .iter()
            .enumerate()
            .filter(|(_, &f)| f)
            .flat_map(|(node, _)| (0..ndof).map(move |c| node * ndof + c))
            .collect();

        Ok(Self {
            layout,
            material,
            coords,
            bars,
            fixed,
            bc_dofs,
            thickness,
        })
    }

    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bc_dofs(&self) -> &[usize] {
        &self.bc_dofs
    }

    pub fn is_fixed(&self, node: usize) -> bool {
        self.fixed[node]
    }

    pub fn thickness_of(&self, bar: &Bar) -> f64 {
        self.thickness[bar.component]
    }

    pub fn geometry(&self, bar: &Bar) -> BarGeometry {
        let s = 3 * bar.start;
        let e = 3 * bar.end;
        let delta = [
            self.coords[e] - self.coords[s],
            self.coords[e + 1] - self.coords[s + 1],
            self.coords[e + 2] - self.coords[s + 2],
        ];
        let length = dot(&delta, &delta).sqrt();
        BarGeometry { delta, length }
    }

    /// E t w / L
    pub fn stiffness(&self, bar: &Bar, geo: &BarGeometry) -> f64 {
        self.material.elastic_modulus * self.thickness_of(bar) * self.material.section_width
            / geo.length
    }

    /// κ t w / L
    pub fn conductance(&self, bar: &Bar, geo: &BarGeometry) -> f64 {
        self.material.conductivity * self.thickness_of(bar) * self.material.section_width
            / geo.length
    }

    /// E t w α: thermal force per kelvin of mean temperature rise.
    pub fn thermal_force_coefficient(&self, bar: &Bar) -> f64 {
        self.material.elastic_modulus
            * self.thickness_of(bar)
            * self.material.section_width
            * self.material.thermal_expansion
    }

    /// State index of component `comp` at `node`.
    pub fn dof(&self, node: usize, comp: usize) -> usize {
        node * self.layout.dof_per_node() + comp
    }

    pub fn temperature_dof(&self, node: usize) -> Option<usize> {
        self.layout.thermal_index().map(|ti| self.dof(node, ti))
    }

    /// Nodal displacement, zero for kinds without displacements.
    pub fn displacement(&self, state: &[f64], node: usize) -> [f64; 3] {
        let mut u = [0.0; 3];
        for (d, ud) in u.iter_mut().enumerate().take(self.layout.displacement_dof) {
            *ud = state[self.dof(node, d)];
        }
        u
    }

    /// u_end − u_start
    pub fn displacement_jump(&self, state: &[f64], bar: &Bar) -> [f64; 3] {
        let us = self.displacement(state, bar.start);
        let ue = self.displacement(state, bar.end);
        [ue[0] - us[0], ue[1] - us[1], ue[2] - us[2]]
    }

    /// Nodal temperature, `T_ref` for kinds without a temperature field.
    pub fn temperature(&self, state: &[f64], node: usize) -> f64 {
        match self.temperature_dof(node) {
            Some(dof) => state[dof],
            None => self.material.reference_temperature,
        }
    }

    pub fn mean_temperature(&self, state: &[f64], bar: &Bar) -> f64 {
        0.5 * (self.temperature(state, bar.start) + self.temperature(state, bar.end))
    }

    /// Mean temperature rise above `T_ref`.
    pub fn mean_temperature_rise(&self, state: &[f64], bar: &Bar) -> f64 {
        self.mean_temperature(state, bar) - self.material.reference_temperature
    }

    fn check_state(&self, state: &[f64]) {
        debug_assert_eq!(state.len(), self.num_state_vars());
    }
}

// ─────────────────────────────────────────────────────────────
//  Assembler implementation
// ─────────────────────────────────────────────────────────────

impl StructuralAssembler for BarNetwork {
    fn num_nodes(&self) -> usize {
        self.coords.len() / 3
    }

    fn vars_per_node(&self) -> usize {
        self.layout.dof_per_node()
    }

    fn num_design_vars(&self) -> usize {
        self.thickness.len()
    }

    fn nodes(&self) -> &[f64] {
        &self.coords
    }

    fn set_nodes(&mut self, coords: &[f64]) -> Result<()> {
        if coords.len() != self.coords.len() {
            return Err(CouplingError::Shape(format!(
                "expected {} coordinates, got {}",
                self.coords.len(),
                coords.len()
            )));
        }
        self.coords.copy_from_slice(coords);
        Ok(())
    }

    fn reference_temperature(&self) -> f64 {
        self.material.reference_temperature
    }

    fn design_vars(&self) -> &[f64] {
        &self.thickness
    }

    fn set_design_vars(&mut self, x: &[f64]) -> Result<()> {
        if x.len() != self.thickness.len() {
            return Err(CouplingError::Shape(format!(
                "expected {} design variables, got {}",
                self.thickness.len(),
                x.len()
            )));
        }
        self.thickness.copy_from_slice(x);
        Ok(())
    }

    fn assemble_residual(&self, state: &[f64]) -> Vec<f64> {
        self.check_state(state);
        let mut res = vec![0.0; state.len()];
        let nd = self.layout.displacement_dof;

        for bar in &self.bars {
            let geo = self.geometry(bar);

            if nd > 0 {
                let k = self.stiffness(bar, &geo);
                let du = self.displacement_jump(state, bar);
                for d in 0..nd {
                    let r = k * du[d];
                    res[self.dof(bar.end, d)] += r;
                    res[self.dof(bar.start, d)] -= r;
                }

                if self.layout.has_temperature {
                    let force =
                        self.thermal_force_coefficient(bar) * self.mean_temperature_rise(state, bar);
                    let n = geo.unit();
                    for d in 0..nd {
                        res[self.dof(bar.end, d)] -= force * n[d];
                        res[self.dof(bar.start, d)] += force * n[d];
                    }
                }
            }

            if let (Some(ts), Some(te)) = (
                self.temperature_dof(bar.start),
                self.temperature_dof(bar.end),
            ) {
                let c = self.conductance(bar, &geo);
                let r = c * (state[te] - state[ts]);
                res[te] += r;
                res[ts] -= r;
            }
        }
        res
    }

    fn assemble_jacobian(&self, transpose: bool) -> CsMat<f64> {
        let n = self.num_state_vars();
        let nd = self.layout.displacement_dof;
        let mut is_bc = vec![false; n];
        for &dof in &self.bc_dofs {
            is_bc[dof] = true;
        }

        let mut tri = TriMat::new((n, n));
        let mut add = |row: usize, col: usize, val: f64| {
            if is_bc[row] || is_bc[col] {
                return;
            }
            if transpose {
                tri.add_triplet(col, row, val);
            } else {
                tri.add_triplet(row, col, val);
            }
        };

        for bar in &self.bars {
            let geo = self.geometry(bar);

            if nd > 0 {
                let k = self.stiffness(bar, &geo);
                for d in 0..nd {
                    let s = self.dof(bar.start, d);
                    let e = self.dof(bar.end, d);
                    add(s, s, k);
                    add(e, e, k);
                    add(s, e, -k);
                    add(e, s, -k);
                }
            }

            if let (Some(ts), Some(te)) = (
                self.temperature_dof(bar.start),
                self.temperature_dof(bar.end),
            ) {
                let c = self.conductance(bar, &geo);
                add(ts, ts, c);
                add(te, te, c);
                add(ts, te, -c);
                add(te, ts, -c);

                // ∂R_u/∂T from the thermal force, half per end temperature
                if nd > 0 {
                    let half = 0.5 * self.thermal_force_coefficient(bar);
                    let nvec = geo.unit();
                    for d in 0..nd {
                        let g = half * nvec[d];
                        let s = self.dof(bar.start, d);
                        let e = self.dof(bar.end, d);
                        add(e, ts, -g);
                        add(e, te, -g);
                        add(s, ts, g);
                        add(s, te, g);
                    }
                }
            }
        }

        for &dof in &self.bc_dofs {
            tri.add_triplet(dof, dof, 1.0);
        }
        tri.to_csc()
    }

    fn apply_bcs(&self, vec: &mut [f64]) {
        for &dof in &self.bc_dofs {
            vec[dof] = 0.0;
        }
    }

    fn set_bcs(&self, state: &mut [f64]) {
        let nd = self.layout.displacement_dof;
        for node in (0..self.num_nodes()).filter(|&i| self.fixed[i]) {
            for d in 0..nd {
                state[self.dof(node, d)] = 0.0;
            }
            if let Some(dof) = self.temperature_dof(node) {
                state[dof] = self.material.reference_temperature;
            }
        }
    }

    fn eval_functions(&self, funcs: &[StructuralFunction], state: &[f64]) -> Vec<f64> {
        self.check_state(state);
        funcs
            .iter()
            .map(|func| functions::evaluate(self, func, state))
            .collect()
    }

    fn add_sv_sens(&self, func: &StructuralFunction, state: &[f64], out: &mut [f64]) {
        gradients::add_state_sens(self, func, state, out);
    }

    fn add_dv_sens(&self, func: &StructuralFunction, state: &[f64], out: &mut [f64]) {
        gradients::add_design_sens(self, func, state, out);
    }

    fn add_xpt_sens(&self, func: &StructuralFunction, state: &[f64], out: &mut [f64]) {
        gradients::add_coordinate_sens(self, func, state, out);
    }

    fn add_adjoint_res_product(&self, psi: &[f64], state: &[f64], out: &mut [f64]) {
        gradients::add_adjoint_design_product(self, psi, state, out);
    }

    fn add_adjoint_res_xpt_sens_product(&self, psi: &[f64], state: &[f64], out: &mut [f64]) {
        gradients::add_adjoint_coordinate_product(self, psi, state, out);
    }
}
