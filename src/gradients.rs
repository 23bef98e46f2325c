//! Hand-coded partial derivatives of the bar-network functions and residual.
//!
//! Every bar quantity depends on the coordinates only through the end-to-end
//! vector d = X_end − X_start, so coordinate terms are formed as ∂/∂d and
//! scattered with opposite signs onto the two end nodes.  Useful identities:
//!
//!   ∂L/∂d = n                       (n = d / L)
//!   ∂(1/L)/∂d = −n / L²
//!   ∂(d·a / L)/∂d = (a − (n·a) n) / L
//!
//! Thickness terms use that k, c and the thermal force are all linear in t.
//! All routines accumulate into `out`.

use crate::functions::{boundary_bars, failure_measures, softmax_weights, StructuralFunction};
use crate::structure::{dot, Bar, BarNetwork};

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// Add g to X_end and −g to X_start.
fn add_axial(out: &mut [f64], bar: &Bar, g: [f64; 3]) {
    for d in 0..3 {
        out[3 * bar.end + d] += g[d];
        out[3 * bar.start + d] -= g[d];
    }
}

/// Add g to the end-node displacement dofs and −g to the start node's.
fn add_jump(net: &BarNetwork, out: &mut [f64], bar: &Bar, g: &[f64; 3]) {
    for d in 0..net.layout().displacement_dof {
        out[net.dof(bar.end, d)] += g[d];
        out[net.dof(bar.start, d)] -= g[d];
    }
}

fn scaled(v: &[f64; 3], s: f64) -> [f64; 3] {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// ψ_T(end) − ψ_T(start), zero without a temperature field.
fn adjoint_temperature_jump(net: &BarNetwork, psi: &[f64], bar: &Bar) -> f64 {
    match (net.temperature_dof(bar.start), net.temperature_dof(bar.end)) {
        (Some(s), Some(e)) => psi[e] - psi[s],
        _ => 0.0,
    }
}

fn temperature_jump(net: &BarNetwork, state: &[f64], bar: &Bar) -> f64 {
    net.temperature(state, bar.end) - net.temperature(state, bar.start)
}

// ─────────────────────────────────────────────────────────────
//  ∂f/∂state
// ─────────────────────────────────────────────────────────────

pub fn add_state_sens(net: &BarNetwork, func: &StructuralFunction, state: &[f64], out: &mut [f64]) {
    let layout = net.layout();
    match *func {
        StructuralFunction::Mass => {}

        StructuralFunction::Compliance => {
            for bar in net.bars() {
                let k = net.stiffness(bar, &net.geometry(bar));
                let du = net.displacement_jump(state, bar);
                add_jump(net, out, bar, &scaled(&du, 2.0 * k));
            }
        }

        StructuralFunction::KsFailure { ks_weight } => {
            let mat = net.material();
            let scale = (mat.elastic_modulus / mat.allowable_stress).powi(2);
            let weights = softmax_weights(&failure_measures(net, state), ks_weight);
            for (bar, w) in net.bars().iter().zip(weights) {
                let geo = net.geometry(bar);
                let du = net.displacement_jump(state, bar);
                add_jump(net, out, bar, &scaled(&du, 2.0 * w * scale / (geo.length * geo.length)));

                if let (Some(ts), Some(te)) =
                    (net.temperature_dof(bar.start), net.temperature_dof(bar.end))
                {
                    // ∂(αθ̄)²/∂T_end = ∂(αθ̄)²/∂T_start = α² θ̄
                    let alpha = mat.thermal_expansion;
                    let g = w * scale * alpha * alpha * net.mean_temperature_rise(state, bar);
                    out[ts] += g;
                    out[te] += g;
                }
            }
        }

        StructuralFunction::AverageTemperature { volume } => {
            let width = net.material().section_width;
            for bar in net.bars() {
                if let (Some(ts), Some(te)) =
                    (net.temperature_dof(bar.start), net.temperature_dof(bar.end))
                {
                    let g = 0.5 * net.thickness_of(bar) * width * net.geometry(bar).length / volume;
                    out[ts] += g;
                    out[te] += g;
                }
            }
        }

        StructuralFunction::HeatFlux => {
            if !layout.has_temperature {
                return;
            }
            for (k, free, fixed) in boundary_bars(net) {
                let bar = &net.bars()[k];
                let c = net.conductance(bar, &net.geometry(bar));
                if let (Some(tf), Some(tx)) = (net.temperature_dof(free), net.temperature_dof(fixed)) {
                    out[tf] += c;
                    out[tx] -= c;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  ∂f/∂x  (one entry per thickness component)
// ─────────────────────────────────────────────────────────────

pub fn add_design_sens(net: &BarNetwork, func: &StructuralFunction, state: &[f64], out: &mut [f64]) {
    let mat = net.material();
    match *func {
        StructuralFunction::Mass => {
            for bar in net.bars() {
                out[bar.component] += mat.density * mat.section_width * net.geometry(bar).length;
            }
        }

        StructuralFunction::Compliance => {
            if !net.layout().has_displacements() {
                return;
            }
            for bar in net.bars() {
                let k = net.stiffness(bar, &net.geometry(bar));
                let du = net.displacement_jump(state, bar);
                out[bar.component] += k / net.thickness_of(bar) * dot(&du, &du);
            }
        }

        // Failure measures do not depend on thickness explicitly.
        StructuralFunction::KsFailure { .. } => {}

        StructuralFunction::AverageTemperature { volume } => {
            for bar in net.bars() {
                out[bar.component] += mat.section_width
                    * net.geometry(bar).length
                    * net.mean_temperature(state, bar)
                    / volume;
            }
        }

        StructuralFunction::HeatFlux => {
            if !net.layout().has_temperature {
                return;
            }
            for (k, free, fixed) in boundary_bars(net) {
                let bar = &net.bars()[k];
                let c = net.conductance(bar, &net.geometry(bar));
                let dt = net.temperature(state, free) - net.temperature(state, fixed);
                out[bar.component] += c / net.thickness_of(bar) * dt;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  ∂f/∂X
// ─────────────────────────────────────────────────────────────

pub fn add_coordinate_sens(
    net: &BarNetwork,
    func: &StructuralFunction,
    state: &[f64],
    out: &mut [f64],
) {
    let mat = net.material();
    match *func {
        StructuralFunction::Mass => {
            for bar in net.bars() {
                let n = net.geometry(bar).unit();
                let coeff = mat.density * net.thickness_of(bar) * mat.section_width;
                add_axial(out, bar, scaled(&n, coeff));
            }
        }

        StructuralFunction::Compliance => {
            if !net.layout().has_displacements() {
                return;
            }
            for bar in net.bars() {
                let geo = net.geometry(bar);
                let k = net.stiffness(bar, &geo);
                let du = net.displacement_jump(state, bar);
                add_axial(out, bar, scaled(&geo.unit(), -k / geo.length * dot(&du, &du)));
            }
        }

        StructuralFunction::KsFailure { ks_weight } => {
            let scale = (mat.elastic_modulus / mat.allowable_stress).powi(2);
            let weights = softmax_weights(&failure_measures(net, state), ks_weight);
            for (bar, w) in net.bars().iter().zip(weights) {
                let geo = net.geometry(bar);
                let du = net.displacement_jump(state, bar);
                let dfdl = -2.0 * scale * dot(&du, &du) / geo.length.powi(3);
                add_axial(out, bar, scaled(&geo.unit(), w * dfdl));
            }
        }

        StructuralFunction::AverageTemperature { volume } => {
            for bar in net.bars() {
                let n = net.geometry(bar).unit();
                let coeff = net.thickness_of(bar) * mat.section_width
                    * net.mean_temperature(state, bar)
                    / volume;
                add_axial(out, bar, scaled(&n, coeff));
            }
        }

        StructuralFunction::HeatFlux => {
            if !net.layout().has_temperature {
                return;
            }
            for (k, free, fixed) in boundary_bars(net) {
                let bar = &net.bars()[k];
                let geo = net.geometry(bar);
                let c = net.conductance(bar, &geo);
                let dt = net.temperature(state, free) - net.temperature(state, fixed);
                add_axial(out, bar, scaled(&geo.unit(), -c / geo.length * dt));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Adjoint-residual products
// ─────────────────────────────────────────────────────────────
//
// Per bar, ψᵀR = k Δu·Δψ − F (n·Δψ) + c ΔT Δψ_T
// where Δψ is the jump of the displacement part of ψ and Δψ_T of its
// temperature part.

/// `out += ψᵀ ∂R/∂x`
pub fn add_adjoint_design_product(net: &BarNetwork, psi: &[f64], state: &[f64], out: &mut [f64]) {
    let layout = net.layout();
    for bar in net.bars() {
        let geo = net.geometry(bar);
        let t = net.thickness_of(bar);
        let mut term = 0.0;

        if layout.has_displacements() {
            let du = net.displacement_jump(state, bar);
            let dpsi = net.displacement_jump(psi, bar);
            term += net.stiffness(bar, &geo) * dot(&du, &dpsi);

            if layout.has_temperature {
                let force =
                    net.thermal_force_coefficient(bar) * net.mean_temperature_rise(state, bar);
                term -= force * dot(&geo.unit(), &dpsi);
            }
        }

        if layout.has_temperature {
            let c = net.conductance(bar, &geo);
            term += c * temperature_jump(net, state, bar) * adjoint_temperature_jump(net, psi, bar);
        }

        out[bar.component] += term / t;
    }
}

/// `out += ψᵀ ∂R/∂X`
pub fn add_adjoint_coordinate_product(
    net: &BarNetwork,
    psi: &[f64],
    state: &[f64],
    out: &mut [f64],
) {
    let layout = net.layout();
    for bar in net.bars() {
        let geo = net.geometry(bar);
        let n = geo.unit();
        let mut g = [0.0; 3];

        if layout.has_displacements() {
            let du = net.displacement_jump(state, bar);
            let dpsi = net.displacement_jump(psi, bar);
            let k = net.stiffness(bar, &geo);
            let axial = -k / geo.length * dot(&du, &dpsi);
            for d in 0..3 {
                g[d] += axial * n[d];
            }

            if layout.has_temperature {
                let force =
                    net.thermal_force_coefficient(bar) * net.mean_temperature_rise(state, bar);
                let n_dpsi = dot(&n, &dpsi);
                for d in 0..3 {
                    g[d] -= force / geo.length * (dpsi[d] - n_dpsi * n[d]);
                }
            }
        }

        if layout.has_temperature {
            let c = net.conductance(bar, &geo);
            let axial = -c / geo.length
                * temperature_jump(net, state, bar)
                * adjoint_temperature_jump(net, psi, bar);
            for d in 0..3 {
                g[d] += axial * n[d];
            }
        }

        add_axial(out, bar, g);
    }
}
