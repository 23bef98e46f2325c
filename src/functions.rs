//! Structural functions of interest and their values.
//!
//! `classify` turns a model-layer [`Function`] into a native evaluator plus
//! the [`FunctionTag`] that drives the adjoint.  Values are pure functions of
//! the bar network and the state; the hand-coded derivatives live in
//! `gradients.rs`.

use crate::model::Function;
use crate::structure::{dot, BarNetwork};
use crate::types::{FieldLayout, FunctionTag, ParticipantOptions};
use tracing::warn;

/// Function option key overriding the KS aggregation weight.
pub const KS_WEIGHT_OPTION: &str = "ksweight";

/// Function option key overriding the average-temperature volume.
pub const VOLUME_OPTION: &str = "volume";

// ─────────────────────────────────────────────────────────────
//  Evaluators
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StructuralFunction {
    /// KS aggregate of the bar failure measures.
    KsFailure { ks_weight: f64 },
    /// Σ k |Δu|²
    Compliance,
    /// Σ ρ t w L
    Mass,
    /// Σ t w L T̄ / volume
    AverageTemperature { volume: f64 },
    /// Heat conducted into the fixed boundary.
    HeatFlux,
}

impl StructuralFunction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::KsFailure { .. } => "ksfailure",
            Self::Compliance => "compliance",
            Self::Mass => "mass",
            Self::AverageTemperature { .. } => "temperature",
            Self::HeatFlux => "heatflux",
        }
    }
}

/// Map a model function onto an evaluator and tag.
///
/// Non-structural functions get a placeholder mass evaluator.  Temperature
/// functions are only recognised when the layout carries a temperature
/// field; anything unrecognised falls back to mass.
pub fn classify(
    func: &Function,
    layout: FieldLayout,
    options: &ParticipantOptions,
) -> (StructuralFunction, FunctionTag) {
    if !func.is_structural() {
        return (StructuralFunction::Mass, FunctionTag::NonStructural);
    }

    let name = func.name.to_lowercase();
    let evaluator = match name.as_str() {
        "ksfailure" => Some(StructuralFunction::KsFailure {
            ks_weight: func
                .option(KS_WEIGHT_OPTION)
                .unwrap_or(options.default_ks_weight),
        }),
        "compliance" => Some(StructuralFunction::Compliance),
        "mass" => Some(StructuralFunction::Mass),
        "temperature" if layout.has_temperature => Some(StructuralFunction::AverageTemperature {
            volume: func
                .option(VOLUME_OPTION)
                .unwrap_or(options.average_temperature_volume),
        }),
        "heatflux" if layout.has_temperature => Some(StructuralFunction::HeatFlux),
        _ => None,
    };

    match evaluator {
        Some(StructuralFunction::Mass) => (StructuralFunction::Mass, FunctionTag::StructuralDirect),
        Some(evaluator) => (evaluator, FunctionTag::StructuralWithAdjoint),
        None => {
            warn!(function = %func.name, "unrecognised structural function, evaluating mass instead");
            (StructuralFunction::Mass, FunctionTag::StructuralDirect)
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  KS aggregation
// ─────────────────────────────────────────────────────────────

/// KS(v) = m + ln Σ exp(ρ(v_i − m)) / ρ  with m = max(v).
pub fn ks_aggregate(values: &[f64], rho: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = values.iter().map(|&v| (rho * (v - m)).exp()).sum();
    m + sum.ln() / rho
}

/// ∂KS/∂v_i = exp(ρ(v_i − m)) / Σ exp(ρ(v_j − m))
pub fn softmax_weights(values: &[f64], rho: f64) -> Vec<f64> {
    let m = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|&v| (rho * (v - m)).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Per-bar failure measure E²(|Δu|²/L² + (α θ̄)²) / σ_allow².
pub fn failure_measures(net: &BarNetwork, state: &[f64]) -> Vec<f64> {
    let mat = net.material();
    let scale = (mat.elastic_modulus / mat.allowable_stress).powi(2);
    net.bars()
        .iter()
        .map(|bar| {
            let geo = net.geometry(bar);
            let du = net.displacement_jump(state, bar);
            let strain_sq = dot(&du, &du) / (geo.length * geo.length);
            let thermal = mat.thermal_expansion * net.mean_temperature_rise(state, bar);
            scale * (strain_sq + thermal * thermal)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────
//  Values
// ─────────────────────────────────────────────────────────────

pub fn evaluate(net: &BarNetwork, func: &StructuralFunction, state: &[f64]) -> f64 {
    match *func {
        StructuralFunction::KsFailure { ks_weight } => {
            ks_aggregate(&failure_measures(net, state), ks_weight)
        }
        StructuralFunction::Compliance => compliance(net, state),
        StructuralFunction::Mass => mass(net),
        StructuralFunction::AverageTemperature { volume } => {
            average_temperature(net, state, volume)
        }
        StructuralFunction::HeatFlux => heat_flux(net, state),
    }
}

fn mass(net: &BarNetwork) -> f64 {
    let mat = net.material();
    net.bars()
        .iter()
        .map(|bar| mat.density * net.thickness_of(bar) * mat.section_width * net.geometry(bar).length)
        .sum()
}

fn compliance(net: &BarNetwork, state: &[f64]) -> f64 {
    if !net.layout().has_displacements() {
        return 0.0;
    }
    net.bars()
        .iter()
        .map(|bar| {
            let geo = net.geometry(bar);
            let du = net.displacement_jump(state, bar);
            net.stiffness(bar, &geo) * dot(&du, &du)
        })
        .sum()
}

fn average_temperature(net: &BarNetwork, state: &[f64], volume: f64) -> f64 {
    let width = net.material().section_width;
    let weighted: f64 = net
        .bars()
        .iter()
        .map(|bar| {
            net.thickness_of(bar) * width * net.geometry(bar).length
                * net.mean_temperature(state, bar)
        })
        .sum();
    weighted / volume
}

/// Bars with exactly one fixed end as `(bar, free node, fixed node)`.
pub(crate) fn boundary_bars(net: &BarNetwork) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
    net.bars().iter().enumerate().filter_map(|(k, bar)| {
        match (net.is_fixed(bar.start), net.is_fixed(bar.end)) {
            (true, false) => Some((k, bar.end, bar.start)),
            (false, true) => Some((k, bar.start, bar.end)),
            _ => None,
        }
    })
}

fn heat_flux(net: &BarNetwork, state: &[f64]) -> f64 {
    if !net.layout().has_temperature {
        return 0.0;
    }
    boundary_bars(net)
        .map(|(k, free, fixed)| {
            let bar = &net.bars()[k];
            let c = net.conductance(bar, &net.geometry(bar));
            c * (net.temperature(state, free) - net.temperature(state, fixed))
        })
        .sum()
}
