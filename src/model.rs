//! Shared model-layer data: design variables, functions, bodies, scenarios.
//!
//! These objects are owned by the coupled model and shared by every
//! discipline and the driver.  The structural participant reads and writes
//! them only through the operations in [`crate::participant`].

use crate::types::AnalysisKind;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Variable / derivative group consumed by the structural discipline.
pub const STRUCTURAL: &str = "structural";

/// Default reference temperature seeded onto bodies (K).
pub const DEFAULT_REFERENCE_TEMPERATURE: f64 = 300.0;

// ─────────────────────────────────────────────────────────────
//  Design variable
// ─────────────────────────────────────────────────────────────

/// Bounded, named scalar design variable.
///
/// `lower <= value <= upper` is expected but not enforced here; keeping the
/// design point feasible is the optimizer's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub scaling: f64,
    pub active: bool,
    pub coupled: bool,
    pub id: usize,
}

impl Default for Variable {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            value: 0.0,
            lower: 0.0,
            upper: 1.0,
            scaling: 1.0,
            active: true,
            coupled: false,
            id: 0,
        }
    }
}

impl Variable {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Overwrite only the fields present in `update`.
    pub fn assign(&mut self, update: VariableUpdate) {
        if let Some(value) = update.value {
            self.value = value;
        }
        if let Some(lower) = update.lower {
            self.lower = lower;
        }
        if let Some(upper) = update.upper {
            self.upper = upper;
        }
        if let Some(scaling) = update.scaling {
            self.scaling = scaling;
        }
        if let Some(active) = update.active {
            self.active = active;
        }
        if let Some(coupled) = update.coupled {
            self.coupled = coupled;
        }
    }
}

/// Partial update for [`Variable::assign`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableUpdate {
    pub value: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub scaling: Option<f64>,
    pub active: Option<bool>,
    pub coupled: Option<bool>,
}

// ─────────────────────────────────────────────────────────────
//  Function of interest
// ─────────────────────────────────────────────────────────────

/// Discipline that owns the evaluation of a [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionDomain {
    Structural,
    Aerodynamic,
}

/// Named scalar objective / constraint.
///
/// `value` is overwritten by every forward evaluation and is identical on all
/// processes once `get_functions` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub analysis_type: FunctionDomain,
    #[serde(default)]
    pub options: BTreeMap<String, f64>,
    #[serde(default)]
    pub value: f64,
    #[serde(default = "default_true")]
    pub adjoint: bool,
    #[serde(default)]
    pub id: usize,
}

fn default_true() -> bool {
    true
}

impl Function {
    pub fn new(name: impl Into<String>, analysis_type: FunctionDomain) -> Self {
        Self {
            name: name.into(),
            analysis_type,
            options: BTreeMap::new(),
            value: 0.0,
            adjoint: true,
            id: 0,
        }
    }

    pub fn structural(name: impl Into<String>) -> Self {
        Self::new(name, FunctionDomain::Structural)
    }

    pub fn with_option(mut self, key: impl Into<String>, value: f64) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn option(&self, key: &str) -> Option<f64> {
        self.options.get(key).copied()
    }

    pub fn is_structural(&self) -> bool {
        self.analysis_type == FunctionDomain::Structural
    }
}

// ─────────────────────────────────────────────────────────────
//  Body
// ─────────────────────────────────────────────────────────────

/// Per-body coupling state, laid out in the transfer layer's node order.
///
/// Flat nodal arrays are strided by `xfer_ndof` (displacement / load
/// components) or `therm_xfer_ndof` (temperature / heat flux).  Adjoint
/// arrays hold one column per scenario function.
#[derive(Debug, Clone)]
pub struct Body {
    pub name: String,
    pub id: usize,
    pub analysis_kind: AnalysisKind,
    /// Enables coordinate (shape) derivatives for this body.
    pub shape: bool,
    pub xfer_ndof: usize,
    pub therm_xfer_ndof: usize,
    pub t_ref: f64,

    pub variables: BTreeMap<String, Vec<Variable>>,
    /// `derivatives[group][function][variable]`
    pub derivatives: BTreeMap<String, Vec<Vec<f64>>>,

    // ── Forward coupling fields ────────────────────────────
    pub struct_nnodes: usize,
    /// Node coordinates, 3 per node.
    pub struct_x: Vec<f64>,
    pub struct_disps: Vec<f64>,
    pub struct_temps: Vec<f64>,
    pub struct_loads: Vec<f64>,
    pub struct_heat_flux: Vec<f64>,

    // ── Adjoint coupling fields (rows × functions) ─────────
    pub psi_s: Array2<f64>,
    pub psi_t_s: Array2<f64>,
    /// Load-transfer adjoint contribution to the structural right-hand side.
    pub struct_rhs: Array2<f64>,
    /// Heat-flux-transfer adjoint contribution to the structural right-hand side.
    pub struct_rhs_t: Array2<f64>,
    /// Accumulated d(function)/d(structural coordinates).
    pub struct_shape_term: Array2<f64>,
}

impl Body {
    pub fn new(name: impl Into<String>, analysis_kind: AnalysisKind) -> Self {
        Self {
            name: name.into(),
            id: 0,
            analysis_kind,
            shape: false,
            xfer_ndof: 3,
            therm_xfer_ndof: 1,
            t_ref: DEFAULT_REFERENCE_TEMPERATURE,
            variables: BTreeMap::new(),
            derivatives: BTreeMap::new(),
            struct_nnodes: 0,
            struct_x: Vec::new(),
            struct_disps: Vec::new(),
            struct_temps: Vec::new(),
            struct_loads: Vec::new(),
            struct_heat_flux: Vec::new(),
            psi_s: Array2::zeros((0, 0)),
            psi_t_s: Array2::zeros((0, 0)),
            struct_rhs: Array2::zeros((0, 0)),
            struct_rhs_t: Array2::zeros((0, 0)),
            struct_shape_term: Array2::zeros((0, 0)),
        }
    }

    pub fn add_variable(&mut self, group: &str, mut var: Variable) {
        let vars = self.variables.entry(group.to_string()).or_default();
        var.id = vars.len() + 1;
        vars.push(var);
    }

    /// Variables in `group`, empty if the body has none.
    pub fn variables_in(&self, group: &str) -> &[Variable] {
        self.variables.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reset the published displacements and temperatures for the current
    /// node count.  Loads and heat flux belong to the other discipline and
    /// are only resized when their length no longer fits.
    pub fn allocate_coupling(&mut self) {
        let n = self.struct_nnodes;
        self.struct_disps = vec![0.0; n * self.xfer_ndof];
        self.struct_temps = vec![self.t_ref; n * self.therm_xfer_ndof];
        fit(&mut self.struct_loads, n * self.xfer_ndof);
        fit(&mut self.struct_heat_flux, n * self.therm_xfer_ndof);
    }

    /// Size the adjoint buffers for `nfunctions` functions.
    pub fn allocate_adjoint(&mut self, nfunctions: usize) {
        let n = self.struct_nnodes;
        self.psi_s = Array2::zeros((n * self.xfer_ndof, nfunctions));
        self.psi_t_s = Array2::zeros((n * self.therm_xfer_ndof, nfunctions));
        self.struct_rhs = Array2::zeros((n * self.xfer_ndof, nfunctions));
        self.struct_rhs_t = Array2::zeros((n * self.therm_xfer_ndof, nfunctions));
        self.struct_shape_term = Array2::zeros((3 * n, nfunctions));
    }

    /// Size `derivatives[group]` for `nfunctions` functions, zero filled.
    pub fn allocate_derivatives(&mut self, nfunctions: usize) {
        let groups: Vec<(String, usize)> = self
            .variables
            .iter()
            .map(|(group, vars)| (group.clone(), vars.len()))
            .collect();
        for (group, nvars) in groups {
            self.derivatives
                .insert(group, vec![vec![0.0; nvars]; nfunctions]);
        }
    }
}

fn fit(buf: &mut Vec<f64>, len: usize) {
    if buf.len() != len {
        *buf = vec![0.0; len];
    }
}

// ─────────────────────────────────────────────────────────────
//  Scenario
// ─────────────────────────────────────────────────────────────

/// One analysis condition: an ordered function list and the id that keys
/// the participant's forward snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub id: usize,
    pub steps: usize,
    pub functions: Vec<Function>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, id: usize, steps: usize) -> Self {
        Self {
            name: name.into(),
            id,
            steps,
            functions: Vec::new(),
        }
    }

    pub fn add_function(&mut self, mut func: Function) {
        func.id = self.functions.len() + 1;
        self.functions.push(func);
    }

    pub fn count_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn count_adjoint_functions(&self) -> usize {
        self.functions.iter().filter(|f| f.adjoint).count()
    }
}
