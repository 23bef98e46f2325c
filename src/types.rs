use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// These are faults: a failed factorization or a missing snapshot aborts the
/// call.  A discipline that merely fails to produce a usable solution reports
/// [`StepOutcome::Failed`] instead.
#[derive(Debug, Error)]
pub enum CouplingError {
    /// Sparse factorization failure (singular / not-SPD matrix, etc.).
    #[error("linear algebra error: {0}")]
    Linalg(#[from] sprs::errors::LinalgError),
    /// Zero pivot in the dense LU path.
    #[error("singular matrix: zero pivot in column {column}")]
    SingularPivot { column: usize },
    /// The system has not been assembled and factored yet.
    #[error("factorization not computed (assemble and factor the system first)")]
    MissingFactorization,
    /// `initialize_adjoint` was called for a scenario whose forward pass was
    /// never posted.
    #[error("no forward snapshot stored for scenario {0}")]
    MissingSnapshot(usize),
    #[error("operation requires at least one body")]
    NoBodies,
    /// A step was requested before the first `initialize`.
    #[error("participant has not been initialized")]
    NotInitialized,
    /// Adjoint or gradient work requested before `set_functions`.
    #[error("structural functions have not been set")]
    FunctionsNotSet,
    /// The assembler's per-node layout does not match the analysis kind.
    #[error("{kind} analysis expects {expected} dof per node, assembler has {found}")]
    LayoutMismatch {
        kind: AnalysisKind,
        expected: usize,
        found: usize,
    },
    /// Bodies were built for a different analysis kind than the participant.
    #[error("participant runs {expected} analysis, body declares {found}")]
    KindMismatch {
        expected: AnalysisKind,
        found: AnalysisKind,
    },
    /// Shape mismatch in input data.
    #[error("shape error: {0}")]
    Shape(String),
    /// Collective communication failed (a peer disappeared).
    #[error("communicator error: {0}")]
    Comm(String),
}

pub type Result<T> = std::result::Result<T, CouplingError>;

// ─────────────────────────────────────────────────────────────
//  Constants
// ─────────────────────────────────────────────────────────────

pub const DEFAULT_KS_WEIGHT: f64 = 50.0;

/// Displacement components carried per node by the transfer layer.
pub const DISPLACEMENT_DOF: usize = 3;

// ─────────────────────────────────────────────────────────────
//  Analysis kind
// ─────────────────────────────────────────────────────────────

/// Which physical fields a coupled analysis exchanges with the structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    /// Heat flux in, temperatures out.
    Aerothermal,
    /// Loads and heat flux in, displacements and temperatures out.
    Aerothermoelastic,
    /// Loads in, displacements out.
    Aeroelastic,
}

impl AnalysisKind {
    pub fn layout(self) -> FieldLayout {
        FieldLayout::for_kind(self)
    }

    /// Temperature–deformation coupling makes the thermo-elastic Jacobian
    /// non-symmetric, so its adjoint needs the transposed system.
    pub fn jacobian_is_symmetric(self) -> bool {
        !matches!(self, Self::Aerothermoelastic)
    }

    /// Whether `set_variables` re-assembles and re-factors the system.
    pub fn refactors_on_set_variables(self) -> bool {
        !matches!(self, Self::Aerothermoelastic)
    }

    /// Whether `initialize` assembles, factors and resets the state.
    pub fn factors_on_initialize(self) -> bool {
        matches!(self, Self::Aerothermoelastic)
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aerothermal => "aerothermal",
            Self::Aerothermoelastic => "aerothermoelastic",
            Self::Aeroelastic => "aeroelastic",
        };
        f.write_str(name)
    }
}

/// Per-node layout of the discipline state vector.
///
/// Displacement components come first, the temperature (if any) is the last
/// entry of each node block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub displacement_dof: usize,
    pub has_temperature: bool,
}

impl FieldLayout {
    pub fn for_kind(kind: AnalysisKind) -> Self {
        match kind {
            AnalysisKind::Aerothermal => Self {
                displacement_dof: 0,
                has_temperature: true,
            },
            AnalysisKind::Aerothermoelastic => Self {
                displacement_dof: DISPLACEMENT_DOF,
                has_temperature: true,
            },
            AnalysisKind::Aeroelastic => Self {
                displacement_dof: DISPLACEMENT_DOF,
                has_temperature: false,
            },
        }
    }

    pub fn dof_per_node(&self) -> usize {
        self.displacement_dof + usize::from(self.has_temperature)
    }

    /// Offset of the temperature entry within a node block.
    pub fn thermal_index(&self) -> Option<usize> {
        self.has_temperature.then_some(self.displacement_dof)
    }

    pub fn has_displacements(&self) -> bool {
        self.displacement_dof > 0
    }
}

// ─────────────────────────────────────────────────────────────
//  Function tags
// ─────────────────────────────────────────────────────────────

/// How a scenario function relates to this discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionTag {
    /// Owned by another discipline; contributes nothing here.
    NonStructural,
    /// Structural, but independent of the state: gradient is the direct term.
    StructuralDirect,
    /// Structural and state dependent: needs an adjoint solve.
    StructuralWithAdjoint,
}

impl FunctionTag {
    pub fn is_structural(self) -> bool {
        !matches!(self, Self::NonStructural)
    }

    /// Scale applied to ∂f/∂u before it seeds the adjoint right-hand side.
    pub fn seed_scale(self) -> f64 {
        match self {
            Self::StructuralWithAdjoint => -1.0,
            Self::StructuralDirect | Self::NonStructural => 0.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Step outcome / lifecycle
// ─────────────────────────────────────────────────────────────

/// Discipline-level result of a forward or adjoint step.
///
/// Returned per process; reducing it across the communicator is the
/// driver's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failed,
}

impl StepOutcome {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
        }
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
}

// ─────────────────────────────────────────────────────────────
//  Participant options
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantOptions {
    /// Number of leading world ranks that hold the structural model.
    pub owner_procs: usize,
    /// KS aggregation weight when a function does not set `ksweight`.
    pub default_ks_weight: f64,
    /// Normalising volume of the average-temperature function.
    pub average_temperature_volume: f64,
}

impl Default for ParticipantOptions {
    fn default() -> Self {
        Self {
            owner_procs: 1,
            default_ks_weight: DEFAULT_KS_WEIGHT,
            average_temperature_volume: 1.0,
        }
    }
}
