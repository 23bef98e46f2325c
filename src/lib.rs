//! **stagger**: structural discipline participant for staggered
//! aeroelastic / aerothermal coupling with discrete-adjoint gradients.
//!
//! The crate covers one discipline of a partitioned multiphysics solve:
//!
//! 1. **Model layer** (`model`): design variables, functions, bodies, scenarios.
//! 2. **Assembly boundary** (`assembler`): the trait a finite-element library
//!    implements; `structure` provides a thermo-elastic bar network.
//! 3. **Linear algebra** (`linalg`): sparse LDLᵀ or dense LU, factor once and
//!    solve many times.
//! 4. **Functions and derivatives** (`functions`, `gradients`).
//! 5. **Participant** (`participant`): the forward/adjoint state machine a
//!    coupling driver steps through, with owner/non-owner roles over a
//!    `comm::Communicator`.

pub mod types;
pub mod model;
pub mod comm;
pub mod linalg;
pub mod assembler;
pub mod structure;
pub mod functions;
pub mod gradients;
pub mod export;
pub mod participant;

pub use assembler::StructuralAssembler;
pub use comm::{Communicator, ProcessRole, SerialComm, ThreadComm};
pub use model::{Body, Function, FunctionDomain, Scenario, Variable, VariableUpdate};
pub use participant::{DisciplineParticipant, StructuralParticipant};
pub use structure::{Bar, BarNetwork, Material};
pub use types::{
    AnalysisKind, CouplingError, FunctionTag, ParticipantOptions, Result, StepOutcome,
};
