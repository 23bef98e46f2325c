//! Structural discipline participant for a staggered coupled analysis.
//!
//! The driver calls the [`DisciplineParticipant`] operations in a fixed
//! order per scenario:
//!
//!   forward:  initialize → iterate × N → post
//!   adjoint:  initialize_adjoint → iterate_adjoint × N → post_adjoint
//!
//! Owner processes hold the assembler, the state vector and the factored
//! system.  Non-owners only reset their coupling outputs and take part in
//! broadcasts, so every value observable outside the discipline is
//! identical on all ranks.

use crate::assembler::StructuralAssembler;
use crate::comm::{Communicator, ProcessRole, ROOT};
use crate::export::{SolutionExporter, SolutionView};
use crate::functions::{classify, StructuralFunction};
use crate::linalg::{gather, scatter, scatter_add, FactorisationStrategy, LinearSystem};
use crate::model::{Body, Scenario, STRUCTURAL};
use crate::types::{
    AnalysisKind, CouplingError, FieldLayout, FunctionTag, Lifecycle, ParticipantOptions, Result,
    StepOutcome,
};
use ndarray::Array2;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────
//  Contract
// ─────────────────────────────────────────────────────────────

pub trait DisciplineParticipant {
    /// Push `body.struct_x` into the discipline and re-factor.
    fn set_mesh(&mut self, body: &Body) -> Result<()>;

    /// Publish the discipline's node count and coordinates onto `body`.
    fn get_mesh(&self, body: &mut Body);

    fn set_variables(&mut self, scenario: &Scenario, bodies: &mut [Body]) -> Result<()>;

    fn set_functions(&mut self, scenario: &Scenario, bodies: &mut [Body]) -> Result<()>;

    fn get_functions(&mut self, scenario: &mut Scenario, bodies: &mut [Body]) -> Result<()>;

    fn initialize(&mut self, scenario: &Scenario, bodies: &mut [Body]) -> Result<StepOutcome>;

    fn iterate(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
        step: usize,
    ) -> Result<StepOutcome>;

    fn post(&mut self, scenario: &Scenario, bodies: &mut [Body]) -> Result<()>;

    fn initialize_adjoint(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
    ) -> Result<StepOutcome>;

    fn iterate_adjoint(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
        step: usize,
    ) -> Result<StepOutcome>;

    fn post_adjoint(&mut self, scenario: &Scenario, bodies: &mut [Body]) -> Result<()>;

    fn eval_gradients(&mut self, scenario: &Scenario, bodies: &mut [Body]) -> Result<()>;

    fn get_coordinate_derivatives(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
        step: usize,
    ) -> Result<()>;

    /// Copy gradients into `body.derivatives["structural"][offset + ifunc]`.
    fn get_function_gradients(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
        offset: usize,
    ) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────
//  Owner state
// ─────────────────────────────────────────────────────────────

/// Evaluator plus its adjoint policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaggedFunction {
    pub evaluator: StructuralFunction,
    pub tag: FunctionTag,
}

/// Everything only an owner process holds.
struct OwnerState<A> {
    assembler: A,
    state: Vec<f64>,
    system: LinearSystem,
    functions: Vec<TaggedFunction>,
    /// Adjoint seed per function (negated ∂f/∂state, or zero).
    svsens: Vec<Vec<f64>>,
    /// Structural adjoint, one column per function.
    adjoint: Array2<f64>,
    /// `gradients[function][design variable]`
    gradients: Vec<Vec<f64>>,
    /// Converged forward state per scenario id.
    snapshots: BTreeMap<usize, Vec<f64>>,
    exporter: Option<Box<dyn SolutionExporter>>,
}

enum Role<A> {
    Owner(Box<OwnerState<A>>),
    NonOwner,
}

impl<A: StructuralAssembler> OwnerState<A> {
    fn refactor(&mut self, kind: AnalysisKind, transposed: bool) -> Result<()> {
        let matrix = self.assembler.assemble_jacobian(transposed);
        debug!(%kind, transposed, dim = matrix.rows(), nnz = matrix.nnz(), "factoring jacobian");
        self.system
            .factor(matrix, FactorisationStrategy::for_kind(kind), transposed)
    }

    fn evaluators(&self) -> Vec<StructuralFunction> {
        self.functions.iter().map(|f| f.evaluator).collect()
    }

    fn require_functions(&self, nfunctions: usize) -> Result<()> {
        if self.functions.len() != nfunctions {
            return Err(CouplingError::FunctionsNotSet);
        }
        Ok(())
    }

    /// Adjoint right-hand side for function `ifunc`: the state seed plus
    /// every body's transferred contribution, zeroed at Dirichlet dofs.
    fn adjoint_rhs(&self, layout: FieldLayout, bodies: &[Body], ifunc: usize) -> Result<Vec<f64>> {
        let ndof = layout.dof_per_node();
        let nnodes = self.assembler.num_nodes();
        let mut rhs = self
            .svsens
            .get(ifunc)
            .cloned()
            .ok_or(CouplingError::FunctionsNotSet)?;

        for body in bodies {
            check_adjoint_buffers(body, nnodes, ifunc)?;
            for node in 0..nnodes {
                for d in 0..layout.displacement_dof {
                    rhs[node * ndof + d] += body.struct_rhs[[node * body.xfer_ndof + d, ifunc]];
                }
                if let Some(ti) = layout.thermal_index() {
                    rhs[node * ndof + ti] += body.struct_rhs_t[[node * body.therm_xfer_ndof, ifunc]];
                }
            }
        }

        self.assembler.apply_bcs(&mut rhs);
        Ok(rhs)
    }
}

fn check_adjoint_buffers(body: &Body, nnodes: usize, ifunc: usize) -> Result<()> {
    let rows = nnodes * body.xfer_ndof;
    let thermal_rows = nnodes * body.therm_xfer_ndof;
    let ok = [&body.struct_rhs, &body.psi_s]
        .iter()
        .all(|a| a.nrows() >= rows && a.ncols() > ifunc)
        && [&body.struct_rhs_t, &body.psi_t_s]
            .iter()
            .all(|a| a.nrows() >= thermal_rows && a.ncols() > ifunc);
    if ok {
        Ok(())
    } else {
        Err(CouplingError::Shape(format!(
            "body '{}' adjoint buffers do not cover {nnodes} nodes and function {ifunc}",
            body.name
        )))
    }
}

fn all_finite(v: &[f64]) -> bool {
    v.iter().all(|x| x.is_finite())
}

// ─────────────────────────────────────────────────────────────
//  Participant
// ─────────────────────────────────────────────────────────────

pub struct StructuralParticipant<A, C> {
    kind: AnalysisKind,
    layout: FieldLayout,
    options: ParticipantOptions,
    comm: C,
    role: Role<A>,
    lifecycle: Lifecycle,
}

impl<A: StructuralAssembler, C: Communicator> StructuralParticipant<A, C> {
    /// Build the participant for this process.
    ///
    /// `build` is only called on owner ranks; its assembler is checked
    /// against the layout of `kind` and its Jacobian is factored immediately.
    pub fn new<F>(kind: AnalysisKind, comm: C, options: ParticipantOptions, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<A>,
    {
        let layout = kind.layout();
        let role = match ProcessRole::assign(comm.rank(), options.owner_procs) {
            ProcessRole::Owner => {
                let assembler = build()?;
                if assembler.vars_per_node() != layout.dof_per_node() {
                    return Err(CouplingError::LayoutMismatch {
                        kind,
                        expected: layout.dof_per_node(),
                        found: assembler.vars_per_node(),
                    });
                }
                let mut state = vec![0.0; assembler.num_state_vars()];
                assembler.set_bcs(&mut state);
                let mut owner = Box::new(OwnerState {
                    assembler,
                    state,
                    system: LinearSystem::new(),
                    functions: Vec::new(),
                    svsens: Vec::new(),
                    adjoint: Array2::zeros((0, 0)),
                    gradients: Vec::new(),
                    snapshots: BTreeMap::new(),
                    exporter: None,
                });
                owner.refactor(kind, false)?;
                Role::Owner(owner)
            }
            ProcessRole::NonOwner => Role::NonOwner,
        };

        info!(
            %kind,
            rank = comm.rank(),
            owner = matches!(role, Role::Owner(_)),
            "structural participant created"
        );

        Ok(Self {
            kind,
            layout,
            options,
            comm,
            role,
            lifecycle: Lifecycle::Uninitialized,
        })
    }

    /// Attach a solution exporter.  Ignored on non-owners.
    pub fn with_exporter(mut self, exporter: Box<dyn SolutionExporter>) -> Self {
        if let Role::Owner(owner) = &mut self.role {
            owner.exporter = Some(exporter);
        }
        self
    }

    pub fn kind(&self) -> AnalysisKind {
        self.kind
    }

    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    pub fn options(&self) -> &ParticipantOptions {
        &self.options
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn role(&self) -> ProcessRole {
        match self.role {
            Role::Owner(_) => ProcessRole::Owner,
            Role::NonOwner => ProcessRole::NonOwner,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn assembler(&self) -> Option<&A> {
        self.owner().map(|o| &o.assembler)
    }

    /// Current discipline state on owners.
    pub fn state(&self) -> Option<&[f64]> {
        self.owner().map(|o| o.state.as_slice())
    }

    pub fn functions(&self) -> Option<&[TaggedFunction]> {
        self.owner().map(|o| o.functions.as_slice())
    }

    /// Total gradients from the last `eval_gradients`, per function.
    pub fn gradients(&self) -> Option<&[Vec<f64>]> {
        self.owner().map(|o| o.gradients.as_slice())
    }

    /// Stored adjoint for `ifunc`.
    pub fn adjoint(&self, ifunc: usize) -> Option<Vec<f64>> {
        self.owner()
            .filter(|o| ifunc < o.adjoint.ncols())
            .map(|o| o.adjoint.column(ifunc).to_vec())
    }

    pub fn snapshot(&self, scenario_id: usize) -> Option<&[f64]> {
        self.owner()
            .and_then(|o| o.snapshots.get(&scenario_id))
            .map(Vec::as_slice)
    }

    pub fn discard_snapshot(&mut self, scenario_id: usize) -> Option<Vec<f64>> {
        self.owner_mut()
            .and_then(|o| o.snapshots.remove(&scenario_id))
    }

    /// Boundary-conditioned adjoint right-hand side that `iterate_adjoint`
    /// would solve for `ifunc`.  `None` on non-owners.
    pub fn adjoint_rhs(&self, bodies: &[Body], ifunc: usize) -> Result<Option<Vec<f64>>> {
        match self.owner() {
            Some(owner) => owner.adjoint_rhs(self.layout, bodies, ifunc).map(Some),
            None => Ok(None),
        }
    }

    fn owner(&self) -> Option<&OwnerState<A>> {
        match &self.role {
            Role::Owner(owner) => Some(&**owner),
            Role::NonOwner => None,
        }
    }

    fn owner_mut(&mut self) -> Option<&mut OwnerState<A>> {
        match &mut self.role {
            Role::Owner(owner) => Some(&mut **owner),
            Role::NonOwner => None,
        }
    }

    fn check_bodies(&self, bodies: &[Body]) -> Result<()> {
        let first = bodies.first().ok_or(CouplingError::NoBodies)?;
        if first.analysis_kind != self.kind {
            return Err(CouplingError::KindMismatch {
                expected: self.kind,
                found: first.analysis_kind,
            });
        }
        for body in bodies {
            if body.xfer_ndof < self.layout.displacement_dof {
                return Err(CouplingError::Shape(format!(
                    "body '{}' transfers {} displacement components per node, {} analysis needs {}",
                    body.name, body.xfer_ndof, self.kind, self.layout.displacement_dof
                )));
            }
            if self.layout.has_temperature && body.therm_xfer_ndof == 0 {
                return Err(CouplingError::Shape(format!(
                    "body '{}' transfers no temperature, {} analysis needs one per node",
                    body.name, self.kind
                )));
            }
        }
        Ok(())
    }

    fn require_initialized(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Initialized => Ok(()),
            Lifecycle::Uninitialized => Err(CouplingError::NotInitialized),
        }
    }

    /// Write the solved fields onto every body, or zero them on non-owners.
    fn publish_fields(&self, bodies: &mut [Body]) {
        let ndof = self.layout.dof_per_node();
        match self.owner() {
            Some(owner) => {
                for body in bodies.iter_mut() {
                    for d in 0..self.layout.displacement_dof {
                        scatter(&mut body.struct_disps, d, body.xfer_ndof, gather(&owner.state, d, ndof));
                    }
                    if let Some(ti) = self.layout.thermal_index() {
                        scatter(
                            &mut body.struct_temps,
                            0,
                            body.therm_xfer_ndof,
                            gather(&owner.state, ti, ndof),
                        );
                    }
                }
            }
            None => {
                for body in bodies.iter_mut() {
                    if self.layout.has_displacements() {
                        body.struct_disps.fill(0.0);
                    }
                    if self.layout.has_temperature {
                        body.struct_temps.fill(0.0);
                    }
                }
            }
        }
    }

    /// Design vector from every structural variable of all bodies, active
    /// or not.
    fn design_vector(bodies: &[Body]) -> Vec<f64> {
        bodies
            .iter()
            .flat_map(|body| body.variables_in(STRUCTURAL))
            .map(|var| var.value)
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────
//  Operations
// ─────────────────────────────────────────────────────────────

impl<A: StructuralAssembler, C: Communicator> DisciplineParticipant for StructuralParticipant<A, C> {
    fn set_mesh(&mut self, body: &Body) -> Result<()> {
        let kind = self.kind;
        if let Some(owner) = self.owner_mut() {
            owner.assembler.set_nodes(&body.struct_x)?;
            owner.refactor(kind, false)?;
        }
        Ok(())
    }

    fn get_mesh(&self, body: &mut Body) {
        match self.owner() {
            Some(owner) => {
                body.struct_nnodes = owner.assembler.num_nodes();
                body.struct_x = owner.assembler.nodes().to_vec();
                body.t_ref = owner.assembler.reference_temperature();
            }
            None => {
                body.struct_nnodes = 0;
                body.struct_x = Vec::new();
            }
        }
    }

    fn set_variables(&mut self, _scenario: &Scenario, bodies: &mut [Body]) -> Result<()> {
        self.check_bodies(bodies)?;
        let x = Self::design_vector(bodies);
        let kind = self.kind;
        if let Some(owner) = self.owner_mut() {
            owner.assembler.set_design_vars(&x)?;
            if kind.refactors_on_set_variables() {
                owner.refactor(kind, false)?;
            }
            debug!(nvars = x.len(), "design variables updated");
        }
        Ok(())
    }

    fn set_functions(&mut self, scenario: &Scenario, bodies: &mut [Body]) -> Result<()> {
        self.check_bodies(bodies)?;
        let layout = self.layout;
        let options = self.options.clone();
        if let Some(owner) = self.owner_mut() {
            owner.functions = scenario
                .functions
                .iter()
                .map(|func| {
                    let (evaluator, tag) = classify(func, layout, &options);
                    TaggedFunction { evaluator, tag }
                })
                .collect();
            debug!(
                scenario = %scenario.name,
                nfunctions = owner.functions.len(),
                "structural functions set"
            );
        }
        Ok(())
    }

    fn get_functions(&mut self, scenario: &mut Scenario, _bodies: &mut [Body]) -> Result<()> {
        if let Some(owner) = self.owner() {
            owner.require_functions(scenario.functions.len())?;
            let values = owner
                .assembler
                .eval_functions(&owner.evaluators(), &owner.state);
            for (func, value) in scenario.functions.iter_mut().zip(values) {
                if func.is_structural() {
                    func.value = value;
                }
            }
        }

        // Every rank joins every broadcast, structural or not.
        for func in scenario.functions.iter_mut() {
            self.comm.broadcast_scalar(&mut func.value, ROOT)?;
        }
        Ok(())
    }

    fn initialize(&mut self, scenario: &Scenario, bodies: &mut [Body]) -> Result<StepOutcome> {
        self.check_bodies(bodies)?;
        let kind = self.kind;

        let mesh_pushed = match self.lifecycle {
            Lifecycle::Uninitialized => {
                for body in bodies.iter_mut() {
                    self.get_mesh(body);
                    body.allocate_coupling();
                }
                self.lifecycle = Lifecycle::Initialized;
                debug!(scenario = %scenario.name, "first initialization, mesh pulled");
                false
            }
            Lifecycle::Initialized => {
                if let Some(owner) = self.owner_mut() {
                    for body in bodies.iter() {
                        owner.assembler.set_nodes(&body.struct_x)?;
                    }
                }
                for body in bodies.iter_mut() {
                    body.allocate_coupling();
                }
                true
            }
        };

        if let Some(owner) = self.owner_mut() {
            if mesh_pushed || kind.factors_on_initialize() {
                owner.refactor(kind, false)?;
            }
            if kind.factors_on_initialize() {
                owner.state.fill(0.0);
                owner.assembler.set_bcs(&mut owner.state);
            }
        }

        Ok(StepOutcome::Success)
    }

    fn iterate(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
        step: usize,
    ) -> Result<StepOutcome> {
        self.check_bodies(bodies)?;
        self.require_initialized()?;
        let kind = self.kind;
        let layout = self.layout;
        let ndof = layout.dof_per_node();

        let mut outcome = StepOutcome::Success;
        if let Some(owner) = self.owner_mut() {
            if owner.system.is_transposed() {
                owner.refactor(kind, false)?;
            }

            owner.assembler.set_bcs(&mut owner.state);
            let mut res = owner.assembler.assemble_residual(&owner.state);

            let mut ext = vec![0.0; res.len()];
            for body in bodies.iter() {
                for d in 0..layout.displacement_dof {
                    scatter_add(&mut ext, d, ndof, gather(&body.struct_loads, d, body.xfer_ndof));
                }
                if let Some(ti) = layout.thermal_index() {
                    scatter_add(
                        &mut ext,
                        ti,
                        ndof,
                        gather(&body.struct_heat_flux, 0, body.therm_xfer_ndof),
                    );
                }
            }
            owner.assembler.apply_bcs(&mut ext);

            for (r, f) in res.iter_mut().zip(&ext) {
                *r -= f;
            }
            owner.assembler.apply_bcs(&mut res);

            let update = owner.system.solve(&res)?;
            for (s, du) in owner.state.iter_mut().zip(&update) {
                *s -= du;
            }
            owner.assembler.set_bcs(&mut owner.state);

            if !all_finite(&owner.state) {
                warn!(scenario = %scenario.name, step, "forward solve produced non-finite state");
                outcome = StepOutcome::Failed;
            }
            debug!(scenario = %scenario.name, step, "structural forward step");
        }

        self.publish_fields(bodies);
        Ok(outcome)
    }

    fn post(&mut self, scenario: &Scenario, _bodies: &mut [Body]) -> Result<()> {
        let kind = self.kind;
        if let Some(owner) = self.owner_mut() {
            owner.snapshots.insert(scenario.id, owner.state.clone());

            if let Some(exporter) = owner.exporter.as_mut() {
                let view = SolutionView {
                    scenario: &scenario.name,
                    scenario_id: scenario.id,
                    kind,
                    vars_per_node: owner.assembler.vars_per_node(),
                    nodes: owner.assembler.nodes(),
                    state: &owner.state,
                };
                if let Err(e) = exporter.export(&view) {
                    warn!(scenario = %scenario.name, error = %e, "solution export failed");
                }
            }
        }
        Ok(())
    }

    fn initialize_adjoint(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
    ) -> Result<StepOutcome> {
        self.check_bodies(bodies)?;
        self.require_initialized()?;
        let kind = self.kind;
        let nfunctions = scenario.functions.len();

        for body in bodies.iter_mut() {
            let sized = body.psi_s.dim() == (body.struct_nnodes * body.xfer_ndof, nfunctions)
                && body.psi_t_s.dim() == (body.struct_nnodes * body.therm_xfer_ndof, nfunctions);
            if !sized {
                debug!(body = %body.name, nfunctions, "allocating adjoint buffers");
                body.allocate_adjoint(nfunctions);
            }
        }

        if let Some(owner) = self.owner_mut() {
            owner.require_functions(nfunctions)?;
            let snapshot = owner
                .snapshots
                .get(&scenario.id)
                .ok_or(CouplingError::MissingSnapshot(scenario.id))?;
            owner.state.copy_from_slice(snapshot);

            // Refresh any function-dependent caches in the assembler.
            owner
                .assembler
                .eval_functions(&owner.evaluators(), &owner.state);

            if !kind.jacobian_is_symmetric() {
                owner.refactor(kind, true)?;
            }

            let nstate = owner.state.len();
            owner.svsens = vec![vec![0.0; nstate]; nfunctions];
            owner.adjoint = Array2::zeros((nstate, nfunctions));
            for (ifunc, func) in owner.functions.iter().enumerate() {
                if func.tag == FunctionTag::NonStructural {
                    break;
                }
                let seed = &mut owner.svsens[ifunc];
                owner
                    .assembler
                    .add_sv_sens(&func.evaluator, &owner.state, seed);
                let scale = func.tag.seed_scale();
                seed.iter_mut().for_each(|v| *v *= scale);
            }
        }

        self.publish_fields(bodies);
        Ok(StepOutcome::Success)
    }

    fn iterate_adjoint(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
        step: usize,
    ) -> Result<StepOutcome> {
        self.check_bodies(bodies)?;
        self.require_initialized()?;
        let layout = self.layout;
        let ndof = layout.dof_per_node();

        for body in bodies.iter_mut() {
            if layout.has_displacements() {
                body.psi_s.fill(0.0);
            }
            if layout.has_temperature {
                body.psi_t_s.fill(0.0);
            }
        }

        let mut outcome = StepOutcome::Success;
        if let Some(owner) = self.owner_mut() {
            owner.require_functions(scenario.functions.len())?;
            let nnodes = owner.assembler.num_nodes();

            for ifunc in 0..owner.functions.len() {
                if owner.functions[ifunc].tag == FunctionTag::NonStructural {
                    break;
                }
                let rhs = owner.adjoint_rhs(layout, bodies, ifunc)?;
                let psi = owner.system.solve(&rhs)?;
                if !all_finite(&psi) {
                    warn!(scenario = %scenario.name, step, ifunc, "adjoint solve produced non-finite values");
                    outcome = StepOutcome::Failed;
                }

                owner
                    .adjoint
                    .column_mut(ifunc)
                    .iter_mut()
                    .zip(&psi)
                    .for_each(|(a, p)| *a = *p);

                for body in bodies.iter_mut() {
                    for node in 0..nnodes {
                        for d in 0..layout.displacement_dof {
                            body.psi_s[[node * body.xfer_ndof + d, ifunc]] = psi[node * ndof + d];
                        }
                        if let Some(ti) = layout.thermal_index() {
                            body.psi_t_s[[node * body.therm_xfer_ndof, ifunc]] = psi[node * ndof + ti];
                        }
                    }
                }
            }
            debug!(scenario = %scenario.name, step, "structural adjoint step");
        }

        Ok(outcome)
    }

    fn post_adjoint(&mut self, scenario: &Scenario, bodies: &mut [Body]) -> Result<()> {
        if self.owner().is_some() {
            self.eval_gradients(scenario, bodies)?;
        }
        self.discard_snapshot(scenario.id);
        Ok(())
    }

    fn eval_gradients(&mut self, scenario: &Scenario, _bodies: &mut [Body]) -> Result<()> {
        if let Some(owner) = self.owner_mut() {
            owner.require_functions(scenario.functions.len())?;
            let ndv = owner.assembler.num_design_vars();
            let mut gradients = Vec::with_capacity(owner.functions.len());

            for (ifunc, func) in owner.functions.iter().enumerate() {
                let mut grad = vec![0.0; ndv];
                if func.tag != FunctionTag::NonStructural {
                    owner
                        .assembler
                        .add_dv_sens(&func.evaluator, &owner.state, &mut grad);
                    if ifunc < owner.adjoint.ncols() {
                        let psi = owner.adjoint.column(ifunc).to_vec();
                        owner
                            .assembler
                            .add_adjoint_res_product(&psi, &owner.state, &mut grad);
                    }
                }
                gradients.push(grad);
            }
            owner.gradients = gradients;
        }
        Ok(())
    }

    fn get_coordinate_derivatives(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
        step: usize,
    ) -> Result<()> {
        let Some(owner) = self.owner() else {
            return Ok(());
        };
        owner.require_functions(scenario.functions.len())?;
        let ncoords = owner.assembler.nodes().len();

        for body in bodies.iter_mut().filter(|b| b.shape) {
            if body.struct_shape_term.dim() != (ncoords, owner.functions.len()) {
                return Err(CouplingError::Shape(format!(
                    "body '{}' shape term is {:?}, expected ({ncoords}, {})",
                    body.name,
                    body.struct_shape_term.dim(),
                    owner.functions.len()
                )));
            }

            for (ifunc, func) in owner.functions.iter().enumerate() {
                if func.tag == FunctionTag::NonStructural {
                    continue;
                }
                let mut term = vec![0.0; ncoords];
                owner
                    .assembler
                    .add_xpt_sens(&func.evaluator, &owner.state, &mut term);
                if ifunc < owner.adjoint.ncols() {
                    let psi = owner.adjoint.column(ifunc).to_vec();
                    owner
                        .assembler
                        .add_adjoint_res_xpt_sens_product(&psi, &owner.state, &mut term);
                }
                body.struct_shape_term
                    .column_mut(ifunc)
                    .iter_mut()
                    .zip(&term)
                    .for_each(|(s, t)| *s += t);
            }
        }
        debug!(scenario = %scenario.name, step, "coordinate derivatives accumulated");
        Ok(())
    }

    fn get_function_gradients(
        &mut self,
        scenario: &Scenario,
        bodies: &mut [Body],
        offset: usize,
    ) -> Result<()> {
        let nfunctions = scenario.functions.len();
        for ifunc in 0..nfunctions {
            let mut dv_index = 0;
            for body in bodies.iter_mut() {
                let active: Vec<bool> = body
                    .variables_in(STRUCTURAL)
                    .iter()
                    .map(|v| v.active)
                    .collect();

                let rows = body.derivatives.entry(STRUCTURAL.to_string()).or_default();
                if rows.len() < offset + nfunctions {
                    rows.resize(offset + nfunctions, vec![0.0; active.len()]);
                }
                let row = &mut rows[offset + ifunc];
                if row.len() < active.len() {
                    row.resize(active.len(), 0.0);
                }

                // Inactive variables still own a design-vector slot.
                for (i, is_active) in active.into_iter().enumerate() {
                    let index = dv_index;
                    dv_index += 1;
                    if !is_active {
                        continue;
                    }
                    let mut value = self
                        .owner()
                        .and_then(|o| o.gradients.get(ifunc))
                        .and_then(|g| g.get(index))
                        .copied()
                        .unwrap_or(0.0);
                    self.comm.broadcast_scalar(&mut value, ROOT)?;
                    row[i] = value;
                }
            }
        }
        Ok(())
    }
}
