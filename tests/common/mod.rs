//! Shared fixtures: a wedge-shaped plate of bars and a serial staggered
//! driver that plays the role of the coupling framework.
//!
//! The "aerodynamic" side is a fixed load case (tip force plus a uniform
//! heat flux), so the coupling adjoint contribution `struct_rhs` stays zero
//! and the structural adjoint alone gives the total derivative.

#![allow(dead_code)]

use std::collections::BTreeMap;

use stagger::model::STRUCTURAL;
use stagger::*;

// ─────────────────────────────────────────────────────────────
//  Wedge plate
// ─────────────────────────────────────────────────────────────

pub const THICKNESS: f64 = 0.015;

/// Bar mesh of a swept, tapered plate.
///
/// `nspan × nchord` nodes; spanwise, chordwise and diagonal bars.  The root
/// row (span index 0) is fixed.  Bars are split into `ncomp` spanwise
/// thickness components.
#[derive(Debug, Clone)]
pub struct Wedge {
    pub nspan: usize,
    pub nchord: usize,
    pub coords: Vec<f64>,
    pub bars: Vec<Bar>,
    pub fixed: Vec<usize>,
    pub ncomp: usize,
}

impl Wedge {
    pub fn new(nspan: usize, nchord: usize, ncomp: usize) -> Self {
        let span = 1.0;
        let root_chord = 0.5;
        let tip_chord = 0.25;
        let sweep = 0.2;

        let node = |i: usize, j: usize| i * nchord + j;
        let mut coords = Vec::with_capacity(3 * nspan * nchord);
        for i in 0..nspan {
            let eta = i as f64 / (nspan - 1) as f64;
            let chord = root_chord + (tip_chord - root_chord) * eta;
            for j in 0..nchord {
                let xi = j as f64 / (nchord - 1) as f64;
                coords.extend_from_slice(&[sweep * eta + chord * xi, span * eta, 0.02 * eta * xi]);
            }
        }

        let component = |i: usize| ((i * ncomp) / (nspan - 1)).min(ncomp - 1);
        let mut bars = Vec::new();
        for i in 0..nspan {
            for j in 0..nchord {
                if i + 1 < nspan {
                    bars.push(Bar { start: node(i, j), end: node(i + 1, j), component: component(i) });
                }
                if j + 1 < nchord {
                    bars.push(Bar { start: node(i, j), end: node(i, j + 1), component: component(i) });
                }
                if i + 1 < nspan && j + 1 < nchord {
                    bars.push(Bar {
                        start: node(i, j),
                        end: node(i + 1, j + 1),
                        component: component(i),
                    });
                }
            }
        }

        let fixed = (0..nchord).map(|j| node(0, j)).collect();
        Self { nspan, nchord, coords, bars, fixed, ncomp }
    }

    pub fn num_nodes(&self) -> usize {
        self.nspan * self.nchord
    }

    pub fn tip_nodes(&self) -> Vec<usize> {
        (0..self.nchord).map(|j| (self.nspan - 1) * self.nchord + j).collect()
    }

    pub fn network(&self, kind: AnalysisKind, thickness: f64) -> Result<BarNetwork> {
        BarNetwork::new(
            kind,
            self.coords.clone(),
            self.bars.clone(),
            &self.fixed,
            vec![thickness; self.ncomp],
            Material::default(),
        )
    }
}

// ─────────────────────────────────────────────────────────────
//  Load case
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct LoadCase {
    /// Force on every tip node (N).
    pub tip_force: [f64; 3],
    /// Heat flux into every node (W).
    pub heat_flux: f64,
}

impl Default for LoadCase {
    fn default() -> Self {
        Self {
            tip_force: [6.0e4, 3.0e4, 2.0e5],
            heat_flux: 15.0,
        }
    }
}

impl LoadCase {
    /// Write the loads onto `body` in transfer layout.
    pub fn apply(&self, wedge: &Wedge, body: &mut Body) {
        if body.struct_nnodes == 0 {
            return;
        }
        body.struct_loads.fill(0.0);
        for node in wedge.tip_nodes() {
            for d in 0..3 {
                body.struct_loads[node * body.xfer_ndof + d] = self.tip_force[d];
            }
        }
        body.struct_heat_flux.fill(self.heat_flux);
    }
}

// ─────────────────────────────────────────────────────────────
//  Serial staggered driver
// ─────────────────────────────────────────────────────────────

pub struct Model<C: Communicator> {
    pub wedge: Wedge,
    pub participant: StructuralParticipant<BarNetwork, C>,
    pub bodies: Vec<Body>,
    pub scenarios: Vec<Scenario>,
    pub load_cases: BTreeMap<usize, LoadCase>,
}

pub fn plate_body(kind: AnalysisKind, ncomp: usize, thickness: f64) -> Body {
    let mut body = Body::new("plate", kind);
    for c in 0..ncomp {
        let name = if ncomp == 1 { "thickness".to_string() } else { format!("thickness_{c}") };
        body.add_variable(
            STRUCTURAL,
            Variable::new(name, thickness).with_bounds(0.001, 0.1),
        );
    }
    body
}

/// One scenario with `functions` in order.
pub fn scenario(name: &str, id: usize, functions: Vec<Function>) -> Scenario {
    let mut scenario = Scenario::new(name, id, 2);
    for f in functions {
        scenario.add_function(f);
    }
    scenario
}

/// Wedge plate, one `thickness` variable, functions `mass` and `ksfailure`.
pub fn wedge_model(kind: AnalysisKind) -> Model<SerialComm> {
    Model::new(
        kind,
        Wedge::new(5, 3, 1),
        SerialComm,
        ParticipantOptions::default(),
        vec![scenario(
            "cruise",
            1,
            vec![Function::structural("mass"), Function::structural("ksfailure")],
        )],
    )
}

impl<C: Communicator> Model<C> {
    pub fn new(
        kind: AnalysisKind,
        wedge: Wedge,
        comm: C,
        options: ParticipantOptions,
        scenarios: Vec<Scenario>,
    ) -> Self {
        let participant = StructuralParticipant::new(kind, comm, options, || {
            wedge.network(kind, THICKNESS)
        })
        .unwrap();
        let bodies = vec![plate_body(kind, wedge.ncomp, THICKNESS)];
        let load_cases = scenarios
            .iter()
            .map(|s| (s.id, LoadCase::default()))
            .collect();
        Self { wedge, participant, bodies, scenarios, load_cases }
    }

    pub fn with_exporter(self, exporter: Box<dyn stagger::export::SolutionExporter>) -> Self {
        Self {
            participant: self.participant.with_exporter(exporter),
            ..self
        }
    }

    pub fn total_functions(&self) -> usize {
        self.scenarios.iter().map(|s| s.count_functions()).sum()
    }

    pub fn set_design(&mut self, x: &[f64]) {
        let vars = self.bodies[0].variables.get_mut(STRUCTURAL).unwrap();
        for (var, &value) in vars.iter_mut().zip(x) {
            var.value = value;
        }
    }

    pub fn design(&self) -> Vec<f64> {
        self.bodies[0]
            .variables_in(STRUCTURAL)
            .iter()
            .map(|v| v.value)
            .collect()
    }

    /// Forward analysis of scenario `idx`: set → initialize → iterate × steps → post → get.
    pub fn forward(&mut self, idx: usize) -> Result<StepOutcome> {
        let load = self.load_cases[&self.scenarios[idx].id];
        let scenario = &mut self.scenarios[idx];
        let p = &mut self.participant;

        p.set_variables(scenario, &mut self.bodies)?;
        p.set_functions(scenario, &mut self.bodies)?;
        let mut outcome = p.initialize(scenario, &mut self.bodies)?;
        if outcome.is_failed() {
            return Ok(outcome);
        }
        for step in 1..=scenario.steps {
            for body in self.bodies.iter_mut() {
                load.apply(&self.wedge, body);
            }
            outcome = p.iterate(scenario, &mut self.bodies, step)?;
            if outcome.is_failed() {
                return Ok(outcome);
            }
        }
        p.post(scenario, &mut self.bodies)?;
        p.get_functions(scenario, &mut self.bodies)?;
        Ok(outcome)
    }

    /// Adjoint analysis of scenario `idx`, gradients written at `offset`.
    pub fn adjoint(&mut self, idx: usize, offset: usize) -> Result<StepOutcome> {
        let scenario = &self.scenarios[idx];
        let p = &mut self.participant;

        p.set_functions(scenario, &mut self.bodies)?;
        let mut outcome = p.initialize_adjoint(scenario, &mut self.bodies)?;
        for body in self.bodies.iter_mut() {
            body.struct_shape_term.fill(0.0);
        }
        for step in 1..=scenario.steps {
            outcome = p.iterate_adjoint(scenario, &mut self.bodies, step)?;
            if outcome.is_failed() {
                return Ok(outcome);
            }
        }
        p.post_adjoint(scenario, &mut self.bodies)?;
        p.get_coordinate_derivatives(scenario, &mut self.bodies, scenario.steps)?;
        p.get_function_gradients(scenario, &mut self.bodies, offset)?;
        Ok(outcome)
    }

    /// Objective = first function, constraints = every other function.
    /// A failed analysis reports zeros and `fail = 1`.
    pub fn eval_objcon(&mut self, x: &[f64]) -> Result<(f64, Vec<f64>, i32)> {
        self.set_design(x);
        for idx in 0..self.scenarios.len() {
            if self.forward(idx)?.is_failed() {
                return Ok((0.0, vec![0.0; self.total_functions() - 1], 1));
            }
        }
        let mut values = self
            .scenarios
            .iter()
            .flat_map(|s| s.functions.iter().map(|f| f.value));
        let obj = values.next().unwrap_or(0.0);
        Ok((obj, values.collect(), 0))
    }

    /// Gradients of every function (scenario order) w.r.t. the design vector.
    pub fn eval_objcon_grad(&mut self) -> Result<Vec<Vec<f64>>> {
        let nfunc = self.total_functions();
        for body in self.bodies.iter_mut() {
            body.allocate_derivatives(nfunc);
        }
        let mut offset = 0;
        for idx in 0..self.scenarios.len() {
            self.adjoint(idx, offset)?;
            offset += self.scenarios[idx].count_functions();
        }
        Ok(self.bodies[0].derivatives[STRUCTURAL].clone())
    }

    /// Every function value across scenarios.
    pub fn values(&self) -> Vec<f64> {
        self.scenarios
            .iter()
            .flat_map(|s| s.functions.iter().map(|f| f.value))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────
//  Comparison helpers
// ─────────────────────────────────────────────────────────────

/// Relative error scaled by the larger magnitude, absolute below `floor`.
pub fn rel_err(a: f64, b: f64, floor: f64) -> f64 {
    (a - b).abs() / a.abs().max(b.abs()).max(floor)
}
