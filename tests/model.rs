//! Model layer, configuration, function classification and the linear
//! solvers, tested without running a coupled analysis.

use approx::assert_relative_eq;
use sprs::TriMat;
use stagger::functions::{classify, ks_aggregate, softmax_weights, StructuralFunction};
use stagger::linalg::{DenseLu, FactorisationStrategy, LinearSystem};
use stagger::model::STRUCTURAL;
use stagger::*;

// ─────────────────────────────────────────────────────────────
//  Variables and bodies
// ─────────────────────────────────────────────────────────────

#[test]
fn variable_assign_only_touches_given_fields() {
    let mut var = Variable::new("thickness", 0.01).with_bounds(0.001, 0.1);
    var.assign(VariableUpdate {
        value: Some(0.02),
        active: Some(false),
        ..VariableUpdate::default()
    });
    assert_eq!(var.value, 0.02);
    assert!(!var.active);
    assert_eq!(var.lower, 0.001);
    assert_eq!(var.upper, 0.1);
    assert_eq!(var.scaling, 1.0);
}

#[test]
fn body_numbers_variables_and_allocates_buffers() {
    let mut body = Body::new("plate", AnalysisKind::Aerothermoelastic);
    body.add_variable(STRUCTURAL, Variable::new("a", 0.01));
    body.add_variable(STRUCTURAL, Variable::new("b", 0.02));
    let ids: Vec<usize> = body.variables_in(STRUCTURAL).iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(body.variables_in("aerodynamic").is_empty());

    body.struct_nnodes = 4;
    body.allocate_coupling();
    assert_eq!(body.struct_disps.len(), 12);
    assert_eq!(body.struct_loads.len(), 12);
    assert_eq!(body.struct_temps, vec![body.t_ref; 4]);
    assert_eq!(body.struct_heat_flux.len(), 4);

    body.allocate_adjoint(3);
    assert_eq!(body.psi_s.dim(), (12, 3));
    assert_eq!(body.psi_t_s.dim(), (4, 3));
    assert_eq!(body.struct_rhs.dim(), (12, 3));
    assert_eq!(body.struct_rhs_t.dim(), (4, 3));
    assert_eq!(body.struct_shape_term.dim(), (12, 3));
}

#[test]
fn scenario_counts_adjoint_functions() {
    let mut scenario = Scenario::new("cruise", 1, 2);
    scenario.add_function(Function::structural("mass"));
    let mut lift = Function::new("lift", FunctionDomain::Aerodynamic);
    lift.adjoint = false;
    scenario.add_function(lift);
    assert_eq!(scenario.count_functions(), 2);
    assert_eq!(scenario.count_adjoint_functions(), 1);
    assert_eq!(scenario.functions[1].id, 2);
}

// ─────────────────────────────────────────────────────────────
//  Configuration
// ─────────────────────────────────────────────────────────────

#[test]
fn options_deserialize_with_defaults() {
    let options: ParticipantOptions = serde_json::from_str(r#"{ "owner_procs": 4 }"#).unwrap();
    assert_eq!(options.owner_procs, 4);
    assert_eq!(options.default_ks_weight, 50.0);
    assert_eq!(options.average_temperature_volume, 1.0);

    let json = serde_json::to_string(&ParticipantOptions::default()).unwrap();
    let back: ParticipantOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ParticipantOptions::default());
}

#[test]
fn material_deserializes_partially() {
    let mat: Material = serde_json::from_str(r#"{ "density": 7850.0 }"#).unwrap();
    assert_eq!(mat.density, 7850.0);
    assert_eq!(mat.elastic_modulus, Material::default().elastic_modulus);
}

#[test]
fn function_options_survive_serialization() {
    let func = Function::structural("ksfailure").with_option("ksweight", 100.0);
    let json = serde_json::to_string(&func).unwrap();
    let back: Function = serde_json::from_str(&json).unwrap();
    assert_eq!(back.option("ksweight"), Some(100.0));
    assert!(back.is_structural());
}

// ─────────────────────────────────────────────────────────────
//  Layout and classification
// ─────────────────────────────────────────────────────────────

#[test]
fn layouts_per_kind() {
    let thermal = AnalysisKind::Aerothermal.layout();
    assert_eq!(thermal.dof_per_node(), 1);
    assert_eq!(thermal.thermal_index(), Some(0));
    assert!(!thermal.has_displacements());

    let coupled = AnalysisKind::Aerothermoelastic.layout();
    assert_eq!(coupled.dof_per_node(), 4);
    assert_eq!(coupled.thermal_index(), Some(3));

    let elastic = AnalysisKind::Aeroelastic.layout();
    assert_eq!(elastic.dof_per_node(), 3);
    assert_eq!(elastic.thermal_index(), None);

    assert_eq!(FactorisationStrategy::for_kind(AnalysisKind::Aerothermal), FactorisationStrategy::Ldl);
    assert_eq!(FactorisationStrategy::for_kind(AnalysisKind::Aeroelastic), FactorisationStrategy::Ldl);
    assert_eq!(
        FactorisationStrategy::for_kind(AnalysisKind::Aerothermoelastic),
        FactorisationStrategy::Lu
    );
}

#[test]
fn classification_of_function_names() {
    let options = ParticipantOptions::default();
    let elastic = AnalysisKind::Aeroelastic.layout();
    let thermal = AnalysisKind::Aerothermal.layout();

    let (f, tag) = classify(&Function::structural("KSFailure"), elastic, &options);
    assert_eq!(f, StructuralFunction::KsFailure { ks_weight: 50.0 });
    assert_eq!(tag, FunctionTag::StructuralWithAdjoint);

    let weighted = Function::structural("ksfailure").with_option("ksweight", 80.0);
    let (f, _) = classify(&weighted, elastic, &options);
    assert_eq!(f, StructuralFunction::KsFailure { ks_weight: 80.0 });

    let (f, tag) = classify(&Function::structural("mass"), elastic, &options);
    assert_eq!((f, tag), (StructuralFunction::Mass, FunctionTag::StructuralDirect));

    // No temperature field to average.
    let (f, tag) = classify(&Function::structural("temperature"), elastic, &options);
    assert_eq!((f, tag), (StructuralFunction::Mass, FunctionTag::StructuralDirect));
    let (f, tag) = classify(&Function::structural("temperature"), thermal, &options);
    assert_eq!(f, StructuralFunction::AverageTemperature { volume: 1.0 });
    assert_eq!(tag, FunctionTag::StructuralWithAdjoint);

    let (_, tag) = classify(&Function::structural("flutter"), elastic, &options);
    assert_eq!(tag, FunctionTag::StructuralDirect);

    let (_, tag) = classify(&Function::new("cl", FunctionDomain::Aerodynamic), elastic, &options);
    assert_eq!(tag, FunctionTag::NonStructural);
    assert_eq!(FunctionTag::NonStructural.seed_scale(), 0.0);
    assert_eq!(FunctionTag::StructuralDirect.seed_scale(), 0.0);
    assert_eq!(FunctionTag::StructuralWithAdjoint.seed_scale(), -1.0);
}

#[test]
fn ks_bounds_the_maximum() {
    let values = [0.2, 0.5, 0.45];
    let rho = 50.0;
    let ks = ks_aggregate(&values, rho);
    assert!(ks >= 0.5);
    assert!(ks <= 0.5 + (values.len() as f64).ln() / rho);

    let w = softmax_weights(&values, rho);
    assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-14);
    assert!(w[1] > w[2] && w[2] > w[0]);
    assert_eq!(ks_aggregate(&[], rho), 0.0);
}

// ─────────────────────────────────────────────────────────────
//  Linear algebra
// ─────────────────────────────────────────────────────────────

fn matrix(entries: &[(usize, usize, f64)], n: usize) -> sprs::CsMat<f64> {
    let mut tri = TriMat::new((n, n));
    for &(r, c, v) in entries {
        tri.add_triplet(r, c, v);
    }
    tri.to_csc()
}

#[test]
fn dense_lu_solves_unsymmetric_system() {
    // [[0, 2, 1], [1, 1, 0], [3, 0, 1]] needs pivoting in the first column.
    let a = matrix(
        &[(0, 1, 2.0), (0, 2, 1.0), (1, 0, 1.0), (1, 1, 1.0), (2, 0, 3.0), (2, 2, 1.0)],
        3,
    );
    let lu = DenseLu::factor(a.view()).unwrap();
    let x = lu.solve(&[7.0, 3.0, 6.0]).unwrap();
    // x = [1, 2, 3]
    assert_relative_eq!(x[0], 1.0, epsilon = 1e-12);
    assert_relative_eq!(x[1], 2.0, epsilon = 1e-12);
    assert_relative_eq!(x[2], 3.0, epsilon = 1e-12);
}

#[test]
fn dense_lu_reports_singular_pivot() {
    let a = matrix(&[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 4.0)], 2);
    assert!(matches!(
        DenseLu::factor(a.view()),
        Err(CouplingError::SingularPivot { column: 1 })
    ));
}

#[test]
fn linear_system_requires_factorization() {
    let mut system = LinearSystem::new();
    assert!(!system.is_factored());
    assert!(matches!(system.solve(&[1.0]), Err(CouplingError::MissingFactorization)));

    let a = matrix(&[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)], 2);
    system.factor(a, FactorisationStrategy::Ldl, false).unwrap();
    assert!(system.is_factored());
    assert_eq!(system.dim(), 2);
    let x = system.solve(&[1.0, 2.0]).unwrap();
    assert_relative_eq!(4.0 * x[0] + x[1], 1.0, epsilon = 1e-12);
    assert_relative_eq!(x[0] + 3.0 * x[1], 2.0, epsilon = 1e-12);

    assert!(matches!(system.solve(&[1.0]), Err(CouplingError::Shape(_))));
}

// ─────────────────────────────────────────────────────────────
//  Bar network input checks
// ─────────────────────────────────────────────────────────────

#[test]
fn bar_network_rejects_bad_topology() {
    let coords = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
    let bad_node = BarNetwork::new(
        AnalysisKind::Aeroelastic,
        coords.clone(),
        vec![Bar { start: 0, end: 2, component: 0 }],
        &[0],
        vec![0.01],
        Material::default(),
    );
    assert!(matches!(bad_node, Err(CouplingError::Shape(_))));

    let bad_component = BarNetwork::new(
        AnalysisKind::Aeroelastic,
        coords,
        vec![Bar { start: 0, end: 1, component: 1 }],
        &[0],
        vec![0.01],
        Material::default(),
    );
    assert!(matches!(bad_component, Err(CouplingError::Shape(_))));
}
