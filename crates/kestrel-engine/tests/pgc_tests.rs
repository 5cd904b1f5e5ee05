//! Integration tests for profile-guided compilation
//!
//! Tests cover:
//! - Profile recording through dispatch
//! - Compilation from profile evidence
//! - Unsupported units staying on the interpreter
//! - Concurrent profile recording
//! - Status progression

use kestrel_bytecode::{BinaryOperator, BytecodeUnit, Kind, Opcode, UnitBuilder};
use kestrel_engine::jit::analysis::AnalysisError;
use kestrel_engine::jit::profiling::{PgcStatus, ProfileSite, ProfileStore, Tier};
use kestrel_engine::{JitConfig, JitEngine, JitError, Namespace, Value};
use std::sync::Arc;

// ============================================================================
// Helpers
// ============================================================================

/// f(a, b): return a + b
fn add_unit() -> Arc<BytecodeUnit> {
    let mut b = UnitBuilder::new("f").args(2);
    b.load_fast(0);
    b.load_fast(1);
    b.binary(BinaryOperator::Add);
    b.return_value();
    Arc::new(b.build().unwrap())
}

fn annotations_unit() -> Arc<BytecodeUnit> {
    let mut b = UnitBuilder::new("annotations");
    b.emit(Opcode::SetupAnnotations, 0);
    Arc::new(b.build().unwrap())
}

fn rank(status: PgcStatus) -> u8 {
    match status {
        PgcStatus::Uncompiled => 0,
        PgcStatus::CompiledWithProfiling => 1,
        PgcStatus::Optimized => 2,
        PgcStatus::Failed => 3,
    }
}

// ============================================================================
// Profile-driven compilation
// ============================================================================

#[test]
fn test_integer_add_profiles_then_unboxes() {
    let engine = JitEngine::new();
    let unit = add_unit();
    let ns = Namespace::new();

    let result = engine
        .dispatch(&unit, vec![Value::Int(2), Value::Int(3)], &ns)
        .unwrap();
    assert!(result.equals(&Value::Int(5)));

    let profile = engine.profile(&unit);
    assert_eq!(profile.kinds_at(ProfileSite::stack(2, 0)), vec![Kind::Integer]);
    assert_eq!(profile.kinds_at(ProfileSite::stack(2, 1)), vec![Kind::Integer]);
    assert_eq!(engine.status(&unit), PgcStatus::Uncompiled);

    // The next execution compiles from that evidence
    engine
        .dispatch(&unit, vec![Value::Int(4), Value::Int(5)], &ns)
        .unwrap();
    assert_eq!(engine.status(&unit), PgcStatus::CompiledWithProfiling);

    let record = engine.ensure_compiled(&unit);
    assert!(record.ir_text().contains("   2 BINARY_ADD 0 ; unboxed integer"));
    assert_eq!(record.speculations.len(), 2);

    let analysis = engine.analyze(&unit, &[]).unwrap();
    let add = analysis.graph.node(2).unwrap();
    assert!(!add.escapes);
    assert_eq!(add.unboxed, Some(Kind::Integer));
}

#[test]
fn test_polymorphic_profile_keeps_add_boxed() {
    let engine = JitEngine::new();
    let unit = add_unit();
    let ns = Namespace::new();

    engine
        .dispatch(&unit, vec![Value::Int(1), Value::Int(2)], &ns)
        .unwrap();
    engine
        .dispatch(&unit, vec![Value::Float(1.0), Value::Float(2.0)], &ns)
        .unwrap();

    let analysis = engine.analyze(&unit, &[]).unwrap();
    assert!(analysis.graph.node(2).unwrap().escapes);
    assert!(analysis.states.speculations().is_empty());
}

#[test]
fn test_optimized_code_stops_profiling() {
    let engine = JitEngine::new();
    let unit = add_unit();
    let ns = Namespace::new();

    for _ in 0..5 {
        engine
            .dispatch(&unit, vec![Value::Int(1), Value::Int(2)], &ns)
            .unwrap();
    }
    assert_eq!(engine.status(&unit), PgcStatus::Optimized);

    let profile = engine.profile(&unit);
    let before = profile.executions();
    engine
        .dispatch(&unit, vec![Value::Int(1), Value::Int(2)], &ns)
        .unwrap();
    assert_eq!(profile.executions(), before);
}

// ============================================================================
// Unsupported units
// ============================================================================

#[test]
fn test_unsupported_opcode_falls_back() {
    let engine = JitEngine::new();
    let unit = annotations_unit();
    let ns = Namespace::new();

    let err = engine
        .pipeline()
        .compile(&unit, Tier::Profiling, None, engine.config())
        .unwrap_err();
    assert_eq!(
        err,
        JitError::Analysis(AnalysisError::UnsupportedOpcode {
            opcode: Opcode::SetupAnnotations,
            index: 0,
        })
    );
    // A direct pipeline call does not touch the unit's status
    assert_eq!(engine.status(&unit), PgcStatus::Uncompiled);

    for _ in 0..4 {
        let result = engine.dispatch(&unit, Vec::new(), &ns).unwrap();
        assert!(result.equals(&Value::None));
    }
    assert_eq!(engine.status(&unit), PgcStatus::Uncompiled);
    assert!(engine.ensure_compiled(&unit).code.is_none());
}

#[test]
fn test_repeated_failures_mark_failed() {
    let config = JitConfig {
        max_compile_failures: 1,
        ..Default::default()
    };
    let engine = JitEngine::with_config(config);
    let unit = annotations_unit();
    let ns = Namespace::new();

    engine.dispatch(&unit, Vec::new(), &ns).unwrap();
    engine.dispatch(&unit, Vec::new(), &ns).unwrap();
    assert_eq!(engine.status(&unit), PgcStatus::Failed);

    let result = engine.dispatch(&unit, Vec::new(), &ns).unwrap();
    assert!(result.equals(&Value::None));
    assert!(engine.ensure_compiled(&unit).failed);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_recording_loses_nothing() {
    let store = ProfileStore::new();
    let site = ProfileSite::stack(2, 0);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..1000 {
                store.record(site, Kind::Integer);
            }
        });
        scope.spawn(|| {
            for _ in 0..1000 {
                store.record(site, Kind::Float);
            }
        });
    });

    assert_eq!(store.kinds_at(site), vec![Kind::Integer, Kind::Float]);
    assert_eq!(store.hits_at(site, Kind::Integer), 1000);
    assert_eq!(store.hits_at(site, Kind::Float), 1000);
}

#[test]
fn test_concurrent_dispatch_of_one_unit() {
    let engine = JitEngine::new();
    let unit = add_unit();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let ns = Namespace::new();
            for i in 0..50 {
                let result = engine
                    .dispatch(&unit, vec![Value::Int(i), Value::Int(1)], &ns)
                    .unwrap();
                assert!(result.equals(&Value::Int(i + 1)));
            }
        });
        scope.spawn(|| {
            let ns = Namespace::new();
            for i in 0..50 {
                let x = i as f64;
                let result = engine
                    .dispatch(&unit, vec![Value::Float(x), Value::Float(0.5)], &ns)
                    .unwrap();
                assert!(result.equals(&Value::Float(x + 0.5)));
            }
        });
    });

    let kinds = engine.profile(&unit).kinds_at(ProfileSite::argument(0));
    assert_eq!(kinds, vec![Kind::Integer, Kind::Float]);
    assert!(!engine.unit_state(&unit).is_compiling());
}

// ============================================================================
// Status progression
// ============================================================================

#[test]
fn test_status_only_moves_forward() {
    let engine = JitEngine::new();
    let unit = add_unit();
    let ns = Namespace::new();

    let inputs = [
        vec![Value::Int(1), Value::Int(2)],
        vec![Value::Int(1), Value::Int(2)],
        vec![Value::Float(1.0), Value::Float(2.0)],
        vec![Value::str("a"), Value::str("b")],
        vec![Value::Int(1), Value::Int(2)],
        vec![Value::Int(1), Value::Int(2)],
        vec![Value::Int(1), Value::Int(2)],
        vec![Value::Int(1), Value::Int(2)],
    ];

    let mut previous = engine.status(&unit);
    for args in inputs {
        engine.dispatch(&unit, args, &ns).unwrap();
        let current = engine.status(&unit);
        assert!(
            current == previous || previous.can_transition_to(current),
            "{} -> {}",
            previous,
            current
        );
        assert!(rank(current) >= rank(previous));
        previous = current;
    }
    assert!(previous.is_compiled());
}

#[test]
fn test_failed_is_terminal_across_dispatches() {
    let config = JitConfig {
        max_compile_failures: 1,
        ..Default::default()
    };
    let engine = JitEngine::with_config(config);
    let unit = annotations_unit();
    let ns = Namespace::new();

    engine.dispatch(&unit, Vec::new(), &ns).unwrap();
    engine.dispatch(&unit, Vec::new(), &ns).unwrap();
    assert_eq!(engine.status(&unit), PgcStatus::Failed);

    let generation = engine.ensure_compiled(&unit).generation;
    for _ in 0..5 {
        engine.dispatch(&unit, Vec::new(), &ns).unwrap();
        assert_eq!(engine.status(&unit), PgcStatus::Failed);
    }
    assert_eq!(engine.ensure_compiled(&unit).generation, generation);
}
