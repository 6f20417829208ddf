use std::sync::Arc;
use std::thread;

use pullback::{
    gradient, pullback, AutodiffError, DerivativeEntry, DerivativeKind, FunctionSignature, Opaque,
    OpaqueFn, Registry, Tape,
};

fn sin() -> OpaqueFn<(f64,), f64> {
    OpaqueFn::free("sin", |(x,)| x.sin())
}

fn cos() -> OpaqueFn<(f64,), f64> {
    OpaqueFn::free("cos", |(x,)| x.cos())
}

fn sin_registry() -> Registry {
    let mut builder = Registry::builder();
    builder
        .register(&sin(), DerivativeKind::Reverse, |(x,): (f64,)| {
            let c = x.cos();
            (x.sin(), move |v: f64| (v * c,))
        })
        .expect("register sin");
    builder.build()
}

#[test]
fn conflicting_registration_is_rejected_every_time() {
    for _ in 0..3 {
        let mut builder = Registry::builder();
        builder
            .register(&sin(), DerivativeKind::Reverse, |(x,): (f64,)| {
                (x.sin(), move |v: f64| (v * x.cos(),))
            })
            .expect("first registration");
        let err = builder
            .register(&sin(), DerivativeKind::Reverse, |(x,): (f64,)| {
                (x.sin(), |v: f64| (v,))
            })
            .map(|_| ())
            .unwrap_err();
        assert_eq!(
            err,
            AutodiffError::RegistrationConflict {
                signature: "sin(f64) -> f64".to_string(),
                kind: DerivativeKind::Reverse,
            }
        );
        assert_eq!(builder.len(), 1);
    }
}

#[test]
fn missing_derivative_never_yields_zero_gradient() {
    let registry = sin_registry();
    let err = gradient(&registry, (1.0f64,), |cx, (x,)| cx.apply(&cos(), (x,))).unwrap_err();
    assert_eq!(
        err,
        AutodiffError::MissingDerivative {
            signature: "cos(f64) -> f64".to_string(),
        }
    );
    assert!(err.to_string().contains("cos(f64) -> f64"));
}

#[test]
fn errors_do_not_disturb_later_requests() {
    let registry = sin_registry();
    assert!(gradient(&registry, (0.0f64,), |cx, (x,)| cx.apply(&cos(), (x,))).is_err());
    let (g,) = gradient(&registry, (0.0f64,), |cx, (x,)| cx.apply(&sin(), (x,))).expect("gradient");
    assert_eq!(g, 1.0);
    assert_eq!(registry.len(), 1);
}

#[test]
fn entry_for_a_different_shape_is_a_signature_mismatch() {
    let binary: OpaqueFn<(f64, f64), f64> = OpaqueFn::free("hypot", |(x, y)| x.hypot(y));
    let entry = DerivativeEntry::new::<(f64,), f64, _, _>(DerivativeKind::Reverse, |(x,): (f64,)| {
        (x, |v: f64| (v,))
    });
    let mut builder = Registry::builder();
    let err = builder
        .register_entry(binary.signature().clone(), entry)
        .unwrap_err();
    assert!(matches!(err, AutodiffError::SignatureMismatch { .. }));
    assert!(builder.is_empty());
}

#[test]
fn ensure_registered_checks_before_tracing() {
    let registry = sin_registry();
    let (s, c) = (sin(), cos());
    registry
        .ensure_registered(&[&s as &dyn Opaque], DerivativeKind::Reverse)
        .expect("sin is registered");
    let err = registry
        .ensure_registered(&[&s as &dyn Opaque, &c as &dyn Opaque], DerivativeKind::Reverse)
        .unwrap_err();
    assert!(matches!(err, AutodiffError::MissingDerivative { .. }));
}

#[test]
fn signatures_are_listed_in_display_order() {
    let mut builder = Registry::builder();
    for original in [sin(), cos()] {
        builder
            .register(&original, DerivativeKind::Reverse, |(x,): (f64,)| (x, |v: f64| (v,)))
            .expect("register");
    }
    let registry = builder.build();
    let rendered: Vec<String> = registry.signatures().iter().map(|s| s.to_string()).collect();
    assert_eq!(rendered, vec!["cos(f64) -> f64", "sin(f64) -> f64"]);
    let json = serde_json::to_value(registry.signatures()).expect("json");
    assert_eq!(json[0]["name"], "cos");
    assert_eq!(json[0]["kind"], "free");
}

#[test]
fn independent_tapes_share_one_registry_across_threads() {
    let registry = Arc::new(sin_registry());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let x = f64::from(i) * 0.25;
                let (g,) = gradient(&registry, (x,), |cx, (x,)| cx.apply(&sin(), (x,)))
                    .expect("gradient");
                (x, g)
            })
        })
        .collect();
    for handle in handles {
        let (x, g) = handle.join().expect("thread");
        assert_eq!(g, x.cos());
    }
}

#[test]
fn values_from_another_trace_are_rejected() {
    let registry = sin_registry();
    let mut other = Tape::new();
    let stray = other.leaf(1.0f64).expect("leaf");
    let err = pullback(&registry, (0.5f64,), move |cx, (_x,)| cx.apply(&sin(), (stray,)))
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, AutodiffError::ForeignValue { .. }));
}

#[test]
fn unwinding_twice_is_a_reuse_violation() {
    let mut tape = Tape::new();
    let x = tape.leaf(2.0f64).expect("leaf");
    tape.seed(x.handle(), vec![1.0]).expect("seed");
    tape.unwind().expect("first unwind");
    assert!(matches!(
        tape.unwind(),
        Err(AutodiffError::PullbackReused { .. })
    ));
}

#[test]
fn signature_keys_include_kind_and_receiver() {
    struct Trig;
    let free = sin();
    let method: OpaqueFn<(f64,), f64> = OpaqueFn::static_method::<Trig>("sin", |(x,)| x.sin());
    let a: &FunctionSignature = free.signature();
    let b: &FunctionSignature = method.signature();
    assert_eq!(a.params, b.params);
    assert_ne!(a, b);
    let registry = sin_registry();
    assert!(registry.contains(a, DerivativeKind::Reverse));
    assert!(!registry.contains(b, DerivativeKind::Reverse));
}
