// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Part of the pullback derivative-registration library.

//! Built-in derivative-registration conformance suite.
//!
//! One case per syntactic form an opaque original can take, plus the error
//! paths of the registry. Each case traces against [`demo_registry`] and
//! compares small-integer gradients exactly.

use std::fmt::Debug;

use crate::autodiff::{gradient_with_options, pullback_with_options, GradientOptions, Tracer};
use crate::error::AutodiffError;
use crate::opaque::OpaqueFn;
use crate::registry::Registry;
use crate::signature::DerivativeKind;

crate::differentiable_struct! {
    /// Single-field composite whose methods exercise every registration form.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Wrapper {
        pub float: f32,
    }
    tangent WrapperTangent;
}

impl Wrapper {
    pub fn new(x: f32, y: f32) -> Self {
        Self { float: x * y }
    }
}

pub fn unary() -> OpaqueFn<(f32,), f32> {
    OpaqueFn::free("unary", |(x,)| x)
}

pub fn multiply() -> OpaqueFn<(f32, f32), f32> {
    OpaqueFn::free("multiply", |(x, y)| x * y)
}

pub fn wrapper_init() -> OpaqueFn<(f32, f32), Wrapper> {
    OpaqueFn::initializer(|(x, y)| Wrapper::new(x, y))
}

pub fn wrapper_static_multiply() -> OpaqueFn<(f32, f32), f32> {
    OpaqueFn::static_method::<Wrapper>("multiply", |(x, y)| x * y)
}

pub fn wrapper_multiply() -> OpaqueFn<(Wrapper, f32), f32> {
    OpaqueFn::instance_method("multiply", |(w, x)| w.float * x)
}

pub fn wrapper_subscript() -> OpaqueFn<(Wrapper, f32), f32> {
    OpaqueFn::subscript_getter(|(w, x)| w.float * x)
}

pub fn wrapper_computed_property() -> OpaqueFn<(Wrapper,), f32> {
    OpaqueFn::property_getter("computed_property", |(w,)| w.float * w.float)
}

/// Registry holding a reverse-mode derivative for every demo original.
pub fn demo_registry() -> Result<Registry, AutodiffError> {
    let mut builder = Registry::builder();
    builder
        .register(&unary(), DerivativeKind::Reverse, |(x,): (f32,)| {
            (x, |v: f32| (v,))
        })?
        .register(&multiply(), DerivativeKind::Reverse, |(x, y): (f32, f32)| {
            (x * y, move |v: f32| (v * y, v * x))
        })?
        .register(&wrapper_init(), DerivativeKind::Reverse, |(x, y): (f32, f32)| {
            (Wrapper::new(x, y), move |v: WrapperTangent| {
                (v.float * y, v.float * x)
            })
        })?
        .register(
            &wrapper_static_multiply(),
            DerivativeKind::Reverse,
            |(x, y): (f32, f32)| (x * y, move |v: f32| (v * y, v * x)),
        )?
        .register(&wrapper_multiply(), DerivativeKind::Reverse, |(w, x): (Wrapper, f32)| {
            let f = w.float;
            (f * x, move |v: f32| (WrapperTangent { float: v * x }, v * f))
        })?
        .register(&wrapper_subscript(), DerivativeKind::Reverse, |(w, x): (Wrapper, f32)| {
            let f = w.float;
            (f * x, move |v: f32| (WrapperTangent { float: v * x }, v * f))
        })?
        .register(
            &wrapper_computed_property(),
            DerivativeKind::Reverse,
            |(w,): (Wrapper,)| {
                let f = w.float;
                (f * f, move |v: f32| (WrapperTangent { float: v * (f + f) },))
            },
        )?;
    Ok(builder.build())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConformanceOptions {
    /// Run only the case with this name.
    pub case: Option<String>,
    pub gradient: GradientOptions,
}

#[derive(Debug, thiserror::Error)]
#[error("conformance failures: {0:?}")]
pub struct ConformanceFailure(pub Vec<String>);

type CaseFn = fn(&Registry, &GradientOptions) -> Result<(), String>;

pub struct ConformanceCase {
    pub name: &'static str,
    run: CaseFn,
}

impl Debug for ConformanceCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConformanceCase").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseOutcome {
    pub name: &'static str,
    pub result: Result<(), String>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

pub fn cases() -> Vec<ConformanceCase> {
    vec![
        ConformanceCase { name: "unary_free_function", run: unary_free_function },
        ConformanceCase { name: "binary_free_function", run: binary_free_function },
        ConformanceCase { name: "initializer", run: initializer },
        ConformanceCase { name: "static_method", run: static_method },
        ConformanceCase { name: "instance_method", run: instance_method },
        ConformanceCase { name: "subscript", run: subscript },
        ConformanceCase { name: "computed_property", run: computed_property },
        ConformanceCase { name: "chained_pullbacks", run: chained_pullbacks },
        ConformanceCase { name: "pullbacks_released", run: pullbacks_released },
        ConformanceCase { name: "missing_derivative", run: missing_derivative },
        ConformanceCase { name: "registration_conflict", run: registration_conflict },
    ]
}

/// Run every case (or only `filter`) against `registry`.
pub fn run_cases(
    registry: &Registry,
    options: &GradientOptions,
    filter: Option<&str>,
) -> Vec<CaseOutcome> {
    cases()
        .into_iter()
        .filter(|case| filter.map_or(true, |name| name == case.name))
        .map(|case| {
            let result = (case.run)(registry, options);
            match &result {
                Ok(()) => log::debug!("case {} passed", case.name),
                Err(msg) => log::debug!("case {} failed: {msg}", case.name),
            }
            CaseOutcome { name: case.name, result }
        })
        .collect()
}

pub fn run_conformance(opts: &ConformanceOptions) -> Result<(), ConformanceFailure> {
    let registry = demo_registry()
        .map_err(|err| ConformanceFailure(vec![format!("demo registry => {err}")]))?;
    let outcomes = run_cases(&registry, &opts.gradient, opts.case.as_deref());
    if let (Some(name), true) = (&opts.case, outcomes.is_empty()) {
        return Err(ConformanceFailure(vec![format!("unknown case '{name}'")]));
    }
    let failures: Vec<String> = outcomes
        .into_iter()
        .filter_map(|outcome| outcome.result.err().map(|msg| format!("{} => {msg}", outcome.name)))
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ConformanceFailure(failures))
    }
}

fn unexpected(err: AutodiffError) -> String {
    format!("unexpected error: {err}")
}

fn expect_eq<T: PartialEq + Debug>(expected: T, actual: T) -> Result<(), String> {
    if expected == actual {
        Ok(())
    } else {
        Err(format!("expected {expected:?}, got {actual:?}"))
    }
}

fn unary_free_function(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let f = unary();
    let grad = gradient_with_options(registry, options, (3.0f32,), |cx, (x,)| cx.apply(&f, (x,)))
        .map_err(unexpected)?;
    expect_eq((1.0,), grad)
}

fn binary_free_function(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let f = multiply();
    let grad = gradient_with_options(registry, options, (2.0f32, 3.0f32), |cx, (x, y)| {
        cx.apply(&f, (x, y))
    })
    .map_err(unexpected)?;
    expect_eq((3.0, 2.0), grad)
}

fn initializer(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let init = wrapper_init();
    let pb = pullback_with_options(registry, options, (3.0f32, 4.0f32), |cx, (x, y)| {
        cx.apply(&init, (x, y))
    })
    .map_err(unexpected)?;
    expect_eq(&Wrapper { float: 12.0 }, pb.value())?;
    let grad = pb.call(WrapperTangent { float: 1.0 }).map_err(unexpected)?;
    expect_eq((4.0, 3.0), grad)
}

fn static_method(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let f = wrapper_static_multiply();
    let grad = gradient_with_options(registry, options, (2.0f32, 3.0f32), |cx, (x, y)| {
        cx.apply(&f, (x, y))
    })
    .map_err(unexpected)?;
    expect_eq((3.0, 2.0), grad)
}

fn instance_method(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let f = wrapper_multiply();
    let grad = gradient_with_options(
        registry,
        options,
        (Wrapper { float: 3.0 }, 2.0f32),
        |cx, (w, x)| cx.apply(&f, (w, x)),
    )
    .map_err(unexpected)?;
    expect_eq((WrapperTangent { float: 2.0 }, 3.0), grad)
}

fn subscript(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let f = wrapper_subscript();
    let grad = gradient_with_options(
        registry,
        options,
        (Wrapper { float: 3.0 }, 2.0f32),
        |cx, (w, x)| cx.apply(&f, (w, x)),
    )
    .map_err(unexpected)?;
    expect_eq((WrapperTangent { float: 2.0 }, 3.0), grad)
}

fn computed_property(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let f = wrapper_computed_property();
    let grad = gradient_with_options(registry, options, (Wrapper { float: 3.0 },), |cx, (w,)| {
        cx.apply(&f, (w,))
    })
    .map_err(unexpected)?;
    expect_eq((WrapperTangent { float: 6.0 },), grad)
}

// computed_property(init(x, y)) = (x * y)^2
fn chained_pullbacks(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let (init, prop) = (wrapper_init(), wrapper_computed_property());
    let grad = gradient_with_options(registry, options, (3.0f32, 4.0f32), |cx, (x, y)| {
        let w = cx.apply(&init, (x, y))?;
        cx.apply(&prop, (w,))
    })
    .map_err(unexpected)?;
    expect_eq((96.0, 72.0), grad)
}

fn pullbacks_released(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let (f, g) = (multiply(), unary());
    let mut tracer = Tracer::new(registry, options);
    let x = tracer.tape_mut().leaf(2.0f32).map_err(unexpected)?;
    let y = tracer.tape_mut().leaf(3.0f32).map_err(unexpected)?;
    let z = tracer.apply(&f, (x.clone(), y)).map_err(unexpected)?;
    let out = tracer.apply(&g, (z,)).map_err(unexpected)?;

    let mut tape = tracer.into_tape();
    expect_eq(2, tape.pending_pullbacks())?;
    tape.seed(out.handle(), vec![1.0]).map_err(unexpected)?;
    tape.unwind().map_err(unexpected)?;
    expect_eq(0, tape.pending_pullbacks())?;
    expect_eq(vec![3.0], tape.adjoint_or_zero(x.handle()).map_err(unexpected)?)
}

fn missing_derivative(registry: &Registry, options: &GradientOptions) -> Result<(), String> {
    let unregistered: OpaqueFn<(f32,), f32> = OpaqueFn::free("unregistered", |(x,)| x);
    match gradient_with_options(registry, options, (1.0f32,), |cx, (x,)| {
        cx.apply(&unregistered, (x,))
    }) {
        Err(AutodiffError::MissingDerivative { .. }) => Ok(()),
        Err(other) => Err(unexpected(other)),
        Ok(grad) => Err(format!("expected a missing derivative, got gradient {grad:?}")),
    }
}

fn registration_conflict(_: &Registry, _: &GradientOptions) -> Result<(), String> {
    let mut builder = Registry::builder();
    builder
        .register(&unary(), DerivativeKind::Reverse, |(x,): (f32,)| (x, |v: f32| (v,)))
        .map_err(unexpected)?;
    let second = builder
        .register(&unary(), DerivativeKind::Reverse, |(x,): (f32,)| (x, |v: f32| (v,)))
        .map(|_| ());
    match second {
        Err(AutodiffError::RegistrationConflict { .. }) => expect_eq(1, builder.len()),
        Err(other) => Err(unexpected(other)),
        Ok(_) => Err("second registration was accepted".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_case_passes() {
        let _ = env_logger::builder().is_test(true).try_init();
        let registry = demo_registry().unwrap();
        let outcomes = run_cases(&registry, &GradientOptions::default(), None);
        assert_eq!(outcomes.len(), cases().len());
        for outcome in outcomes {
            assert!(outcome.passed(), "{}: {:?}", outcome.name, outcome.result);
        }
    }

    #[test]
    fn filter_selects_one_case() {
        let registry = demo_registry().unwrap();
        let outcomes = run_cases(&registry, &GradientOptions::default(), Some("subscript"));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].name, "subscript");
    }

    #[test]
    fn unknown_case_name_is_a_failure() {
        let opts = ConformanceOptions {
            case: Some("no_such_case".to_string()),
            ..Default::default()
        };
        let err = run_conformance(&opts).unwrap_err();
        assert_eq!(err.0, vec!["unknown case 'no_such_case'".to_string()]);
    }

    #[test]
    fn run_conformance_reports_failures_by_name() {
        run_conformance(&ConformanceOptions::default()).unwrap();

        let opts = ConformanceOptions {
            case: Some("chained_pullbacks".to_string()),
            gradient: GradientOptions {
                tape_capacity: 1,
                max_tape_entries: Some(1),
            },
        };
        let err = run_conformance(&opts).unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert!(err.0[0].starts_with("chained_pullbacks =>"));
    }

    #[test]
    fn originals_still_run_without_differentiation() {
        assert_eq!(multiply().call((2.0, 3.0)), 6.0);
        assert_eq!(wrapper_init().call((3.0, 4.0)), Wrapper { float: 12.0 });
        assert_eq!(wrapper_computed_property().call((Wrapper { float: 3.0 },)), 9.0);
    }

    #[test]
    fn demo_registry_keys_every_form_separately() {
        let registry = demo_registry().unwrap();
        assert_eq!(registry.len(), 7);
        assert!(registry.contains(multiply().signature(), DerivativeKind::Reverse));
        assert!(registry.contains(wrapper_static_multiply().signature(), DerivativeKind::Reverse));
        assert_ne!(multiply().signature(), wrapper_static_multiply().signature());
    }
}
