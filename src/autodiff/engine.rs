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

use crate::error::AutodiffError;
use crate::opaque::OpaqueFn;
use crate::registry::{render_type, Registry};
use crate::signature::{DerivativeKind, TypeDesc};
use crate::tangent::{components_of, Differentiable, TangentVector};

use super::args::DiffArgs;
use super::driver::GradientOptions;
use super::tape::{ErasedPullback, Handle, Tape, Var};

/// Forward pass of one differentiation request.
///
/// Owns the request's tape and borrows the shared registry. Calls to opaque
/// functions go through [`Tracer::apply`]; the built-in scalar operations in
/// this module's `rules` compose with them.
pub struct Tracer<'r> {
    registry: &'r Registry,
    tape: Tape,
}

impl<'r> Tracer<'r> {
    pub fn new(registry: &'r Registry, options: &GradientOptions) -> Self {
        Self {
            registry,
            tape: Tape::with_limits(options.tape_capacity, options.max_tape_entries),
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub(crate) fn tape_mut(&mut self) -> &mut Tape {
        &mut self.tape
    }

    pub(crate) fn into_tape(self) -> Tape {
        self.tape
    }

    /// A value that takes part in the computation but receives no gradient.
    pub fn constant<T: Differentiable>(&mut self, value: T) -> Result<Var<T>, AutodiffError> {
        self.tape.leaf(value)
    }

    /// Call an opaque function.
    ///
    /// Instead of tracing the body, invokes the derivative registered for the
    /// function's signature with the same arguments, uses its value as the
    /// result and records its pullback on the tape.
    pub fn apply<A, R>(&mut self, original: &OpaqueFn<A, R>, args: A::Vars) -> Result<Var<R>, AutodiffError>
    where
        A: DiffArgs,
        R: Differentiable,
    {
        let signature = original.signature();
        let entry = self
            .registry
            .lookup(signature, DerivativeKind::Reverse)
            .ok_or_else(|| AutodiffError::MissingDerivative {
                signature: signature.to_string(),
            })?;
        let derivative = entry
            .typed::<A, R>()
            .ok_or_else(|| AutodiffError::SignatureMismatch {
                signature: signature.to_string(),
                expected: render_type(&A::type_descs(), TypeDesc::of::<R>()),
                found: render_type(entry.argument_types(), entry.result_type()),
            })?;

        let (values, handles) = A::unbind(args);
        for handle in &handles {
            self.tape.check_handle(*handle)?;
        }

        let (value, pullback) = derivative.invoke(values);
        let erased: ErasedPullback = Box::new(move |d_out: &[f64]| {
            let seed = <R::Tangent as TangentVector>::read_components(d_out);
            A::flatten_tangents(pullback(seed))
        });
        let output = self.tape.record(
            signature.to_string(),
            &handles,
            <R::Tangent as TangentVector>::DIM,
            erased,
        )?;
        Ok(Var::new(value, output))
    }

    /// Record an operation given its value and a typed pullback.
    ///
    /// The escape hatch for operations that are neither opaque calls nor
    /// built-in rules; the pullback must return one tangent per input.
    pub fn record_custom<A, R, P>(
        &mut self,
        label: impl Into<String>,
        args: &A::Vars,
        value: R,
        pullback: P,
    ) -> Result<Var<R>, AutodiffError>
    where
        A: DiffArgs,
        R: Differentiable,
        P: FnOnce(R::Tangent) -> A::Tangents + 'static,
    {
        let handles = A::handles(args);
        let erased: ErasedPullback = Box::new(move |d_out: &[f64]| {
            let seed = <R::Tangent as TangentVector>::read_components(d_out);
            A::flatten_tangents(pullback(seed))
        });
        let output = self.tape.record(
            label.into(),
            &handles,
            <R::Tangent as TangentVector>::DIM,
            erased,
        )?;
        Ok(Var::new(value, output))
    }

    /// Record a value computed from `inputs` whose pullback maps the output
    /// tangent to one component vector per input.
    pub(crate) fn record_flat<R: Differentiable>(
        &mut self,
        label: &str,
        inputs: &[Handle],
        value: R,
        pullback: impl FnOnce(R::Tangent) -> Vec<Vec<f64>> + 'static,
    ) -> Result<Var<R>, AutodiffError> {
        let erased: ErasedPullback = Box::new(move |d_out: &[f64]| {
            pullback(<R::Tangent as TangentVector>::read_components(d_out))
        });
        let output = self.tape.record(
            label.to_string(),
            inputs,
            <R::Tangent as TangentVector>::DIM,
            erased,
        )?;
        Ok(Var::new(value, output))
    }
}

/// Flatten one scalar-or-composite tangent for [`Tracer::record_flat`].
pub(crate) fn flat<T: TangentVector>(tangent: &T) -> Vec<f64> {
    components_of(tangent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::FunctionKind;

    fn square() -> OpaqueFn<(f64,), f64> {
        OpaqueFn::free("square", |(x,)| x * x)
    }

    fn registry() -> Registry {
        let mut builder = Registry::builder();
        builder
            .register(&square(), DerivativeKind::Reverse, |(x,): (f64,)| {
                (x * x, move |v: f64| (2.0 * x * v,))
            })
            .unwrap();
        builder.build()
    }

    #[test]
    fn apply_uses_registered_value_and_records_pullback() {
        let registry = registry();
        let mut tracer = Tracer::new(&registry, &GradientOptions::default());
        let x = tracer.tape_mut().leaf(3.0f64).unwrap();
        let y = tracer.apply(&square(), (x.clone(),)).unwrap();
        assert_eq!(*y.value(), 9.0);
        assert_eq!(tracer.tape().len(), 1);

        let mut tape = tracer.into_tape();
        tape.seed(y.handle(), vec![1.0]).unwrap();
        tape.unwind().unwrap();
        assert_eq!(tape.adjoint(x.handle()).unwrap(), Some(&[6.0][..]));
    }

    #[test]
    fn apply_without_registration_fails() {
        let registry = Registry::empty();
        let mut tracer = Tracer::new(&registry, &GradientOptions::default());
        let x = tracer.constant(1.0f64).unwrap();
        let err = tracer.apply(&square(), (x,)).unwrap_err();
        assert_eq!(
            err,
            AutodiffError::MissingDerivative {
                signature: "square(f64) -> f64".into()
            }
        );
        assert!(tracer.tape().is_empty());
    }

    #[test]
    fn apply_distinguishes_forms_with_equal_types() {
        let registry = registry();
        struct Geometry;
        let static_square: OpaqueFn<(f64,), f64> =
            OpaqueFn::static_method::<Geometry>("square", |(x,)| x * x);
        assert_eq!(static_square.signature().kind, FunctionKind::StaticMethod);
        let mut tracer = Tracer::new(&registry, &GradientOptions::default());
        let x = tracer.constant(1.0f64).unwrap();
        assert!(matches!(
            tracer.apply(&static_square, (x,)),
            Err(AutodiffError::MissingDerivative { .. })
        ));
    }

    #[test]
    fn record_custom_routes_typed_pullbacks() {
        let registry = Registry::empty();
        let mut tracer = Tracer::new(&registry, &GradientOptions::default());
        let a = tracer.tape_mut().leaf(2.0f64).unwrap();
        let b = tracer.tape_mut().leaf(5.0f64).unwrap();
        let args = (a.clone(), b.clone());
        let out = tracer
            .record_custom::<(f64, f64), f64, _>("axpy", &args, 2.0 * 5.0, |v: f64| (5.0 * v, 2.0 * v))
            .unwrap();
        let mut tape = tracer.into_tape();
        tape.seed(out.handle(), vec![1.0]).unwrap();
        tape.unwind().unwrap();
        assert_eq!(tape.adjoint_or_zero(a.handle()).unwrap(), vec![5.0]);
        assert_eq!(tape.adjoint_or_zero(b.handle()).unwrap(), vec![2.0]);
    }
}
