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

use std::marker::PhantomData;

use crate::error::AutodiffError;
use crate::registry::Registry;
use crate::tangent::{components_of, Differentiable, Scalar};

use super::args::DiffArgs;
use super::engine::Tracer;
use super::tape::{Handle, Phase, Tape, Var};

/// Per-request tracing options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradientOptions {
    /// Tape entries to preallocate.
    pub tape_capacity: usize,
    /// Fail the trace once it records more entries than this.
    pub max_tape_entries: Option<usize>,
}

impl Default for GradientOptions {
    fn default() -> Self {
        Self {
            tape_capacity: 16,
            max_tape_entries: None,
        }
    }
}

/// A traced computation ready to be pulled back.
///
/// Holds the tape of one trace. [`Pullback::call`] consumes the handle, so
/// every pullback closure on the tape runs at most once.
pub struct Pullback<A: DiffArgs, R: Differentiable> {
    value: R,
    output: Handle,
    inputs: Vec<Handle>,
    tape: Tape,
    _args: PhantomData<fn() -> A>,
}

impl<A: DiffArgs, R: Differentiable> Pullback<A, R> {
    /// Primal result of the traced computation.
    pub fn value(&self) -> &R {
        &self.value
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// Seed the output with `seed`, unwind and return one tangent per input.
    pub fn call(mut self, seed: R::Tangent) -> Result<A::Tangents, AutodiffError> {
        self.tape.seed(self.output, components_of(&seed))?;
        self.tape.unwind()?;
        debug_assert_eq!(self.tape.phase(), Phase::Finished);
        let adjoints = self
            .inputs
            .iter()
            .map(|h| self.tape.adjoint_or_zero(*h))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(A::collect_tangents(&adjoints))
    }

    /// Like [`call`](Self::call) but also hands back the primal value.
    pub fn call_with_value(self, seed: R::Tangent) -> Result<(R, A::Tangents), AutodiffError> {
        let value = self.value.clone();
        let tangents = self.call(seed)?;
        Ok((value, tangents))
    }
}

/// Trace `body` at `at` and return its pullback.
pub fn pullback<A, R, F>(registry: &Registry, at: A, body: F) -> Result<Pullback<A, R>, AutodiffError>
where
    A: DiffArgs,
    R: Differentiable,
    F: FnOnce(&mut Tracer<'_>, A::Vars) -> Result<Var<R>, AutodiffError>,
{
    pullback_with_options(registry, &GradientOptions::default(), at, body)
}

pub fn pullback_with_options<A, R, F>(
    registry: &Registry,
    options: &GradientOptions,
    at: A,
    body: F,
) -> Result<Pullback<A, R>, AutodiffError>
where
    A: DiffArgs,
    R: Differentiable,
    F: FnOnce(&mut Tracer<'_>, A::Vars) -> Result<Var<R>, AutodiffError>,
{
    let mut tracer = Tracer::new(registry, options);
    let vars = at.bind(tracer.tape_mut())?;
    let inputs = A::handles(&vars);
    let result = body(&mut tracer, vars)?;
    let tape = tracer.into_tape();
    let output = tape.check_handle(result.handle()).map(|_| result.handle())?;
    log::debug!(
        "traced {} entries over {} inputs on tape {}",
        tape.len(),
        inputs.len(),
        tape.id().get()
    );
    Ok(Pullback {
        value: result.into_value(),
        output,
        inputs,
        tape,
        _args: PhantomData,
    })
}

/// Gradient of a scalar-valued `body` at `at`, one tangent per input.
pub fn gradient<A, R, F>(registry: &Registry, at: A, body: F) -> Result<A::Tangents, AutodiffError>
where
    A: DiffArgs,
    R: Scalar,
    F: FnOnce(&mut Tracer<'_>, A::Vars) -> Result<Var<R>, AutodiffError>,
{
    gradient_with_options(registry, &GradientOptions::default(), at, body)
}

pub fn gradient_with_options<A, R, F>(
    registry: &Registry,
    options: &GradientOptions,
    at: A,
    body: F,
) -> Result<A::Tangents, AutodiffError>
where
    A: DiffArgs,
    R: Scalar,
    F: FnOnce(&mut Tracer<'_>, A::Vars) -> Result<Var<R>, AutodiffError>,
{
    pullback_with_options(registry, options, at, body)?.call(R::one())
}

/// Value and gradient of a scalar-valued `body` at `at`.
pub fn value_with_gradient<A, R, F>(
    registry: &Registry,
    at: A,
    body: F,
) -> Result<(R, A::Tangents), AutodiffError>
where
    A: DiffArgs,
    R: Scalar,
    F: FnOnce(&mut Tracer<'_>, A::Vars) -> Result<Var<R>, AutodiffError>,
{
    pullback(registry, at, body)?.call_with_value(R::one())
}
