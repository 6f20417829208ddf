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
use crate::tangent::Scalar;

use super::engine::{flat, Tracer};
use super::tape::Var;

// Closed-form pullbacks for the scalar primitives that surround opaque calls.
impl Tracer<'_> {
    pub fn add<S: Scalar>(&mut self, lhs: &Var<S>, rhs: &Var<S>) -> Result<Var<S>, AutodiffError> {
        let value = *lhs.value() + *rhs.value();
        self.record_flat("add", &[lhs.handle(), rhs.handle()], value, |v: S| {
            vec![flat(&v), flat(&v)]
        })
    }

    pub fn sub<S: Scalar>(&mut self, lhs: &Var<S>, rhs: &Var<S>) -> Result<Var<S>, AutodiffError> {
        let value = *lhs.value() - *rhs.value();
        self.record_flat("sub", &[lhs.handle(), rhs.handle()], value, |v: S| {
            vec![flat(&v), flat(&-v)]
        })
    }

    pub fn mul<S: Scalar>(&mut self, lhs: &Var<S>, rhs: &Var<S>) -> Result<Var<S>, AutodiffError> {
        let (x, y) = (*lhs.value(), *rhs.value());
        self.record_flat("mul", &[lhs.handle(), rhs.handle()], x * y, move |v: S| {
            vec![flat(&(v * y)), flat(&(v * x))]
        })
    }

    pub fn neg<S: Scalar>(&mut self, operand: &Var<S>) -> Result<Var<S>, AutodiffError> {
        let value = -*operand.value();
        self.record_flat("neg", &[operand.handle()], value, |v: S| vec![flat(&-v)])
    }

    /// Multiply by a constant factor.
    pub fn scale<S: Scalar>(&mut self, operand: &Var<S>, factor: S) -> Result<Var<S>, AutodiffError> {
        let value = *operand.value() * factor;
        self.record_flat("scale", &[operand.handle()], value, move |v: S| {
            vec![flat(&(v * factor))]
        })
    }
}
