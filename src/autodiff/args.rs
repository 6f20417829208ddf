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

use std::fmt;

use crate::error::AutodiffError;
use crate::signature::TypeDesc;
use crate::tangent::{components_of, Differentiable, TangentVector};

use super::tape::{Handle, Tape, Var};

/// A tuple of differentiable arguments.
///
/// Implemented for tuples of one to four [`Differentiable`] values. `Vars` is
/// the matching tuple of traced [`Var`]s and `Tangents` the matching tuple of
/// tangent vectors returned by pullbacks.
pub trait DiffArgs: Clone + fmt::Debug + 'static {
    type Vars;
    type Tangents: fmt::Debug;

    fn type_descs() -> Vec<TypeDesc>;

    /// Register every argument as a leaf of `tape`.
    fn bind(self, tape: &mut Tape) -> Result<Self::Vars, AutodiffError>;

    fn handles(vars: &Self::Vars) -> Vec<Handle>;

    /// Split traced arguments into their values and tape handles.
    fn unbind(vars: Self::Vars) -> (Self, Vec<Handle>);

    fn flatten_tangents(tangents: Self::Tangents) -> Vec<Vec<f64>>;

    /// Rebuild a tangent tuple; `adjoints[i]` holds the components of argument `i`.
    fn collect_tangents(adjoints: &[Vec<f64>]) -> Self::Tangents;
}

macro_rules! tuple_args {
    ($($T:ident $idx:tt),+) => {
        impl<$($T: Differentiable),+> DiffArgs for ($($T,)+) {
            type Vars = ($(Var<$T>,)+);
            type Tangents = ($($T::Tangent,)+);

            fn type_descs() -> Vec<TypeDesc> {
                vec![$(TypeDesc::of::<$T>()),+]
            }

            fn bind(self, tape: &mut Tape) -> Result<Self::Vars, AutodiffError> {
                Ok(($(tape.leaf(self.$idx)?,)+))
            }

            fn handles(vars: &Self::Vars) -> Vec<Handle> {
                vec![$(vars.$idx.handle()),+]
            }

            fn unbind(vars: Self::Vars) -> (Self, Vec<Handle>) {
                let handles = Self::handles(&vars);
                (($(vars.$idx.into_value(),)+), handles)
            }

            fn flatten_tangents(tangents: Self::Tangents) -> Vec<Vec<f64>> {
                vec![$(components_of(&tangents.$idx)),+]
            }

            fn collect_tangents(adjoints: &[Vec<f64>]) -> Self::Tangents {
                ($(<$T::Tangent as TangentVector>::read_components(&adjoints[$idx]),)+)
            }
        }
    };
}

tuple_args!(A 0);
tuple_args!(A 0, B 1);
tuple_args!(A 0, B 1, C 2);
tuple_args!(A 0, B 1, C 2, D 3);
