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

//! Differentiable values and their tangent spaces.
//!
//! Every value that flows through a traced computation implements
//! [`Differentiable`]. Its tangent type implements [`TangentVector`], which
//! fixes a flat layout of `DIM` scalar components. The tape stores adjoints in
//! that flat layout; composite types lay their fields out one after another in
//! declaration order, so a struct's tangent decomposes and recomposes
//! field-wise without any reflection.

use std::fmt;

use num_traits::Float;

/// The tangent space of a differentiable type.
///
/// Addition must be associative and commutative with [`zero_tangent`] as the
/// identity.
///
/// [`zero_tangent`]: TangentVector::zero_tangent
pub trait TangentVector: Clone + fmt::Debug + PartialEq + 'static {
    /// Number of scalar components in the flat layout.
    const DIM: usize;

    fn zero_tangent() -> Self;

    fn add_tangent(&self, rhs: &Self) -> Self;

    /// Append exactly `DIM` components to `out`.
    fn write_components(&self, out: &mut Vec<f64>);

    /// Rebuild a tangent from exactly `DIM` components.
    fn read_components(src: &[f64]) -> Self;
}

/// A value with an associated tangent space.
pub trait Differentiable: Clone + fmt::Debug + 'static {
    type Tangent: TangentVector;

    /// Move the value along a tangent direction.
    fn move_by(&mut self, offset: &Self::Tangent);
}

/// Scalars are their own tangent space.
pub trait Scalar: Float + TangentVector + Differentiable<Tangent = Self> {}

macro_rules! scalar_tangent {
    ($($ty:ty),*) => {$(
        impl TangentVector for $ty {
            const DIM: usize = 1;

            fn zero_tangent() -> Self {
                0.0
            }

            fn add_tangent(&self, rhs: &Self) -> Self {
                *self + *rhs
            }

            fn write_components(&self, out: &mut Vec<f64>) {
                out.push(f64::from(*self));
            }

            #[allow(clippy::cast_possible_truncation)]
            fn read_components(src: &[f64]) -> Self {
                src[0] as $ty
            }
        }

        impl Differentiable for $ty {
            type Tangent = $ty;

            fn move_by(&mut self, offset: &Self::Tangent) {
                *self += *offset;
            }
        }

        impl Scalar for $ty {}
    )*};
}

scalar_tangent!(f32, f64);

/// Flatten a tangent into a fresh component vector.
pub fn components_of<T: TangentVector>(tangent: &T) -> Vec<f64> {
    let mut out = Vec::with_capacity(T::DIM);
    tangent.write_components(&mut out);
    out
}

/// Declare a struct together with its field-wise tangent struct.
///
/// Every field type must implement [`Differentiable`]. The tangent struct gets
/// one field per primal field, typed as that field's tangent, and derives
/// `Debug`, `Clone` and `PartialEq`. The primal struct must itself derive
/// `Clone` and `Debug`.
///
/// ```
/// pullback::differentiable_struct! {
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Point {
///         pub x: f32,
///         pub y: f32,
///     }
///     tangent PointTangent;
/// }
///
/// use pullback::TangentVector;
/// let t = PointTangent { x: 1.0, y: 2.0 }.add_tangent(&PointTangent { x: 3.0, y: 4.0 });
/// assert_eq!(t, PointTangent { x: 4.0, y: 6.0 });
/// assert_eq!(<PointTangent as TangentVector>::DIM, 2);
/// ```
#[macro_export]
macro_rules! differentiable_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($fvis:vis $field:ident : $fty:ty),* $(,)?
        }
        tangent $tangent:ident;
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $($fvis $field: $fty),*
        }

        #[derive(Debug, Clone, PartialEq)]
        $vis struct $tangent {
            $($fvis $field: <$fty as $crate::Differentiable>::Tangent),*
        }

        impl $crate::TangentVector for $tangent {
            const DIM: usize = 0 $(
                + <<$fty as $crate::Differentiable>::Tangent as $crate::TangentVector>::DIM
            )*;

            fn zero_tangent() -> Self {
                Self {
                    $($field: <<$fty as $crate::Differentiable>::Tangent as $crate::TangentVector>::zero_tangent()),*
                }
            }

            fn add_tangent(&self, rhs: &Self) -> Self {
                Self {
                    $($field: $crate::TangentVector::add_tangent(&self.$field, &rhs.$field)),*
                }
            }

            fn write_components(&self, out: &mut ::std::vec::Vec<f64>) {
                $($crate::TangentVector::write_components(&self.$field, out);)*
            }

            #[allow(unused_assignments)]
            fn read_components(src: &[f64]) -> Self {
                let mut offset = 0usize;
                $(
                    let dim = <<$fty as $crate::Differentiable>::Tangent as $crate::TangentVector>::DIM;
                    let $field = <<$fty as $crate::Differentiable>::Tangent as $crate::TangentVector>::read_components(
                        &src[offset..offset + dim],
                    );
                    offset += dim;
                )*
                Self { $($field),* }
            }
        }

        impl $crate::Differentiable for $name {
            type Tangent = $tangent;

            fn move_by(&mut self, offset: &Self::Tangent) {
                $($crate::Differentiable::move_by(&mut self.$field, &offset.$field);)*
            }
        }
    };
}
