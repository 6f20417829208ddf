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

//! Opaque function marker.
//!
//! An [`OpaqueFn`] pairs an original function body with its
//! [`FunctionSignature`]. The tracer never looks inside the body: a call
//! through [`Tracer::apply`](crate::Tracer::apply) is replaced by the
//! derivative registered for the signature. Outside of differentiation the
//! body runs normally through [`OpaqueFn::call`].

use std::fmt;

use crate::autodiff::DiffArgs;
use crate::signature::{FunctionKind, FunctionSignature, TypeDesc};
use crate::tangent::Differentiable;

/// Anything that carries the signature of an opaque original function.
pub trait Opaque {
    fn signature(&self) -> &FunctionSignature;
}

/// An original function whose derivative is supplied by registration.
///
/// `A` is the argument tuple. For instance methods, subscript getters and
/// property getters the receiver is the first element of `A`.
pub struct OpaqueFn<A, R> {
    signature: FunctionSignature,
    body: fn(A) -> R,
}

impl<A: DiffArgs, R: Differentiable> OpaqueFn<A, R> {
    fn with_receiver(
        name: &'static str,
        kind: FunctionKind,
        receiver: Option<TypeDesc>,
        body: fn(A) -> R,
    ) -> Self {
        let mut params = A::type_descs();
        if kind.binds_receiver() {
            params.remove(0);
        }
        Self {
            signature: FunctionSignature {
                name,
                kind,
                receiver,
                params,
                result: TypeDesc::of::<R>(),
            },
            body,
        }
    }

    pub fn free(name: &'static str, body: fn(A) -> R) -> Self {
        Self::with_receiver(name, FunctionKind::Free, None, body)
    }

    /// An initializer of `R`.
    pub fn initializer(body: fn(A) -> R) -> Self {
        Self::with_receiver("init", FunctionKind::Initializer, Some(TypeDesc::of::<R>()), body)
    }

    /// A static method declared on `S`.
    pub fn static_method<S: 'static>(name: &'static str, body: fn(A) -> R) -> Self {
        Self::with_receiver(name, FunctionKind::StaticMethod, Some(TypeDesc::of::<S>()), body)
    }

    /// An instance method; the first element of `A` is the receiver.
    pub fn instance_method(name: &'static str, body: fn(A) -> R) -> Self {
        let receiver = A::type_descs()[0];
        Self::with_receiver(name, FunctionKind::InstanceMethod, Some(receiver), body)
    }

    /// A subscript getter; the first element of `A` is the receiver.
    pub fn subscript_getter(body: fn(A) -> R) -> Self {
        let receiver = A::type_descs()[0];
        Self::with_receiver("subscript", FunctionKind::SubscriptGetter, Some(receiver), body)
    }

    /// Run the original body.
    pub fn call(&self, args: A) -> R {
        (self.body)(args)
    }
}

impl<S: Differentiable, R: Differentiable> OpaqueFn<(S,), R> {
    /// A computed property getter on `S`.
    pub fn property_getter(name: &'static str, body: fn((S,)) -> R) -> Self {
        Self::with_receiver(
            name,
            FunctionKind::PropertyGetter,
            Some(TypeDesc::of::<S>()),
            body,
        )
    }
}

impl<A, R> OpaqueFn<A, R> {
    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }
}

impl<A, R> Opaque for OpaqueFn<A, R> {
    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }
}

impl<A, R> Clone for OpaqueFn<A, R> {
    fn clone(&self) -> Self {
        Self {
            signature: self.signature.clone(),
            body: self.body,
        }
    }
}

impl<A, R> fmt::Debug for OpaqueFn<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueFn")
            .field("signature", &self.signature.to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Meters(f64);

    impl Differentiable for Meters {
        type Tangent = f64;

        fn move_by(&mut self, offset: &f64) {
            self.0 += offset;
        }
    }

    #[test]
    fn constructors_fill_the_signature() {
        let scale: OpaqueFn<(Meters, f64), f64> =
            OpaqueFn::instance_method("scale", |(m, k)| m.0 * k);
        let sig = scale.signature();
        assert_eq!(sig.kind, FunctionKind::InstanceMethod);
        assert_eq!(sig.receiver, Some(TypeDesc::of::<Meters>()));
        assert_eq!(sig.params, vec![TypeDesc::of::<f64>()]);

        let init: OpaqueFn<(f64,), Meters> = OpaqueFn::initializer(|(x,)| Meters(x));
        assert_eq!(init.signature().receiver, Some(TypeDesc::of::<Meters>()));
        assert_eq!(init.signature().params, vec![TypeDesc::of::<f64>()]);

        let length: OpaqueFn<(Meters,), f64> = OpaqueFn::property_getter("length", |(m,)| m.0);
        assert!(length.signature().params.is_empty());
    }

    #[test]
    fn call_runs_the_original_body() {
        let square: OpaqueFn<(f64,), f64> = OpaqueFn::free("square", |(x,)| x * x);
        assert_eq!(square.call((3.0,)), 9.0);
    }
}
