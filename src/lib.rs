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

//! Derivative registration and reverse-mode pullbacks for opaque functions.
//!
//! Opaque functions ([`OpaqueFn`]) are primitives whose bodies the
//! differentiator never looks into. Each one gets a reverse-mode derivative
//! registered in a [`Registry`] under its [`FunctionSignature`]; traced
//! computations then call it through [`Tracer::apply`] and the drivers in
//! [`autodiff`] compose the registered pullbacks with the chain rule.
//!
//! ```
//! use pullback::{gradient, DerivativeKind, OpaqueFn, Registry};
//!
//! let multiply: OpaqueFn<(f32, f32), f32> = OpaqueFn::free("multiply", |(x, y)| x * y);
//!
//! let mut builder = Registry::builder();
//! builder
//!     .register(&multiply, DerivativeKind::Reverse, |(x, y): (f32, f32)| {
//!         (x * y, move |v: f32| (v * y, v * x))
//!     })
//!     .unwrap();
//! let registry = builder.build();
//!
//! let grads = gradient(&registry, (2.0f32, 3.0f32), |cx, (x, y)| cx.apply(&multiply, (x, y)));
//! assert_eq!(grads.unwrap(), (3.0, 2.0));
//! ```

pub mod autodiff;
pub mod config;
pub mod conformance;
pub mod error;
pub mod opaque;
pub mod registry;
pub mod signature;
pub mod tangent;

pub use autodiff::{
    gradient, gradient_with_options, pullback, pullback_with_options, value_with_gradient,
    DiffArgs, GradientOptions, Pullback, Tape, Tracer, Var,
};
pub use config::Config;
pub use error::AutodiffError;
pub use opaque::{Opaque, OpaqueFn};
pub use registry::{global, install, DerivativeEntry, PullbackBox, Registry, RegistryBuilder};
pub use signature::{DerivativeKind, FunctionKind, FunctionSignature, TypeDesc};
pub use tangent::{components_of, Differentiable, Scalar, TangentVector};
