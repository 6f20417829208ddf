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

//! Reverse-mode differentiation over registered derivatives.
//!
//! A [`Tracer`] records every differentiable operation of one computation on
//! its own [`Tape`]. Opaque functions go through [`Tracer::apply`], which
//! looks up the registered derivative, evaluates it, and records the pullback
//! it returns. The drivers ([`gradient`], [`pullback`], [`value_with_gradient`])
//! bind the inputs, run the traced closure, seed the output and unwind the
//! tape once in reverse order.
//!
//! Tapes are per-request and never shared; a frozen
//! [`Registry`](crate::Registry) can be read from many threads at once.

mod args;
mod driver;
mod engine;
mod rules;
mod tape;

pub use args::DiffArgs;
pub use driver::{
    gradient, gradient_with_options, pullback, pullback_with_options, value_with_gradient,
    GradientOptions, Pullback,
};
pub use engine::Tracer;
pub use tape::{Handle, Phase, SlotId, Tape, TapeId, Var, MAX_TAPE_CAPACITY};
