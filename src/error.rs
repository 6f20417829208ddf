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

use crate::autodiff::Phase;
use crate::signature::DerivativeKind;

/// Errors returned by registration, tracing and unwinding.
///
/// Every error is local to the request that raised it; a failed trace or
/// unwind never mutates the registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AutodiffError {
    /// An opaque function was called during a trace but nothing is
    /// registered for its signature.
    #[error("missing derivative for opaque function `{signature}`")]
    MissingDerivative { signature: String },
    /// The derivative's argument or result types do not match the original.
    #[error("derivative registered for `{signature}` has type {found}, expected {expected}")]
    SignatureMismatch {
        signature: String,
        expected: String,
        found: String,
    },
    /// A derivative of the same kind is already registered for the signature.
    #[error("a {kind} derivative is already registered for `{signature}`")]
    RegistrationConflict {
        signature: String,
        kind: DerivativeKind,
    },
    /// The tape was already unwound; its pullbacks are single-use.
    #[error("pullbacks of tape {tape} were already invoked")]
    PullbackReused { tape: u64 },
    /// A pullback produced a different number of adjoints than its operation
    /// has inputs.
    #[error("pullback for `{label}` returned {found} adjoints, expected {expected}")]
    ArityMismatch {
        label: String,
        expected: usize,
        found: usize,
    },
    /// An adjoint does not fit the tangent layout of the input it targets.
    #[error("adjoint {index} of `{label}` has {found} components, expected {expected}")]
    TangentShapeMismatch {
        label: String,
        index: usize,
        expected: usize,
        found: usize,
    },
    /// The seed does not fit the tangent layout of the traced output.
    #[error("seed has {found} components, traced output has {expected}")]
    InvalidSeed { expected: usize, found: usize },
    /// A traced value was created on a different tape.
    #[error("value was traced on tape {found}, not on tape {expected}")]
    ForeignValue { expected: u64, found: u64 },
    /// The tape is not in the phase the operation requires.
    #[error("cannot {action} while the tape is {phase}")]
    InvalidPhase { phase: Phase, action: &'static str },
    /// The trace recorded more entries than configured.
    #[error("trace exceeded the limit of {limit} tape entries")]
    TapeLimitExceeded { limit: usize },
    /// The process-wide registry can only be installed once.
    #[error("a global derivative registry is already installed")]
    RegistryAlreadyInstalled,
}
