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

//! Derivative registry.
//!
//! Registration happens once, through a [`RegistryBuilder`], before any
//! differentiation request. [`RegistryBuilder::build`] freezes the entries
//! into a read-only [`Registry`] that is `Send + Sync` and can be shared by
//! concurrent traces, each with its own tape. A process-wide registry can be
//! installed once with [`install`].

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::autodiff::DiffArgs;
use crate::error::AutodiffError;
use crate::opaque::{Opaque, OpaqueFn};
use crate::signature::{DerivativeKind, FunctionSignature, TypeDesc};
use crate::tangent::Differentiable;

/// Boxed single-use pullback returned by a registered derivative.
pub type PullbackBox<A, R> =
    Box<dyn FnOnce(<R as Differentiable>::Tangent) -> <A as DiffArgs>::Tangents>;

type DerivativeFn<A, R> = dyn Fn(A) -> (R, PullbackBox<A, R>) + Send + Sync;

pub(crate) struct TypedDerivative<A: DiffArgs, R: Differentiable> {
    func: Box<DerivativeFn<A, R>>,
}

impl<A: DiffArgs, R: Differentiable> TypedDerivative<A, R> {
    pub(crate) fn invoke(&self, args: A) -> (R, PullbackBox<A, R>) {
        (self.func)(args)
    }
}

/// A registered derivative: given the original's arguments, returns the
/// primal value and a pullback.
#[derive(Clone)]
pub struct DerivativeEntry {
    kind: DerivativeKind,
    arguments: Vec<TypeDesc>,
    result: TypeDesc,
    derivative: Arc<dyn Any + Send + Sync>,
}

impl DerivativeEntry {
    pub fn new<A, R, D, P>(kind: DerivativeKind, derivative: D) -> Self
    where
        A: DiffArgs,
        R: Differentiable,
        D: Fn(A) -> (R, P) + Send + Sync + 'static,
        P: FnOnce(R::Tangent) -> A::Tangents + 'static,
    {
        let func: Box<DerivativeFn<A, R>> = Box::new(move |args: A| {
            let (value, pullback) = derivative(args);
            (value, Box::new(pullback) as PullbackBox<A, R>)
        });
        Self {
            kind,
            arguments: A::type_descs(),
            result: TypeDesc::of::<R>(),
            derivative: Arc::new(TypedDerivative { func }),
        }
    }

    pub fn kind(&self) -> DerivativeKind {
        self.kind
    }

    /// Argument types the derivative accepts, receiver first for forms that
    /// bind one.
    pub fn argument_types(&self) -> &[TypeDesc] {
        &self.arguments
    }

    pub fn result_type(&self) -> TypeDesc {
        self.result
    }

    pub(crate) fn typed<A: DiffArgs, R: Differentiable>(&self) -> Option<&TypedDerivative<A, R>> {
        self.derivative.downcast_ref::<TypedDerivative<A, R>>()
    }
}

impl fmt::Debug for DerivativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivativeEntry")
            .field("kind", &self.kind)
            .field("type", &render_type(&self.arguments, self.result))
            .finish_non_exhaustive()
    }
}

pub(crate) fn render_type(arguments: &[TypeDesc], result: TypeDesc) -> String {
    let args: Vec<String> = arguments.iter().map(ToString::to_string).collect();
    format!("({}) -> {result}", args.join(", "))
}

type Entries = HashMap<FunctionSignature, BTreeMap<DerivativeKind, DerivativeEntry>>;

/// Mutable registration phase of a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Entries,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `derivative` for `original`.
    ///
    /// For forms that bind a receiver the derivative takes the receiver as the
    /// first element of its argument tuple, like the original does.
    pub fn register<A, R, D, P>(
        &mut self,
        original: &OpaqueFn<A, R>,
        kind: DerivativeKind,
        derivative: D,
    ) -> Result<&mut Self, AutodiffError>
    where
        A: DiffArgs,
        R: Differentiable,
        D: Fn(A) -> (R, P) + Send + Sync + 'static,
        P: FnOnce(R::Tangent) -> A::Tangents + 'static,
    {
        let entry = DerivativeEntry::new::<A, R, D, P>(kind, derivative);
        self.register_entry(original.signature().clone(), entry)?;
        Ok(self)
    }

    /// Register a prebuilt entry, checking it against `signature`.
    pub fn register_entry(
        &mut self,
        signature: FunctionSignature,
        entry: DerivativeEntry,
    ) -> Result<(), AutodiffError> {
        let expected = signature.argument_types();
        if entry.arguments != expected || entry.result != signature.result {
            return Err(AutodiffError::SignatureMismatch {
                signature: signature.to_string(),
                expected: render_type(&expected, signature.result),
                found: render_type(&entry.arguments, entry.result),
            });
        }
        if self
            .entries
            .get(&signature)
            .is_some_and(|kinds| kinds.contains_key(&entry.kind))
        {
            return Err(AutodiffError::RegistrationConflict {
                signature: signature.to_string(),
                kind: entry.kind,
            });
        }
        log::debug!("registered {} derivative for `{signature}`", entry.kind);
        self.entries
            .entry(signature)
            .or_default()
            .insert(entry.kind, entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the registrations.
    pub fn build(self) -> Registry {
        Registry {
            entries: self.entries,
        }
    }
}

/// Read-only index from original function to registered derivative.
#[derive(Default)]
pub struct Registry {
    entries: Entries,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn lookup(
        &self,
        signature: &FunctionSignature,
        kind: DerivativeKind,
    ) -> Option<&DerivativeEntry> {
        self.entries.get(signature)?.get(&kind)
    }

    pub fn contains(&self, signature: &FunctionSignature, kind: DerivativeKind) -> bool {
        self.lookup(signature, kind).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered signatures, sorted by their display form.
    pub fn signatures(&self) -> Vec<&FunctionSignature> {
        let mut sigs: Vec<&FunctionSignature> = self.entries.keys().collect();
        sigs.sort_by_cached_key(|sig| sig.to_string());
        sigs
    }

    /// Fail with the first original that has no derivative of `kind`.
    ///
    /// Lets a caller report missing derivatives before tracing anything.
    pub fn ensure_registered(
        &self,
        originals: &[&dyn Opaque],
        kind: DerivativeKind,
    ) -> Result<(), AutodiffError> {
        for original in originals {
            let signature = original.signature();
            if !self.contains(signature, kind) {
                return Err(AutodiffError::MissingDerivative {
                    signature: signature.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.signatures().iter().map(|sig| sig.to_string()))
            .finish()
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Install the process-wide registry. Succeeds once.
pub fn install(registry: Registry) -> Result<&'static Registry, AutodiffError> {
    let mut installed = false;
    let global = GLOBAL.get_or_init(|| {
        installed = true;
        registry
    });
    if !installed {
        return Err(AutodiffError::RegistryAlreadyInstalled);
    }
    log::debug!("installed global registry with {} derivatives", global.len());
    Ok(global)
}

/// The process-wide registry, if one was installed.
pub fn global() -> Option<&'static Registry> {
    GLOBAL.get()
}
