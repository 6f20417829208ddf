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

//! Structural identity of original functions.
//!
//! A [`FunctionSignature`] is the registry key for an original function: its
//! declared name, the syntactic form it takes, the receiver type (if any), the
//! ordered parameter types and the result type. Two functions with identical
//! parameter and result types but a different form or receiver are distinct
//! keys.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};

/// Runtime descriptor of a Rust type taking part in a signature.
#[derive(Clone, Copy, Debug)]
pub struct TypeDesc {
    id: TypeId,
    name: &'static str,
}

impl TypeDesc {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name with module paths stripped, e.g. `Wrapper` or `Vec<f32>`.
    pub fn short_name(&self) -> String {
        short_type_name(self.name)
    }
}

impl PartialEq for TypeDesc {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeDesc {}

impl Hash for TypeDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

impl Serialize for TypeDesc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name)
    }
}

fn short_type_name(full: &str) -> String {
    fn last_segment(path: &str) -> &str {
        path.rsplit("::").next().unwrap_or(path)
    }

    let mut out = String::with_capacity(full.len());
    let mut path = String::new();
    for ch in full.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == ':' {
            path.push(ch);
        } else {
            out.push_str(last_segment(&path));
            path.clear();
            out.push(ch);
        }
    }
    out.push_str(last_segment(&path));
    out
}

/// Syntactic form of a differentiable unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Free,
    Initializer,
    StaticMethod,
    InstanceMethod,
    SubscriptGetter,
    PropertyGetter,
}

impl FunctionKind {
    /// Whether the receiver is passed as the first argument of the original
    /// and of its derivative.
    pub fn binds_receiver(self) -> bool {
        matches!(
            self,
            FunctionKind::InstanceMethod | FunctionKind::SubscriptGetter | FunctionKind::PropertyGetter
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FunctionKind::Free => "free function",
            FunctionKind::Initializer => "initializer",
            FunctionKind::StaticMethod => "static method",
            FunctionKind::InstanceMethod => "instance method",
            FunctionKind::SubscriptGetter => "subscript getter",
            FunctionKind::PropertyGetter => "property getter",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Differentiation mode a derivative is registered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DerivativeKind {
    /// Vector-Jacobian product: returns the value and a pullback.
    Reverse,
}

impl fmt::Display for DerivativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DerivativeKind::Reverse => f.write_str("reverse-mode"),
        }
    }
}

/// Registry key identifying one original function.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FunctionSignature {
    pub name: &'static str,
    pub kind: FunctionKind,
    pub receiver: Option<TypeDesc>,
    pub params: Vec<TypeDesc>,
    pub result: TypeDesc,
}

impl FunctionSignature {
    /// Types the original (and therefore its derivative) takes as arguments,
    /// receiver first when the form binds one.
    pub fn argument_types(&self) -> Vec<TypeDesc> {
        let mut args = Vec::with_capacity(self.params.len() + 1);
        if self.kind.binds_receiver() {
            args.extend(self.receiver);
        }
        args.extend(self.params.iter().copied());
        args
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[TypeDesc]) -> fmt::Result {
    for (idx, ty) in types.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{ty}")?;
    }
    Ok(())
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = self.receiver.map(|ty| ty.short_name());
        match (self.kind, owner) {
            (FunctionKind::SubscriptGetter, Some(owner)) => {
                write!(f, "{owner}[")?;
                write_list(f, &self.params)?;
                write!(f, "] -> {}", self.result)
            }
            (FunctionKind::PropertyGetter, Some(owner)) => {
                write!(f, "{owner}.{}: {}", self.name, self.result)
            }
            (kind, owner) => {
                if kind == FunctionKind::StaticMethod {
                    f.write_str("static ")?;
                }
                if let Some(owner) = owner {
                    write!(f, "{owner}.")?;
                }
                write!(f, "{}(", self.name)?;
                write_list(f, &self.params)?;
                write!(f, ") -> {}", self.result)
            }
        }
    }
}
