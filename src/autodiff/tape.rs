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

//! Reverse-pass trace.
//!
//! The tape records one entry per differentiated operation during the forward
//! pass. Each entry owns a single-use pullback closure together with the slots
//! of its inputs and of its output. Unwinding walks the entries in strict
//! reverse creation order, invokes every pullback exactly once and
//! accumulates the adjoints it returns into the input slots.
//!
//! Adjoints live in the flat component layout of
//! [`TangentVector`](crate::TangentVector), so the tape itself is untyped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AutodiffError;
use crate::tangent::{Differentiable, TangentVector};

static NEXT_TAPE_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on the entries a tape preallocates room for.
pub const MAX_TAPE_CAPACITY: usize = 1 << 20;

/// Identity of one tape; values from different tapes never mix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TapeId(u64);

impl TapeId {
    fn fresh() -> Self {
        TapeId(NEXT_TAPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Index of a slot in the tape arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(usize);

/// Tape-qualified slot reference carried by every traced value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    tape: TapeId,
    slot: SlotId,
}

impl Handle {
    pub fn tape(&self) -> TapeId {
        self.tape
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }
}

/// A value produced during a trace.
///
/// Cloning a `Var` and using both copies fans the value out; their adjoints
/// are summed during unwinding.
#[derive(Clone, Debug)]
pub struct Var<T> {
    value: T,
    handle: Handle,
}

impl<T> Var<T> {
    pub(crate) fn new(value: T, handle: Handle) -> Self {
        Self { value, handle }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

/// Lifecycle of a tape: trace, seed, unwind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Tracing,
    Seeded,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Tracing => "tracing",
            Phase::Seeded => "seeded",
            Phase::Finished => "finished",
        })
    }
}

/// Type-erased pullback: output adjoint components in, one component vector
/// per input out.
pub(crate) type ErasedPullback = Box<dyn FnOnce(&[f64]) -> Vec<Vec<f64>>>;

struct Slot {
    dim: usize,
}

struct TapeEntry {
    label: String,
    inputs: Vec<SlotId>,
    output: SlotId,
    pullback: Option<ErasedPullback>,
}

/// Wengert-style tape of pullback closures.
pub struct Tape {
    id: TapeId,
    slots: Vec<Slot>,
    adjoints: Vec<Option<Vec<f64>>>,
    entries: Vec<TapeEntry>,
    phase: Phase,
    max_entries: Option<usize>,
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

impl Tape {
    pub fn new() -> Self {
        Self::with_limits(0, None)
    }

    /// Create a tape with room for `capacity` entries that refuses to record
    /// more than `max_entries`. Capacity is clamped to [`MAX_TAPE_CAPACITY`].
    pub fn with_limits(capacity: usize, max_entries: Option<usize>) -> Self {
        let capacity = capacity.min(MAX_TAPE_CAPACITY);
        Self {
            id: TapeId::fresh(),
            slots: Vec::with_capacity(capacity * 2),
            adjoints: Vec::with_capacity(capacity * 2),
            entries: Vec::with_capacity(capacity),
            phase: Phase::Tracing,
            max_entries,
        }
    }

    pub fn id(&self) -> TapeId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Entries whose pullback has not been invoked yet.
    pub fn pending_pullbacks(&self) -> usize {
        self.entries.iter().filter(|e| e.pullback.is_some()).count()
    }

    /// Labels of the recorded entries in creation order.
    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.label.as_str())
    }

    fn expect_phase(&self, phase: Phase, action: &'static str) -> Result<(), AutodiffError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(AutodiffError::InvalidPhase {
                phase: self.phase,
                action,
            })
        }
    }

    /// Verify that `handle` was created on this tape.
    pub fn check_handle(&self, handle: Handle) -> Result<SlotId, AutodiffError> {
        if handle.tape != self.id {
            return Err(AutodiffError::ForeignValue {
                expected: self.id.0,
                found: handle.tape.0,
            });
        }
        Ok(handle.slot)
    }

    fn alloc(&mut self, dim: usize) -> Handle {
        let slot = SlotId(self.slots.len());
        self.slots.push(Slot { dim });
        self.adjoints.push(None);
        Handle { tape: self.id, slot }
    }

    /// Register a value with no producing entry: a gradient input or a
    /// constant.
    pub fn leaf<T: Differentiable>(&mut self, value: T) -> Result<Var<T>, AutodiffError> {
        self.expect_phase(Phase::Tracing, "register a value")?;
        let handle = self.alloc(<T::Tangent as TangentVector>::DIM);
        Ok(Var::new(value, handle))
    }

    /// Append an entry whose output has `output_dim` tangent components.
    pub(crate) fn record(
        &mut self,
        label: String,
        inputs: &[Handle],
        output_dim: usize,
        pullback: ErasedPullback,
    ) -> Result<Handle, AutodiffError> {
        self.expect_phase(Phase::Tracing, "record an operation")?;
        if let Some(limit) = self.max_entries {
            if self.entries.len() >= limit {
                return Err(AutodiffError::TapeLimitExceeded { limit });
            }
        }
        let inputs = inputs
            .iter()
            .map(|h| self.check_handle(*h))
            .collect::<Result<Vec<_>, _>>()?;
        let output = self.alloc(output_dim);
        log::trace!(
            "tape {}: entry {} `{label}` {:?} -> {:?}",
            self.id.0,
            self.entries.len(),
            inputs,
            output.slot
        );
        self.entries.push(TapeEntry {
            label,
            inputs,
            output: output.slot,
            pullback: Some(pullback),
        });
        Ok(output)
    }

    /// Inject the output adjoint. Moves the tape from tracing to seeded.
    pub fn seed(&mut self, output: Handle, components: Vec<f64>) -> Result<(), AutodiffError> {
        self.expect_phase(Phase::Tracing, "seed the output")?;
        let slot = self.check_handle(output)?;
        let expected = self.slots[slot.0].dim;
        if components.len() != expected {
            return Err(AutodiffError::InvalidSeed {
                expected,
                found: components.len(),
            });
        }
        self.adjoints[slot.0] = Some(components);
        self.phase = Phase::Seeded;
        Ok(())
    }

    fn accumulate(&mut self, slot: SlotId, grad: &[f64]) {
        match &mut self.adjoints[slot.0] {
            Some(existing) => {
                for (e, g) in existing.iter_mut().zip(grad) {
                    *e += g;
                }
            }
            None => self.adjoints[slot.0] = Some(grad.to_vec()),
        }
    }

    /// Run every pullback once, newest first.
    ///
    /// A pullback whose output received no adjoint is invoked with zeros.
    pub fn unwind(&mut self) -> Result<(), AutodiffError> {
        match self.phase {
            Phase::Seeded => {}
            Phase::Finished => return Err(AutodiffError::PullbackReused { tape: self.id.0 }),
            Phase::Tracing => {
                return Err(AutodiffError::InvalidPhase {
                    phase: self.phase,
                    action: "unwind",
                })
            }
        }
        self.phase = Phase::Finished;

        for idx in (0..self.entries.len()).rev() {
            let entry = &mut self.entries[idx];
            let Some(pullback) = entry.pullback.take() else {
                return Err(AutodiffError::PullbackReused { tape: self.id.0 });
            };
            let output = entry.output;
            let inputs = entry.inputs.clone();

            let d_out = self.adjoints[output.0]
                .clone()
                .unwrap_or_else(|| vec![0.0; self.slots[output.0].dim]);
            log::trace!("tape {}: pullback {idx} `{}`", self.id.0, self.entries[idx].label);
            let d_inputs = pullback(&d_out);

            if d_inputs.len() != inputs.len() {
                return Err(AutodiffError::ArityMismatch {
                    label: self.entries[idx].label.clone(),
                    expected: inputs.len(),
                    found: d_inputs.len(),
                });
            }
            for (index, (slot, grad)) in inputs.iter().zip(&d_inputs).enumerate() {
                let expected = self.slots[slot.0].dim;
                if grad.len() != expected {
                    return Err(AutodiffError::TangentShapeMismatch {
                        label: self.entries[idx].label.clone(),
                        index,
                        expected,
                        found: grad.len(),
                    });
                }
                self.accumulate(*slot, grad);
            }
        }
        Ok(())
    }

    /// Accumulated adjoint of a slot, if any gradient reached it.
    pub fn adjoint(&self, handle: Handle) -> Result<Option<&[f64]>, AutodiffError> {
        let slot = self.check_handle(handle)?;
        Ok(self.adjoints[slot.0].as_deref())
    }

    /// Accumulated adjoint of a slot, zeros when nothing reached it.
    pub fn adjoint_or_zero(&self, handle: Handle) -> Result<Vec<f64>, AutodiffError> {
        let slot = self.check_handle(handle)?;
        Ok(self.adjoints[slot.0]
            .clone()
            .unwrap_or_else(|| vec![0.0; self.slots[slot.0].dim]))
    }
}

impl fmt::Debug for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tape")
            .field("id", &self.id.0)
            .field("phase", &self.phase)
            .field("slots", &self.slots.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale_by(k: f64) -> ErasedPullback {
        Box::new(move |d: &[f64]| vec![vec![d[0] * k]])
    }

    #[test]
    fn leaves_allocate_slots_by_tangent_dim() {
        let mut tape = Tape::new();
        let x = tape.leaf(2.0f32).unwrap();
        assert_eq!(*x.value(), 2.0);
        assert_eq!(tape.num_slots(), 1);
        assert!(tape.is_empty());
    }

    #[test]
    fn unwind_chains_in_reverse_order() {
        let mut tape = Tape::new();
        let x = tape.leaf(1.0f64).unwrap();
        let y = tape.record("double".into(), &[x.handle()], 1, scale_by(2.0)).unwrap();
        let z = tape.record("triple".into(), &[y], 1, scale_by(3.0)).unwrap();
        tape.seed(z, vec![1.0]).unwrap();
        tape.unwind().unwrap();
        assert_eq!(tape.adjoint(x.handle()).unwrap(), Some(&[6.0][..]));
        assert_eq!(tape.pending_pullbacks(), 0);
        assert_eq!(tape.labels().collect::<Vec<_>>(), vec!["double", "triple"]);
    }

    #[test]
    fn fan_out_accumulates_adjoints() {
        let mut tape = Tape::new();
        let x = tape.leaf(1.0f64).unwrap();
        let sum = tape
            .record(
                "add".into(),
                &[x.handle(), x.handle()],
                1,
                Box::new(|d: &[f64]| vec![d.to_vec(), d.to_vec()]),
            )
            .unwrap();
        tape.seed(sum, vec![1.5]).unwrap();
        tape.unwind().unwrap();
        assert_eq!(tape.adjoint_or_zero(x.handle()).unwrap(), vec![3.0]);
    }

    #[test]
    fn unreached_pullbacks_run_with_zero_seed() {
        let mut tape = Tape::new();
        let x = tape.leaf(1.0f64).unwrap();
        let _unused = tape.record("dead".into(), &[x.handle()], 1, scale_by(5.0)).unwrap();
        let y = tape.leaf(4.0f64).unwrap();
        tape.seed(y.handle(), vec![1.0]).unwrap();
        tape.unwind().unwrap();
        assert_eq!(tape.pending_pullbacks(), 0);
        assert_eq!(tape.adjoint(x.handle()).unwrap(), Some(&[0.0][..]));
        assert_eq!(tape.adjoint(y.handle()).unwrap(), Some(&[1.0][..]));
    }

    #[test]
    fn second_unwind_is_a_reuse_violation() {
        let mut tape = Tape::new();
        let x = tape.leaf(1.0f64).unwrap();
        tape.seed(x.handle(), vec![1.0]).unwrap();
        tape.unwind().unwrap();
        let err = tape.unwind().unwrap_err();
        assert_eq!(err, AutodiffError::PullbackReused { tape: tape.id().get() });
    }

    #[test]
    fn phases_are_not_skipped() {
        let mut tape = Tape::new();
        let x = tape.leaf(1.0f64).unwrap();
        assert!(matches!(
            tape.unwind(),
            Err(AutodiffError::InvalidPhase { phase: Phase::Tracing, .. })
        ));
        tape.seed(x.handle(), vec![1.0]).unwrap();
        assert!(matches!(
            tape.leaf(2.0f64),
            Err(AutodiffError::InvalidPhase { phase: Phase::Seeded, .. })
        ));
    }

    #[test]
    fn seed_must_match_output_layout() {
        let mut tape = Tape::new();
        let x = tape.leaf(1.0f32).unwrap();
        assert_eq!(
            tape.seed(x.handle(), vec![1.0, 2.0]),
            Err(AutodiffError::InvalidSeed { expected: 1, found: 2 })
        );
    }

    #[test]
    fn handles_from_other_tapes_are_rejected() {
        let mut first = Tape::new();
        let mut second = Tape::new();
        let x = first.leaf(1.0f64).unwrap();
        let err = second
            .record("foreign".into(), &[x.handle()], 1, scale_by(1.0))
            .unwrap_err();
        assert!(matches!(err, AutodiffError::ForeignValue { .. }));
    }

    #[test]
    fn entry_limit_is_enforced() {
        let mut tape = Tape::with_limits(1, Some(1));
        let x = tape.leaf(1.0f64).unwrap();
        let y = tape.record("a".into(), &[x.handle()], 1, scale_by(1.0)).unwrap();
        assert_eq!(
            tape.record("b".into(), &[y], 1, scale_by(1.0)),
            Err(AutodiffError::TapeLimitExceeded { limit: 1 })
        );
    }

    #[test]
    fn oversized_capacity_is_clamped() {
        let mut tape = Tape::with_limits(usize::MAX / 2, None);
        let x = tape.leaf(1.0f64).unwrap();
        tape.record("a".into(), &[x.handle()], 1, scale_by(2.0)).unwrap();
        assert_eq!(tape.len(), 1);
    }

    #[test]
    fn wrong_adjoint_count_is_reported() {
        let mut tape = Tape::new();
        let x = tape.leaf(1.0f64).unwrap();
        let y = tape
            .record("broken".into(), &[x.handle()], 1, Box::new(|_: &[f64]| Vec::<Vec<f64>>::new()))
            .unwrap();
        tape.seed(y, vec![1.0]).unwrap();
        assert!(matches!(
            tape.unwind(),
            Err(AutodiffError::ArityMismatch { expected: 1, found: 0, .. })
        ));
    }
}
