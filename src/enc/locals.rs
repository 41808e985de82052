//! Local variable slot layouts across generations.
//!
//! A running method keeps its locals in numbered slots. When a method body is updated, a
//! variable that survives the edit unchanged must stay in the slot it already had, or the
//! runtime would remap live state into the wrong place. [`LocalSlotAllocator`] builds the
//! new layout from the previous one:
//!
//! - a variable whose declaring syntax is correlated by the edit's
//!   [`SyntaxMap`](crate::enc::SyntaxMap) to a previous slot of the same shape reuses it
//! - every other variable gets a fresh slot appended after all existing ones
//! - previous slots nobody reclaims are retired: they stay in the signature with their old
//!   type and are never handed out again

use std::fmt;

use crate::{
    enc::SyntaxMap,
    metadata::{signatures::SigType, token::Token},
    symbols::{SyntaxId, TypeShape},
    Result,
};

/// One slot of a method's local signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSlot {
    /// Variable name, empty for retired slots and compiler temporaries.
    pub name: String,
    /// Structural type, compared when deciding whether a slot can be reused.
    pub shape: TypeShape,
    /// Type as written in the local signature.
    pub sig: SigType,
    /// Declaring syntax in the generation that last wrote this slot; `None` once retired.
    pub syntax: Option<SyntaxId>,
}

impl LocalSlot {
    /// Returns true if the slot can no longer be reclaimed.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.syntax.is_none()
    }
}

/// Source of the recorded local layout of generation-0 methods.
///
/// This is the debug-information collaborator: a PDB reader in a real host, the in-memory
/// [`ModuleMetadata`](crate::metadata::image::ModuleMetadata) in tests.
pub trait LocalSlotProvider: fmt::Debug + Send + Sync {
    /// Recorded slots of `method`, or `None` if nothing was recorded.
    fn local_slots(&self, method: Token) -> Option<Vec<LocalSlot>>;
}

/// Provider for images without debug information; no slot is ever reused.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocalSlots;

impl LocalSlotProvider for NoLocalSlots {
    fn local_slots(&self, _method: Token) -> Option<Vec<LocalSlot>> {
        None
    }
}

/// Builds the slot layout of one updated method body.
#[derive(Debug, Clone)]
pub struct LocalSlotAllocator<'a> {
    slots: Vec<LocalSlot>,
    reclaimable: Vec<bool>,
    syntax_map: Option<&'a SyntaxMap>,
}

impl<'a> LocalSlotAllocator<'a> {
    /// Starts from the `previous` layout. Without a syntax map nothing is correlated.
    #[must_use]
    pub fn new(previous: Vec<LocalSlot>, syntax_map: Option<&'a SyntaxMap>) -> Self {
        let reclaimable = previous.iter().map(|slot| !slot.is_retired()).collect();
        Self {
            slots: previous,
            reclaimable,
            syntax_map,
        }
    }

    /// Assigns a slot to a variable of the new body and returns its index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] when a method needs more than 65535 slots.
    pub fn allocate(
        &mut self,
        name: &str,
        shape: TypeShape,
        sig: SigType,
        syntax: Option<SyntaxId>,
    ) -> Result<u16> {
        let previous_syntax = syntax
            .zip(self.syntax_map)
            .and_then(|(syntax, map)| map.previous(syntax));

        if let Some(previous_syntax) = previous_syntax {
            let reused = self.slots.iter().enumerate().position(|(index, slot)| {
                self.reclaimable[index]
                    && slot.syntax == Some(previous_syntax)
                    && slot.shape == shape
            });

            if let Some(index) = reused {
                self.reclaimable[index] = false;
                self.slots[index] = LocalSlot {
                    name: name.to_string(),
                    shape,
                    sig,
                    syntax,
                };
                return Self::index(index);
            }
        }

        self.slots.push(LocalSlot {
            name: name.to_string(),
            shape,
            sig,
            syntax,
        });
        self.reclaimable.push(false);
        Self::index(self.slots.len() - 1)
    }

    fn index(index: usize) -> Result<u16> {
        u16::try_from(index).map_err(|_| malformed_error!("Method needs more than 65535 locals"))
    }

    /// Finishes the layout, retiring every previous slot that was not reclaimed.
    #[must_use]
    pub fn finish(self) -> Vec<LocalSlot> {
        self.slots
            .into_iter()
            .zip(self.reclaimable)
            .map(|(mut slot, unclaimed)| {
                if unclaimed {
                    slot.name.clear();
                    slot.syntax = None;
                }
                slot
            })
            .collect()
    }
}

/// Sig types of `slots`, in slot order.
pub(crate) fn slot_types(slots: &[LocalSlot]) -> Vec<SigType> {
    slots.iter().map(|slot| slot.sig.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::PrimitiveType;

    fn int32() -> (TypeShape, SigType) {
        (TypeShape::Primitive(PrimitiveType::I4), SigType::I4)
    }

    fn string() -> (TypeShape, SigType) {
        (TypeShape::Primitive(PrimitiveType::String), SigType::String)
    }

    fn previous() -> Vec<LocalSlot> {
        let (shape, sig) = int32();
        let (string_shape, string_sig) = string();
        vec![
            LocalSlot {
                name: "a".to_string(),
                shape: shape.clone(),
                sig: sig.clone(),
                syntax: Some(SyntaxId(1)),
            },
            LocalSlot {
                name: "b".to_string(),
                shape: string_shape,
                sig: string_sig,
                syntax: Some(SyntaxId(2)),
            },
        ]
    }

    #[test]
    fn correlated_variable_keeps_slot() {
        let mut map = SyntaxMap::new();
        map.insert(SyntaxId(20), SyntaxId(2));

        let mut allocator = LocalSlotAllocator::new(previous(), Some(&map));
        let (shape, sig) = string();
        assert_eq!(allocator.allocate("b", shape, sig, Some(SyntaxId(20))).unwrap(), 1);

        let slots = allocator.finish();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].syntax, Some(SyntaxId(20)));
        assert!(slots[0].is_retired());
    }

    #[test]
    fn changed_type_gets_fresh_slot() {
        let mut map = SyntaxMap::new();
        map.insert(SyntaxId(10), SyntaxId(1));

        let mut allocator = LocalSlotAllocator::new(previous(), Some(&map));
        let (shape, sig) = string();
        assert_eq!(allocator.allocate("a", shape, sig, Some(SyntaxId(10))).unwrap(), 2);
    }

    #[test]
    fn without_syntax_map_everything_appends() {
        let mut allocator = LocalSlotAllocator::new(previous(), None);
        let (shape, sig) = int32();
        assert_eq!(allocator.allocate("a", shape, sig, Some(SyntaxId(1))).unwrap(), 2);
        assert_eq!(allocator.finish().iter().filter(|slot| slot.is_retired()).count(), 2);
    }

    #[test]
    fn retired_slots_are_never_reused() {
        let mut retired = previous();
        retired[0].syntax = None;

        let mut map = SyntaxMap::new();
        map.insert(SyntaxId(10), SyntaxId(1));

        let mut allocator = LocalSlotAllocator::new(retired, Some(&map));
        let (shape, sig) = int32();
        assert_eq!(allocator.allocate("a", shape, sig, Some(SyntaxId(10))).unwrap(), 2);
    }
}
