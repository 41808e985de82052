//! Names of compiler-generated members across generations.
//!
//! Closure classes, lambda methods and their cache fields have no source declaration, so
//! the only thing connecting a synthesized member of generation 3 to the one emitted in
//! generation 1 is its structural key: the owner's [`TypePath`], the member's
//! [`SynthesizedRole`] and its ordinal within that owner and role. Owner handles are never
//! part of the key because every compilation snapshot issues fresh ones.
//!
//! A member is reused only when its shape is the same as the recorded one; a colliding
//! ordinal with a different shape gets a new member whose name carries the generation that
//! introduced it (`<>b__0#2`).

use std::collections::BTreeMap;

use tracing::trace;

use crate::{
    metadata::token::Token,
    symbols::{Compilation, SynthesizedShape, SynthesizedRole, TypePath, TypeShape},
};

/// Structural identity of a synthesized member slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SynthesizedMemberKey {
    /// Declaring type.
    pub owner: TypePath,
    /// Structural role.
    pub role: SynthesizedRole,
    /// Ordinal within the owner and role.
    pub ordinal: u32,
}

impl SynthesizedMemberKey {
    /// Creates a key.
    pub fn new(owner: TypePath, role: SynthesizedRole, ordinal: u32) -> Self {
        Self {
            owner,
            role,
            ordinal,
        }
    }
}

/// Compilation-independent shape of a synthesized member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SynthesizedShapeKey {
    /// A nested class.
    Type,
    /// A field of this type.
    Field(TypeShape),
    /// A static method with this signature.
    Method {
        /// Parameter shapes.
        params: Vec<TypeShape>,
        /// Return shape.
        ret: TypeShape,
    },
}

impl SynthesizedShapeKey {
    /// Shape of `shape` as seen from `compilation`, `None` if it mentions an unresolvable type.
    #[must_use]
    pub fn of(compilation: &Compilation, shape: &SynthesizedShape) -> Option<Self> {
        Some(match shape {
            SynthesizedShape::Type => SynthesizedShapeKey::Type,
            SynthesizedShape::Field(ty) => SynthesizedShapeKey::Field(compilation.shape_of(ty)?),
            SynthesizedShape::Method { params, ret, .. } => SynthesizedShapeKey::Method {
                params: params
                    .iter()
                    .map(|param| compilation.shape_of(param))
                    .collect::<Option<Vec<_>>>()?,
                ret: compilation.shape_of(ret)?,
            },
        })
    }
}

/// A synthesized member emitted in some generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedEntry {
    /// Emitted name.
    pub name: String,
    /// Shape it was emitted with.
    pub shape: SynthesizedShapeKey,
    /// Generation that introduced it.
    pub generation: u16,
    /// Definition token, once assigned.
    pub token: Option<Token>,
}

/// Registry of every synthesized member emitted so far in a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesizedMemberRegistry {
    entries: BTreeMap<SynthesizedMemberKey, Vec<SynthesizedEntry>>,
}

impl SynthesizedMemberRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name of the member at `(owner, role, ordinal)` with `shape`, creating it
    /// in `generation` if no such member exists. The flag is true for created members.
    pub fn resolve_or_create(
        &mut self,
        owner: &TypePath,
        role: SynthesizedRole,
        ordinal: u32,
        shape: &SynthesizedShapeKey,
        generation: u16,
    ) -> (String, bool) {
        let key = SynthesizedMemberKey::new(owner.clone(), role, ordinal);
        let entries = self.entries.entry(key).or_default();

        if let Some(entry) = entries.iter().find(|entry| entry.shape == *shape) {
            trace!(owner = %owner, name = %entry.name, "reusing synthesized member");
            return (entry.name.clone(), false);
        }

        let name = if generation == 0 {
            format!("{}{}", role.prefix(), ordinal)
        } else {
            format!("{}{}#{}", role.prefix(), ordinal, generation)
        };

        trace!(owner = %owner, name = %name, generation, "creating synthesized member");
        entries.push(SynthesizedEntry {
            name: name.clone(),
            shape: shape.clone(),
            generation,
            token: None,
        });
        (name, true)
    }

    /// Looks up the member at `(owner, role, ordinal)` with `shape`.
    #[must_use]
    pub fn get(
        &self,
        owner: &TypePath,
        role: SynthesizedRole,
        ordinal: u32,
        shape: &SynthesizedShapeKey,
    ) -> Option<&SynthesizedEntry> {
        self.entries
            .get(&SynthesizedMemberKey::new(owner.clone(), role, ordinal))?
            .iter()
            .find(|entry| entry.shape == *shape)
    }

    /// Records the definition token of a member created by [`Self::resolve_or_create`].
    pub fn set_token(
        &mut self,
        owner: &TypePath,
        role: SynthesizedRole,
        ordinal: u32,
        shape: &SynthesizedShapeKey,
        token: Token,
    ) {
        if let Some(entry) = self
            .entries
            .get_mut(&SynthesizedMemberKey::new(owner.clone(), role, ordinal))
            .and_then(|entries| entries.iter_mut().find(|entry| entry.shape == *shape))
        {
            entry.token = Some(token);
        }
    }

    /// Iterates over all members, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&SynthesizedMemberKey, &SynthesizedEntry)> {
        self.entries
            .iter()
            .flat_map(|(key, entries)| entries.iter().map(move |entry| (key, entry)))
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Returns true if no member was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
