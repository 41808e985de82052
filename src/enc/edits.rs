//! Semantic edits between two compilation snapshots.
//!
//! A [`SemanticEdit`] correlates a symbol of the new compilation with one of the previous
//! compilation. The previous symbol is optional for updates: when it is omitted the emitter
//! finds it with the [`SymbolMatcher`](crate::enc::SymbolMatcher).

use std::collections::HashMap;

use crate::symbols::{FieldHandle, MethodHandle, SyntaxId, TypeHandle};

/// What an edit does to its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditKind {
    /// A symbol with no counterpart in the previous generation.
    Insert,
    /// A changed body or member of a symbol that keeps its token.
    Update,
    /// A symbol removed from the new compilation.
    Delete,
    /// A symbol re-emitted under a new definition.
    Replace,
}

/// A type, method or field of some compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolHandle {
    /// A type.
    Type(TypeHandle),
    /// A method.
    Method(MethodHandle),
    /// A field.
    Field(FieldHandle),
}

impl From<TypeHandle> for SymbolHandle {
    fn from(handle: TypeHandle) -> Self {
        SymbolHandle::Type(handle)
    }
}

impl From<MethodHandle> for SymbolHandle {
    fn from(handle: MethodHandle) -> Self {
        SymbolHandle::Method(handle)
    }
}

impl From<FieldHandle> for SymbolHandle {
    fn from(handle: FieldHandle) -> Self {
        SymbolHandle::Field(handle)
    }
}

/// Statement-level correlation of a method body: maps the syntax that declares a local in
/// the new body to the syntax that declared it in the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntaxMap {
    map: HashMap<SyntaxId, SyntaxId>,
}

impl SyntaxMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlates `new` with `previous`.
    pub fn insert(&mut self, new: SyntaxId, previous: SyntaxId) {
        self.map.insert(new, previous);
    }

    /// Builder form of [`SyntaxMap::insert`].
    #[must_use]
    pub fn with(mut self, new: SyntaxId, previous: SyntaxId) -> Self {
        self.insert(new, previous);
        self
    }

    /// The previous syntax correlated with `new`.
    #[must_use]
    pub fn previous(&self, new: SyntaxId) -> Option<SyntaxId> {
        self.map.get(&new).copied()
    }

    /// Number of correlations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if nothing is correlated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One declarative edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticEdit {
    /// What the edit does.
    pub kind: EditKind,
    /// Symbol in the previous compilation, required for deletes.
    pub previous: Option<SymbolHandle>,
    /// Symbol in the new compilation, absent for deletes.
    pub new: Option<SymbolHandle>,
    /// Local correlation for updated bodies.
    pub syntax_map: Option<SyntaxMap>,
}

impl SemanticEdit {
    /// Inserts `symbol` of the new compilation.
    pub fn insert(symbol: impl Into<SymbolHandle>) -> Self {
        Self {
            kind: EditKind::Insert,
            previous: None,
            new: Some(symbol.into()),
            syntax_map: None,
        }
    }

    /// Updates `symbol` of the new compilation; its previous counterpart is matched.
    pub fn update(symbol: impl Into<SymbolHandle>) -> Self {
        Self {
            kind: EditKind::Update,
            previous: None,
            new: Some(symbol.into()),
            syntax_map: None,
        }
    }

    /// Deletes `symbol` of the previous compilation.
    pub fn delete(symbol: impl Into<SymbolHandle>) -> Self {
        Self {
            kind: EditKind::Delete,
            previous: Some(symbol.into()),
            new: None,
            syntax_map: None,
        }
    }

    /// Replaces the previous definition of `symbol` with the new one.
    pub fn replace(symbol: impl Into<SymbolHandle>) -> Self {
        Self {
            kind: EditKind::Replace,
            previous: None,
            new: Some(symbol.into()),
            syntax_map: None,
        }
    }

    /// Supplies the previous symbol instead of matching it.
    #[must_use]
    pub fn with_previous(mut self, symbol: impl Into<SymbolHandle>) -> Self {
        self.previous = Some(symbol.into());
        self
    }

    /// Attaches a syntax map for local slot correlation.
    #[must_use]
    pub fn with_syntax_map(mut self, map: SyntaxMap) -> Self {
        self.syntax_map = Some(map);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::identity::BuildStamp,
        symbols::{CompilationBuilder, TypeSymbol},
    };

    #[test]
    fn constructors() {
        let mut builder = CompilationBuilder::new("A");
        let c = builder.add_type(TypeSymbol::class("", "C"));
        builder.build(BuildStamp::new(0, 0).unwrap()).unwrap();

        let update = SemanticEdit::update(c).with_syntax_map(SyntaxMap::new().with(SyntaxId(2), SyntaxId(1)));
        assert_eq!(update.kind, EditKind::Update);
        assert_eq!(update.new, Some(SymbolHandle::Type(c)));
        assert!(update.previous.is_none());
        assert_eq!(update.syntax_map.unwrap().previous(SyntaxId(2)), Some(SyntaxId(1)));

        let delete = SemanticEdit::delete(c);
        assert_eq!(delete.previous, Some(SymbolHandle::Type(c)));
        assert!(delete.new.is_none());
    }
}
