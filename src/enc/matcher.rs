//! Structural symbol matching between two compilation snapshots.
//!
//! Handles are only meaningful inside the snapshot that issued them, so matching never
//! compares handles. A type matches by its full [`TypePath`](crate::symbols::TypePath); a
//! field by owner and name; a method by owner, name, generic arity, static-ness and the
//! [`TypeShape`](crate::symbols::TypeShape)s of its signature.
//!
//! The two snapshots need not share references. A counterpart overload whose signature
//! mentions a type that either side cannot resolve is skipped rather than failing the
//! match, so `F(object)` still matches when a sibling `F(Process)` became unresolvable.

use tracing::trace;

use crate::symbols::{Compilation, FieldHandle, MethodHandle, TypeHandle};

/// Result of matching a symbol against a counterpart compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolMatch<T> {
    /// Exactly one structurally equivalent counterpart.
    Found(T),
    /// No counterpart; the symbol is new.
    None,
    /// More than one counterpart remained after filtering.
    Ambiguous(Vec<T>),
}

impl<T: Copy> SymbolMatch<T> {
    /// The counterpart, if unique.
    #[must_use]
    pub fn found(&self) -> Option<T> {
        match self {
            SymbolMatch::Found(symbol) => Some(*symbol),
            _ => None,
        }
    }

    fn from_candidates(mut candidates: Vec<T>) -> Self {
        match candidates.len() {
            0 => SymbolMatch::None,
            1 => SymbolMatch::Found(candidates.remove(0)),
            _ => SymbolMatch::Ambiguous(candidates),
        }
    }
}

/// Finds the counterparts of `source` symbols in `counterpart`.
#[derive(Debug, Clone, Copy)]
pub struct SymbolMatcher<'a> {
    source: &'a Compilation,
    counterpart: &'a Compilation,
}

impl<'a> SymbolMatcher<'a> {
    /// Matches symbols of `source` against `counterpart`.
    #[must_use]
    pub fn new(source: &'a Compilation, counterpart: &'a Compilation) -> Self {
        Self {
            source,
            counterpart,
        }
    }

    /// Matches a type by full name and generic arity.
    #[must_use]
    pub fn match_type(&self, handle: TypeHandle) -> SymbolMatch<TypeHandle> {
        let (Some(path), Some(symbol)) = (self.source.type_path(handle), self.source.type_symbol(handle)) else {
            return SymbolMatch::None;
        };

        let candidate = self.counterpart.find_type(&path).filter(|candidate| {
            self.counterpart
                .type_symbol(*candidate)
                .is_some_and(|other| other.generic_arity == symbol.generic_arity)
        });

        trace!(r#type = %path, found = candidate.is_some(), "matched type");
        match candidate {
            Some(candidate) => SymbolMatch::Found(candidate),
            None => SymbolMatch::None,
        }
    }

    /// Matches a method by signature shape among the counterpart owner's overloads.
    #[must_use]
    pub fn match_method(&self, handle: MethodHandle) -> SymbolMatch<MethodHandle> {
        let Some(descriptor) = self.source.method_descriptor(handle) else {
            trace!(compilation = %self.source.id(), "method signature does not resolve in its own compilation");
            return SymbolMatch::None;
        };
        let Some(owner) = self.counterpart.find_type(&descriptor.owner) else {
            return SymbolMatch::None;
        };

        let candidates = self
            .counterpart
            .find_methods(owner, &descriptor.name)
            .into_iter()
            .filter(|candidate| {
                self.counterpart.method(*candidate).is_some_and(|method| {
                    method.generic_arity == descriptor.generic_arity
                        && method.params.len() == descriptor.params.len()
                        && method.is_static() == descriptor.is_static
                })
            })
            .filter(|candidate| {
                let Some(other) = self.counterpart.method_descriptor(*candidate) else {
                    trace!(method = %descriptor, "skipping overload with unresolvable signature");
                    return false;
                };

                let resolvable = other
                    .params
                    .iter()
                    .chain(std::iter::once(&other.ret))
                    .all(|shape| self.source.resolves(shape));
                if !resolvable {
                    trace!(method = %other, "skipping overload not resolvable in the source compilation");
                    return false;
                }

                other == descriptor
            })
            .collect::<Vec<_>>();

        trace!(method = %descriptor, candidates = candidates.len(), "matched method");
        SymbolMatch::from_candidates(candidates)
    }

    /// Matches a field by owner and name.
    #[must_use]
    pub fn match_field(&self, handle: FieldHandle) -> SymbolMatch<FieldHandle> {
        let Some(descriptor) = self.source.field_descriptor(handle) else {
            return SymbolMatch::None;
        };

        let candidate = self
            .counterpart
            .find_type(&descriptor.owner)
            .and_then(|owner| self.counterpart.find_field(owner, &descriptor.name));

        trace!(field = %descriptor, found = candidate.is_some(), "matched field");
        match candidate {
            Some(candidate) => SymbolMatch::Found(candidate),
            None => SymbolMatch::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::method::MethodAttributes,
        test::factories::{stamp, system_runtime},
        symbols::{
            CompilationBuilder, FieldSymbol, MetadataReference, MethodSymbol, TypeDescriptor,
            TypePath, TypeSymbol,
        },
    };

    fn process() -> TypeDescriptor {
        TypeDescriptor::external("System.Diagnostics", "Process")
    }

    fn with_overloads(references: Vec<MetadataReference>) -> (Compilation, Vec<MethodHandle>) {
        let mut builder = CompilationBuilder::new("App");
        for reference in references {
            builder.add_reference(reference);
        }
        let c = builder.add_type(TypeSymbol::class("", "C"));
        let methods = vec![
            builder.add_method(c, MethodSymbol::new("F", MethodAttributes::PUBLIC).param("p", process())),
            builder.add_method(
                c,
                MethodSymbol::new("F", MethodAttributes::PUBLIC).param("o", TypeDescriptor::object()),
            ),
        ];
        builder.add_field(c, FieldSymbol::new("x", 0x1, TypeDescriptor::int32()));
        (builder.build(stamp()).unwrap(), methods)
    }

    fn system() -> MetadataReference {
        system_runtime().export(TypePath::new("System.Diagnostics", "Process"), false)
    }

    #[test]
    fn types_match_by_path_not_handle() {
        let (old, _) = with_overloads(vec![system()]);
        let (new, _) = with_overloads(vec![system()]);

        let new_type = new.find_type(&TypePath::new("", "C")).unwrap();
        let old_type = old.find_type(&TypePath::new("", "C")).unwrap();
        assert_ne!(new_type, old_type);
        assert_eq!(SymbolMatcher::new(&new, &old).match_type(new_type), SymbolMatch::Found(old_type));
    }

    #[test]
    fn fewer_references_skip_unresolvable_overload() {
        let (old, old_methods) = with_overloads(vec![system()]);
        let (new, new_methods) = with_overloads(vec![system_runtime()]);

        let matcher = SymbolMatcher::new(&new, &old);
        assert_eq!(matcher.match_method(new_methods[1]), SymbolMatch::Found(old_methods[1]));
        assert_eq!(matcher.match_method(new_methods[0]), SymbolMatch::None);
    }

    #[test]
    fn more_references_skip_unresolvable_overload() {
        let (old, old_methods) = with_overloads(vec![system_runtime()]);
        let (new, new_methods) = with_overloads(vec![system()]);

        let matcher = SymbolMatcher::new(&new, &old);
        assert_eq!(matcher.match_method(new_methods[1]), SymbolMatch::Found(old_methods[1]));
        assert_eq!(matcher.match_method(new_methods[0]), SymbolMatch::None);
    }

    #[test]
    fn fields_match_by_name() {
        let (old, _) = with_overloads(vec![]);
        let (new, _) = with_overloads(vec![]);
        let new_field = new.find_field(new.find_type(&TypePath::new("", "C")).unwrap(), "x").unwrap();

        let found = SymbolMatcher::new(&new, &old).match_field(new_field).found().unwrap();
        assert_eq!(old.field(found).unwrap().name, "x");
    }

    #[test]
    fn identical_overloads_are_ambiguous() {
        let mut old = CompilationBuilder::new("App");
        let c = old.add_type(TypeSymbol::class("", "C"));
        let overload = |param: &str| MethodSymbol::new("F", MethodAttributes::PUBLIC).param(param, TypeDescriptor::int32());
        let first = old.add_method(c, overload("a"));
        let second = old.add_method(c, overload("b"));
        let old = old.build(stamp()).unwrap();

        let mut new = CompilationBuilder::new("App");
        let c = new.add_type(TypeSymbol::class("", "C"));
        let f = new.add_method(c, overload("a"));
        let new = new.build(stamp()).unwrap();

        let matched = SymbolMatcher::new(&new, &old).match_method(f);
        assert_eq!(matched, SymbolMatch::Ambiguous(vec![first, second]));
        assert_eq!(matched.found(), None);
    }

    #[test]
    fn static_mismatch_is_no_match() {
        let mut old = CompilationBuilder::new("App");
        let c = old.add_type(TypeSymbol::class("", "C"));
        old.add_method(c, MethodSymbol::new("G", MethodAttributes::PUBLIC));
        let old = old.build(stamp()).unwrap();

        let mut new = CompilationBuilder::new("App");
        let c = new.add_type(TypeSymbol::class("", "C"));
        let g = new.add_method(c, MethodSymbol::new("G", MethodAttributes::PUBLIC | MethodAttributes::STATIC));
        let new = new.build(stamp()).unwrap();

        assert_eq!(SymbolMatcher::new(&new, &old).match_method(g), SymbolMatch::None);
    }
}
