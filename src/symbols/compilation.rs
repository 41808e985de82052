//! Immutable compilation snapshots and their symbols.
//!
//! A [`Compilation`] is what the binder hands to the emitter: the assembly's identity,
//! its declared references, and the declared types, methods and fields with their lowered
//! bodies. Every snapshot receives a process-unique [`CompilationId`] and every handle it
//! issues carries that id, so a [`TypeHandle`] of one snapshot never equals a handle of
//! another even when both declare the same source text. Comparing symbols across snapshots
//! goes through structural descriptors instead (see [`crate::enc::SymbolMatcher`]).
//!
//! # Example
//!
//! ```rust
//! use cildelta::prelude::*;
//!
//! let mut builder = CompilationBuilder::new("App");
//! let program = builder.add_type(TypeSymbol::class("", "Program"));
//! builder.add_method(
//!     program,
//!     MethodSymbol::new("Main", MethodAttributes::PUBLIC | MethodAttributes::STATIC)
//!         .body(LoweredBody::from_instructions(vec![Instruction::Ret])),
//! );
//! let compilation = builder.build(BuildStamp::new(0, 0)?)?;
//!
//! assert_eq!(compilation.find_type(&TypePath::new("", "Program")), Some(program));
//! # Ok::<(), cildelta::Error>(())
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use sha1::{Digest, Sha1};
use tracing::debug;
use uguid::Guid;

use crate::{
    metadata::{
        identity::{AssemblyIdentity, AssemblyVersion, BuildStamp, Identity, VersionPattern},
        method::{MethodAttributes, MethodImplAttributes},
        tables::{TableId, TypeAttributes},
        token::Token,
    },
    symbols::{
        ExternalType, FieldDescriptor, LoweredBody, MetadataReference, MethodDescriptor,
        SynthesizedMember, TypeDescriptor, TypePath, TypeShape,
    },
    Error, Result,
};

static NEXT_COMPILATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a compilation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompilationId(u64);

impl CompilationId {
    fn next() -> Self {
        CompilationId(NEXT_COMPILATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the id.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CompilationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

macro_rules! symbol_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            compilation: CompilationId,
            index: u32,
        }

        impl $name {
            /// The compilation that issued this handle.
            #[must_use]
            pub fn compilation(&self) -> CompilationId {
                self.compilation
            }

            fn index(&self) -> usize {
                self.index as usize
            }
        }
    };
}

symbol_handle!(
    /// Handle of a type declared in a [`Compilation`].
    TypeHandle
);
symbol_handle!(
    /// Handle of a method declared in a [`Compilation`].
    MethodHandle
);
symbol_handle!(
    /// Handle of a field declared in a [`Compilation`].
    FieldHandle
);

/// A declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSymbol {
    /// Namespace, empty for nested types and the global namespace.
    pub namespace: String,
    /// Metadata name, including the generic arity suffix.
    pub name: String,
    /// Number of generic parameters.
    pub generic_arity: u32,
    /// `TypeAttributes` bits.
    pub flags: u32,
    /// Value types get `valuetype` in signatures.
    pub is_value_type: bool,
    /// Base type; `None` writes a null `extends`.
    pub base: Option<TypeDescriptor>,
    enclosing: Option<TypeHandle>,
    methods: Vec<MethodHandle>,
    fields: Vec<FieldHandle>,
}

impl TypeSymbol {
    /// A public class without base type.
    pub fn class(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            generic_arity: 0,
            flags: TypeAttributes::PUBLIC | TypeAttributes::CLASS,
            is_value_type: false,
            base: None,
            enclosing: None,
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Replaces the `TypeAttributes` bits.
    #[must_use]
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the base type.
    #[must_use]
    pub fn extends(mut self, base: TypeDescriptor) -> Self {
        self.base = Some(base);
        self
    }

    /// Marks the type generic with `arity` parameters.
    #[must_use]
    pub fn generic(mut self, arity: u32) -> Self {
        self.generic_arity = arity;
        self
    }

    /// Marks the type as a value type.
    #[must_use]
    pub fn value_type(mut self) -> Self {
        self.is_value_type = true;
        self
    }

    /// Enclosing type of a nested type.
    #[must_use]
    pub fn enclosing(&self) -> Option<TypeHandle> {
        self.enclosing
    }

    /// Methods in declaration order.
    #[must_use]
    pub fn methods(&self) -> &[MethodHandle] {
        &self.methods
    }

    /// Fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldHandle] {
        &self.fields
    }
}

/// A named parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    pub ty: TypeDescriptor,
}

/// A declared method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSymbol {
    /// Method name.
    pub name: String,
    /// `MethodAttributes`.
    pub flags: MethodAttributes,
    /// `MethodImplAttributes`.
    pub impl_flags: MethodImplAttributes,
    /// Number of generic method parameters.
    pub generic_arity: u32,
    /// Parameters in order.
    pub params: Vec<Parameter>,
    /// Return type.
    pub ret: TypeDescriptor,
    /// Lowered body, `None` for abstract methods.
    pub body: Option<LoweredBody>,
    /// Compiler-generated members this method's lowering declares.
    pub synthesized: Vec<SynthesizedMember>,
}

impl MethodSymbol {
    /// A parameterless method returning `void`.
    pub fn new(name: impl Into<String>, flags: MethodAttributes) -> Self {
        Self {
            name: name.into(),
            flags,
            impl_flags: MethodImplAttributes::IL,
            generic_arity: 0,
            params: Vec::new(),
            ret: TypeDescriptor::void(),
            body: None,
            synthesized: Vec::new(),
        }
    }

    /// Appends a parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            ty,
        });
        self
    }

    /// Sets the return type.
    #[must_use]
    pub fn returns(mut self, ret: TypeDescriptor) -> Self {
        self.ret = ret;
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: LoweredBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Declares a synthesized member produced by this method's lowering.
    #[must_use]
    pub fn synthesizes(mut self, member: SynthesizedMember) -> Self {
        self.synthesized.push(member);
        self
    }

    /// Marks the method generic with `arity` parameters.
    #[must_use]
    pub fn generic(mut self, arity: u32) -> Self {
        self.generic_arity = arity;
        self
    }

    /// Returns true for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSymbol {
    /// Field name.
    pub name: String,
    /// `FieldAttributes` bits.
    pub flags: u16,
    /// Field type.
    pub ty: TypeDescriptor,
}

impl FieldSymbol {
    /// Creates a field.
    pub fn new(name: impl Into<String>, flags: u16, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            flags,
            ty,
        }
    }
}

/// An immutable compilation snapshot.
#[derive(Debug, Clone)]
pub struct Compilation {
    id: CompilationId,
    assembly_name: String,
    module_name: String,
    version: AssemblyVersion,
    version_pattern: VersionPattern,
    culture: Option<String>,
    public_key: Option<Identity>,
    mvid: Guid,
    references: Vec<MetadataReference>,
    types: Vec<TypeSymbol>,
    methods: Vec<(TypeHandle, MethodSymbol)>,
    fields: Vec<(TypeHandle, FieldSymbol)>,
    type_index: HashMap<TypePath, TypeHandle>,
}

impl Compilation {
    /// The snapshot's id.
    #[must_use]
    pub fn id(&self) -> CompilationId {
        self.id
    }

    /// Simple name of the assembly being compiled.
    #[must_use]
    pub fn assembly_name(&self) -> &str {
        &self.assembly_name
    }

    /// Name of the (single) module.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The assembly version, resolved from its pattern when the snapshot was built.
    #[must_use]
    pub fn version(&self) -> AssemblyVersion {
        self.version
    }

    /// The declared version pattern.
    #[must_use]
    pub fn version_pattern(&self) -> VersionPattern {
        self.version_pattern
    }

    /// Module version id.
    #[must_use]
    pub fn mvid(&self) -> Guid {
        self.mvid
    }

    /// Identity of the assembly being compiled.
    #[must_use]
    pub fn identity(&self) -> AssemblyIdentity {
        AssemblyIdentity::new(
            self.assembly_name.clone(),
            self.version,
            self.culture.clone(),
            self.public_key.clone(),
        )
    }

    /// Declared references, in declaration order.
    #[must_use]
    pub fn references(&self) -> &[MetadataReference] {
        &self.references
    }

    /// Iterates over the declared types in declaration order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn types(&self) -> impl Iterator<Item = (TypeHandle, &TypeSymbol)> + '_ {
        self.types.iter().enumerate().map(move |(index, symbol)| {
            (
                TypeHandle {
                    compilation: self.id,
                    index: index as u32,
                },
                symbol,
            )
        })
    }

    /// Looks up a type; `None` for handles of other compilations.
    #[must_use]
    pub fn type_symbol(&self, handle: TypeHandle) -> Option<&TypeSymbol> {
        if handle.compilation != self.id {
            return None;
        }
        self.types.get(handle.index())
    }

    /// Looks up a method; `None` for handles of other compilations.
    #[must_use]
    pub fn method(&self, handle: MethodHandle) -> Option<&MethodSymbol> {
        if handle.compilation != self.id {
            return None;
        }
        self.methods.get(handle.index()).map(|(_, method)| method)
    }

    /// Looks up a field; `None` for handles of other compilations.
    #[must_use]
    pub fn field(&self, handle: FieldHandle) -> Option<&FieldSymbol> {
        if handle.compilation != self.id {
            return None;
        }
        self.fields.get(handle.index()).map(|(_, field)| field)
    }

    /// Declaring type of a method.
    #[must_use]
    pub fn method_owner(&self, handle: MethodHandle) -> Option<TypeHandle> {
        if handle.compilation != self.id {
            return None;
        }
        self.methods.get(handle.index()).map(|(owner, _)| *owner)
    }

    /// Declaring type of a field.
    #[must_use]
    pub fn field_owner(&self, handle: FieldHandle) -> Option<TypeHandle> {
        if handle.compilation != self.id {
            return None;
        }
        self.fields.get(handle.index()).map(|(owner, _)| *owner)
    }

    /// Full name of a declared type.
    #[must_use]
    pub fn type_path(&self, handle: TypeHandle) -> Option<TypePath> {
        let symbol = self.type_symbol(handle)?;
        match symbol.enclosing {
            Some(enclosing) => Some(self.type_path(enclosing)?.nested(symbol.name.clone())),
            None => Some(TypePath::new(symbol.namespace.clone(), symbol.name.clone())),
        }
    }

    /// Finds a declared type by full name.
    #[must_use]
    pub fn find_type(&self, path: &TypePath) -> Option<TypeHandle> {
        self.type_index.get(path).copied()
    }

    /// Finds the methods of `owner` called `name`, in declaration order.
    #[must_use]
    pub fn find_methods(&self, owner: TypeHandle, name: &str) -> Vec<MethodHandle> {
        self.type_symbol(owner)
            .map(|symbol| {
                symbol
                    .methods
                    .iter()
                    .copied()
                    .filter(|handle| self.method(*handle).is_some_and(|m| m.name == name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Finds the field of `owner` called `name`.
    #[must_use]
    pub fn find_field(&self, owner: TypeHandle, name: &str) -> Option<FieldHandle> {
        self.type_symbol(owner)?
            .fields
            .iter()
            .copied()
            .find(|handle| self.field(*handle).is_some_and(|f| f.name == name))
    }

    /// Resolves an external type to the index of the reference that exports it.
    ///
    /// An aliased type only resolves through the reference carrying that alias; an
    /// unaliased one only through references without an alias, the first exporter winning.
    #[must_use]
    pub fn resolve_external(&self, ty: &ExternalType) -> Option<usize> {
        self.references.iter().position(|reference| {
            reference.alias.as_deref() == ty.alias.as_deref() && reference.exports(&ty.path)
        })
    }

    /// Returns true if the external type is a value type in its defining reference.
    #[must_use]
    pub fn is_external_value_type(&self, ty: &ExternalType) -> bool {
        self.resolve_external(ty)
            .and_then(|index| self.references[index].exported_types.get(&ty.path).copied())
            .unwrap_or(false)
    }

    /// Index of the core library reference, if one is declared.
    #[must_use]
    pub fn core_library(&self) -> Option<usize> {
        self.references
            .iter()
            .position(|reference| reference.core_library)
    }

    /// Structural shape of `ty`, or `None` if it names something this compilation cannot
    /// resolve (a missing type, a type no reference exports, a foreign source handle).
    #[must_use]
    pub fn shape_of(&self, ty: &TypeDescriptor) -> Option<TypeShape> {
        Some(match ty {
            TypeDescriptor::Primitive(primitive) => TypeShape::Primitive(*primitive),
            TypeDescriptor::Source(handle) => TypeShape::Named(self.type_path(*handle)?),
            TypeDescriptor::External(external) => {
                self.resolve_external(external)?;
                TypeShape::Named(external.path.clone())
            }
            TypeDescriptor::GenericInst {
                definition,
                arguments,
            } => {
                let TypeShape::Named(definition) = self.shape_of(definition)? else {
                    return None;
                };
                TypeShape::GenericInst {
                    definition,
                    arguments: arguments
                        .iter()
                        .map(|argument| self.shape_of(argument))
                        .collect::<Option<Vec<_>>>()?,
                }
            }
            TypeDescriptor::SzArray(inner) => TypeShape::SzArray(Box::new(self.shape_of(inner)?)),
            TypeDescriptor::ByRef(inner) => TypeShape::ByRef(Box::new(self.shape_of(inner)?)),
            TypeDescriptor::TypeParam(index) => TypeShape::TypeParam(*index),
            TypeDescriptor::MethodParam(index) => TypeShape::MethodParam(*index),
            TypeDescriptor::Missing(_) => return None,
        })
    }

    /// Returns true if every named type inside `shape` is declared here or exported by one
    /// of the declared references.
    #[must_use]
    pub fn resolves(&self, shape: &TypeShape) -> bool {
        let mut resolved = true;
        shape.for_each_named(&mut |path| {
            if self.find_type(path).is_none()
                && !self.references.iter().any(|reference| reference.exports(path))
            {
                resolved = false;
            }
        });
        resolved
    }

    /// Structural key of a method, or `None` if its signature mentions a type this
    /// compilation cannot resolve.
    #[must_use]
    pub fn method_descriptor(&self, handle: MethodHandle) -> Option<MethodDescriptor> {
        let method = self.method(handle)?;
        let owner = self.type_path(self.method_owner(handle)?)?;

        Some(MethodDescriptor {
            owner,
            name: method.name.clone(),
            generic_arity: method.generic_arity,
            is_static: method.is_static(),
            params: method
                .params
                .iter()
                .map(|param| self.shape_of(&param.ty))
                .collect::<Option<Vec<_>>>()?,
            ret: self.shape_of(&method.ret)?,
        })
    }

    /// Structural key of a field.
    #[must_use]
    pub fn field_descriptor(&self, handle: FieldHandle) -> Option<FieldDescriptor> {
        let field = self.field(handle)?;
        Some(FieldDescriptor {
            owner: self.type_path(self.field_owner(handle)?)?,
            name: field.name.clone(),
        })
    }
}

/// Declares the contents of a [`Compilation`].
#[derive(Debug)]
pub struct CompilationBuilder {
    id: CompilationId,
    assembly_name: String,
    module_name: Option<String>,
    version_pattern: VersionPattern,
    culture: Option<String>,
    public_key: Option<Identity>,
    mvid: Option<Guid>,
    references: Vec<MetadataReference>,
    types: Vec<TypeSymbol>,
    methods: Vec<(TypeHandle, MethodSymbol)>,
    fields: Vec<(TypeHandle, FieldSymbol)>,
}

impl CompilationBuilder {
    /// Starts a compilation of assembly `assembly_name`, version `1.0.0.0`.
    pub fn new(assembly_name: impl Into<String>) -> Self {
        Self {
            id: CompilationId::next(),
            assembly_name: assembly_name.into(),
            module_name: None,
            version_pattern: VersionPattern::Fixed(AssemblyVersion::new(1, 0, 0, 0)),
            culture: None,
            public_key: None,
            mvid: None,
            references: Vec::new(),
            types: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Sets the declared version, possibly a wildcard.
    pub fn version(&mut self, pattern: VersionPattern) -> &mut Self {
        self.version_pattern = pattern;
        self
    }

    /// Sets the module name (defaults to `<assembly>.dll`).
    pub fn module_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.module_name = Some(name.into());
        self
    }

    /// Sets the culture.
    pub fn culture(&mut self, culture: impl Into<String>) -> &mut Self {
        self.culture = Some(culture.into());
        self
    }

    /// Sets the strong name.
    pub fn public_key(&mut self, identity: Identity) -> &mut Self {
        self.public_key = Some(identity);
        self
    }

    /// Sets the module version id (defaults to a hash of the module name).
    pub fn mvid(&mut self, mvid: Guid) -> &mut Self {
        self.mvid = Some(mvid);
        self
    }

    /// Declares a reference.
    pub fn add_reference(&mut self, reference: MetadataReference) -> &mut Self {
        self.references.push(reference);
        self
    }

    /// Declares a top-level type.
    pub fn add_type(&mut self, symbol: TypeSymbol) -> TypeHandle {
        #[allow(clippy::cast_possible_truncation)]
        let handle = TypeHandle {
            compilation: self.id,
            index: self.types.len() as u32,
        };
        self.types.push(symbol);
        handle
    }

    /// Declares a type nested in `enclosing`.
    pub fn add_nested_type(&mut self, enclosing: TypeHandle, mut symbol: TypeSymbol) -> TypeHandle {
        symbol.enclosing = Some(enclosing);
        symbol.namespace.clear();
        self.add_type(symbol)
    }

    /// Declares a method of `owner`.
    pub fn add_method(&mut self, owner: TypeHandle, symbol: MethodSymbol) -> MethodHandle {
        #[allow(clippy::cast_possible_truncation)]
        let handle = MethodHandle {
            compilation: self.id,
            index: self.methods.len() as u32,
        };
        self.methods.push((owner, symbol));
        handle
    }

    /// Declares a field of `owner`.
    pub fn add_field(&mut self, owner: TypeHandle, symbol: FieldSymbol) -> FieldHandle {
        #[allow(clippy::cast_possible_truncation)]
        let handle = FieldHandle {
            compilation: self.id,
            index: self.fields.len() as u32,
        };
        self.fields.push((owner, symbol));
        handle
    }

    /// Finalizes the snapshot, resolving the version pattern against `stamp`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a member or nested type names an owner that
    /// is not a type of this builder, or if two types share a full name, and
    /// [`crate::Error::TokenExhausted`] if a table holds more rows than a token can address.
    pub fn build(self, stamp: BuildStamp) -> Result<Compilation> {
        // Handles index with u32; anything past a table's row limit could never be emitted.
        for (table, count) in [
            (TableId::TypeDef, self.types.len()),
            (TableId::MethodDef, self.methods.len()),
            (TableId::Field, self.fields.len()),
        ] {
            if count > Token::MAX_ROW as usize {
                return Err(Error::TokenExhausted(table));
            }
        }

        let mut types = self.types;
        let type_count = types.len();
        let owned = |handle: TypeHandle| handle.compilation == self.id && handle.index() < type_count;

        #[allow(clippy::cast_possible_truncation)]
        for (index, (owner, _)) in self.methods.iter().enumerate() {
            if !owned(*owner) {
                return Err(malformed_error!("Method {} has a foreign owner", index));
            }
            types[owner.index()].methods.push(MethodHandle {
                compilation: self.id,
                index: index as u32,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        for (index, (owner, _)) in self.fields.iter().enumerate() {
            if !owned(*owner) {
                return Err(malformed_error!("Field {} has a foreign owner", index));
            }
            types[owner.index()].fields.push(FieldHandle {
                compilation: self.id,
                index: index as u32,
            });
        }
        for symbol in &types {
            if let Some(enclosing) = symbol.enclosing {
                if !owned(enclosing) {
                    return Err(malformed_error!("Type {} has a foreign enclosing type", symbol.name));
                }
            }
        }

        let version = self.version_pattern.resolve(stamp);
        if self.version_pattern.is_wildcard() {
            debug!(
                assembly = %self.assembly_name,
                pattern = %self.version_pattern,
                %version,
                "resolved wildcard assembly version"
            );
        }

        let module_name = self
            .module_name
            .unwrap_or_else(|| format!("{}.dll", self.assembly_name));
        let mvid = self.mvid.unwrap_or_else(|| {
            let digest = Sha1::digest(module_name.as_bytes());
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&digest[..16]);
            Guid::from_bytes(bytes)
        });

        let mut compilation = Compilation {
            id: self.id,
            assembly_name: self.assembly_name,
            module_name,
            version,
            version_pattern: self.version_pattern,
            culture: self.culture,
            public_key: self.public_key,
            mvid,
            references: self.references,
            types,
            methods: self.methods,
            fields: self.fields,
            type_index: HashMap::new(),
        };

        let mut type_index = HashMap::with_capacity(type_count);
        for (handle, _) in compilation.types() {
            let path = compilation
                .type_path(handle)
                .ok_or_else(|| malformed_error!("Nested type cycle"))?;
            if type_index.insert(path.clone(), handle).is_some() {
                return Err(malformed_error!("Duplicate type {}", path));
            }
        }
        compilation.type_index = type_index;

        Ok(compilation)
    }
}
