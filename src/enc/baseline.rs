//! Immutable generation baselines.
//!
//! A [`GenerationBaseline`] is everything a delta needs to know about the module as it
//! currently runs: which token every symbol owns, how many rows each table has, how large
//! every heap is, the committed `AssemblyRef` table, the synthesized members emitted so far
//! and the local slot layout of every method updated since generation 0.
//!
//! Generation 0 is correlated from a finished image by [`GenerationBaseline::initial`].
//! Every later baseline is produced by one successful
//! [`DeltaEmitter::emit_difference`](crate::enc::DeltaEmitter::emit_difference) and never
//! changes afterwards, so a baseline can be shared between threads and retried against
//! after a failed emission.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use sha1::{Digest, Sha1};
use strum::IntoEnumIterator;
use tracing::{debug, info};
use uguid::Guid;

use crate::{
    enc::{
        AssemblyRefTable, LocalSlot, LocalSlotProvider, SynthesizedMemberKey,
        SynthesizedMemberRegistry, SynthesizedShapeKey,
    },
    file::io::read_compressed_uint,
    metadata::{
        heaps::HeapSizes,
        image::{MetadataReader, MethodDefInfo, TypeDefInfo},
        signatures::CALLING_CONVENTION,
        tables::TableId,
        token::Token,
    },
    symbols::{
        Compilation, FieldDescriptor, MethodDescriptor, SynthesizedShape, TypePath,
    },
    Error, Result,
};

/// The logical symbol a definition token was assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DefinitionKey {
    /// A declared or replaced type.
    Type(TypePath),
    /// A declared method.
    Method(MethodDescriptor),
    /// A declared field.
    Field(FieldDescriptor),
    /// A synthesized member.
    Synthesized(SynthesizedMemberKey),
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionKey::Type(path) => write!(f, "{path}"),
            DefinitionKey::Method(method) => write!(f, "{method}"),
            DefinitionKey::Field(field) => write!(f, "{field}"),
            DefinitionKey::Synthesized(key) => {
                write!(f, "{}::{}{}", key.owner, key.role.prefix(), key.ordinal)
            }
        }
    }
}

/// A committed `MethodDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDefinition {
    /// Row token.
    pub token: Token,
    /// Declaring `TypeDef`.
    pub owner: Token,
    /// Method name.
    pub name: String,
    /// Signature blob.
    pub signature: Vec<u8>,
    /// `MethodAttributes` bits.
    pub flags: u16,
    /// `MethodImplAttributes` bits.
    pub impl_flags: u16,
    /// First owned `Param` row.
    pub param_list: u32,
}

impl From<&MethodDefInfo> for MethodDefinition {
    fn from(info: &MethodDefInfo) -> Self {
        Self {
            token: info.token,
            owner: info.owner,
            name: info.name.clone(),
            signature: info.signature.clone(),
            flags: info.flags,
            impl_flags: info.impl_flags,
            param_list: info.param_list,
        }
    }
}

/// Key of a committed `TypeRef`: resolution scope, namespace and name.
pub(crate) type TypeRefKey = (Token, String, String);

/// Key of a committed `MemberRef`: parent, name and signature blob.
pub(crate) type MemberRefKey = (Token, String, Vec<u8>);

/// Snapshot of a module after some generation.
pub struct GenerationBaseline {
    pub(crate) ordinal: u16,
    pub(crate) reader: Arc<dyn MetadataReader>,
    pub(crate) locals_provider: Arc<dyn LocalSlotProvider>,
    pub(crate) compilation: Arc<Compilation>,
    pub(crate) row_counts: BTreeMap<TableId, u32>,
    pub(crate) heap_sizes: HeapSizes,
    pub(crate) types: HashMap<TypePath, Token>,
    pub(crate) methods: HashMap<MethodDescriptor, Token>,
    pub(crate) method_defs: HashMap<Token, MethodDefinition>,
    pub(crate) fields: HashMap<FieldDescriptor, Token>,
    pub(crate) type_refs: HashMap<TypeRefKey, Token>,
    pub(crate) member_refs: HashMap<MemberRefKey, Token>,
    pub(crate) type_specs: HashMap<Vec<u8>, Token>,
    pub(crate) assembly_refs: AssemblyRefTable,
    pub(crate) synthesized: SynthesizedMemberRegistry,
    pub(crate) method_locals: HashMap<Token, Vec<LocalSlot>>,
    pub(crate) token_owners: HashMap<Token, DefinitionKey>,
    pub(crate) deleted_methods: BTreeSet<Token>,
    pub(crate) retired_fields: BTreeSet<Token>,
    pub(crate) enc_id: Guid,
    pub(crate) enc_base_id: Guid,
}

impl GenerationBaseline {
    /// Creates the generation-0 baseline of `compilation` from its finished image.
    ///
    /// Types are correlated by full name, methods by name and declaration order within
    /// their owner, fields by name, synthesized members by their generation-0 names and
    /// `AssemblyRef` rows by identity against the compilation's declared references.
    ///
    /// # Errors
    /// Returns [`crate::Error::BaselineMismatch`] if a symbol of `compilation` has no row in
    /// the image, or an error if the image's signatures are malformed.
    pub fn initial(
        compilation: Arc<Compilation>,
        reader: Arc<dyn MetadataReader>,
        locals_provider: Arc<dyn LocalSlotProvider>,
    ) -> Result<Arc<Self>> {
        let module = reader.module_name().to_string();
        let mismatch = |what: String| Error::BaselineMismatch(format!("{what} is not defined in {module}"));

        let image_types = image_type_paths(reader.type_defs())?;
        let mut types = HashMap::new();
        let mut methods = HashMap::new();
        let mut fields = HashMap::new();
        let mut token_owners = HashMap::new();
        let mut synthesized = SynthesizedMemberRegistry::new();

        for (handle, symbol) in compilation.types() {
            let path = compilation
                .type_path(handle)
                .ok_or_else(|| malformed_error!("Type {} has no path", symbol.name))?;
            let owner = *image_types
                .get(&path)
                .ok_or_else(|| mismatch(format!("type {path}")))?;
            types.insert(path.clone(), owner);
            token_owners.insert(owner, DefinitionKey::Type(path.clone()));

            let rows: Vec<&MethodDefInfo> = reader
                .method_defs()
                .iter()
                .filter(|row| row.owner == owner)
                .collect();

            let mut occurrences: HashMap<&str, usize> = HashMap::new();
            for method in symbol.methods() {
                let Some(method_symbol) = compilation.method(*method) else {
                    continue;
                };
                let occurrence = occurrences.entry(method_symbol.name.as_str()).or_default();
                let row = rows
                    .iter()
                    .filter(|row| row.name == method_symbol.name)
                    .nth(*occurrence)
                    .ok_or_else(|| mismatch(format!("method {}::{}", path, method_symbol.name)))?;
                *occurrence += 1;

                if parameter_count(&row.signature)? as usize != method_symbol.params.len() {
                    return Err(Error::BaselineMismatch(format!(
                        "method {}::{} has a different parameter count in {}",
                        path, method_symbol.name, module
                    )));
                }

                let descriptor = compilation.method_descriptor(*method).ok_or_else(|| {
                    Error::BaselineMismatch(format!(
                        "signature of {}::{} does not resolve",
                        path, method_symbol.name
                    ))
                })?;
                methods.insert(descriptor.clone(), row.token);
                token_owners.insert(row.token, DefinitionKey::Method(descriptor));

                for member in &method_symbol.synthesized {
                    let shape = SynthesizedShapeKey::of(&compilation, &member.shape).ok_or_else(|| {
                        Error::BaselineMismatch(format!(
                            "synthesized member of {}::{} does not resolve",
                            path, method_symbol.name
                        ))
                    })?;
                    let (name, _) =
                        synthesized.resolve_or_create(&path, member.role, member.ordinal, &shape, 0);

                    let token = match &member.shape {
                        SynthesizedShape::Type => {
                            let nested = path.nested(name.clone());
                            let token = image_types.get(&nested).copied();
                            if let Some(token) = token {
                                types.insert(nested, token);
                            }
                            token
                        }
                        SynthesizedShape::Method { .. } => {
                            rows.iter().find(|row| row.name == name).map(|row| row.token)
                        }
                        SynthesizedShape::Field(_) => reader
                            .fields()
                            .iter()
                            .find(|row| row.owner == owner && row.name == name)
                            .map(|row| row.token),
                    }
                    .ok_or_else(|| mismatch(format!("synthesized member {path}::{name}")))?;

                    synthesized.set_token(&path, member.role, member.ordinal, &shape, token);
                    token_owners.insert(
                        token,
                        DefinitionKey::Synthesized(SynthesizedMemberKey::new(
                            path.clone(),
                            member.role,
                            member.ordinal,
                        )),
                    );
                }
            }

            for field in symbol.fields() {
                let Some(descriptor) = compilation.field_descriptor(*field) else {
                    continue;
                };
                let token = reader
                    .fields()
                    .iter()
                    .find(|row| row.owner == owner && row.name == descriptor.name)
                    .map(|row| row.token)
                    .ok_or_else(|| mismatch(format!("field {descriptor}")))?;
                fields.insert(descriptor.clone(), token);
                token_owners.insert(token, DefinitionKey::Field(descriptor));
            }
        }

        let mut assembly_refs = AssemblyRefTable::new();
        let mut claimed = vec![false; compilation.references().len()];
        for row in reader.assembly_refs() {
            let matched = compilation
                .references()
                .iter()
                .enumerate()
                .position(|(index, reference)| !claimed[index] && reference.identity == row.identity);

            let (alias, pattern) = match matched {
                Some(index) => {
                    claimed[index] = true;
                    let reference = &compilation.references()[index];
                    (reference.alias.clone(), reference.pattern)
                }
                None => (None, None),
            };
            assembly_refs.push(row.identity.clone(), alias, pattern)?;
        }

        let row_counts = TableId::iter()
            .map(|table| (table, reader.row_count(table)))
            .filter(|(_, count)| *count > 0)
            .collect();

        let baseline = GenerationBaseline {
            ordinal: 0,
            locals_provider,
            row_counts,
            heap_sizes: reader.heap_sizes(),
            types,
            methods,
            method_defs: reader
                .method_defs()
                .iter()
                .map(|row| (row.token, MethodDefinition::from(row)))
                .collect(),
            fields,
            type_refs: reader
                .type_refs()
                .iter()
                .map(|row| ((row.resolution_scope, row.namespace.clone(), row.name.clone()), row.token))
                .collect(),
            member_refs: reader
                .member_refs()
                .iter()
                .map(|row| ((row.class, row.name.clone(), row.signature.clone()), row.token))
                .collect(),
            type_specs: reader
                .type_specs()
                .iter()
                .map(|row| (row.signature.clone(), row.token))
                .collect(),
            assembly_refs,
            synthesized,
            method_locals: HashMap::new(),
            token_owners,
            deleted_methods: BTreeSet::new(),
            retired_fields: BTreeSet::new(),
            enc_id: Guid::ZERO,
            enc_base_id: Guid::ZERO,
            reader,
            compilation,
        };

        info!(
            module = %module,
            types = baseline.types.len(),
            methods = baseline.methods.len(),
            assembly_refs = baseline.assembly_refs.len(),
            "created initial baseline"
        );
        Ok(Arc::new(baseline))
    }

    /// Generation number; 0 for the initial baseline.
    #[must_use]
    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    /// The compilation this generation was emitted from.
    #[must_use]
    pub fn compilation(&self) -> &Arc<Compilation> {
        &self.compilation
    }

    /// The generation-0 image shared by every generation.
    #[must_use]
    pub fn reader(&self) -> &Arc<dyn MetadataReader> {
        &self.reader
    }

    /// Row count of `table` after this generation.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.row_counts.get(&table).copied().unwrap_or(0)
    }

    /// Heap sizes after this generation, the heap bases of the next delta.
    #[must_use]
    pub fn heap_sizes(&self) -> HeapSizes {
        self.heap_sizes
    }

    /// `TypeDef` of the type at `path`.
    #[must_use]
    pub fn type_token(&self, path: &TypePath) -> Option<Token> {
        self.types.get(path).copied()
    }

    /// `MethodDef` of the method with this descriptor.
    #[must_use]
    pub fn method_token(&self, method: &MethodDescriptor) -> Option<Token> {
        self.methods.get(method).copied()
    }

    /// The committed row of a `MethodDef` token.
    #[must_use]
    pub fn method_definition(&self, token: Token) -> Option<&MethodDefinition> {
        self.method_defs.get(&token)
    }

    /// `Field` of the field with this descriptor.
    #[must_use]
    pub fn field_token(&self, field: &FieldDescriptor) -> Option<Token> {
        self.fields.get(field).copied()
    }

    /// The symbol a definition token belongs to.
    #[must_use]
    pub fn definition_owner(&self, token: Token) -> Option<&DefinitionKey> {
        self.token_owners.get(&token)
    }

    /// The committed `AssemblyRef` table.
    #[must_use]
    pub fn assembly_refs(&self) -> &AssemblyRefTable {
        &self.assembly_refs
    }

    /// Synthesized members emitted up to this generation.
    #[must_use]
    pub fn synthesized(&self) -> &SynthesizedMemberRegistry {
        &self.synthesized
    }

    /// Local slot layout of `method`: the layout of its last update, or the layout recorded
    /// for generation 0.
    #[must_use]
    pub fn local_slots(&self, method: Token) -> Option<Vec<LocalSlot>> {
        match self.method_locals.get(&method) {
            Some(slots) => Some(slots.clone()),
            None => self.locals_provider.local_slots(method),
        }
    }

    /// Returns true if `method` was deleted and now throws `MissingMethodException`.
    #[must_use]
    pub fn is_deleted(&self, method: Token) -> bool {
        self.deleted_methods.contains(&method)
    }

    /// Returns true if `field` was deleted.
    #[must_use]
    pub fn is_retired(&self, field: Token) -> bool {
        self.retired_fields.contains(&field)
    }

    /// EnC id of this generation, nil for generation 0.
    #[must_use]
    pub fn enc_id(&self) -> Guid {
        self.enc_id
    }

    /// EnC id of the previous generation.
    #[must_use]
    pub fn enc_base_id(&self) -> Guid {
        self.enc_base_id
    }
}

impl fmt::Debug for GenerationBaseline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationBaseline")
            .field("ordinal", &self.ordinal)
            .field("module", &self.reader.module_name())
            .field("compilation", &self.compilation.id())
            .field("row_counts", &self.row_counts)
            .field("heap_sizes", &self.heap_sizes)
            .field("assembly_refs", &self.assembly_refs.len())
            .field("synthesized", &self.synthesized.len())
            .finish_non_exhaustive()
    }
}

/// EnC id of generation `generation` of the module `mvid`.
pub(crate) fn enc_id(mvid: Guid, generation: u16) -> Guid {
    let mut hasher = Sha1::new();
    hasher.update(mvid.to_bytes());
    hasher.update(generation.to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Guid::from_bytes(bytes)
}

fn image_type_paths(type_defs: &[TypeDefInfo]) -> Result<HashMap<TypePath, Token>> {
    fn path_of(type_defs: &[TypeDefInfo], index: usize, depth: usize) -> Result<TypePath> {
        let row = &type_defs[index];
        match row.enclosing {
            Some(enclosing) if depth < type_defs.len() => {
                let enclosing_index = (enclosing.row() as usize)
                    .checked_sub(1)
                    .filter(|index| *index < type_defs.len())
                    .ok_or_else(|| malformed_error!("Enclosing type {} out of range", enclosing))?;
                Ok(path_of(type_defs, enclosing_index, depth + 1)?.nested(row.name.clone()))
            }
            Some(_) => Err(malformed_error!("Nested type cycle at {}", row.token)),
            None => Ok(TypePath::new(row.namespace.clone(), row.name.clone())),
        }
    }

    let mut paths = HashMap::with_capacity(type_defs.len());
    for index in 0..type_defs.len() {
        paths.insert(path_of(type_defs, index, 0)?, type_defs[index].token);
    }
    debug!(types = paths.len(), "indexed image types");
    Ok(paths)
}

fn parameter_count(signature: &[u8]) -> Result<u32> {
    let calling_convention = *signature
        .first()
        .ok_or_else(|| malformed_error!("Empty method signature"))?;

    let mut offset = 1;
    if calling_convention & CALLING_CONVENTION::GENERIC != 0 {
        read_compressed_uint(signature, &mut offset)?;
    }
    read_compressed_uint(signature, &mut offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        enc::NoLocalSlots,
        metadata::{image::ModuleMetadataBuilder, method::MethodAttributes},
        symbols::{CompilationBuilder, MethodSymbol, TypeDescriptor, TypeSymbol},
        test::factories::{hello_world, snapshot_baseline, stamp},
    };

    #[test]
    fn correlates_snapshot() {
        let (compilation, main) = hello_world(1);
        let baseline = snapshot_baseline(&compilation);

        assert_eq!(baseline.ordinal(), 0);
        let descriptor = compilation.method_descriptor(main).unwrap();
        let token = baseline.method_token(&descriptor).unwrap();
        assert!(token.is_table(TableId::MethodDef));
        assert_eq!(baseline.definition_owner(token), Some(&DefinitionKey::Method(descriptor)));
        assert_eq!(baseline.assembly_refs().len(), 1);
        assert_eq!(baseline.row_count(TableId::TypeDef), 2);
        assert_eq!(baseline.enc_id(), Guid::ZERO);
    }

    #[test]
    fn missing_method_is_a_mismatch() {
        let mut builder = CompilationBuilder::new("App");
        let program = builder.add_type(TypeSymbol::class("", "Program"));
        builder.add_method(program, MethodSymbol::new("Main", MethodAttributes::STATIC));
        let compilation = Arc::new(builder.build(stamp()).unwrap());

        let mut image = ModuleMetadataBuilder::new("App.dll", compilation.mvid());
        image.add_type_def("", "<Module>", 0, Token::new(0), None).unwrap();
        image.add_type_def("", "Program", 1, Token::new(0), None).unwrap();
        let image = image.build().unwrap();

        let error = GenerationBaseline::initial(compilation, Arc::new(image), Arc::new(NoLocalSlots)).unwrap_err();
        assert!(matches!(error, Error::BaselineMismatch(_)));
    }

    #[test]
    fn parameter_count_mismatch() {
        let mut builder = CompilationBuilder::new("App");
        let program = builder.add_type(TypeSymbol::class("", "Program"));
        builder.add_method(
            program,
            MethodSymbol::new("F", MethodAttributes::STATIC).param("x", TypeDescriptor::int32()),
        );
        let compilation = Arc::new(builder.build(stamp()).unwrap());

        let mut image = ModuleMetadataBuilder::new("App.dll", compilation.mvid());
        image.add_type_def("", "<Module>", 0, Token::new(0), None).unwrap();
        image.add_type_def("", "Program", 1, Token::new(0), None).unwrap();
        image.add_method_def("F", 0x10, 0, vec![0x00, 0x00, 0x01], &[], None).unwrap();
        let image = image.build().unwrap();

        assert!(GenerationBaseline::initial(compilation, Arc::new(image), Arc::new(NoLocalSlots)).is_err());
    }

    #[test]
    fn enc_ids_differ_per_generation() {
        let mvid = Guid::from_bytes([7; 16]);
        assert_ne!(enc_id(mvid, 1), enc_id(mvid, 2));
        assert_eq!(enc_id(mvid, 1), enc_id(mvid, 1));
    }
}
