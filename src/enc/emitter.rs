//! Delta emission: one generation per call.
//!
//! [`DeltaEmitter::emit_difference`] turns a set of [`SemanticEdit`]s between the
//! baseline's compilation and a new compilation into a metadata delta, an IL delta and an
//! optional debug delta, and returns the [`GenerationBaseline`] the next call starts from.
//!
//! # Phases
//!
//! 1. **Reconcile** every declared assembly reference against the committed `AssemblyRef`
//!    table. A version conflict or ambiguity ends the call with diagnostics.
//! 2. **Plan** each edit: match its previous symbol, validate the edit kind and assign
//!    tokens. Updated members keep their committed token; inserted members get the next
//!    row of their table. Synthesized members declared by edited methods are resolved
//!    through the [`SynthesizedMemberRegistry`](crate::enc::SynthesizedMemberRegistry).
//! 3. **Emit** rows and bodies. References are appended on first use, committed ones are
//!    reused. Local slots of updated bodies are laid out by
//!    [`LocalSlotAllocator`](crate::enc::LocalSlotAllocator).
//! 4. **Serialize and validate** the delta, then derive the next baseline.
//!
//! Any error diagnostic ends the call without a delta or a next baseline; the input
//! baseline is never modified and can be retried against.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use tracing::{debug, info, warn};

use crate::{
    enc::{
        baseline::{enc_id, MemberRefKey, TypeRefKey},
        codegen::{synthesized_member, CodeGenerator, TokenResolver},
        snapshot::{lambda_flags, synthesized_field_flags, DISPLAY_CLASS_FLAGS},
        AssemblyRefTable, AssemblyReferenceReconciler, DefinitionKey, Diagnostic, DiagnosticCode,
        EditKind, EmitConfig, GenerationBaseline, LocalSlot, LocalSlotAllocator, MethodDefinition,
        ReferenceOutcome, SemanticEdit, SymbolHandle, SymbolMatch, SymbolMatcher,
        SynthesizedMemberKey, SynthesizedMemberRegistry, SynthesizedShapeKey, SyntaxMap,
    },
    metadata::{
        delta::MetadataDeltaView,
        heaps::{BlobHeapBuilder, GuidHeapBuilder, HeapSizes, StringHeapBuilder, UserStringHeapBuilder},
        identity::Identity,
        method::{IlStreamBuilder, MethodBody},
        root::write_metadata_root,
        signatures::{encode_field_signature, encode_method_signature},
        streams::{BLOB_STREAM, GUID_STREAM, STRINGS_STREAM, TABLES_STREAM_UNCOMPRESSED, USER_STRINGS_STREAM},
        tables::{
            AssemblyRefRow, DeltaRow, DeltaTablesWriter, EncFuncCode, FieldRow, MemberRefRow,
            MethodDefRow, ModuleRow, NestedClassRow, ParamRow, StandAloneSigRow, TableId,
            TypeDefRow, TypeRefRow, TypeSpecRow,
        },
        token::Token,
    },
    symbols::{
        Compilation, CompilationId, FieldDescriptor, FieldHandle, LoweredBody, MethodDescriptor,
        MethodHandle, SynthesizedRole, SynthesizedShape, TypeDescriptor, TypeHandle, TypePath,
    },
    Error, Result,
};

/// A sequence point of an emitted body, anchored at an IL offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugSequencePoint {
    /// IL offset of the first covered instruction.
    pub il_offset: u32,
    /// Start line (1-based).
    pub start_line: u32,
    /// Start column (1-based).
    pub start_column: u16,
    /// End line.
    pub end_line: u32,
    /// End column.
    pub end_column: u16,
}

/// Debug information of one emitted method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDebugInfo {
    /// The method.
    pub method: Token,
    /// `StandAloneSig` of its locals.
    pub local_signature: Option<Token>,
    /// Sequence points in IL order.
    pub sequence_points: Vec<DebugSequencePoint>,
    /// Local names by slot; retired slots have an empty name.
    pub local_names: Vec<String>,
}

/// The debug-information part of a delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugDelta {
    /// One entry per emitted body, in token order.
    pub methods: Vec<MethodDebugInfo>,
}

/// The streams of one accepted generation.
#[derive(Debug, Clone)]
pub struct EmittedDelta {
    /// Generation number written into the `Module` row.
    pub generation: u16,
    /// Metadata root with the `#-` tables stream and the heap deltas.
    pub metadata: Vec<u8>,
    /// IL delta; `MethodDef` RVAs are offsets into it.
    pub il: Vec<u8>,
    /// Debug delta, if enabled.
    pub debug: Option<DebugDelta>,
    /// Committed methods whose body or row was re-emitted.
    pub updated_methods: Vec<Token>,
    /// Rows this generation appended, in emission order.
    pub added_tokens: Vec<Token>,
    /// Heap bases the delta's heap indices continue from.
    pub heap_bases: HeapSizes,
    /// Offset of every emitted method body in [`EmittedDelta::il`].
    pub method_bodies: BTreeMap<Token, u32>,
}

impl EmittedDelta {
    /// Header and code of the body emitted for `method`.
    #[must_use]
    pub fn body(&self, method: Token) -> Option<&[u8]> {
        let offset = *self.method_bodies.get(&method)? as usize;
        let data = self.il.get(offset..)?;
        let body = MethodBody::from(data).ok()?;
        data.get(..body.size())
    }
}

/// Outcome of one [`DeltaEmitter::emit_difference`] call.
#[derive(Debug, Clone)]
pub struct EmitResult {
    /// Every diagnostic produced, errors first in edit order.
    pub diagnostics: Vec<Diagnostic>,
    /// The next baseline, present on success.
    pub baseline: Option<Arc<GenerationBaseline>>,
    /// The emitted streams, present on success.
    pub delta: Option<EmittedDelta>,
}

impl EmitResult {
    fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            diagnostics,
            baseline: None,
            delta: None,
        }
    }

    /// Returns true if a delta was produced.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.delta.is_some()
    }
}

/// Emits metadata and IL deltas between generations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaEmitter {
    config: EmitConfig,
}

impl DeltaEmitter {
    /// Creates an emitter.
    #[must_use]
    pub fn new(config: EmitConfig) -> Self {
        Self { config }
    }

    /// The emitter's configuration.
    #[must_use]
    pub fn config(&self) -> &EmitConfig {
        &self.config
    }

    /// Emits the generation following `baseline` for `edits` between the baseline's
    /// compilation and `compilation`.
    ///
    /// Recoverable problems (unsupported edits, unmatched or ambiguous symbols, reference
    /// version conflicts) are reported as diagnostics in an [`EmitResult`] without a delta.
    /// `is_cancelled` is polled before reconciliation, per edit, per method body and before
    /// serialization.
    ///
    /// # Errors
    /// Returns [`crate::Error::Cancelled`] when `is_cancelled` fires,
    /// [`crate::Error::InvariantViolation`] when validation catches a token or heap
    /// invariant breach, and encoding errors for overflowing tables or heaps.
    pub fn emit_difference(
        &self,
        baseline: &Arc<GenerationBaseline>,
        compilation: &Arc<Compilation>,
        edits: &[SemanticEdit],
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<EmitResult> {
        check_cancelled(is_cancelled)?;

        let module = compilation.module_name().to_string();
        let Some(generation) = baseline
            .ordinal()
            .checked_add(1)
            .filter(|generation| self.config.max_generations == 0 || *generation <= self.config.max_generations)
        else {
            warn!(module = %module, ordinal = baseline.ordinal(), "generation limit reached");
            return Ok(EmitResult::failed(vec![Diagnostic::unsupported_edit(
                module,
                "generation limit reached",
            )]));
        };

        let reconciliation =
            AssemblyReferenceReconciler::reconcile(baseline.assembly_refs(), compilation.references())?;
        if reconciliation.has_conflicts() {
            warn!(module = %module, generation, "assembly reference conflicts, no delta emitted");
            return Ok(EmitResult::failed(reconciliation.diagnostics()));
        }

        let mut session = DeltaSession::new(baseline, compilation, generation, &reconciliation.outcomes);
        for edit in edits {
            check_cancelled(is_cancelled)?;
            if let Err(error) = session.plan(edit) {
                let symbol = session.describe_edit(edit);
                let diagnostic = recoverable(symbol, error)?;
                session.diagnostics.push(diagnostic);
            }
        }
        if session.has_errors() {
            warn!(module = %module, generation, errors = session.diagnostics.len(), "edits rejected");
            return Ok(EmitResult::failed(session.diagnostics));
        }

        session.emit(is_cancelled, self.config.emit_debug_delta)?;
        if session.has_errors() {
            warn!(module = %module, generation, errors = session.diagnostics.len(), "bodies could not be emitted");
            return Ok(EmitResult::failed(session.diagnostics));
        }

        check_cancelled(is_cancelled)?;
        let metadata = session.serialize()?;
        if self.config.enable_token_validation {
            session.validate_tokens()?;
        }
        if self.config.enable_heap_validation {
            session.validate_heaps(&metadata)?;
        }

        let (next, delta) = session.finish(compilation, metadata)?;
        info!(
            module = %module,
            generation,
            added = delta.added_tokens.len(),
            updated = delta.updated_methods.len(),
            metadata_size = delta.metadata.len(),
            il_size = delta.il.len(),
            "emitted delta"
        );

        Ok(EmitResult {
            diagnostics: Vec::new(),
            baseline: Some(Arc::new(next)),
            delta: Some(delta),
        })
    }
}

fn check_cancelled(is_cancelled: &dyn Fn() -> bool) -> Result<()> {
    if is_cancelled() {
        debug!("delta emission cancelled");
        return Err(Error::Cancelled);
    }
    Ok(())
}

// Converts an edit-level error into its diagnostic; anything else aborts the call.
fn recoverable(symbol: String, error: Error) -> Result<Diagnostic> {
    match error {
        Error::Unsupported(reason) => Ok(Diagnostic::unsupported_edit(symbol, reason)),
        Error::SymbolNotFound(name) => Ok(Diagnostic::error(DiagnosticCode::EditTargetNotFound, [name])),
        other => Err(other),
    }
}

#[derive(Debug, Clone, Copy)]
enum HeapKind {
    Strings,
    Blob,
    Guid,
}

// Heap-index columns of every table a delta can carry.
fn heap_columns(table: TableId) -> &'static [(usize, HeapKind)] {
    match table {
        TableId::Module => &[(1, HeapKind::Strings), (2, HeapKind::Guid), (3, HeapKind::Guid), (4, HeapKind::Guid)],
        TableId::TypeRef | TableId::TypeDef => &[(1, HeapKind::Strings), (2, HeapKind::Strings)],
        TableId::Field | TableId::MemberRef => &[(1, HeapKind::Strings), (2, HeapKind::Blob)],
        TableId::MethodDef => &[(3, HeapKind::Strings), (4, HeapKind::Blob)],
        TableId::Param => &[(2, HeapKind::Strings)],
        TableId::StandAloneSig | TableId::TypeSpec => &[(0, HeapKind::Blob)],
        TableId::AssemblyRef => &[
            (5, HeapKind::Blob),
            (6, HeapKind::Strings),
            (7, HeapKind::Strings),
            (8, HeapKind::Blob),
        ],
        _ => &[],
    }
}

enum MethodSource<'a> {
    Declared(MethodHandle),
    Lambda {
        params: &'a [TypeDescriptor],
        ret: &'a TypeDescriptor,
        body: &'a LoweredBody,
    },
    Deleted,
}

struct MethodEmit<'a> {
    token: Token,
    owner: Token,
    name: String,
    source: MethodSource<'a>,
    definition: Option<MethodDefinition>,
    syntax_map: Option<&'a SyntaxMap>,
    key: DefinitionKey,
}

impl MethodEmit<'_> {
    fn is_added(&self) -> bool {
        self.definition.is_none()
    }
}

struct FieldEmit<'a> {
    token: Token,
    owner: Token,
    name: String,
    flags: u16,
    ty: &'a TypeDescriptor,
    added: bool,
    key: DefinitionKey,
}

struct TypeEmit<'a> {
    token: Token,
    namespace: String,
    name: String,
    flags: u32,
    base: Option<&'a TypeDescriptor>,
    extends_object: bool,
    nested: Option<(Token, Token)>,
    field_list: u32,
    method_list: u32,
    key: DefinitionKey,
}

struct DeltaSession<'a> {
    baseline: &'a GenerationBaseline,
    compilation: &'a Compilation,
    generation: u16,
    diagnostics: Vec<Diagnostic>,

    writer: DeltaTablesWriter,
    strings: StringHeapBuilder,
    blobs: BlobHeapBuilder,
    user_strings: UserStringHeapBuilder,
    guids: GuidHeapBuilder,
    il: IlStreamBuilder,
    row_counts: BTreeMap<TableId, u32>,

    assembly_refs: AssemblyRefTable,
    reference_rids: Vec<Option<u32>>,
    type_refs: HashMap<TypeRefKey, Token>,
    member_refs: HashMap<MemberRefKey, Token>,
    type_specs: HashMap<Vec<u8>, Token>,
    standalone_sigs: HashMap<Vec<u8>, Token>,
    user_string_tokens: HashMap<String, Token>,

    types: HashMap<TypeHandle, Token>,
    methods: HashMap<MethodHandle, Token>,
    fields: HashMap<FieldHandle, Token>,
    type_paths: HashMap<TypePath, Token>,
    method_keys: HashMap<MethodDescriptor, Token>,
    field_keys: HashMap<FieldDescriptor, Token>,
    removed_fields: Vec<FieldDescriptor>,
    synthesized: SynthesizedMemberRegistry,

    type_emits: Vec<TypeEmit<'a>>,
    field_emits: Vec<FieldEmit<'a>>,
    method_emits: Vec<MethodEmit<'a>>,
    planned: HashSet<Token>,

    added: Vec<Token>,
    owners: HashMap<Token, DefinitionKey>,
    updates: Vec<(Token, DefinitionKey)>,
    updated_methods: Vec<Token>,
    method_bodies: BTreeMap<Token, u32>,
    method_defs: Vec<MethodDefinition>,
    method_locals: HashMap<Token, Vec<LocalSlot>>,
    deleted: BTreeSet<Token>,
    restored: BTreeSet<Token>,
    retired: BTreeSet<Token>,
    debug: Vec<MethodDebugInfo>,
    emit_debug: bool,
}

impl<'a> DeltaSession<'a> {
    fn new(
        baseline: &'a GenerationBaseline,
        compilation: &'a Compilation,
        generation: u16,
        outcomes: &[ReferenceOutcome],
    ) -> Self {
        let bases = baseline.heap_sizes();
        let reference_rids = outcomes
            .iter()
            .map(|outcome| match outcome {
                ReferenceOutcome::Reused { rid } => Some(*rid),
                _ => None,
            })
            .collect();

        Self {
            baseline,
            compilation,
            generation,
            diagnostics: Vec::new(),
            writer: DeltaTablesWriter::new(),
            strings: StringHeapBuilder::new(bases.strings),
            blobs: BlobHeapBuilder::new(bases.blobs),
            user_strings: UserStringHeapBuilder::new(bases.user_strings),
            guids: GuidHeapBuilder::new(bases.guids),
            il: IlStreamBuilder::new(),
            row_counts: baseline.row_counts.clone(),
            assembly_refs: baseline.assembly_refs.clone(),
            reference_rids,
            type_refs: HashMap::new(),
            member_refs: HashMap::new(),
            type_specs: HashMap::new(),
            standalone_sigs: HashMap::new(),
            user_string_tokens: HashMap::new(),
            types: HashMap::new(),
            methods: HashMap::new(),
            fields: HashMap::new(),
            type_paths: HashMap::new(),
            method_keys: HashMap::new(),
            field_keys: HashMap::new(),
            removed_fields: Vec::new(),
            synthesized: baseline.synthesized.clone(),
            type_emits: Vec::new(),
            field_emits: Vec::new(),
            method_emits: Vec::new(),
            planned: HashSet::new(),
            added: Vec::new(),
            owners: HashMap::new(),
            updates: Vec::new(),
            updated_methods: Vec::new(),
            method_bodies: BTreeMap::new(),
            method_defs: Vec::new(),
            method_locals: HashMap::new(),
            deleted: BTreeSet::new(),
            restored: BTreeSet::new(),
            retired: BTreeSet::new(),
            debug: Vec::new(),
            emit_debug: false,
        }
    }

    fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    fn previous(&self) -> &'a Compilation {
        &self.baseline.compilation
    }

    fn matcher(&self) -> SymbolMatcher<'a> {
        SymbolMatcher::new(self.compilation, self.previous())
    }

    fn describe(compilation: &Compilation, symbol: SymbolHandle) -> String {
        match symbol {
            SymbolHandle::Type(handle) => compilation
                .type_path(handle)
                .map_or_else(|| format!("type of compilation {}", handle.compilation()), |path| path.to_string()),
            SymbolHandle::Method(handle) => match compilation.method_descriptor(handle) {
                Some(descriptor) => descriptor.to_string(),
                None => compilation
                    .method(handle)
                    .map_or_else(|| format!("method of compilation {}", handle.compilation()), |m| m.name.clone()),
            },
            SymbolHandle::Field(handle) => compilation
                .field_descriptor(handle)
                .map_or_else(|| format!("field of compilation {}", handle.compilation()), |f| f.to_string()),
        }
    }

    fn describe_edit(&self, edit: &SemanticEdit) -> String {
        match (edit.new, edit.previous) {
            (Some(symbol), _) => Self::describe(self.compilation, symbol),
            (None, Some(symbol)) => Self::describe(self.previous(), symbol),
            (None, None) => self.compilation.module_name().to_string(),
        }
    }

    fn next_token(&mut self, table: TableId) -> Result<Token> {
        let count = self.row_counts.entry(table).or_insert(0);
        let row = count
            .checked_add(1)
            .filter(|row| *row <= Token::MAX_ROW)
            .ok_or(Error::TokenExhausted(table))?;
        *count = row;
        Token::from_parts(table, row)
    }

    fn next_row(&self, table: TableId) -> u32 {
        self.row_counts.get(&table).copied().unwrap_or(0) + 1
    }

    // Adds an appended row and logs it.
    fn append<R: DeltaRow>(&mut self, token: Token, row: &R) -> Result<()> {
        self.writer.add_row(token.row(), row)?;
        self.writer.log(token, EncFuncCode::Default);
        self.added.push(token);
        Ok(())
    }

    fn type_token_of(&self, handle: TypeHandle) -> Result<Token> {
        if let Some(token) = self.types.get(&handle) {
            return Ok(*token);
        }
        let path = self
            .compilation
            .type_path(handle)
            .ok_or_else(|| Error::SymbolNotFound(format!("type of compilation {}", handle.compilation())))?;
        self.type_paths
            .get(&path)
            .copied()
            .or_else(|| self.baseline.type_token(&path))
            .ok_or_else(|| Error::SymbolNotFound(path.to_string()))
    }

    fn plan(&mut self, edit: &'a SemanticEdit) -> Result<()> {
        debug!(kind = ?edit.kind, generation = self.generation, "planning edit");

        match (edit.kind, edit.new) {
            (EditKind::Delete, _) => match edit.previous {
                Some(previous) => self.plan_delete(previous),
                None => Err(Error::Unsupported("a delete needs the previous symbol".to_string())),
            },
            (kind, None) => Err(Error::Unsupported(format!("{kind:?} needs a symbol of the new compilation"))),
            (EditKind::Insert, Some(SymbolHandle::Type(handle))) => self.plan_type(handle, false),
            (EditKind::Insert, Some(SymbolHandle::Method(handle))) => self.plan_insert_method(handle),
            (EditKind::Insert, Some(SymbolHandle::Field(handle))) => self.plan_insert_field(handle),
            (EditKind::Update, Some(SymbolHandle::Type(handle))) => self.plan_update_type(handle, edit.previous),
            (EditKind::Update, Some(SymbolHandle::Method(handle))) => {
                self.plan_update_method(handle, edit.previous, edit.syntax_map.as_ref())
            }
            (EditKind::Update, Some(SymbolHandle::Field(handle))) => self.plan_update_field(handle, edit.previous),
            (EditKind::Replace, Some(SymbolHandle::Type(handle))) => self.plan_type(handle, true),
            (EditKind::Replace, Some(SymbolHandle::Method(handle))) => self.plan_replace_method(handle),
            (EditKind::Replace, Some(SymbolHandle::Field(_))) => {
                Err(Error::Unsupported("fields cannot be replaced".to_string()))
            }
        }
    }

    fn supplied<T>(
        &self,
        supplied: Option<SymbolHandle>,
        extract: impl FnOnce(SymbolHandle) -> Option<T>,
        compilation_of: impl FnOnce(&T) -> CompilationId,
    ) -> Result<Option<T>> {
        let Some(symbol) = supplied else {
            return Ok(None);
        };
        let handle = extract(symbol)
            .ok_or_else(|| Error::Unsupported("the previous symbol is of a different kind".to_string()))?;
        if compilation_of(&handle) != self.previous().id() {
            return Err(Error::Unsupported(
                "the previous symbol does not belong to the baseline compilation".to_string(),
            ));
        }
        Ok(Some(handle))
    }

    fn ambiguous(&mut self, symbol: String, candidates: usize) {
        self.diagnostics.push(Diagnostic::error(
            DiagnosticCode::AmbiguousSymbol,
            [symbol, candidates.to_string()],
        ));
    }

    fn previous_method(&mut self, handle: MethodHandle, supplied: Option<SymbolHandle>) -> Result<Option<MethodHandle>> {
        let supplied = self.supplied(
            supplied,
            |symbol| match symbol {
                SymbolHandle::Method(method) => Some(method),
                _ => None,
            },
            MethodHandle::compilation,
        )?;
        if let Some(previous) = supplied {
            self.check_signature(handle, previous)?;
            return Ok(supplied);
        }

        match self.matcher().match_method(handle) {
            SymbolMatch::Found(previous) => Ok(Some(previous)),
            SymbolMatch::Ambiguous(candidates) => {
                let symbol = Self::describe(self.compilation, handle.into());
                self.ambiguous(symbol, candidates.len());
                Ok(None)
            }
            SymbolMatch::None => {
                let symbol = Self::describe(self.compilation, handle.into());
                if self.static_changed(handle) {
                    return Err(Error::Unsupported("static modifier changed".to_string()));
                }
                Err(Error::SymbolNotFound(symbol))
            }
        }
    }

    /// An update keeps the row's signature blob, so the shapes on both sides must agree.
    fn check_signature(&self, handle: MethodHandle, previous: MethodHandle) -> Result<()> {
        let current = self
            .compilation
            .method_descriptor(handle)
            .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.compilation, handle.into())))?;
        let previous = self
            .previous()
            .method_descriptor(previous)
            .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.previous(), previous.into())))?;

        if current.is_static != previous.is_static {
            return Err(Error::Unsupported("static modifier changed".to_string()));
        }
        if current.name != previous.name
            || current.generic_arity != previous.generic_arity
            || current.params != previous.params
            || current.ret != previous.ret
        {
            return Err(Error::Unsupported(format!(
                "signature of {previous} does not match {current}"
            )));
        }
        Ok(())
    }

    fn static_changed(&self, handle: MethodHandle) -> bool {
        let previous = self.previous();
        let (Some(method), Some(owner)) = (
            self.compilation.method(handle),
            self.compilation.method_owner(handle).and_then(|owner| self.compilation.type_path(owner)),
        ) else {
            return false;
        };

        previous.find_type(&owner).is_some_and(|owner| {
            previous
                .find_methods(owner, &method.name)
                .iter()
                .filter_map(|candidate| previous.method(*candidate))
                .any(|candidate| {
                    candidate.params.len() == method.params.len() && candidate.is_static() != method.is_static()
                })
        })
    }

    fn plan_update_method(
        &mut self,
        handle: MethodHandle,
        supplied: Option<SymbolHandle>,
        syntax_map: Option<&'a SyntaxMap>,
    ) -> Result<()> {
        let Some(previous) = self.previous_method(handle, supplied)? else {
            return Ok(());
        };
        let descriptor = self
            .previous()
            .method_descriptor(previous)
            .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.previous(), previous.into())))?;
        let token = self
            .baseline
            .method_token(&descriptor)
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
        let definition = self
            .baseline
            .method_definition(token)
            .cloned()
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;

        let symbol = self
            .compilation
            .method(handle)
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
        if symbol.body.is_none() {
            return Err(Error::Unsupported("method has no body to update".to_string()));
        }

        self.methods.insert(handle, token);
        if self.planned.insert(token) {
            self.method_emits.push(MethodEmit {
                token,
                owner: definition.owner,
                name: symbol.name.clone(),
                source: MethodSource::Declared(handle),
                definition: Some(definition),
                syntax_map,
                key: DefinitionKey::Method(descriptor),
            });
        }
        self.plan_synthesized(handle, syntax_map)
    }

    fn plan_insert_method(&mut self, handle: MethodHandle) -> Result<()> {
        if self.methods.contains_key(&handle) {
            return Ok(());
        }

        let descriptor = self
            .compilation
            .method_descriptor(handle)
            .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.compilation, handle.into())))?;
        let symbol = self
            .compilation
            .method(handle)
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;

        let token = match self.baseline.method_token(&descriptor) {
            Some(token) if self.baseline.is_deleted(token) => {
                let definition = self
                    .baseline
                    .method_definition(token)
                    .cloned()
                    .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
                debug!(method = %descriptor, %token, "restoring deleted method");
                self.restored.insert(token);
                self.planned.insert(token);
                self.method_emits.push(MethodEmit {
                    token,
                    owner: definition.owner,
                    name: symbol.name.clone(),
                    source: MethodSource::Declared(handle),
                    definition: Some(definition),
                    syntax_map: None,
                    key: DefinitionKey::Method(descriptor.clone()),
                });
                token
            }
            Some(_) => {
                self.diagnostics.push(Diagnostic::error(
                    DiagnosticCode::InsertCollision,
                    [descriptor.to_string()],
                ));
                return Ok(());
            }
            None => {
                let owner = self
                    .compilation
                    .method_owner(handle)
                    .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
                let owner = self.type_token_of(owner)?;
                self.add_method(handle, owner, descriptor.clone())?
            }
        };

        self.methods.insert(handle, token);
        self.method_keys.insert(descriptor, token);
        self.plan_synthesized(handle, None)
    }

    fn plan_replace_method(&mut self, handle: MethodHandle) -> Result<()> {
        let descriptor = self
            .compilation
            .method_descriptor(handle)
            .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.compilation, handle.into())))?;
        let owner = self
            .compilation
            .method_owner(handle)
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
        let owner = self.type_token_of(owner)?;

        let token = self.add_method(handle, owner, descriptor.clone())?;
        self.methods.insert(handle, token);
        self.method_keys.insert(descriptor, token);
        self.plan_synthesized(handle, None)
    }

    // Assigns the next `MethodDef` row to a declared method.
    fn add_method(&mut self, handle: MethodHandle, owner: Token, descriptor: MethodDescriptor) -> Result<Token> {
        let name = self
            .compilation
            .method(handle)
            .map(|method| method.name.clone())
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
        let token = self.next_token(TableId::MethodDef)?;
        self.planned.insert(token);
        self.method_emits.push(MethodEmit {
            token,
            owner,
            name,
            source: MethodSource::Declared(handle),
            definition: None,
            syntax_map: None,
            key: DefinitionKey::Method(descriptor),
        });
        Ok(token)
    }

    fn plan_insert_field(&mut self, handle: FieldHandle) -> Result<()> {
        if self.fields.contains_key(&handle) {
            return Ok(());
        }

        let descriptor = self
            .compilation
            .field_descriptor(handle)
            .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.compilation, handle.into())))?;
        if let Some(token) = self.baseline.field_token(&descriptor) {
            if !self.baseline.is_retired(token) {
                self.diagnostics.push(Diagnostic::error(
                    DiagnosticCode::InsertCollision,
                    [descriptor.to_string()],
                ));
                return Ok(());
            }
        }

        let owner = self
            .compilation
            .field_owner(handle)
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
        let owner = self.type_token_of(owner)?;
        self.add_field(handle, owner, descriptor)?;
        Ok(())
    }

    fn add_field(&mut self, handle: FieldHandle, owner: Token, descriptor: FieldDescriptor) -> Result<Token> {
        let symbol = self
            .compilation
            .field(handle)
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
        let token = self.next_token(TableId::Field)?;
        self.field_emits.push(FieldEmit {
            token,
            owner,
            name: symbol.name.clone(),
            flags: symbol.flags,
            ty: &symbol.ty,
            added: true,
            key: DefinitionKey::Field(descriptor.clone()),
        });
        self.fields.insert(handle, token);
        self.field_keys.insert(descriptor, token);
        Ok(token)
    }

    fn plan_type(&mut self, handle: TypeHandle, replace: bool) -> Result<()> {
        if self.types.contains_key(&handle) {
            return Ok(());
        }

        let compilation = self.compilation;
        let path = compilation
            .type_path(handle)
            .ok_or_else(|| Error::SymbolNotFound(format!("type of compilation {}", handle.compilation())))?;
        let symbol = compilation
            .type_symbol(handle)
            .ok_or_else(|| Error::SymbolNotFound(path.to_string()))?;

        match (self.baseline.type_token(&path), replace) {
            (Some(_), false) => {
                self.diagnostics.push(Diagnostic::error(
                    DiagnosticCode::InsertCollision,
                    [path.to_string()],
                ));
                return Ok(());
            }
            (None, true) => return Err(Error::SymbolNotFound(path.to_string())),
            _ => {}
        }

        let name = if replace {
            format!("{}#{}", symbol.name, self.generation)
        } else {
            symbol.name.clone()
        };
        let enclosing = symbol.enclosing().map(|enclosing| self.type_token_of(enclosing)).transpose()?;

        let token = self.next_token(TableId::TypeDef)?;
        self.types.insert(handle, token);
        self.type_paths.insert(path.clone(), token);
        let nested = match enclosing {
            Some(enclosing) => Some((self.next_token(TableId::NestedClass)?, enclosing)),
            None => None,
        };

        let method_list = self.next_row(TableId::MethodDef);
        for method in symbol.methods() {
            let descriptor = compilation
                .method_descriptor(*method)
                .ok_or_else(|| Error::SymbolNotFound(Self::describe(compilation, (*method).into())))?;
            let method_token = self.add_method(*method, token, descriptor.clone())?;
            self.methods.insert(*method, method_token);
            self.method_keys.insert(descriptor, method_token);
        }
        let field_list = self.next_row(TableId::Field);
        for field in symbol.fields() {
            let descriptor = compilation
                .field_descriptor(*field)
                .ok_or_else(|| Error::SymbolNotFound(Self::describe(compilation, (*field).into())))?;
            self.add_field(*field, token, descriptor)?;
        }

        debug!(r#type = %path, %token, replace, "planned type definition");
        self.type_emits.push(TypeEmit {
            token,
            namespace: symbol.namespace.clone(),
            name,
            flags: symbol.flags,
            base: symbol.base.as_ref(),
            extends_object: false,
            nested,
            field_list: if symbol.fields().is_empty() { 0 } else { field_list },
            method_list: if symbol.methods().is_empty() { 0 } else { method_list },
            key: DefinitionKey::Type(path),
        });

        for method in symbol.methods() {
            self.plan_synthesized(*method, None)?;
        }
        Ok(())
    }

    fn plan_update_type(&mut self, handle: TypeHandle, supplied: Option<SymbolHandle>) -> Result<()> {
        let previous = match self.supplied(
            supplied,
            |symbol| match symbol {
                SymbolHandle::Type(ty) => Some(ty),
                _ => None,
            },
            TypeHandle::compilation,
        )? {
            Some(previous) => previous,
            None => self
                .matcher()
                .match_type(handle)
                .found()
                .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.compilation, handle.into())))?,
        };

        let base_of = |compilation: &Compilation, handle: TypeHandle| {
            compilation
                .type_symbol(handle)
                .and_then(|symbol| symbol.base.as_ref())
                .and_then(|base| compilation.shape_of(base))
        };
        if base_of(self.compilation, handle) != base_of(self.previous(), previous) {
            return Err(Error::Unsupported("base type changed".to_string()));
        }

        debug!(r#type = %Self::describe(self.compilation, handle.into()), "type update needs no rows");
        Ok(())
    }

    fn plan_update_field(&mut self, handle: FieldHandle, supplied: Option<SymbolHandle>) -> Result<()> {
        let previous = match self.supplied(
            supplied,
            |symbol| match symbol {
                SymbolHandle::Field(field) => Some(field),
                _ => None,
            },
            FieldHandle::compilation,
        )? {
            Some(previous) => previous,
            None => self
                .matcher()
                .match_field(handle)
                .found()
                .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.compilation, handle.into())))?,
        };

        let previous_compilation = self.previous();
        let (Some(symbol), Some(previous_symbol)) = (self.compilation.field(handle), previous_compilation.field(previous))
        else {
            return Err(Error::SymbolNotFound(Self::describe(self.compilation, handle.into())));
        };
        if self.compilation.shape_of(&symbol.ty) != previous_compilation.shape_of(&previous_symbol.ty) {
            return Err(Error::Unsupported("field type changed".to_string()));
        }

        let descriptor = previous_compilation
            .field_descriptor(previous)
            .ok_or_else(|| Error::SymbolNotFound(Self::describe(previous_compilation, previous.into())))?;
        let token = self
            .baseline
            .field_token(&descriptor)
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
        self.fields.insert(handle, token);

        if symbol.flags != previous_symbol.flags {
            let owner = self
                .baseline
                .type_token(&descriptor.owner)
                .ok_or_else(|| Error::SymbolNotFound(descriptor.owner.to_string()))?;
            self.field_emits.push(FieldEmit {
                token,
                owner,
                name: symbol.name.clone(),
                flags: symbol.flags,
                ty: &symbol.ty,
                added: false,
                key: DefinitionKey::Field(descriptor),
            });
        }
        Ok(())
    }

    fn plan_delete(&mut self, previous: SymbolHandle) -> Result<()> {
        let previous_compilation = self.previous();
        match previous {
            SymbolHandle::Type(_) => Err(Error::Unsupported("types cannot be deleted".to_string())),
            SymbolHandle::Method(handle) => {
                self.supplied(Some(previous), |_| Some(handle), MethodHandle::compilation)?;
                let descriptor = previous_compilation
                    .method_descriptor(handle)
                    .ok_or_else(|| Error::SymbolNotFound(Self::describe(previous_compilation, previous)))?;
                let token = self
                    .baseline
                    .method_token(&descriptor)
                    .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;

                if self.compilation.core_library().is_none() {
                    self.diagnostics.push(Diagnostic::error(
                        DiagnosticCode::MissingCoreLibrary,
                        [descriptor.to_string()],
                    ));
                    return Ok(());
                }

                let definition = self
                    .baseline
                    .method_definition(token)
                    .cloned()
                    .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
                debug!(method = %descriptor, %token, "deleting method");
                self.deleted.insert(token);
                self.planned.insert(token);
                self.method_emits.push(MethodEmit {
                    token,
                    owner: definition.owner,
                    name: definition.name.clone(),
                    source: MethodSource::Deleted,
                    definition: Some(definition),
                    syntax_map: None,
                    key: DefinitionKey::Method(descriptor),
                });
                Ok(())
            }
            SymbolHandle::Field(handle) => {
                self.supplied(Some(previous), |_| Some(handle), FieldHandle::compilation)?;
                let descriptor = previous_compilation
                    .field_descriptor(handle)
                    .ok_or_else(|| Error::SymbolNotFound(Self::describe(previous_compilation, previous)))?;
                let token = self
                    .baseline
                    .field_token(&descriptor)
                    .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))?;
                debug!(field = %descriptor, %token, "retiring field");
                self.retired.insert(token);
                self.removed_fields.push(descriptor);
                Ok(())
            }
        }
    }

    // Resolves the synthesized members declared by `method`'s lowering, inserting the new
    // ones and re-emitting the bodies of existing lambdas.
    fn plan_synthesized(&mut self, method: MethodHandle, syntax_map: Option<&'a SyntaxMap>) -> Result<()> {
        let compilation = self.compilation;
        let Some(symbol) = compilation.method(method) else {
            return Ok(());
        };
        if symbol.synthesized.is_empty() {
            return Ok(());
        }

        let owner = compilation
            .method_owner(method)
            .ok_or_else(|| Error::SymbolNotFound(symbol.name.clone()))?;
        let owner_path = compilation
            .type_path(owner)
            .ok_or_else(|| Error::SymbolNotFound(symbol.name.clone()))?;
        let owner_token = self.type_token_of(owner)?;

        for member in &symbol.synthesized {
            let shape = SynthesizedShapeKey::of(compilation, &member.shape).ok_or_else(|| {
                Error::SymbolNotFound(format!("{}::{}{}", owner_path, member.role.prefix(), member.ordinal))
            })?;
            let (name, is_new) =
                self.synthesized
                    .resolve_or_create(&owner_path, member.role, member.ordinal, &shape, self.generation);
            let key = DefinitionKey::Synthesized(SynthesizedMemberKey::new(owner_path.clone(), member.role, member.ordinal));

            if is_new {
                let token = match &member.shape {
                    SynthesizedShape::Type => {
                        let token = self.next_token(TableId::TypeDef)?;
                        let nested = self.next_token(TableId::NestedClass)?;
                        self.type_paths.insert(owner_path.nested(name.clone()), token);
                        self.type_emits.push(TypeEmit {
                            token,
                            namespace: String::new(),
                            name,
                            flags: DISPLAY_CLASS_FLAGS,
                            base: None,
                            extends_object: true,
                            nested: Some((nested, owner_token)),
                            field_list: 0,
                            method_list: 0,
                            key,
                        });
                        token
                    }
                    SynthesizedShape::Field(ty) => {
                        let token = self.next_token(TableId::Field)?;
                        self.field_emits.push(FieldEmit {
                            token,
                            owner: owner_token,
                            name,
                            flags: synthesized_field_flags(member.role),
                            ty,
                            added: true,
                            key,
                        });
                        token
                    }
                    SynthesizedShape::Method { params, ret, body } => {
                        let token = self.next_token(TableId::MethodDef)?;
                        self.planned.insert(token);
                        self.method_emits.push(MethodEmit {
                            token,
                            owner: owner_token,
                            name,
                            source: MethodSource::Lambda { params, ret, body },
                            definition: None,
                            syntax_map: None,
                            key,
                        });
                        token
                    }
                };
                self.synthesized
                    .set_token(&owner_path, member.role, member.ordinal, &shape, token);
            } else if let SynthesizedShape::Method { params, ret, body } = &member.shape {
                let token = self
                    .synthesized
                    .get(&owner_path, member.role, member.ordinal, &shape)
                    .and_then(|entry| entry.token)
                    .ok_or_else(|| Error::InvariantViolation(format!("synthesized member {name} has no token")))?;
                if !self.planned.insert(token) {
                    continue;
                }
                let definition = self
                    .baseline
                    .method_definition(token)
                    .cloned()
                    .ok_or_else(|| Error::SymbolNotFound(name.clone()))?;
                self.method_emits.push(MethodEmit {
                    token,
                    owner: definition.owner,
                    name,
                    source: MethodSource::Lambda { params, ret, body },
                    definition: Some(definition),
                    syntax_map,
                    key,
                });
            }
        }
        Ok(())
    }

    fn emit(&mut self, is_cancelled: &dyn Fn() -> bool, emit_debug: bool) -> Result<()> {
        let compilation = self.compilation;
        self.emit_debug = emit_debug;

        for ty in std::mem::take(&mut self.type_emits) {
            let name = ty.name.clone();
            if let Err(error) = self.emit_type(compilation, ty) {
                let diagnostic = recoverable(name, error)?;
                self.diagnostics.push(diagnostic);
            }
        }

        for field in std::mem::take(&mut self.field_emits) {
            let name = field.name.clone();
            if let Err(error) = self.emit_field(compilation, field) {
                let diagnostic = recoverable(name, error)?;
                self.diagnostics.push(diagnostic);
            }
        }

        let mut methods = std::mem::take(&mut self.method_emits);
        methods.sort_by_key(|method| method.token);
        for method in methods {
            check_cancelled(is_cancelled)?;
            let name = method.name.clone();
            if let Err(error) = self.emit_method(compilation, method) {
                let diagnostic = recoverable(name, error)?;
                self.diagnostics.push(diagnostic);
            }
        }

        Ok(())
    }

    fn emit_type(&mut self, compilation: &'a Compilation, ty: TypeEmit<'a>) -> Result<()> {
        let extends = if ty.extends_object {
            CodeGenerator::new(compilation, self).object_token()?
        } else if let Some(base) = ty.base {
            CodeGenerator::new(compilation, self).type_token(base)?
        } else {
            Token::new(0)
        };

        let row = TypeDefRow {
            flags: ty.flags,
            name: self.strings.add(&ty.name)?,
            namespace: self.strings.add(&ty.namespace)?,
            extends,
            field_list: ty.field_list,
            method_list: ty.method_list,
        };
        self.append(ty.token, &row)?;
        self.owners.insert(ty.token, ty.key);

        if let Some((token, enclosing)) = ty.nested {
            self.append(
                token,
                &NestedClassRow {
                    nested: ty.token,
                    enclosing,
                },
            )?;
        }
        Ok(())
    }

    fn emit_field(&mut self, compilation: &'a Compilation, field: FieldEmit<'a>) -> Result<()> {
        let sig = CodeGenerator::new(compilation, self).sig_type(field.ty)?;
        let signature = encode_field_signature(&sig)?;
        let row = FieldRow {
            flags: field.flags,
            name: self.strings.add(&field.name)?,
            signature: self.blobs.add(&signature)?,
        };

        if field.added {
            self.writer.log(field.owner, EncFuncCode::AddField);
            self.append(field.token, &row)?;
            self.owners.insert(field.token, field.key);
        } else {
            self.writer.add_row(field.token.row(), &row)?;
            self.writer.log(field.token, EncFuncCode::Default);
            self.updates.push((field.token, field.key));
        }
        Ok(())
    }

    fn emit_method(&mut self, compilation: &'a Compilation, method: MethodEmit<'a>) -> Result<()> {
        let previous_slots = if method.is_added() {
            Vec::new()
        } else {
            self.method_locals
                .get(&method.token)
                .cloned()
                .or_else(|| self.baseline.local_slots(method.token))
                .unwrap_or_default()
        };
        let allocator = LocalSlotAllocator::new(previous_slots, method.syntax_map);

        let (signature, flags, impl_flags, param_names, body, lowered) = match &method.source {
            MethodSource::Declared(handle) => {
                let symbol = compilation
                    .method(*handle)
                    .ok_or_else(|| Error::SymbolNotFound(method.name.clone()))?;
                let mut generator = CodeGenerator::new(compilation, self);
                let signature = match &method.definition {
                    Some(definition) => definition.signature.clone(),
                    None => encode_method_signature(&generator.method_sig(symbol)?)?,
                };
                let body = match &symbol.body {
                    Some(body) => Some(generator.generate_body(body, !symbol.ret.is_void(), allocator)?),
                    None => None,
                };
                let params: Vec<&str> = symbol.params.iter().map(|param| param.name.as_str()).collect();
                (
                    signature,
                    symbol.flags.bits(),
                    symbol.impl_flags.bits(),
                    params,
                    body,
                    symbol.body.as_ref(),
                )
            }
            MethodSource::Lambda { params, ret, body } => {
                let mut generator = CodeGenerator::new(compilation, self);
                let signature = match &method.definition {
                    Some(definition) => definition.signature.clone(),
                    None => encode_method_signature(&generator.lambda_sig(params, ret)?)?,
                };
                let generated = generator.generate_body(body, !ret.is_void(), allocator)?;
                (signature, lambda_flags().bits(), 0, Vec::new(), Some(generated), Some(*body))
            }
            MethodSource::Deleted => {
                let definition = method
                    .definition
                    .as_ref()
                    .ok_or_else(|| Error::InvariantViolation(format!("deleted method {} has no row", method.name)))?;
                let stub = CodeGenerator::new(compilation, self).missing_method_body()?;
                let rva = self.il.add_body(&stub)?;
                self.method_bodies.insert(method.token, rva);
                self.method_locals.insert(method.token, Vec::new());

                let row = MethodDefRow {
                    rva,
                    impl_flags: definition.impl_flags,
                    flags: definition.flags,
                    name: self.strings.add(&definition.name)?,
                    signature: self.blobs.add(&definition.signature)?,
                    param_list: definition.param_list,
                };
                self.writer.add_row(method.token.row(), &row)?;
                self.writer.log(method.token, EncFuncCode::Default);
                self.updated_methods.push(method.token);
                self.updates.push((method.token, method.key));
                return Ok(());
            }
        };

        let rva = match &body {
            Some(generated) => {
                let rva = self.il.add_body(&generated.bytes)?;
                self.method_bodies.insert(method.token, rva);
                self.method_locals.insert(method.token, generated.slots.clone());
                rva
            }
            None => 0,
        };

        if self.emit_debug {
            if let (Some(generated), Some(lowered)) = (&body, lowered) {
                self.debug.push(MethodDebugInfo {
                    method: method.token,
                    local_signature: generated.local_signature,
                    sequence_points: lowered
                        .sequence_points
                        .iter()
                        .filter_map(|point| {
                            Some(DebugSequencePoint {
                                il_offset: *generated.offsets.get(point.instruction)?,
                                start_line: point.start_line,
                                start_column: point.start_column,
                                end_line: point.end_line,
                                end_column: point.end_column,
                            })
                        })
                        .collect(),
                    local_names: generated.slots.iter().map(|slot| slot.name.clone()).collect(),
                });
            }
        }

        let name = self.strings.add(&method.name)?;
        let signature_index = self.blobs.add(&signature)?;

        match method.definition {
            Some(definition) => {
                let row = MethodDefRow {
                    rva,
                    impl_flags: definition.impl_flags,
                    flags: definition.flags,
                    name,
                    signature: signature_index,
                    param_list: definition.param_list,
                };
                self.writer.add_row(method.token.row(), &row)?;
                self.writer.log(method.token, EncFuncCode::Default);
                self.updated_methods.push(method.token);
                self.updates.push((method.token, method.key));
            }
            None => {
                let param_list = self.next_row(TableId::Param);
                let row = MethodDefRow {
                    rva,
                    impl_flags,
                    flags,
                    name,
                    signature: signature_index,
                    param_list,
                };
                self.writer.log(method.owner, EncFuncCode::AddMethod);
                self.append(method.token, &row)?;

                for (index, param) in param_names.iter().enumerate() {
                    let token = self.next_token(TableId::Param)?;
                    let sequence = u16::try_from(index + 1)
                        .map_err(|_| malformed_error!("Method {} has too many parameters", method.name))?;
                    let row = ParamRow {
                        flags: 0,
                        sequence,
                        name: self.strings.add(param)?,
                    };
                    self.writer.log(method.token, EncFuncCode::AddParameter);
                    self.append(token, &row)?;
                }

                self.method_defs.push(MethodDefinition {
                    token: method.token,
                    owner: method.owner,
                    name: method.name,
                    signature,
                    flags,
                    impl_flags,
                    param_list,
                });
                self.owners.insert(method.token, method.key);
            }
        }
        Ok(())
    }

    fn serialize(&mut self) -> Result<Vec<u8>> {
        let mvid = self.compilation.mvid();
        let row = ModuleRow {
            generation: self.generation,
            name: self.strings.add(self.compilation.module_name())?,
            mvid: self.guids.add(mvid)?,
            enc_id: self.guids.add(enc_id(mvid, self.generation))?,
            enc_base_id: self.guids.add(self.baseline.enc_id())?,
        };
        self.writer.add_row(1, &row)?;

        write_metadata_root(&[
            (TABLES_STREAM_UNCOMPRESSED, self.writer.serialize()?),
            (STRINGS_STREAM, self.strings.bytes()),
            (USER_STRINGS_STREAM, self.user_strings.bytes()),
            (GUID_STREAM, self.guids.bytes()),
            (BLOB_STREAM, self.blobs.bytes()),
        ])
    }

    fn validate_tokens(&self) -> Result<()> {
        for token in &self.added {
            let table = token
                .table_id()
                .ok_or_else(|| Error::InvariantViolation(format!("token {token} has no table")))?;
            if token.row() <= self.baseline.row_count(table) {
                return Err(Error::InvariantViolation(format!(
                    "added token {} is not above the committed row count {}",
                    token,
                    self.baseline.row_count(table)
                )));
            }
        }

        for (token, key) in &self.updates {
            let table = token
                .table_id()
                .ok_or_else(|| Error::InvariantViolation(format!("token {token} has no table")))?;
            if token.row() > self.baseline.row_count(table) {
                return Err(Error::InvariantViolation(format!("updated token {token} was never committed")));
            }
            if let Some(owner) = self.baseline.definition_owner(*token) {
                if owner != key {
                    return Err(Error::InvariantViolation(format!(
                        "token {token} committed for {owner} would be reassigned to {key}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_heaps(&self, metadata: &[u8]) -> Result<()> {
        let view = MetadataDeltaView::parse(metadata, self.baseline.heap_sizes())?;
        if view.generation()? != self.generation {
            return Err(Error::InvariantViolation(format!(
                "delta carries generation {} instead of {}",
                view.generation()?,
                self.generation
            )));
        }

        let limits = view.next_bases();
        for table in [
            TableId::Module,
            TableId::TypeRef,
            TableId::TypeDef,
            TableId::Field,
            TableId::MethodDef,
            TableId::Param,
            TableId::MemberRef,
            TableId::StandAloneSig,
            TableId::TypeSpec,
            TableId::AssemblyRef,
        ] {
            for row in view.rows(table) {
                for (column, heap) in heap_columns(table) {
                    let index = row.get(*column).copied().unwrap_or(0);
                    let valid = match heap {
                        HeapKind::Strings => index < limits.strings.max(1),
                        HeapKind::Blob => index < limits.blobs.max(1),
                        HeapKind::Guid => index <= limits.guids,
                    };
                    if !valid {
                        return Err(Error::InvariantViolation(format!(
                            "{table:?} column {column} references {heap:?} index {index:#x} past the heap end"
                        )));
                    }
                }
            }
        }

        let added: HashSet<&Token> = self.added.iter().collect();
        for token in view.enc_map() {
            let table = token
                .table_id()
                .ok_or_else(|| Error::InvariantViolation(format!("EncMap token {token} has no table")))?;
            if token.row() > self.baseline.row_count(table) && !added.contains(&token) {
                return Err(Error::InvariantViolation(format!("EncMap lists unassigned token {token}")));
            }
        }
        Ok(())
    }

    fn finish(self, compilation: &Arc<Compilation>, metadata: Vec<u8>) -> Result<(GenerationBaseline, EmittedDelta)> {
        let baseline = self.baseline;
        let heap_sizes = HeapSizes {
            strings: self.strings.next_base()?,
            user_strings: self.user_strings.next_base()?,
            blobs: self.blobs.next_base()?,
            guids: self.guids.next_base()?,
        };

        let mut types = baseline.types.clone();
        types.extend(self.type_paths);
        let mut methods = baseline.methods.clone();
        methods.extend(self.method_keys);
        let mut fields = baseline.fields.clone();
        for descriptor in &self.removed_fields {
            fields.remove(descriptor);
        }
        fields.extend(self.field_keys);

        let mut method_defs = baseline.method_defs.clone();
        method_defs.extend(self.method_defs.into_iter().map(|definition| (definition.token, definition)));
        let mut type_refs = baseline.type_refs.clone();
        type_refs.extend(self.type_refs);
        let mut member_refs = baseline.member_refs.clone();
        member_refs.extend(self.member_refs);
        let mut type_specs = baseline.type_specs.clone();
        type_specs.extend(self.type_specs);
        let mut method_locals = baseline.method_locals.clone();
        method_locals.extend(self.method_locals);
        let mut token_owners = baseline.token_owners.clone();
        token_owners.extend(self.owners);

        let mut deleted_methods = baseline.deleted_methods.clone();
        deleted_methods.extend(self.deleted);
        for token in &self.restored {
            deleted_methods.remove(token);
        }
        let mut retired_fields = baseline.retired_fields.clone();
        retired_fields.extend(self.retired);

        let mut debug = self.debug;
        debug.sort_by_key(|info| info.method);

        let next = GenerationBaseline {
            ordinal: self.generation,
            reader: Arc::clone(&baseline.reader),
            locals_provider: Arc::clone(&baseline.locals_provider),
            compilation: Arc::clone(compilation),
            row_counts: self.row_counts,
            heap_sizes,
            types,
            methods,
            method_defs,
            fields,
            type_refs,
            member_refs,
            type_specs,
            assembly_refs: self.assembly_refs,
            synthesized: self.synthesized,
            method_locals,
            token_owners,
            deleted_methods,
            retired_fields,
            enc_id: enc_id(self.compilation.mvid(), self.generation),
            enc_base_id: baseline.enc_id(),
        };

        let delta = EmittedDelta {
            generation: self.generation,
            metadata,
            il: self.il.into_bytes(),
            debug: self.emit_debug.then_some(DebugDelta { methods: debug }),
            updated_methods: self.updated_methods,
            added_tokens: self.added,
            heap_bases: baseline.heap_sizes(),
            method_bodies: self.method_bodies,
        };
        Ok((next, delta))
    }
}

impl TokenResolver for DeltaSession<'_> {
    fn source_type_token(&mut self, ty: TypeHandle) -> Result<Token> {
        self.type_token_of(ty)
    }

    fn source_method_token(&mut self, method: MethodHandle) -> Result<Token> {
        if let Some(token) = self.methods.get(&method) {
            return Ok(*token);
        }
        let descriptor = self
            .compilation
            .method_descriptor(method)
            .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.compilation, method.into())))?;
        self.method_keys
            .get(&descriptor)
            .copied()
            .or_else(|| self.baseline.method_token(&descriptor))
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))
    }

    fn source_field_token(&mut self, field: FieldHandle) -> Result<Token> {
        if let Some(token) = self.fields.get(&field) {
            return Ok(*token);
        }
        let descriptor = self
            .compilation
            .field_descriptor(field)
            .ok_or_else(|| Error::SymbolNotFound(Self::describe(self.compilation, field.into())))?;
        self.field_keys
            .get(&descriptor)
            .copied()
            .or_else(|| {
                self.baseline
                    .field_token(&descriptor)
                    .filter(|token| !self.retired.contains(token))
            })
            .ok_or_else(|| Error::SymbolNotFound(descriptor.to_string()))
    }

    fn synthesized_method_token(&mut self, owner: TypeHandle, ordinal: u32) -> Result<Token> {
        self.synthesized_token(owner, SynthesizedRole::LambdaMethod, ordinal)
    }

    fn synthesized_field_token(&mut self, owner: TypeHandle, role: SynthesizedRole, ordinal: u32) -> Result<Token> {
        self.synthesized_token(owner, role, ordinal)
    }

    fn assembly_ref_token(&mut self, reference: usize) -> Result<Token> {
        if let Some(rid) = self.reference_rids.get(reference).copied().flatten() {
            return Token::from_parts(TableId::AssemblyRef, rid);
        }

        let declared = self
            .compilation
            .references()
            .get(reference)
            .ok_or_else(|| Error::SymbolNotFound(format!("assembly reference {reference}")))?;
        let identity = declared.identity.clone();
        let rid = self
            .assembly_refs
            .push(identity.clone(), declared.alias.clone(), declared.pattern)?;
        let token = self.next_token(TableId::AssemblyRef)?;
        if token.row() != rid {
            return Err(Error::InvariantViolation(format!(
                "AssemblyRef row {} does not match table entry {}",
                token.row(),
                rid
            )));
        }

        let row = AssemblyRefRow {
            version: identity.version,
            flags: u32::from(matches!(identity.strong_name, Some(Identity::PubKey(_)))),
            public_key_or_token: match &identity.strong_name {
                Some(strong_name) => self.blobs.add(&strong_name.blob())?,
                None => 0,
            },
            name: self.strings.add(&identity.name)?,
            culture: match &identity.culture {
                Some(culture) => self.strings.add(culture)?,
                None => 0,
            },
            hash_value: 0,
        };
        self.append(token, &row)?;
        if let Some(slot) = self.reference_rids.get_mut(reference) {
            *slot = Some(rid);
        }
        debug!(assembly = %identity.name, %token, "appended assembly reference");
        Ok(token)
    }

    fn type_ref_token(&mut self, scope: Token, namespace: &str, name: &str) -> Result<Token> {
        let key = (scope, namespace.to_string(), name.to_string());
        if let Some(token) = self.baseline.type_refs.get(&key).or_else(|| self.type_refs.get(&key)) {
            return Ok(*token);
        }

        let token = self.next_token(TableId::TypeRef)?;
        let row = TypeRefRow {
            resolution_scope: scope,
            name: self.strings.add(name)?,
            namespace: self.strings.add(namespace)?,
        };
        self.append(token, &row)?;
        self.type_refs.insert(key, token);
        Ok(token)
    }

    fn type_spec_token(&mut self, signature: Vec<u8>) -> Result<Token> {
        if let Some(token) = self
            .baseline
            .type_specs
            .get(&signature)
            .or_else(|| self.type_specs.get(&signature))
        {
            return Ok(*token);
        }

        let token = self.next_token(TableId::TypeSpec)?;
        let row = TypeSpecRow {
            signature: self.blobs.add(&signature)?,
        };
        self.append(token, &row)?;
        self.type_specs.insert(signature, token);
        Ok(token)
    }

    fn member_ref_token(&mut self, parent: Token, name: &str, signature: Vec<u8>) -> Result<Token> {
        let key = (parent, name.to_string(), signature);
        if let Some(token) = self.baseline.member_refs.get(&key).or_else(|| self.member_refs.get(&key)) {
            return Ok(*token);
        }

        let token = self.next_token(TableId::MemberRef)?;
        let row = MemberRefRow {
            class: parent,
            name: self.strings.add(name)?,
            signature: self.blobs.add(&key.2)?,
        };
        self.append(token, &row)?;
        self.member_refs.insert(key, token);
        Ok(token)
    }

    fn standalone_sig_token(&mut self, signature: Vec<u8>) -> Result<Token> {
        if let Some(token) = self.standalone_sigs.get(&signature) {
            return Ok(*token);
        }

        let token = self.next_token(TableId::StandAloneSig)?;
        let row = StandAloneSigRow {
            signature: self.blobs.add(&signature)?,
        };
        self.append(token, &row)?;
        self.standalone_sigs.insert(signature, token);
        Ok(token)
    }

    fn user_string_token(&mut self, value: &str) -> Result<Token> {
        if let Some(token) = self.user_string_tokens.get(value) {
            return Ok(*token);
        }

        let offset = self.user_strings.add(value)?;
        if offset > Token::MAX_ROW {
            return Err(malformed_error!("#US heap exceeds 24 bits"));
        }
        let token = Token::new(0x7000_0000 | offset);
        self.user_string_tokens.insert(value.to_string(), token);
        Ok(token)
    }
}

impl DeltaSession<'_> {
    fn synthesized_token(&self, owner: TypeHandle, role: SynthesizedRole, ordinal: u32) -> Result<Token> {
        let name = || format!("{}{}", role.prefix(), ordinal);
        let (_, member) =
            synthesized_member(self.compilation, owner, role, ordinal).ok_or_else(|| Error::SymbolNotFound(name()))?;
        let shape = SynthesizedShapeKey::of(self.compilation, &member.shape).ok_or_else(|| Error::SymbolNotFound(name()))?;
        let path = self
            .compilation
            .type_path(owner)
            .ok_or_else(|| Error::SymbolNotFound(name()))?;

        self.synthesized
            .get(&path, role, ordinal, &shape)
            .and_then(|entry| entry.token)
            .ok_or_else(|| Error::SymbolNotFound(format!("{path}::{}", name())))
    }
}

impl fmt::Display for EmitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.delta {
            Some(delta) => write!(
                f,
                "generation {}: {} added, {} updated",
                delta.generation,
                delta.added_tokens.len(),
                delta.updated_methods.len()
            ),
            None => write!(f, "failed with {} diagnostics", self.diagnostics.len()),
        }
    }
}
