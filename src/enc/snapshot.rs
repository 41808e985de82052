//! Full layout of a compilation as a generation-0 image.
//!
//! Hosts normally hand the emitter the image their full emitter produced. For a
//! self-contained session, and for comparing a delta body against a from-scratch build,
//! [`ModuleMetadata::snapshot`] lays a [`Compilation`] out the way a full emit does:
//!
//! - `<Module>` is `TypeDef` 1, followed by the declared types and then every closure class
//! - a type's methods and fields are contiguous, declared members first, then the
//!   synthesized lambdas and fields its methods' lowering declares
//! - `AssemblyRef`, `TypeRef`, `MemberRef` and `TypeSpec` rows are created on first use, so
//!   a reference no body or signature mentions gets no row

use std::collections::HashMap;

use tracing::debug;

use crate::{
    enc::{
        codegen::{CodeGenerator, TokenResolver},
        LocalSlot, LocalSlotAllocator, LocalSlotProvider,
    },
    metadata::{
        identity::{AssemblyIdentity, Identity},
        image::{ModuleMetadata, ModuleMetadataBuilder},
        method::MethodAttributes,
        signatures::{encode_field_signature, encode_method_signature},
        tables::{FieldAttributes, TableId, TypeAttributes},
        token::Token,
    },
    symbols::{
        Compilation, FieldHandle, MethodHandle, SynthesizedRole, SynthesizedShape, TypeHandle,
    },
    Error, Result,
};

/// `TypeAttributes` of a closure class.
pub(crate) const DISPLAY_CLASS_FLAGS: u32 =
    TypeAttributes::NESTED_PRIVATE | TypeAttributes::SEALED | TypeAttributes::BEFORE_FIELD_INIT;

/// `MethodAttributes` of a lambda method.
pub(crate) fn lambda_flags() -> MethodAttributes {
    MethodAttributes::PRIVATE | MethodAttributes::STATIC | MethodAttributes::HIDE_BY_SIG
}

/// `FieldAttributes` of a synthesized field.
pub(crate) fn synthesized_field_flags(role: SynthesizedRole) -> u16 {
    match role {
        SynthesizedRole::LambdaCacheField => FieldAttributes::PUBLIC | FieldAttributes::STATIC,
        _ => FieldAttributes::PUBLIC,
    }
}

/// Name of a synthesized member in the generation that first emits it.
pub(crate) fn synthesized_name(role: SynthesizedRole, ordinal: u32) -> String {
    format!("{}{}", role.prefix(), ordinal)
}

#[derive(Default)]
struct SnapshotResolver {
    builder: Option<ModuleMetadataBuilder>,
    types: HashMap<TypeHandle, Token>,
    methods: HashMap<MethodHandle, Token>,
    fields: HashMap<FieldHandle, Token>,
    lambdas: HashMap<(TypeHandle, u32), Token>,
    synthesized_fields: HashMap<(TypeHandle, SynthesizedRole, u32), Token>,
    assembly_refs: HashMap<usize, Token>,
    type_refs: HashMap<(Token, String, String), Token>,
    member_refs: HashMap<(Token, String, Vec<u8>), Token>,
    type_specs: HashMap<Vec<u8>, Token>,
    user_strings: HashMap<String, Token>,
    identities: Vec<AssemblyIdentity>,
}

impl SnapshotResolver {
    fn builder(&mut self) -> Result<&mut ModuleMetadataBuilder> {
        self.builder
            .as_mut()
            .ok_or_else(|| Error::InvariantViolation("snapshot builder already finished".to_string()))
    }
}

fn lookup<K: std::hash::Hash + Eq>(map: &HashMap<K, Token>, key: &K, what: impl FnOnce() -> String) -> Result<Token> {
    map.get(key).copied().ok_or_else(|| Error::SymbolNotFound(what()))
}

impl TokenResolver for SnapshotResolver {
    fn source_type_token(&mut self, ty: TypeHandle) -> Result<Token> {
        lookup(&self.types, &ty, || format!("type of compilation {}", ty.compilation()))
    }

    fn source_method_token(&mut self, method: MethodHandle) -> Result<Token> {
        lookup(&self.methods, &method, || format!("method of compilation {}", method.compilation()))
    }

    fn source_field_token(&mut self, field: FieldHandle) -> Result<Token> {
        lookup(&self.fields, &field, || format!("field of compilation {}", field.compilation()))
    }

    fn synthesized_method_token(&mut self, owner: TypeHandle, ordinal: u32) -> Result<Token> {
        lookup(&self.lambdas, &(owner, ordinal), || {
            synthesized_name(SynthesizedRole::LambdaMethod, ordinal)
        })
    }

    fn synthesized_field_token(&mut self, owner: TypeHandle, role: SynthesizedRole, ordinal: u32) -> Result<Token> {
        lookup(&self.synthesized_fields, &(owner, role, ordinal), || synthesized_name(role, ordinal))
    }

    fn assembly_ref_token(&mut self, reference: usize) -> Result<Token> {
        if let Some(token) = self.assembly_refs.get(&reference) {
            return Ok(*token);
        }

        let identity = self
            .identities
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::SymbolNotFound(format!("assembly reference {reference}")))?;
        let flags = u32::from(matches!(identity.strong_name, Some(Identity::PubKey(_))));
        let token = self.builder()?.add_assembly_ref(identity, flags)?;
        self.assembly_refs.insert(reference, token);
        Ok(token)
    }

    fn type_ref_token(&mut self, scope: Token, namespace: &str, name: &str) -> Result<Token> {
        let key = (scope, namespace.to_string(), name.to_string());
        if let Some(token) = self.type_refs.get(&key) {
            return Ok(*token);
        }
        let token = self.builder()?.add_type_ref(scope, namespace, name)?;
        self.type_refs.insert(key, token);
        Ok(token)
    }

    fn type_spec_token(&mut self, signature: Vec<u8>) -> Result<Token> {
        if let Some(token) = self.type_specs.get(&signature) {
            return Ok(*token);
        }
        let token = self.builder()?.add_type_spec(signature.clone())?;
        self.type_specs.insert(signature, token);
        Ok(token)
    }

    fn member_ref_token(&mut self, parent: Token, name: &str, signature: Vec<u8>) -> Result<Token> {
        let key = (parent, name.to_string(), signature);
        if let Some(token) = self.member_refs.get(&key) {
            return Ok(*token);
        }
        let token = self.builder()?.add_member_ref(parent, name, key.2.clone())?;
        self.member_refs.insert(key, token);
        Ok(token)
    }

    fn standalone_sig_token(&mut self, signature: Vec<u8>) -> Result<Token> {
        self.builder()?.add_standalone_sig(&signature)
    }

    fn user_string_token(&mut self, value: &str) -> Result<Token> {
        if let Some(token) = self.user_strings.get(value) {
            return Ok(*token);
        }
        let token = self.builder()?.add_user_string(value)?;
        self.user_strings.insert(value.to_string(), token);
        Ok(token)
    }
}

// One synthesized member as laid out under its owner.
struct SynthesizedSlot<'a> {
    role: SynthesizedRole,
    ordinal: u32,
    shape: &'a SynthesizedShape,
}

fn synthesized_of<'a>(compilation: &'a Compilation, owner: TypeHandle) -> Vec<SynthesizedSlot<'a>> {
    let Some(symbol) = compilation.type_symbol(owner) else {
        return Vec::new();
    };

    symbol
        .methods()
        .iter()
        .filter_map(|handle| compilation.method(*handle))
        .flat_map(|method| method.synthesized.iter())
        .map(|member| SynthesizedSlot {
            role: member.role,
            ordinal: member.ordinal,
            shape: &member.shape,
        })
        .collect()
}

fn next_row(counter: &mut u32, table: TableId) -> Result<Token> {
    *counter = counter
        .checked_add(1)
        .ok_or(Error::TokenExhausted(table))?;
    Token::from_parts(table, *counter)
}

impl ModuleMetadata {
    /// Lays out `compilation` as a complete generation-0 image.
    ///
    /// # Errors
    /// Returns [`crate::Error::SymbolNotFound`] if a signature or body mentions a type none
    /// of the compilation's references exports, or an error if a table or heap overflows.
    pub fn snapshot(compilation: &Compilation) -> Result<ModuleMetadata> {
        let mut resolver = SnapshotResolver {
            builder: Some(ModuleMetadataBuilder::new(compilation.module_name(), compilation.mvid())),
            identities: compilation
                .references()
                .iter()
                .map(|reference| reference.identity.clone())
                .collect(),
            ..SnapshotResolver::default()
        };

        // Definition tokens are fixed up front so bodies can refer forward.
        let (mut type_row, mut method_row, mut field_row) = (1u32, 0u32, 0u32);
        let mut display_classes = Vec::new();
        for (handle, symbol) in compilation.types() {
            resolver.types.insert(handle, next_row(&mut type_row, TableId::TypeDef)?);
            for method in symbol.methods() {
                resolver.methods.insert(*method, next_row(&mut method_row, TableId::MethodDef)?);
            }
            for slot in synthesized_of(compilation, handle) {
                if let SynthesizedShape::Method { .. } = slot.shape {
                    let token = next_row(&mut method_row, TableId::MethodDef)?;
                    resolver.lambdas.insert((handle, slot.ordinal), token);
                }
            }
            for field in symbol.fields() {
                resolver.fields.insert(*field, next_row(&mut field_row, TableId::Field)?);
            }
            for slot in synthesized_of(compilation, handle) {
                if let SynthesizedShape::Field(_) = slot.shape {
                    let token = next_row(&mut field_row, TableId::Field)?;
                    resolver
                        .synthesized_fields
                        .insert((handle, slot.role, slot.ordinal), token);
                }
            }
            for slot in synthesized_of(compilation, handle) {
                if let SynthesizedShape::Type = slot.shape {
                    display_classes.push((handle, slot.ordinal));
                }
            }
        }

        resolver.builder()?.add_type_def("", "<Module>", 0, Token::new(0), None)?;
        for (handle, symbol) in compilation.types() {
            let extends = match &symbol.base {
                Some(base) => CodeGenerator::new(compilation, &mut resolver).type_token(base)?,
                None => Token::new(0),
            };
            let enclosing = match symbol.enclosing() {
                Some(enclosing) => Some(resolver.source_type_token(enclosing)?),
                None => None,
            };
            resolver
                .builder()?
                .add_type_def(&symbol.namespace, &symbol.name, symbol.flags, extends, enclosing)?;

            for field in symbol.fields() {
                let Some(field_symbol) = compilation.field(*field) else {
                    continue;
                };
                let mut generator = CodeGenerator::new(compilation, &mut resolver);
                let sig = generator.sig_type(&field_symbol.ty)?;
                let signature = encode_field_signature(&sig)?;
                resolver
                    .builder()?
                    .add_field(&field_symbol.name, field_symbol.flags, signature)?;
            }
            for slot in synthesized_of(compilation, handle) {
                if let SynthesizedShape::Field(ty) = slot.shape {
                    let sig = CodeGenerator::new(compilation, &mut resolver).sig_type(ty)?;
                    let signature = encode_field_signature(&sig)?;
                    resolver.builder()?.add_field(
                        &synthesized_name(slot.role, slot.ordinal),
                        synthesized_field_flags(slot.role),
                        signature,
                    )?;
                }
            }

            for method in symbol.methods() {
                let Some(method_symbol) = compilation.method(*method) else {
                    continue;
                };
                let mut generator = CodeGenerator::new(compilation, &mut resolver);
                let sig = generator.method_sig(method_symbol)?;
                let signature = encode_method_signature(&sig)?;
                let body = match &method_symbol.body {
                    Some(body) => Some(generator.generate_body(
                        body,
                        !method_symbol.ret.is_void(),
                        LocalSlotAllocator::new(Vec::new(), None),
                    )?),
                    None => None,
                };

                let params: Vec<&str> = method_symbol.params.iter().map(|param| param.name.as_str()).collect();
                let (bytes, slots) = match body {
                    Some(body) => (Some(body.bytes), body.slots),
                    None => (None, Vec::new()),
                };
                let token = resolver.builder()?.add_method_def(
                    &method_symbol.name,
                    method_symbol.flags.bits(),
                    method_symbol.impl_flags.bits(),
                    signature,
                    &params,
                    bytes,
                )?;
                if !slots.is_empty() {
                    resolver.builder()?.set_local_slots(token, slots);
                }
            }
            for slot in synthesized_of(compilation, handle) {
                if let SynthesizedShape::Method { params, ret, body } = slot.shape {
                    let mut generator = CodeGenerator::new(compilation, &mut resolver);
                    let sig = generator.lambda_sig(params, ret)?;
                    let signature = encode_method_signature(&sig)?;
                    let body = generator.generate_body(body, !ret.is_void(), LocalSlotAllocator::new(Vec::new(), None))?;

                    let token = resolver.builder()?.add_method_def(
                        &synthesized_name(slot.role, slot.ordinal),
                        lambda_flags().bits(),
                        0,
                        signature,
                        &[],
                        Some(body.bytes),
                    )?;
                    if !body.slots.is_empty() {
                        resolver.builder()?.set_local_slots(token, body.slots);
                    }
                }
            }
        }

        for (owner, ordinal) in display_classes {
            let object = CodeGenerator::new(compilation, &mut resolver).object_token()?;
            let enclosing = resolver.source_type_token(owner)?;
            resolver.builder()?.add_type_def(
                "",
                &synthesized_name(SynthesizedRole::DisplayClass, ordinal),
                DISPLAY_CLASS_FLAGS,
                object,
                Some(enclosing),
            )?;
        }

        let builder = resolver
            .builder
            .take()
            .ok_or_else(|| Error::InvariantViolation("snapshot builder already finished".to_string()))?;
        let image = builder.build()?;
        debug!(
            module = %compilation.module_name(),
            assembly_refs = resolver.assembly_refs.len(),
            type_refs = resolver.type_refs.len(),
            member_refs = resolver.member_refs.len(),
            "laid out module snapshot"
        );
        Ok(image)
    }
}

impl LocalSlotProvider for ModuleMetadata {
    fn local_slots(&self, method: Token) -> Option<Vec<LocalSlot>> {
        self.local_slots.get(&method).cloned()
    }
}
