//! Lowering of symbolic method bodies and signatures to tokens and bytes.
//!
//! Both the generation-0 snapshot and every delta turn [`TypeDescriptor`]s, [`MethodRef`]s
//! and [`FieldRef`]s into metadata tokens. What differs is where tokens come from: the
//! snapshot lays out fresh tables, a delta reuses committed rows and appends the rest.
//! [`TokenResolver`] is that seam; [`CodeGenerator`] holds the shared lowering on top of it.

use std::collections::HashMap;

use crate::{
    enc::{locals::slot_types, LocalSlot, LocalSlotAllocator},
    metadata::{
        method::{encode_method_body, BranchKind, InstructionEncoder, Label},
        signatures::{
            encode_field_signature, encode_local_var_signature, encode_method_signature,
            encode_typespec_signature, MethodSig, SigType,
        },
        token::Token,
    },
    symbols::{
        Compilation, FieldHandle, FieldRef, Instruction, LabelId, LoweredBody, MethodHandle,
        MethodRef, MethodSymbol, SynthesizedMember, SynthesizedRole, SynthesizedShape,
        TypeDescriptor, TypeHandle, TypePath,
    },
    Error, Result,
};

/// Source of tokens for the rows a body or signature refers to.
///
/// Reference methods create the row on first use and return the same token afterwards.
pub(crate) trait TokenResolver {
    /// `TypeDef` of a declared type.
    fn source_type_token(&mut self, ty: TypeHandle) -> Result<Token>;

    /// `MethodDef` of a declared method.
    fn source_method_token(&mut self, method: MethodHandle) -> Result<Token>;

    /// `Field` of a declared field.
    fn source_field_token(&mut self, field: FieldHandle) -> Result<Token>;

    /// `MethodDef` of the lambda `ordinal` of `owner`.
    fn synthesized_method_token(&mut self, owner: TypeHandle, ordinal: u32) -> Result<Token>;

    /// `Field` of the synthesized field `(role, ordinal)` of `owner`.
    fn synthesized_field_token(&mut self, owner: TypeHandle, role: SynthesizedRole, ordinal: u32) -> Result<Token>;

    /// `AssemblyRef` of the compilation's reference number `reference`.
    fn assembly_ref_token(&mut self, reference: usize) -> Result<Token>;

    /// `TypeRef` with the given scope and name.
    fn type_ref_token(&mut self, scope: Token, namespace: &str, name: &str) -> Result<Token>;

    /// `TypeSpec` with this signature.
    fn type_spec_token(&mut self, signature: Vec<u8>) -> Result<Token>;

    /// `MemberRef` with this parent, name and signature.
    fn member_ref_token(&mut self, parent: Token, name: &str, signature: Vec<u8>) -> Result<Token>;

    /// `StandAloneSig` with this signature.
    fn standalone_sig_token(&mut self, signature: Vec<u8>) -> Result<Token>;

    /// `ldstr` token of a string literal.
    fn user_string_token(&mut self, value: &str) -> Result<Token>;
}

/// A body lowered to bytes.
#[derive(Debug, Clone)]
pub(crate) struct GeneratedBody {
    /// Header and code, ready for the IL stream.
    pub bytes: Vec<u8>,
    /// `StandAloneSig` of the locals, if any.
    pub local_signature: Option<Token>,
    /// Slot layout after this body.
    pub slots: Vec<LocalSlot>,
    /// IL offset of every instruction.
    pub offsets: Vec<u32>,
}

/// Finds the synthesized member `(role, ordinal)` declared by one of `owner`'s methods.
pub(crate) fn synthesized_member(
    compilation: &Compilation,
    owner: TypeHandle,
    role: SynthesizedRole,
    ordinal: u32,
) -> Option<(MethodHandle, &SynthesizedMember)> {
    compilation
        .type_symbol(owner)?
        .methods()
        .iter()
        .filter_map(|handle| Some((*handle, compilation.method(*handle)?)))
        .find_map(|(handle, method)| {
            method
                .synthesized
                .iter()
                .find(|member| member.role == role && member.ordinal == ordinal)
                .map(|member| (handle, member))
        })
}

/// Lowers descriptors and bodies of one compilation through a [`TokenResolver`].
pub(crate) struct CodeGenerator<'a, R: TokenResolver> {
    compilation: &'a Compilation,
    resolver: &'a mut R,
}

impl<'a, R: TokenResolver> CodeGenerator<'a, R> {
    pub(crate) fn new(compilation: &'a Compilation, resolver: &'a mut R) -> Self {
        Self {
            compilation,
            resolver,
        }
    }

    /// `TypeRef` of an external type, creating the chain of enclosing `TypeRef`s.
    pub(crate) fn external_type_token(&mut self, reference: usize, path: &TypePath) -> Result<Token> {
        match path.enclosing() {
            Some(enclosing) => {
                let scope = self.external_type_token(reference, &enclosing)?;
                self.resolver.type_ref_token(scope, "", path.name())
            }
            None => {
                let scope = self.resolver.assembly_ref_token(reference)?;
                self.resolver.type_ref_token(scope, &path.namespace, path.name())
            }
        }
    }

    fn core_type_token(&mut self, name: &str) -> Result<Token> {
        let core = self
            .compilation
            .core_library()
            .ok_or_else(|| Error::SymbolNotFound("core library".to_string()))?;
        self.external_type_token(core, &TypePath::new("System", name))
    }

    /// `System.MissingMethodException::.ctor()`, used by the body of deleted methods.
    pub(crate) fn missing_method_constructor(&mut self) -> Result<Token> {
        let exception = self.core_type_token("MissingMethodException")?;
        let signature = encode_method_signature(&MethodSig {
            has_this: true,
            generic_arity: 0,
            ret: SigType::Void,
            params: Vec::new(),
        })?;
        self.resolver.member_ref_token(exception, ".ctor", signature)
    }

    /// `System.Object`, the base of closure classes; null without a core library.
    pub(crate) fn object_token(&mut self) -> Result<Token> {
        if self.compilation.core_library().is_none() {
            return Ok(Token::new(0));
        }
        self.core_type_token("Object")
    }

    fn named_token(&mut self, ty: &TypeDescriptor) -> Result<(Token, bool)> {
        match ty {
            TypeDescriptor::Source(handle) => {
                let symbol = self
                    .compilation
                    .type_symbol(*handle)
                    .ok_or_else(|| Error::SymbolNotFound(format!("type of compilation {}", handle.compilation())))?;
                let is_value_type = symbol.is_value_type;
                Ok((self.resolver.source_type_token(*handle)?, is_value_type))
            }
            TypeDescriptor::External(external) => {
                let reference = self
                    .compilation
                    .resolve_external(external)
                    .ok_or_else(|| Error::SymbolNotFound(external.path.to_string()))?;
                let is_value_type = self.compilation.is_external_value_type(external);
                Ok((self.external_type_token(reference, &external.path)?, is_value_type))
            }
            TypeDescriptor::Missing(path) => Err(Error::SymbolNotFound(path.to_string())),
            _ => Err(malformed_error!("{:?} is not a named type", ty)),
        }
    }

    /// Signature form of a type.
    pub(crate) fn sig_type(&mut self, ty: &TypeDescriptor) -> Result<SigType> {
        Ok(match ty {
            TypeDescriptor::Primitive(primitive) => primitive.sig_type(),
            TypeDescriptor::Source(_) | TypeDescriptor::External(_) | TypeDescriptor::Missing(_) => {
                let (token, is_value_type) = self.named_token(ty)?;
                if is_value_type {
                    SigType::ValueType(token)
                } else {
                    SigType::Class(token)
                }
            }
            TypeDescriptor::GenericInst {
                definition,
                arguments,
            } => {
                let (definition, value_type) = self.named_token(definition)?;
                SigType::GenericInst {
                    value_type,
                    definition,
                    arguments: arguments
                        .iter()
                        .map(|argument| self.sig_type(argument))
                        .collect::<Result<Vec<_>>>()?,
                }
            }
            TypeDescriptor::SzArray(inner) => SigType::SzArray(Box::new(self.sig_type(inner)?)),
            TypeDescriptor::ByRef(inner) => SigType::ByRef(Box::new(self.sig_type(inner)?)),
            TypeDescriptor::TypeParam(index) => SigType::Var(*index),
            TypeDescriptor::MethodParam(index) => SigType::MVar(*index),
        })
    }

    /// `TypeDefOrRef` token of a type: a definition, a reference or a `TypeSpec`.
    pub(crate) fn type_token(&mut self, ty: &TypeDescriptor) -> Result<Token> {
        match ty {
            TypeDescriptor::Primitive(primitive) => self.core_type_token(primitive.name()),
            TypeDescriptor::Source(_) | TypeDescriptor::External(_) | TypeDescriptor::Missing(_) => {
                Ok(self.named_token(ty)?.0)
            }
            _ => {
                let sig = self.sig_type(ty)?;
                let signature = encode_typespec_signature(&sig)?;
                self.resolver.type_spec_token(signature)
            }
        }
    }

    /// Signature of a declared method.
    pub(crate) fn method_sig(&mut self, method: &MethodSymbol) -> Result<MethodSig> {
        Ok(MethodSig {
            has_this: !method.is_static(),
            generic_arity: method.generic_arity,
            ret: self.sig_type(&method.ret)?,
            params: method
                .params
                .iter()
                .map(|param| self.sig_type(&param.ty))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Signature of a static lambda with the given parameter and return types.
    pub(crate) fn lambda_sig(&mut self, params: &[TypeDescriptor], ret: &TypeDescriptor) -> Result<MethodSig> {
        Ok(MethodSig {
            has_this: false,
            generic_arity: 0,
            ret: self.sig_type(ret)?,
            params: params
                .iter()
                .map(|param| self.sig_type(param))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Token of a method operand.
    pub(crate) fn method_token(&mut self, method: &MethodRef) -> Result<Token> {
        match method {
            MethodRef::Source(handle) => self.resolver.source_method_token(*handle),
            MethodRef::Synthesized { owner, ordinal } => {
                self.resolver.synthesized_method_token(*owner, *ordinal)
            }
            MethodRef::External(external) => {
                let parent = self.type_token(&external.owner)?;
                let sig = MethodSig {
                    has_this: external.signature.has_this,
                    generic_arity: external.signature.generic_arity,
                    ret: self.sig_type(&external.signature.ret)?,
                    params: external
                        .signature
                        .params
                        .iter()
                        .map(|param| self.sig_type(param))
                        .collect::<Result<Vec<_>>>()?,
                };
                let signature = encode_method_signature(&sig)?;
                self.resolver.member_ref_token(parent, &external.name, signature)
            }
        }
    }

    /// Token of a field operand.
    pub(crate) fn field_token(&mut self, field: &FieldRef) -> Result<Token> {
        match field {
            FieldRef::Source(handle) => self.resolver.source_field_token(*handle),
            FieldRef::Synthesized {
                owner,
                role,
                ordinal,
            } => self.resolver.synthesized_field_token(*owner, *role, *ordinal),
            FieldRef::External(external) => {
                let parent = self.type_token(&external.owner)?;
                let sig = self.sig_type(&external.ty)?;
                let signature = encode_field_signature(&sig)?;
                self.resolver.member_ref_token(parent, &external.name, signature)
            }
        }
    }

    // Stack effect of a call: popped arguments (including `this`) and whether a value is
    // pushed.
    fn call_shape(&self, method: &MethodRef) -> Result<(u16, bool)> {
        let (params, has_this, returns) = match method {
            MethodRef::Source(handle) => {
                let symbol = self
                    .compilation
                    .method(*handle)
                    .ok_or_else(|| Error::SymbolNotFound(format!("method of compilation {}", handle.compilation())))?;
                (symbol.params.len(), !symbol.is_static(), !symbol.ret.is_void())
            }
            MethodRef::Synthesized { owner, ordinal } => {
                match synthesized_member(self.compilation, *owner, SynthesizedRole::LambdaMethod, *ordinal) {
                    Some((_, SynthesizedMember { shape: SynthesizedShape::Method { params, ret, .. }, .. })) => {
                        (params.len(), false, !ret.is_void())
                    }
                    _ => return Err(Error::SymbolNotFound(format!("{}{}", SynthesizedRole::LambdaMethod.prefix(), ordinal))),
                }
            }
            MethodRef::External(external) => (
                external.signature.params.len(),
                external.signature.has_this,
                !external.signature.ret.is_void(),
            ),
        };

        let args = u16::try_from(params + usize::from(has_this))
            .map_err(|_| malformed_error!("Call with more than 65535 arguments"))?;
        Ok((args, returns))
    }

    /// Lowers `body`, assigning local slots through `allocator`.
    pub(crate) fn generate_body(
        &mut self,
        body: &LoweredBody,
        returns_value: bool,
        mut allocator: LocalSlotAllocator<'_>,
    ) -> Result<GeneratedBody> {
        let mut slot_map = Vec::with_capacity(body.locals.len());
        for local in &body.locals {
            let shape = self
                .compilation
                .shape_of(&local.ty)
                .ok_or_else(|| Error::SymbolNotFound(format!("type of local '{}'", local.name)))?;
            let sig = self.sig_type(&local.ty)?;
            slot_map.push(allocator.allocate(&local.name, shape, sig, local.syntax)?);
        }
        let slots = allocator.finish();

        let mut il = InstructionEncoder::new();
        let mut labels: HashMap<LabelId, Label> = HashMap::new();
        let mut offsets = Vec::with_capacity(body.instructions.len());

        let slot = |index: &u16| -> Result<u16> {
            slot_map
                .get(usize::from(*index))
                .copied()
                .ok_or_else(|| malformed_error!("Local {} is not declared", index))
        };

        for instruction in &body.instructions {
            offsets.push(u32::try_from(il.len()).map_err(|_| malformed_error!("Method body too large"))?);

            match instruction {
                Instruction::Nop => il.nop()?,
                Instruction::LdNull => il.ldnull()?,
                Instruction::Dup => il.dup()?,
                Instruction::Pop => il.pop()?,
                Instruction::Add => il.add()?,
                Instruction::Sub => il.sub()?,
                Instruction::Mul => il.mul()?,
                Instruction::Ret => il.ret(returns_value)?,
                Instruction::Throw => il.throw()?,
                Instruction::LdcI4(value) => il.ldc_i4(*value)?,
                Instruction::LdArg(index) => il.ldarg(*index)?,
                Instruction::LdLoc(index) => il.ldloc(slot(index)?)?,
                Instruction::StLoc(index) => il.stloc(slot(index)?)?,
                Instruction::LdStr(value) => {
                    let token = self.resolver.user_string_token(value)?;
                    il.ldstr(token)?;
                }
                Instruction::Call(method) => {
                    let (args, returns) = self.call_shape(method)?;
                    let token = self.method_token(method)?;
                    il.call(token, args, returns)?;
                }
                Instruction::CallVirt(method) => {
                    let (args, returns) = self.call_shape(method)?;
                    let token = self.method_token(method)?;
                    il.callvirt(token, args, returns)?;
                }
                Instruction::NewObj(method) => {
                    let (args, _) = self.call_shape(method)?;
                    let token = self.method_token(method)?;
                    il.newobj(token, args.saturating_sub(1))?;
                }
                Instruction::LdFtn(method) => {
                    let token = self.method_token(method)?;
                    il.ldftn(token)?;
                }
                Instruction::LdFld(field) => {
                    let token = self.field_token(field)?;
                    il.ldfld(token)?;
                }
                Instruction::StFld(field) => {
                    let token = self.field_token(field)?;
                    il.stfld(token)?;
                }
                Instruction::LdsFld(field) => {
                    let token = self.field_token(field)?;
                    il.ldsfld(token)?;
                }
                Instruction::StsFld(field) => {
                    let token = self.field_token(field)?;
                    il.stsfld(token)?;
                }
                Instruction::Box(ty) => {
                    let token = self.type_token(ty)?;
                    il.box_value(token)?;
                }
                Instruction::Label(id) => {
                    let label = *labels.entry(*id).or_insert_with(|| il.define_label());
                    il.mark_label(label)?;
                }
                Instruction::Br(id) | Instruction::BrTrue(id) | Instruction::BrFalse(id) => {
                    let kind = match instruction {
                        Instruction::BrTrue(_) => BranchKind::True,
                        Instruction::BrFalse(_) => BranchKind::False,
                        _ => BranchKind::Always,
                    };
                    let label = *labels.entry(*id).or_insert_with(|| il.define_label());
                    il.branch(kind, label)?;
                }
            }
        }

        let code = il.finish()?;
        let local_signature = if slots.is_empty() {
            None
        } else {
            let signature = encode_local_var_signature(&slot_types(&slots))?;
            Some(self.resolver.standalone_sig_token(signature)?)
        };

        Ok(GeneratedBody {
            bytes: encode_method_body(&code.bytes, code.max_stack, local_signature, body.init_locals)?,
            local_signature,
            slots,
            offsets,
        })
    }

    /// Body of a deleted method: `newobj MissingMethodException::.ctor(); throw`.
    pub(crate) fn missing_method_body(&mut self) -> Result<Vec<u8>> {
        let constructor = self.missing_method_constructor()?;
        let mut il = InstructionEncoder::new();
        il.newobj(constructor, 0)?;
        il.throw()?;
        let code = il.finish()?;
        encode_method_body(&code.bytes, code.max_stack, None, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::tables::TableId,
        symbols::{
            CompilationBuilder, LocalVariable, MetadataReference, MethodSignature, TypeSymbol,
        },
        test::factories::{stamp, system_runtime},
    };

    // Hands out sequential tokens per table and remembers every request.
    #[derive(Default)]
    struct Recorder {
        next: HashMap<u8, u32>,
        type_refs: HashMap<(Token, String, String), Token>,
        requests: Vec<String>,
    }

    impl Recorder {
        fn fresh(&mut self, table: TableId) -> Token {
            let row = self.next.entry(table as u8).or_insert(0);
            *row += 1;
            Token::from_parts(table, *row).unwrap()
        }
    }

    impl TokenResolver for Recorder {
        fn source_type_token(&mut self, _ty: TypeHandle) -> Result<Token> {
            Ok(Token::new(0x0200_0002))
        }

        fn source_method_token(&mut self, _method: MethodHandle) -> Result<Token> {
            Ok(Token::new(0x0600_0001))
        }

        fn source_field_token(&mut self, _field: FieldHandle) -> Result<Token> {
            Ok(Token::new(0x0400_0001))
        }

        fn synthesized_method_token(&mut self, _owner: TypeHandle, _ordinal: u32) -> Result<Token> {
            Ok(Token::new(0x0600_0009))
        }

        fn synthesized_field_token(&mut self, _owner: TypeHandle, _role: SynthesizedRole, _ordinal: u32) -> Result<Token> {
            Ok(Token::new(0x0400_0009))
        }

        fn assembly_ref_token(&mut self, reference: usize) -> Result<Token> {
            self.requests.push(format!("asm {reference}"));
            Ok(Token::new(0x2300_0001))
        }

        fn type_ref_token(&mut self, scope: Token, namespace: &str, name: &str) -> Result<Token> {
            let key = (scope, namespace.to_string(), name.to_string());
            if let Some(token) = self.type_refs.get(&key) {
                return Ok(*token);
            }
            self.requests.push(format!("typeref {namespace}.{name}"));
            let token = self.fresh(TableId::TypeRef);
            self.type_refs.insert(key, token);
            Ok(token)
        }

        fn type_spec_token(&mut self, _signature: Vec<u8>) -> Result<Token> {
            Ok(self.fresh(TableId::TypeSpec))
        }

        fn member_ref_token(&mut self, _parent: Token, name: &str, _signature: Vec<u8>) -> Result<Token> {
            self.requests.push(format!("memberref {name}"));
            Ok(self.fresh(TableId::MemberRef))
        }

        fn standalone_sig_token(&mut self, _signature: Vec<u8>) -> Result<Token> {
            Ok(self.fresh(TableId::StandAloneSig))
        }

        fn user_string_token(&mut self, _value: &str) -> Result<Token> {
            Ok(Token::new(0x7000_0001))
        }
    }

    fn console_write_line() -> Instruction {
        Instruction::Call(MethodRef::external(
            TypeDescriptor::external("System", "Console"),
            "WriteLine",
            MethodSignature::static_method(vec![TypeDescriptor::string()], TypeDescriptor::void()),
        ))
    }

    fn compilation(references: Vec<MetadataReference>) -> Compilation {
        let mut builder = CompilationBuilder::new("App");
        for reference in references {
            builder.add_reference(reference);
        }
        builder.add_type(TypeSymbol::class("", "Program"));
        builder.build(stamp()).unwrap()
    }

    #[test]
    fn hello_world_body() {
        let compilation = compilation(vec![system_runtime()]);
        let mut recorder = Recorder::default();
        let body = LoweredBody::from_instructions(vec![
            Instruction::LdStr("hi".to_string()),
            console_write_line(),
            Instruction::Ret,
        ]);

        let generated = CodeGenerator::new(&compilation, &mut recorder)
            .generate_body(&body, false, LocalSlotAllocator::new(Vec::new(), None))
            .unwrap();

        assert_eq!(
            generated.bytes,
            [0x2E, 0x72, 0x01, 0x00, 0x00, 0x70, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A]
        );
        assert_eq!(generated.offsets, [0, 5, 10]);
        assert!(generated.local_signature.is_none());
        assert_eq!(recorder.requests, ["asm 0", "typeref System.Console", "memberref WriteLine"]);
    }

    #[test]
    fn locals_get_a_signature() {
        let compilation = compilation(vec![system_runtime()]);
        let mut recorder = Recorder::default();
        let body = LoweredBody::new()
            .local(LocalVariable::new("x", TypeDescriptor::int32()))
            .emit(Instruction::LdcI4(5))
            .emit(Instruction::StLoc(0))
            .emit(Instruction::LdLoc(0))
            .emit(Instruction::Ret);

        let generated = CodeGenerator::new(&compilation, &mut recorder)
            .generate_body(&body, true, LocalSlotAllocator::new(Vec::new(), None))
            .unwrap();

        assert_eq!(generated.local_signature, Some(Token::new(0x1100_0001)));
        assert_eq!(generated.slots.len(), 1);
        assert_eq!(generated.bytes[0] & 0x3, 0x3);
        assert_eq!(&generated.bytes[12..], [0x1B, 0x0A, 0x06, 0x2A]);
    }

    #[test]
    fn unresolvable_external_type() {
        let compilation = compilation(vec![]);
        let mut recorder = Recorder::default();
        let body = LoweredBody::from_instructions(vec![console_write_line(), Instruction::Ret]);

        let error = CodeGenerator::new(&compilation, &mut recorder)
            .generate_body(&body, false, LocalSlotAllocator::new(Vec::new(), None))
            .unwrap_err();
        assert!(matches!(error, Error::SymbolNotFound(_)));
    }

    #[test]
    fn deleted_method_stub() {
        let compilation = compilation(vec![system_runtime()]);
        let mut recorder = Recorder::default();
        let stub = CodeGenerator::new(&compilation, &mut recorder)
            .missing_method_body()
            .unwrap();

        assert_eq!(stub, [0x1A, 0x73, 0x01, 0x00, 0x00, 0x0A, 0x7A]);
        assert!(recorder.requests.contains(&"typeref System.MissingMethodException".to_string()));
    }

    #[test]
    fn generic_instances_become_type_specs() {
        let list = TypeDescriptor::GenericInst {
            definition: Box::new(TypeDescriptor::external("System.Collections.Generic", "List`1")),
            arguments: vec![TypeDescriptor::int32()],
        };
        let reference = system_runtime().export(TypePath::new("System.Collections.Generic", "List`1"), false);
        let compilation = compilation(vec![reference]);
        let mut recorder = Recorder::default();

        let token = CodeGenerator::new(&compilation, &mut recorder).type_token(&list).unwrap();
        assert!(token.is_table(TableId::TypeSpec));
    }

    #[test]
    fn primitive_type_tokens_use_core_library() {
        let compilation = compilation(vec![system_runtime()]);
        let mut recorder = Recorder::default();
        CodeGenerator::new(&compilation, &mut recorder)
            .type_token(&TypeDescriptor::int32())
            .unwrap();
        assert_eq!(recorder.requests, ["asm 0", "typeref System.Int32"]);
    }
}
