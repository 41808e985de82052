//! Lowered method bodies as produced by the binder.
//!
//! A [`LoweredBody`] is a flat instruction list whose operands are still symbolic: methods,
//! fields and types are named through handles or descriptors, strings are literal text and
//! locals are indices into the body's own local list. Token assignment, local slot
//! allocation and byte encoding happen during emission.
//!
//! Compiler-generated members a body depends on (closure classes, lambda methods, lambda
//! caches, state-machine fields) are declared next to the body as [`SynthesizedMember`]s
//! and referenced by role and ordinal.

use crate::symbols::{FieldHandle, MethodHandle, TypeDescriptor, TypeHandle};

/// Identity of a local's declaring syntax node, stable across edits of the same source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyntaxId(pub u32);

/// A local variable of a lowered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// Source name (empty for compiler temporaries).
    pub name: String,
    /// Declared type.
    pub ty: TypeDescriptor,
    /// Declaring syntax, if the local has one.
    pub syntax: Option<SyntaxId>,
}

impl LocalVariable {
    /// A named local without syntax identity.
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            syntax: None,
        }
    }

    /// Attaches the declaring syntax.
    #[must_use]
    pub fn declared_at(mut self, syntax: SyntaxId) -> Self {
        self.syntax = Some(syntax);
        self
    }
}

/// Branch target inside a lowered body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// Signature of a method defined outside the compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Instance method.
    pub has_this: bool,
    /// Number of generic method parameters.
    pub generic_arity: u32,
    /// Parameter types.
    pub params: Vec<TypeDescriptor>,
    /// Return type.
    pub ret: TypeDescriptor,
}

impl MethodSignature {
    /// A static method signature.
    #[must_use]
    pub fn static_method(params: Vec<TypeDescriptor>, ret: TypeDescriptor) -> Self {
        Self {
            has_this: false,
            generic_arity: 0,
            params,
            ret,
        }
    }

    /// An instance method signature.
    #[must_use]
    pub fn instance(params: Vec<TypeDescriptor>, ret: TypeDescriptor) -> Self {
        Self {
            has_this: true,
            generic_arity: 0,
            params,
            ret,
        }
    }
}

/// A method defined by a referenced assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalMethod {
    /// Declaring type.
    pub owner: TypeDescriptor,
    /// Method name.
    pub name: String,
    /// Signature.
    pub signature: MethodSignature,
}

/// A field defined by a referenced assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalField {
    /// Declaring type.
    pub owner: TypeDescriptor,
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: TypeDescriptor,
}

/// Method operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodRef {
    /// A method declared in the compilation.
    Source(MethodHandle),
    /// A method of a referenced assembly.
    External(ExternalMethod),
    /// A synthesized lambda method of `owner`.
    Synthesized {
        /// Type owning the synthesized member.
        owner: TypeHandle,
        /// Ordinal of the lambda within its owner.
        ordinal: u32,
    },
}

impl MethodRef {
    /// Shorthand for an external method operand.
    pub fn external(owner: TypeDescriptor, name: impl Into<String>, signature: MethodSignature) -> Self {
        MethodRef::External(ExternalMethod {
            owner,
            name: name.into(),
            signature,
        })
    }
}

/// Field operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// A field declared in the compilation.
    Source(FieldHandle),
    /// A field of a referenced assembly.
    External(ExternalField),
    /// A synthesized field of `owner`.
    Synthesized {
        /// Type owning the synthesized member.
        owner: TypeHandle,
        /// Role of the field.
        role: SynthesizedRole,
        /// Ordinal within the owner and role.
        ordinal: u32,
    },
}

/// One instruction of a lowered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `nop`
    Nop,
    /// `ldnull`
    LdNull,
    /// `dup`
    Dup,
    /// `pop`
    Pop,
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `mul`
    Mul,
    /// `ret`
    Ret,
    /// `throw`
    Throw,
    /// Load a 32-bit constant.
    LdcI4(i32),
    /// Load an argument (`this` is argument 0 of instance methods).
    LdArg(u16),
    /// Load a local, by index into the body's locals.
    LdLoc(u16),
    /// Store to a local, by index into the body's locals.
    StLoc(u16),
    /// Load a string literal.
    LdStr(String),
    /// `call`
    Call(MethodRef),
    /// `callvirt`
    CallVirt(MethodRef),
    /// `newobj`
    NewObj(MethodRef),
    /// `ldftn`
    LdFtn(MethodRef),
    /// `ldfld`
    LdFld(FieldRef),
    /// `stfld`
    StFld(FieldRef),
    /// `ldsfld`
    LdsFld(FieldRef),
    /// `stsfld`
    StsFld(FieldRef),
    /// `box`
    Box(TypeDescriptor),
    /// Marks the position of a label.
    Label(LabelId),
    /// Unconditional branch.
    Br(LabelId),
    /// Branch if true.
    BrTrue(LabelId),
    /// Branch if false.
    BrFalse(LabelId),
}

/// Source span attached to an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    /// Index of the first instruction covered.
    pub instruction: usize,
    /// Start line (1-based).
    pub start_line: u32,
    /// Start column (1-based).
    pub start_column: u16,
    /// End line.
    pub end_line: u32,
    /// End column.
    pub end_column: u16,
}

/// A lowered method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweredBody {
    /// Locals, in declaration order.
    pub locals: Vec<LocalVariable>,
    /// Instructions.
    pub instructions: Vec<Instruction>,
    /// Sequence points, ordered by instruction.
    pub sequence_points: Vec<SequencePoint>,
    /// Zero-initialize locals.
    pub init_locals: bool,
}

impl Default for LoweredBody {
    fn default() -> Self {
        Self::new()
    }
}

impl LoweredBody {
    /// An empty body with `init_locals` set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locals: Vec::new(),
            instructions: Vec::new(),
            sequence_points: Vec::new(),
            init_locals: true,
        }
    }

    /// A body consisting of `instructions` only.
    #[must_use]
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            ..Self::new()
        }
    }

    /// Declares a local.
    #[must_use]
    pub fn local(mut self, local: LocalVariable) -> Self {
        self.locals.push(local);
        self
    }

    /// Appends an instruction.
    #[must_use]
    pub fn emit(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Attaches a sequence point to the next instruction.
    #[must_use]
    pub fn sequence_point(mut self, start_line: u32, start_column: u16, end_line: u32, end_column: u16) -> Self {
        self.sequence_points.push(SequencePoint {
            instruction: self.instructions.len(),
            start_line,
            start_column,
            end_line,
            end_column,
        });
        self
    }

    /// Calls `visit` for every type descriptor the body mentions directly.
    pub fn for_each_type(&self, visit: &mut impl FnMut(&TypeDescriptor)) {
        for local in &self.locals {
            visit(&local.ty);
        }

        for instruction in &self.instructions {
            match instruction {
                Instruction::Call(MethodRef::External(method))
                | Instruction::CallVirt(MethodRef::External(method))
                | Instruction::NewObj(MethodRef::External(method))
                | Instruction::LdFtn(MethodRef::External(method)) => {
                    visit(&method.owner);
                    for param in &method.signature.params {
                        visit(param);
                    }
                    visit(&method.signature.ret);
                }
                Instruction::LdFld(FieldRef::External(field))
                | Instruction::StFld(FieldRef::External(field))
                | Instruction::LdsFld(FieldRef::External(field))
                | Instruction::StsFld(FieldRef::External(field)) => {
                    visit(&field.owner);
                    visit(&field.ty);
                }
                Instruction::Box(ty) => visit(ty),
                _ => {}
            }
        }
    }
}

/// Structural role of a synthesized member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SynthesizedRole {
    /// Closure class holding captured variables.
    DisplayClass,
    /// Method implementing a lambda.
    LambdaMethod,
    /// Static field caching a lambda delegate.
    LambdaCacheField,
    /// Field hoisting a local of a state machine.
    StateMachineField,
}

impl SynthesizedRole {
    /// Name prefix of members with this role.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            SynthesizedRole::DisplayClass => "<>c__DisplayClass",
            SynthesizedRole::LambdaMethod => "<>b__",
            SynthesizedRole::LambdaCacheField => "<>9__",
            SynthesizedRole::StateMachineField => "<>s__",
        }
    }
}

/// Definition of a synthesized member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesizedShape {
    /// A nested class.
    Type,
    /// A field of the given type.
    Field(TypeDescriptor),
    /// A static method.
    Method {
        /// Parameter types.
        params: Vec<TypeDescriptor>,
        /// Return type.
        ret: TypeDescriptor,
        /// Lowered body.
        body: LoweredBody,
    },
}

/// A compiler-generated member declared by a method's lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedMember {
    /// Structural role.
    pub role: SynthesizedRole,
    /// Ordinal within the owner type and role.
    pub ordinal: u32,
    /// Definition.
    pub shape: SynthesizedShape,
}

impl SynthesizedMember {
    /// A closure class.
    #[must_use]
    pub fn display_class(ordinal: u32) -> Self {
        Self {
            role: SynthesizedRole::DisplayClass,
            ordinal,
            shape: SynthesizedShape::Type,
        }
    }

    /// A lambda method.
    #[must_use]
    pub fn lambda(ordinal: u32, params: Vec<TypeDescriptor>, ret: TypeDescriptor, body: LoweredBody) -> Self {
        Self {
            role: SynthesizedRole::LambdaMethod,
            ordinal,
            shape: SynthesizedShape::Method { params, ret, body },
        }
    }

    /// A static lambda cache field.
    #[must_use]
    pub fn lambda_cache(ordinal: u32, ty: TypeDescriptor) -> Self {
        Self {
            role: SynthesizedRole::LambdaCacheField,
            ordinal,
            shape: SynthesizedShape::Field(ty),
        }
    }

    /// A hoisted state-machine field.
    #[must_use]
    pub fn state_machine_field(ordinal: u32, ty: TypeDescriptor) -> Self {
        Self {
            role: SynthesizedRole::StateMachineField,
            ordinal,
            shape: SynthesizedShape::Field(ty),
        }
    }

    /// Calls `visit` for every type descriptor the member mentions.
    pub fn for_each_type(&self, visit: &mut impl FnMut(&TypeDescriptor)) {
        match &self.shape {
            SynthesizedShape::Type => {}
            SynthesizedShape::Field(ty) => visit(ty),
            SynthesizedShape::Method { params, ret, body } => {
                for param in params {
                    visit(param);
                }
                visit(ret);
                body.for_each_type(visit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_builder() {
        let body = LoweredBody::new()
            .local(LocalVariable::new("x", TypeDescriptor::int32()).declared_at(SyntaxId(7)))
            .sequence_point(3, 9, 3, 20)
            .emit(Instruction::LdcI4(1))
            .emit(Instruction::StLoc(0))
            .emit(Instruction::Ret);

        assert_eq!(body.locals[0].syntax, Some(SyntaxId(7)));
        assert_eq!(body.instructions.len(), 3);
        assert_eq!(body.sequence_points[0].instruction, 0);
        assert!(body.init_locals);
    }

    #[test]
    fn visits_external_types() {
        let console = TypeDescriptor::external("System", "Console");
        let body = LoweredBody::from_instructions(vec![
            Instruction::LdStr("hi".to_string()),
            Instruction::Call(MethodRef::external(
                console.clone(),
                "WriteLine",
                MethodSignature::static_method(vec![TypeDescriptor::string()], TypeDescriptor::void()),
            )),
            Instruction::Ret,
        ]);

        let mut seen = Vec::new();
        body.for_each_type(&mut |ty| seen.push(ty.clone()));
        assert_eq!(seen[0], console);
        assert_eq!(seen.len(), 3);
    }
}
