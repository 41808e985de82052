//! Compilations and baselines used by the unit tests.

use std::sync::Arc;

use crate::{
    enc::GenerationBaseline,
    metadata::{
        identity::{AssemblyIdentity, AssemblyVersion, BuildStamp, Identity},
        image::ModuleMetadata,
        method::MethodAttributes,
    },
    symbols::{
        Compilation, CompilationBuilder, Instruction, LoweredBody, MetadataReference, MethodHandle,
        MethodRef, MethodSignature, MethodSymbol, TypeDescriptor, TypePath, TypeSymbol,
    },
};

/// The build stamp every test compilation is finalized with.
pub fn stamp() -> BuildStamp {
    BuildStamp::new(9000, 3600).unwrap()
}

/// `System.Runtime, Version=8.0.0.0, PublicKeyToken=b03f5f7f11d50a3a` as the core library.
pub fn system_runtime() -> MetadataReference {
    let identity = AssemblyIdentity::new(
        "System.Runtime",
        AssemblyVersion::new(8, 0, 0, 0),
        None,
        Some(Identity::Token(0xb03f_5f7f_11d5_0a3a)),
    );

    let reference = [
        "System.Object",
        "System.String",
        "System.Console",
        "System.Exception",
        "System.MissingMethodException",
        "System.Action",
    ]
    .into_iter()
    .fold(MetadataReference::new(identity), |reference, name| {
        reference.export(TypePath::parse(name), false)
    });

    ["System.Int32", "System.Boolean", "System.Int64"]
        .into_iter()
        .fold(reference, |reference, name| reference.export(TypePath::parse(name), true))
        .as_core_library()
}

/// `Console.WriteLine(int)`.
pub fn write_line_int32() -> MethodRef {
    MethodRef::external(
        TypeDescriptor::external("System", "Console"),
        "WriteLine",
        MethodSignature::static_method(vec![TypeDescriptor::int32()], TypeDescriptor::void()),
    )
}

/// `Program` with a static `Print(int)` writing its argument and `Main` printing `value`.
///
/// Returns the compilation and the handle of `Main`.
pub fn hello_world(value: i32) -> (Arc<Compilation>, MethodHandle) {
    let mut builder = CompilationBuilder::new("HelloWorld");
    builder.add_reference(system_runtime());

    let program = builder.add_type(TypeSymbol::class("", "Program"));
    let print = builder.add_method(
        program,
        MethodSymbol::new("Print", MethodAttributes::PUBLIC | MethodAttributes::STATIC)
            .param("value", TypeDescriptor::int32())
            .body(LoweredBody::from_instructions(vec![
                Instruction::LdArg(0),
                Instruction::Call(write_line_int32()),
                Instruction::Ret,
            ])),
    );
    let main = builder.add_method(
        program,
        MethodSymbol::new("Main", MethodAttributes::PUBLIC | MethodAttributes::STATIC).body(
            LoweredBody::from_instructions(vec![
                Instruction::LdcI4(value),
                Instruction::Call(MethodRef::Source(print)),
                Instruction::Ret,
            ]),
        ),
    );

    (Arc::new(builder.build(stamp()).unwrap()), main)
}

/// Snapshots `compilation` and correlates it into a generation-0 baseline.
pub fn snapshot_baseline(compilation: &Arc<Compilation>) -> Arc<GenerationBaseline> {
    let image = Arc::new(ModuleMetadata::snapshot(compilation).unwrap());
    GenerationBaseline::initial(Arc::clone(compilation), image.clone(), image).unwrap()
}
