//! Compilations shared by the integration tests.
//!
//! Every fixture builds `HelloWorld` style modules the way a binder would hand them over:
//! a `Program` type in the global namespace, `System.Runtime` as core library, and bodies
//! already lowered to symbolic instructions.

#![allow(dead_code)]

use std::sync::Arc;

use cildelta::prelude::*;

/// Build stamp of the first build of the day.
pub fn stamp() -> BuildStamp {
    BuildStamp::new(9000, 3600).unwrap()
}

/// Never cancels.
pub fn never() -> bool {
    false
}

/// `System.Runtime 8.0.0.0`, the core library.
pub fn system_runtime() -> MetadataReference {
    let identity = AssemblyIdentity::new(
        "System.Runtime",
        AssemblyVersion::new(8, 0, 0, 0),
        None,
        Some(Identity::Token(0xb03f_5f7f_11d5_0a3a)),
    );

    MetadataReference::new(identity)
        .export(TypePath::parse("System.Object"), false)
        .export(TypePath::parse("System.String"), false)
        .export(TypePath::parse("System.Console"), false)
        .export(TypePath::parse("System.Exception"), false)
        .export(TypePath::parse("System.MissingMethodException"), false)
        .export(TypePath::parse("System.Int32"), true)
        .as_core_library()
}

/// A strongly named reference exporting `types` from `namespace`.
pub fn library(name: &str, version: AssemblyVersion, namespace: &str, types: &[&str]) -> MetadataReference {
    let identity = AssemblyIdentity::new(name, version, None, Some(Identity::Token(0xcc7b_13ff_cd2d_dd51)));
    types.iter().fold(MetadataReference::new(identity), |reference, ty| {
        reference.export(TypePath::new(namespace, *ty), false)
    })
}

/// `Console.WriteLine(int)`.
pub fn write_line_int32() -> MethodRef {
    MethodRef::external(
        TypeDescriptor::external("System", "Console"),
        "WriteLine",
        MethodSignature::static_method(vec![TypeDescriptor::int32()], TypeDescriptor::void()),
    )
}

/// `static void Print(int value) => Console.WriteLine(value);`
pub fn print() -> MethodSymbol {
    MethodSymbol::new("Print", MethodAttributes::PUBLIC | MethodAttributes::STATIC)
        .param("value", TypeDescriptor::int32())
        .body(LoweredBody::from_instructions(vec![
            Instruction::LdArg(0),
            Instruction::Call(write_line_int32()),
            Instruction::Ret,
        ]))
}

/// `static void Main() => Print(value);`
pub fn main_printing(value: i32, print: MethodHandle) -> MethodSymbol {
    MethodSymbol::new("Main", MethodAttributes::PUBLIC | MethodAttributes::STATIC).body(
        LoweredBody::from_instructions(vec![
            Instruction::LdcI4(value),
            Instruction::Call(MethodRef::Source(print)),
            Instruction::Ret,
        ]),
    )
}

/// Symbols of one `HelloWorld` compilation.
pub struct HelloWorld {
    pub compilation: Arc<Compilation>,
    pub print: MethodHandle,
    pub main: MethodHandle,
    /// `Helper1` .. `HelperN`, in declaration order.
    pub helpers: Vec<MethodHandle>,
}

/// `Program` with `Print`, `Main` printing `value`, and `helpers` static `int HelperK() => K`.
pub fn hello_world_with(value: i32, helpers: u32, references: Vec<MetadataReference>) -> HelloWorld {
    let mut builder = CompilationBuilder::new("HelloWorld");
    for reference in references {
        builder.add_reference(reference);
    }

    let program = builder.add_type(TypeSymbol::class("", "Program"));
    let print = builder.add_method(program, print());
    let main = builder.add_method(program, main_printing(value, print));
    let helpers = (1..=helpers)
        .map(|k| {
            builder.add_method(
                program,
                MethodSymbol::new(format!("Helper{k}"), MethodAttributes::PUBLIC | MethodAttributes::STATIC)
                    .returns(TypeDescriptor::int32())
                    .body(LoweredBody::from_instructions(vec![
                        Instruction::LdcI4(i32::try_from(k).unwrap()),
                        Instruction::Ret,
                    ])),
            )
        })
        .collect();

    HelloWorld {
        compilation: Arc::new(builder.build(stamp()).unwrap()),
        print,
        main,
        helpers,
    }
}

/// `Program` with `Print` and `Main` printing `value`.
pub fn hello_world(value: i32) -> HelloWorld {
    hello_world_with(value, 0, vec![system_runtime()])
}

/// Snapshots `compilation` into a generation-0 image and correlates the baseline.
pub fn initial_baseline(compilation: &Arc<Compilation>) -> Result<Arc<GenerationBaseline>> {
    let image = Arc::new(ModuleMetadata::snapshot(compilation)?);
    GenerationBaseline::initial(Arc::clone(compilation), image.clone(), image)
}

/// Token committed for `Program::name`.
pub fn program_method(baseline: &GenerationBaseline, compilation: &Compilation, name: &str) -> Token {
    let program = compilation.find_type(&TypePath::new("", "Program")).unwrap();
    let method = compilation.find_methods(program, name)[0];
    baseline
        .method_token(&compilation.method_descriptor(method).unwrap())
        .unwrap()
}

/// `Lib.Util.Twice(int)`.
pub fn util_twice() -> MethodRef {
    MethodRef::external(
        TypeDescriptor::external("Lib", "Util"),
        "Twice",
        MethodSignature::static_method(vec![TypeDescriptor::int32()], TypeDescriptor::int32()),
    )
}

/// `Lib` declaring `Lib.Util.Twice(int)` with version `1.0.*`, built at `stamp`.
pub fn lib_compilation(stamp: BuildStamp) -> Result<Compilation> {
    let mut builder = CompilationBuilder::new("Lib");
    builder.version(VersionPattern::parse("1.0.*")?);
    builder.add_reference(system_runtime());
    let util = builder.add_type(TypeSymbol::class("Lib", "Util"));
    builder.add_method(
        util,
        MethodSymbol::new("Twice", MethodAttributes::PUBLIC | MethodAttributes::STATIC)
            .param("value", TypeDescriptor::int32())
            .returns(TypeDescriptor::int32())
            .body(LoweredBody::from_instructions(vec![
                Instruction::LdArg(0),
                Instruction::LdcI4(2),
                Instruction::Mul,
                Instruction::Ret,
            ])),
    );
    builder.build(stamp)
}
