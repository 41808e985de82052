//! Type descriptors and their compilation-independent shapes.
//!
//! A [`TypeDescriptor`] is how a compilation refers to a type: it may point at a source
//! type through a [`TypeHandle`], which is only meaningful inside the compilation that
//! issued it. A [`TypeShape`] is the same type described structurally, by namespace and
//! nested name path, so that two compilations can be compared without sharing any
//! handles. [`MethodDescriptor`] combines shapes into the key a method is matched by.

use std::fmt;

use crate::{metadata::signatures::SigType, symbols::TypeHandle};

/// Built-in types with a dedicated element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    /// `void`
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I1,
    /// `System.Byte`
    U1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.Single`
    R4,
    /// `System.Double`
    R8,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// `System.IntPtr`
    IntPtr,
    /// `System.UIntPtr`
    UIntPtr,
}

impl PrimitiveType {
    /// The signature element for this primitive.
    #[must_use]
    pub fn sig_type(self) -> SigType {
        match self {
            PrimitiveType::Void => SigType::Void,
            PrimitiveType::Boolean => SigType::Boolean,
            PrimitiveType::Char => SigType::Char,
            PrimitiveType::I1 => SigType::I1,
            PrimitiveType::U1 => SigType::U1,
            PrimitiveType::I2 => SigType::I2,
            PrimitiveType::U2 => SigType::U2,
            PrimitiveType::I4 => SigType::I4,
            PrimitiveType::U4 => SigType::U4,
            PrimitiveType::I8 => SigType::I8,
            PrimitiveType::U8 => SigType::U8,
            PrimitiveType::R4 => SigType::R4,
            PrimitiveType::R8 => SigType::R8,
            PrimitiveType::String => SigType::String,
            PrimitiveType::Object => SigType::Object,
            PrimitiveType::IntPtr => SigType::I,
            PrimitiveType::UIntPtr => SigType::U,
        }
    }

    /// Name of the corresponding `System` type.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Void => "Void",
            PrimitiveType::Boolean => "Boolean",
            PrimitiveType::Char => "Char",
            PrimitiveType::I1 => "SByte",
            PrimitiveType::U1 => "Byte",
            PrimitiveType::I2 => "Int16",
            PrimitiveType::U2 => "UInt16",
            PrimitiveType::I4 => "Int32",
            PrimitiveType::U4 => "UInt32",
            PrimitiveType::I8 => "Int64",
            PrimitiveType::U8 => "UInt64",
            PrimitiveType::R4 => "Single",
            PrimitiveType::R8 => "Double",
            PrimitiveType::String => "String",
            PrimitiveType::Object => "Object",
            PrimitiveType::IntPtr => "IntPtr",
            PrimitiveType::UIntPtr => "UIntPtr",
        }
    }

    /// Returns true for primitives that are value types (everything but `string` and
    /// `object`).
    #[must_use]
    pub fn is_value_type(self) -> bool {
        !matches!(self, PrimitiveType::String | PrimitiveType::Object)
    }
}

/// Fully qualified name of a type: namespace plus the chain of names from the outermost
/// enclosing type down to the type itself. Generic types carry their arity suffix
/// (`` List`1 ``).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypePath {
    /// Namespace of the outermost type, possibly empty.
    pub namespace: String,
    /// Names from outermost to innermost.
    pub names: Vec<String>,
}

impl TypePath {
    /// A top-level type.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            names: vec![name.into()],
        }
    }

    /// Parses `Namespace.Outer/Inner` notation.
    #[must_use]
    pub fn parse(full_name: &str) -> Self {
        let mut parts = full_name.split('/');
        let outer = parts.next().unwrap_or_default();
        let (namespace, name) = match outer.rfind('.') {
            Some(dot) => (&outer[..dot], &outer[dot + 1..]),
            None => ("", outer),
        };

        let mut names = vec![name.to_string()];
        names.extend(parts.map(str::to_string));
        Self {
            namespace: namespace.to_string(),
            names,
        }
    }

    /// The path of a type nested in this one.
    #[must_use]
    pub fn nested(&self, name: impl Into<String>) -> Self {
        let mut names = self.names.clone();
        names.push(name.into());
        Self {
            namespace: self.namespace.clone(),
            names,
        }
    }

    /// The path of the enclosing type, if this type is nested.
    #[must_use]
    pub fn enclosing(&self) -> Option<Self> {
        if self.names.len() < 2 {
            return None;
        }
        Some(Self {
            namespace: self.namespace.clone(),
            names: self.names[..self.names.len() - 1].to_vec(),
        })
    }

    /// Simple name of the type itself.
    #[must_use]
    pub fn name(&self) -> &str {
        self.names.last().map_or("", String::as_str)
    }

    /// Returns true for nested types.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.names.len() > 1
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.namespace.is_empty() {
            write!(f, "{}.", self.namespace)?;
        }
        write!(f, "{}", self.names.join("/"))
    }
}

/// A type defined outside the compilation, optionally qualified by an extern alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalType {
    /// Full name of the type.
    pub path: TypePath,
    /// Extern alias selecting the defining reference.
    pub alias: Option<String>,
}

/// A type as referenced by one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// Built-in type.
    Primitive(PrimitiveType),
    /// Type declared in the compilation.
    Source(TypeHandle),
    /// Type exported by one of the compilation's references.
    External(ExternalType),
    /// Instantiation of a generic type.
    GenericInst {
        /// The generic definition.
        definition: Box<TypeDescriptor>,
        /// Type arguments.
        arguments: Vec<TypeDescriptor>,
    },
    /// Single-dimensional zero-based array.
    SzArray(Box<TypeDescriptor>),
    /// Managed pointer.
    ByRef(Box<TypeDescriptor>),
    /// Generic parameter of the enclosing type.
    TypeParam(u32),
    /// Generic parameter of the enclosing method.
    MethodParam(u32),
    /// A type the binder could not find in any reference.
    Missing(TypePath),
}

impl TypeDescriptor {
    /// `void`
    #[must_use]
    pub fn void() -> Self {
        TypeDescriptor::Primitive(PrimitiveType::Void)
    }

    /// `int`
    #[must_use]
    pub fn int32() -> Self {
        TypeDescriptor::Primitive(PrimitiveType::I4)
    }

    /// `string`
    #[must_use]
    pub fn string() -> Self {
        TypeDescriptor::Primitive(PrimitiveType::String)
    }

    /// `object`
    #[must_use]
    pub fn object() -> Self {
        TypeDescriptor::Primitive(PrimitiveType::Object)
    }

    /// An external type resolved through the compilation's references.
    pub fn external(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDescriptor::External(ExternalType {
            path: TypePath::new(namespace, name),
            alias: None,
        })
    }

    /// An external type resolved only through the reference with extern alias `alias`.
    pub fn external_aliased(
        alias: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        TypeDescriptor::External(ExternalType {
            path: TypePath::new(namespace, name),
            alias: Some(alias.into()),
        })
    }

    /// `T[]`
    #[must_use]
    pub fn sz_array(element: TypeDescriptor) -> Self {
        TypeDescriptor::SzArray(Box::new(element))
    }

    /// Returns true for `void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeDescriptor::Primitive(PrimitiveType::Void))
    }
}

/// Compilation-independent structure of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeShape {
    /// Built-in type.
    Primitive(PrimitiveType),
    /// Named type, source or external.
    Named(TypePath),
    /// Instantiation of a generic type.
    GenericInst {
        /// The generic definition.
        definition: TypePath,
        /// Type arguments.
        arguments: Vec<TypeShape>,
    },
    /// Single-dimensional zero-based array.
    SzArray(Box<TypeShape>),
    /// Managed pointer.
    ByRef(Box<TypeShape>),
    /// Generic parameter of the enclosing type.
    TypeParam(u32),
    /// Generic parameter of the enclosing method.
    MethodParam(u32),
}

impl TypeShape {
    /// Calls `visit` for every named type inside this shape.
    pub fn for_each_named(&self, visit: &mut impl FnMut(&TypePath)) {
        match self {
            TypeShape::Named(path) => visit(path),
            TypeShape::GenericInst {
                definition,
                arguments,
            } => {
                visit(definition);
                for argument in arguments {
                    argument.for_each_named(visit);
                }
            }
            TypeShape::SzArray(inner) | TypeShape::ByRef(inner) => inner.for_each_named(visit),
            TypeShape::Primitive(_) | TypeShape::TypeParam(_) | TypeShape::MethodParam(_) => {}
        }
    }
}

impl fmt::Display for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeShape::Primitive(primitive) => write!(f, "{}", primitive.name()),
            TypeShape::Named(path) => write!(f, "{path}"),
            TypeShape::GenericInst {
                definition,
                arguments,
            } => {
                write!(f, "{definition}<")?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{argument}")?;
                }
                write!(f, ">")
            }
            TypeShape::SzArray(inner) => write!(f, "{inner}[]"),
            TypeShape::ByRef(inner) => write!(f, "{inner}&"),
            TypeShape::TypeParam(index) => write!(f, "!{index}"),
            TypeShape::MethodParam(index) => write!(f, "!!{index}"),
        }
    }
}

/// Structural key of a method: owner, name, arity and signature shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodDescriptor {
    /// Declaring type.
    pub owner: TypePath,
    /// Method name.
    pub name: String,
    /// Number of generic method parameters.
    pub generic_arity: u32,
    /// Static methods have no `this`.
    pub is_static: bool,
    /// Parameter shapes.
    pub params: Vec<TypeShape>,
    /// Return shape.
    pub ret: TypeShape,
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.ret, self.owner, self.name)?;
        if self.generic_arity > 0 {
            write!(f, "`{}", self.generic_arity)?;
        }
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ")")
    }
}

/// Structural key of a field: owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldDescriptor {
    /// Declaring type.
    pub owner: TypePath,
    /// Field name.
    pub name: String,
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_paths() {
        let path = TypePath::parse("System.Collections.Generic.List`1");
        assert_eq!(path.namespace, "System.Collections.Generic");
        assert_eq!(path.name(), "List`1");
        assert!(!path.is_nested());

        let nested = TypePath::parse("N.Outer/Inner");
        assert_eq!(nested.names, vec!["Outer", "Inner"]);
        assert_eq!(nested.enclosing().unwrap(), TypePath::new("N", "Outer"));
        assert_eq!(nested.to_string(), "N.Outer/Inner");

        let global = TypePath::parse("C");
        assert_eq!(global.namespace, "");
        assert_eq!(global.to_string(), "C");
        assert_eq!(global.nested("D").to_string(), "C/D");
    }

    #[test]
    fn method_descriptor_display() {
        let descriptor = MethodDescriptor {
            owner: TypePath::new("", "C"),
            name: "F".to_string(),
            generic_arity: 0,
            is_static: true,
            params: vec![TypeShape::Named(TypePath::new("System.Diagnostics", "Process"))],
            ret: TypeShape::Primitive(PrimitiveType::Void),
        };
        assert_eq!(
            descriptor.to_string(),
            "Void C::F(System.Diagnostics.Process)"
        );
    }

    #[test]
    fn named_visitor() {
        let shape = TypeShape::GenericInst {
            definition: TypePath::new("System.Collections.Generic", "List`1"),
            arguments: vec![TypeShape::SzArray(Box::new(TypeShape::Named(TypePath::new(
                "", "C",
            ))))],
        };
        let mut seen = Vec::new();
        shape.for_each_named(&mut |path| seen.push(path.to_string()));
        assert_eq!(seen, vec!["System.Collections.Generic.List`1", "C"]);
    }
}
