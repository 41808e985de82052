//! Method flags: definition attributes, implementation attributes and body header flags.
//!
//! # Key Types
//! - [`MethodAttributes`]: `MethodDef.Flags` (II.23.1.10)
//! - [`MethodImplAttributes`]: `MethodDef.ImplFlags` (II.23.1.11)
//! - [`MethodBodyFlags`]: method header flags (II.25.4.4)

use bitflags::bitflags;

/// Mask selecting the member access bits of [`MethodAttributes`].
pub const METHOD_ACCESS_MASK: u16 = 0x0007;

bitflags! {
    /// `MethodDef.Flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAttributes: u16 {
        /// Accessible only by the parent type.
        const PRIVATE = 0x0001;
        /// Accessible by sub-types in the same assembly.
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the assembly.
        const ASSEM = 0x0003;
        /// Accessible by sub-types.
        const FAMILY = 0x0004;
        /// Accessible by sub-types and anyone in the assembly.
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone.
        const PUBLIC = 0x0006;
        /// Defined on the type rather than per instance.
        const STATIC = 0x0010;
        /// Cannot be overridden.
        const FINAL = 0x0020;
        /// Virtual method.
        const VIRTUAL = 0x0040;
        /// Hidden by name and signature.
        const HIDE_BY_SIG = 0x0080;
        /// Always gets a new vtable slot.
        const NEW_SLOT = 0x0100;
        /// No implementation is provided.
        const ABSTRACT = 0x0400;
        /// Name is special (constructors, accessors).
        const SPECIAL_NAME = 0x0800;
        /// Runtime should check name encoding.
        const RT_SPECIAL_NAME = 0x1000;
    }
}

impl MethodAttributes {
    /// Returns true if the method has no `this` parameter.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(MethodAttributes::STATIC)
    }
}

bitflags! {
    /// `MethodDef.ImplFlags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodImplAttributes: u16 {
        /// Implemented in IL (the default, value 0).
        const IL = 0x0000;
        /// Implemented by the runtime.
        const RUNTIME = 0x0003;
        /// Must not be inlined.
        const NO_INLINING = 0x0008;
        /// Single-threaded through the body.
        const SYNCHRONIZED = 0x0020;
    }
}

bitflags! {
    /// Method header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        /// Tiny format: one header byte, code size < 64, no locals.
        const TINY_FORMAT = 0x2;
        /// Fat format: 12-byte header.
        const FAT_FORMAT = 0x3;
        /// More data sections follow the code.
        const MORE_SECTS = 0x8;
        /// Zero-initialize locals.
        const INIT_LOCALS = 0x10;
    }
}
