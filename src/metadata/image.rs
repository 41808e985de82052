//! Read access to a finished generation-0 image.
//!
//! The emitter never parses a PE file itself. It consumes a [`MetadataReader`]: decoded
//! rows of the tables a delta can refer back to, the heap sizes the first delta continues
//! from, and method body bytes. [`ModuleMetadata`] is the in-memory implementation, built
//! row by row through [`ModuleMetadataBuilder`] or laid out from a compilation by
//! `ModuleMetadata::snapshot`.
//!
//! # Example
//!
//! ```rust
//! use cildelta::metadata::{image::{MetadataReader, ModuleMetadataBuilder}, tables::TableId, token::Token};
//! use uguid::Guid;
//!
//! let mut builder = ModuleMetadataBuilder::new("App.dll", Guid::from_bytes([1; 16]));
//! builder.add_type_def("", "<Module>", 0, Token::new(0), None)?;
//! builder.add_type_def("", "Program", 1, Token::new(0), None)?;
//! let main = builder.add_method_def("Main", 0x16, 0, vec![0x00, 0x00, 0x01], &[], Some(vec![0x06, 0x16, 0x2A]))?;
//! let image = builder.build()?;
//!
//! assert_eq!(image.row_count(TableId::TypeDef), 2);
//! assert_eq!(image.method_body(main), Some(&[0x06, 0x16, 0x2A][..]));
//! # Ok::<(), cildelta::Error>(())
//! ```

use std::{collections::HashMap, fmt};

use uguid::Guid;

use crate::{
    enc::LocalSlot,
    metadata::{
        heaps::{BlobHeapBuilder, GuidHeapBuilder, HeapSizes, StringHeapBuilder, UserStringHeapBuilder},
        identity::AssemblyIdentity,
        method::IlStreamBuilder,
        tables::TableId,
        token::Token,
    },
    Error, Result,
};

/// A decoded `TypeDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefInfo {
    /// Row token.
    pub token: Token,
    /// `TypeAttributes` bits.
    pub flags: u32,
    /// Type name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Base type, null if none.
    pub extends: Token,
    /// Enclosing type from the `NestedClass` table.
    pub enclosing: Option<Token>,
    /// First owned `Field` row.
    pub field_list: u32,
    /// First owned `MethodDef` row.
    pub method_list: u32,
}

/// A decoded `TypeRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRefInfo {
    /// Row token.
    pub token: Token,
    /// `AssemblyRef` or enclosing `TypeRef`.
    pub resolution_scope: Token,
    /// Type name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
}

/// A decoded `MethodDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDefInfo {
    /// Row token.
    pub token: Token,
    /// Declaring `TypeDef`.
    pub owner: Token,
    /// Method name.
    pub name: String,
    /// `MethodAttributes` bits.
    pub flags: u16,
    /// `MethodImplAttributes` bits.
    pub impl_flags: u16,
    /// Signature blob.
    pub signature: Vec<u8>,
    /// Body RVA, 0 if abstract.
    pub rva: u32,
    /// First owned `Param` row.
    pub param_list: u32,
}

/// A decoded `Field` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Row token.
    pub token: Token,
    /// Declaring `TypeDef`.
    pub owner: Token,
    /// Field name.
    pub name: String,
    /// `FieldAttributes` bits.
    pub flags: u16,
    /// Signature blob.
    pub signature: Vec<u8>,
}

/// A decoded `MemberRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRefInfo {
    /// Row token.
    pub token: Token,
    /// Parent type.
    pub class: Token,
    /// Member name.
    pub name: String,
    /// Signature blob.
    pub signature: Vec<u8>,
}

/// A decoded `AssemblyRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRefInfo {
    /// Row token.
    pub token: Token,
    /// Identity written in the row.
    pub identity: AssemblyIdentity,
    /// `AssemblyFlags` bits.
    pub flags: u32,
}

/// A decoded `TypeSpec` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpecInfo {
    /// Row token.
    pub token: Token,
    /// Signature blob.
    pub signature: Vec<u8>,
}

/// Read access to the generation-0 image of a module.
///
/// Implementations are shared by every generation derived from the image and across
/// threads, so they must be immutable once constructed.
pub trait MetadataReader: fmt::Debug + Send + Sync {
    /// Name of the module.
    fn module_name(&self) -> &str;

    /// Module version id.
    fn mvid(&self) -> Guid;

    /// Number of rows in `table`.
    fn row_count(&self, table: TableId) -> u32;

    /// Sizes of the image's heaps.
    fn heap_sizes(&self) -> HeapSizes;

    /// `TypeDef` rows, in row order.
    fn type_defs(&self) -> &[TypeDefInfo];

    /// `TypeRef` rows, in row order.
    fn type_refs(&self) -> &[TypeRefInfo];

    /// `MethodDef` rows, in row order.
    fn method_defs(&self) -> &[MethodDefInfo];

    /// `Field` rows, in row order.
    fn fields(&self) -> &[FieldInfo];

    /// `MemberRef` rows, in row order.
    fn member_refs(&self) -> &[MemberRefInfo];

    /// `AssemblyRef` rows, in row order.
    fn assembly_refs(&self) -> &[AssemblyRefInfo];

    /// `TypeSpec` rows, in row order.
    fn type_specs(&self) -> &[TypeSpecInfo];

    /// Complete body (header and code) of a method, if it has one.
    fn method_body(&self, method: Token) -> Option<&[u8]>;
}

/// In-memory module image.
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    module_name: String,
    mvid: Guid,
    heap_sizes: HeapSizes,
    type_defs: Vec<TypeDefInfo>,
    type_refs: Vec<TypeRefInfo>,
    method_defs: Vec<MethodDefInfo>,
    fields: Vec<FieldInfo>,
    member_refs: Vec<MemberRefInfo>,
    assembly_refs: Vec<AssemblyRefInfo>,
    type_specs: Vec<TypeSpecInfo>,
    param_count: u32,
    standalone_sig_count: u32,
    il: Vec<u8>,
    bodies: HashMap<Token, (usize, usize)>,
    pub(crate) local_slots: HashMap<Token, Vec<LocalSlot>>,
}

impl ModuleMetadata {
    /// The IL stream holding every method body of the image.
    #[must_use]
    pub fn il_stream(&self) -> &[u8] {
        &self.il
    }

    /// Local slot layout recorded for `method`.
    #[must_use]
    pub fn recorded_locals(&self, method: Token) -> Option<&[LocalSlot]> {
        self.local_slots.get(&method).map(Vec::as_slice)
    }
}

impl MetadataReader for ModuleMetadata {
    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn mvid(&self) -> Guid {
        self.mvid
    }

    fn row_count(&self, table: TableId) -> u32 {
        match table {
            TableId::Module => 1,
            TableId::TypeRef => rows(self.type_refs.len()),
            TableId::TypeDef => rows(self.type_defs.len()),
            TableId::Field => rows(self.fields.len()),
            TableId::MethodDef => rows(self.method_defs.len()),
            TableId::Param => self.param_count,
            TableId::MemberRef => rows(self.member_refs.len()),
            TableId::StandAloneSig => self.standalone_sig_count,
            TableId::TypeSpec => rows(self.type_specs.len()),
            TableId::AssemblyRef => rows(self.assembly_refs.len()),
            TableId::NestedClass => rows(
                self.type_defs
                    .iter()
                    .filter(|type_def| type_def.enclosing.is_some())
                    .count(),
            ),
            _ => 0,
        }
    }

    fn heap_sizes(&self) -> HeapSizes {
        self.heap_sizes
    }

    fn type_defs(&self) -> &[TypeDefInfo] {
        &self.type_defs
    }

    fn type_refs(&self) -> &[TypeRefInfo] {
        &self.type_refs
    }

    fn method_defs(&self) -> &[MethodDefInfo] {
        &self.method_defs
    }

    fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    fn member_refs(&self) -> &[MemberRefInfo] {
        &self.member_refs
    }

    fn assembly_refs(&self) -> &[AssemblyRefInfo] {
        &self.assembly_refs
    }

    fn type_specs(&self) -> &[TypeSpecInfo] {
        &self.type_specs
    }

    fn method_body(&self, method: Token) -> Option<&[u8]> {
        let (start, end) = self.bodies.get(&method)?;
        self.il.get(*start..*end)
    }
}

/// Every row was assigned through [`next_token`], so a table never exceeds [`Token::MAX_ROW`].
fn rows(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(Token::MAX_ROW)
}

fn next_token(table: TableId, count: usize) -> Result<Token> {
    let rid = u32::try_from(count + 1).map_err(|_| Error::TokenExhausted(table))?;
    Token::from_parts(table, rid)
}

/// Lays out a [`ModuleMetadata`] row by row, the way a full emit does.
///
/// Members are attached to the most recently added type, so types must be added in
/// row order followed directly by their fields and methods.
#[derive(Debug)]
pub struct ModuleMetadataBuilder {
    module_name: String,
    mvid: Guid,
    strings: StringHeapBuilder,
    blobs: BlobHeapBuilder,
    user_strings: UserStringHeapBuilder,
    guids: GuidHeapBuilder,
    type_defs: Vec<TypeDefInfo>,
    type_refs: Vec<TypeRefInfo>,
    method_defs: Vec<MethodDefInfo>,
    fields: Vec<FieldInfo>,
    member_refs: Vec<MemberRefInfo>,
    assembly_refs: Vec<AssemblyRefInfo>,
    type_specs: Vec<TypeSpecInfo>,
    param_count: u32,
    standalone_sig_count: u32,
    il: IlStreamBuilder,
    bodies: HashMap<Token, (usize, usize)>,
    local_slots: HashMap<Token, Vec<LocalSlot>>,
}

impl ModuleMetadataBuilder {
    /// Starts an image of module `module_name`.
    pub fn new(module_name: impl Into<String>, mvid: Guid) -> Self {
        Self {
            module_name: module_name.into(),
            mvid,
            strings: StringHeapBuilder::new(0),
            blobs: BlobHeapBuilder::new(0),
            user_strings: UserStringHeapBuilder::new(0),
            guids: GuidHeapBuilder::new(0),
            type_defs: Vec::new(),
            type_refs: Vec::new(),
            method_defs: Vec::new(),
            fields: Vec::new(),
            member_refs: Vec::new(),
            assembly_refs: Vec::new(),
            type_specs: Vec::new(),
            param_count: 0,
            standalone_sig_count: 0,
            il: IlStreamBuilder::new(),
            bodies: HashMap::new(),
            local_slots: HashMap::new(),
        }
    }

    /// Adds a `TypeDef` row; its member lists start at the next `Field` / `MethodDef` row.
    ///
    /// # Errors
    /// Returns an error if the table is full or a heap outgrows 32 bits.
    pub fn add_type_def(
        &mut self,
        namespace: &str,
        name: &str,
        flags: u32,
        extends: Token,
        enclosing: Option<Token>,
    ) -> Result<Token> {
        let token = next_token(TableId::TypeDef, self.type_defs.len())?;
        self.strings.add(namespace)?;
        self.strings.add(name)?;

        let field_list = next_token(TableId::Field, self.fields.len())?.row();
        let method_list = next_token(TableId::MethodDef, self.method_defs.len())?.row();
        self.type_defs.push(TypeDefInfo {
            token,
            flags,
            name: name.to_string(),
            namespace: namespace.to_string(),
            extends,
            enclosing,
            field_list,
            method_list,
        });
        Ok(token)
    }

    /// Adds a `TypeRef` row.
    ///
    /// # Errors
    /// Returns an error if the table is full or a heap outgrows 32 bits.
    pub fn add_type_ref(&mut self, resolution_scope: Token, namespace: &str, name: &str) -> Result<Token> {
        let token = next_token(TableId::TypeRef, self.type_refs.len())?;
        self.strings.add(namespace)?;
        self.strings.add(name)?;
        self.type_refs.push(TypeRefInfo {
            token,
            resolution_scope,
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
        Ok(token)
    }

    /// Adds a `MethodDef` row owned by the last added type, with one `Param` row per
    /// entry of `param_names` and an optional complete body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no type was added yet or the body header is
    /// invalid, or an error if a table or heap is full.
    pub fn add_method_def(
        &mut self,
        name: &str,
        flags: u16,
        impl_flags: u16,
        signature: Vec<u8>,
        param_names: &[&str],
        body: Option<Vec<u8>>,
    ) -> Result<Token> {
        let owner = self
            .type_defs
            .last()
            .map(|type_def| type_def.token)
            .ok_or_else(|| malformed_error!("Method {} added before any type", name))?;
        let token = next_token(TableId::MethodDef, self.method_defs.len())?;

        self.strings.add(name)?;
        self.blobs.add(&signature)?;
        for param in param_names {
            self.strings.add(param)?;
        }

        let rva = match body {
            Some(body) => {
                let rva = self.il.add_body(&body)?;
                let start = rva as usize;
                self.bodies.insert(token, (start, start + body.len()));
                rva
            }
            None => 0,
        };

        let param_list = self.param_count + 1;
        self.param_count += u32::try_from(param_names.len())
            .map_err(|_| Error::TokenExhausted(TableId::Param))?;

        self.method_defs.push(MethodDefInfo {
            token,
            owner,
            name: name.to_string(),
            flags,
            impl_flags,
            signature,
            rva,
            param_list,
        });
        Ok(token)
    }

    /// Adds a `Field` row owned by the last added type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no type was added yet, or an error if a
    /// table or heap is full.
    pub fn add_field(&mut self, name: &str, flags: u16, signature: Vec<u8>) -> Result<Token> {
        let owner = self
            .type_defs
            .last()
            .map(|type_def| type_def.token)
            .ok_or_else(|| malformed_error!("Field {} added before any type", name))?;
        let token = next_token(TableId::Field, self.fields.len())?;

        self.strings.add(name)?;
        self.blobs.add(&signature)?;
        self.fields.push(FieldInfo {
            token,
            owner,
            name: name.to_string(),
            flags,
            signature,
        });
        Ok(token)
    }

    /// Adds a `MemberRef` row.
    ///
    /// # Errors
    /// Returns an error if the table is full or a heap outgrows 32 bits.
    pub fn add_member_ref(&mut self, class: Token, name: &str, signature: Vec<u8>) -> Result<Token> {
        let token = next_token(TableId::MemberRef, self.member_refs.len())?;
        self.strings.add(name)?;
        self.blobs.add(&signature)?;
        self.member_refs.push(MemberRefInfo {
            token,
            class,
            name: name.to_string(),
            signature,
        });
        Ok(token)
    }

    /// Adds an `AssemblyRef` row.
    ///
    /// # Errors
    /// Returns an error if the table is full or a heap outgrows 32 bits.
    pub fn add_assembly_ref(&mut self, identity: AssemblyIdentity, flags: u32) -> Result<Token> {
        let token = next_token(TableId::AssemblyRef, self.assembly_refs.len())?;
        self.strings.add(&identity.name)?;
        if let Some(culture) = &identity.culture {
            self.strings.add(culture)?;
        }
        if let Some(strong_name) = &identity.strong_name {
            self.blobs.add(&strong_name.blob())?;
        }

        self.assembly_refs.push(AssemblyRefInfo {
            token,
            identity,
            flags,
        });
        Ok(token)
    }

    /// Adds a `TypeSpec` row.
    ///
    /// # Errors
    /// Returns an error if the table is full or a heap outgrows 32 bits.
    pub fn add_type_spec(&mut self, signature: Vec<u8>) -> Result<Token> {
        let token = next_token(TableId::TypeSpec, self.type_specs.len())?;
        self.blobs.add(&signature)?;
        self.type_specs.push(TypeSpecInfo { token, signature });
        Ok(token)
    }

    /// Adds a `StandAloneSig` row.
    ///
    /// # Errors
    /// Returns an error if the table is full or a heap outgrows 32 bits.
    pub fn add_standalone_sig(&mut self, signature: &[u8]) -> Result<Token> {
        let token = next_token(TableId::StandAloneSig, self.standalone_sig_count as usize)?;
        self.blobs.add(signature)?;
        self.standalone_sig_count += 1;
        Ok(token)
    }

    /// Adds a string literal and returns its `ldstr` token.
    ///
    /// # Errors
    /// Returns an error if the `#US` heap outgrows 24-bit offsets.
    pub fn add_user_string(&mut self, value: &str) -> Result<Token> {
        let offset = self.user_strings.add(value)?;
        if offset > Token::MAX_ROW {
            return Err(malformed_error!("#US heap exceeds 24 bits"));
        }
        Ok(Token::new(0x7000_0000 | offset))
    }

    /// Records the local slot layout of `method`.
    pub fn set_local_slots(&mut self, method: Token, slots: Vec<LocalSlot>) {
        self.local_slots.insert(method, slots);
    }

    /// Finishes the image.
    ///
    /// # Errors
    /// Returns an error if a heap outgrows 32 bits.
    pub fn build(mut self) -> Result<ModuleMetadata> {
        self.strings.add(&self.module_name)?;
        self.guids.add(self.mvid)?;

        let heap_sizes = HeapSizes {
            strings: self.strings.next_base()?,
            user_strings: self.user_strings.next_base()?,
            blobs: self.blobs.next_base()?,
            guids: self.guids.next_base()?,
        };

        Ok(ModuleMetadata {
            module_name: self.module_name,
            mvid: self.mvid,
            heap_sizes,
            type_defs: self.type_defs,
            type_refs: self.type_refs,
            method_defs: self.method_defs,
            fields: self.fields,
            member_refs: self.member_refs,
            assembly_refs: self.assembly_refs,
            type_specs: self.type_specs,
            param_count: self.param_count,
            standalone_sig_count: self.standalone_sig_count,
            il: self.il.into_bytes(),
            bodies: self.bodies,
            local_slots: self.local_slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::identity::AssemblyVersion;

    #[test]
    fn layout() {
        let mut builder = ModuleMetadataBuilder::new("App.dll", Guid::from_bytes([9; 16]));
        builder.add_type_def("", "<Module>", 0, Token::new(0), None).unwrap();
        let program = builder.add_type_def("", "Program", 1, Token::new(0), None).unwrap();
        builder.add_field("count", 0x16, vec![0x06, 0x08]).unwrap();
        let main = builder
            .add_method_def("Main", 0x16, 0, vec![0x00, 0x01, 0x01, 0x08], &["x"], Some(vec![0x06, 0x16, 0x2A]))
            .unwrap();
        let abstract_method = builder
            .add_method_def("F", 0x0406, 0, vec![0x20, 0x00, 0x01], &[], None)
            .unwrap();
        let runtime = builder
            .add_assembly_ref(
                AssemblyIdentity::new("System.Runtime", AssemblyVersion::new(8, 0, 0, 0), None, None),
                0,
            )
            .unwrap();
        builder.add_type_ref(runtime, "System", "Object").unwrap();
        let ldstr = builder.add_user_string("hi").unwrap();
        let image = builder.build().unwrap();

        assert_eq!(program, Token::new(0x0200_0002));
        assert_eq!(image.type_defs()[1].field_list, 1);
        assert_eq!(image.type_defs()[1].method_list, 1);
        assert_eq!(image.method_defs()[0].owner, program);
        assert_eq!(image.method_defs()[0].rva, 4);
        assert_eq!(image.method_defs()[1].param_list, 2);
        assert_eq!(image.row_count(TableId::Param), 1);
        assert_eq!(image.row_count(TableId::AssemblyRef), 1);
        assert_eq!(image.method_body(main), Some(&[0x06, 0x16, 0x2A][..]));
        assert!(image.method_body(abstract_method).is_none());
        assert_eq!(ldstr, Token::new(0x7000_0001));
        assert_eq!(image.heap_sizes().guids, 1);
        assert_eq!(image.heap_sizes().strings % 4, 0);
    }

    #[test]
    fn row_counts_follow_member_lists() {
        let mut builder = ModuleMetadataBuilder::new("App.dll", Guid::ZERO);
        builder.add_type_def("", "<Module>", 0, Token::new(0), None).unwrap();
        let outer = builder.add_type_def("", "Outer", 1, Token::new(0), None).unwrap();
        builder.add_field("a", 0x16, vec![0x06, 0x08]).unwrap();
        builder.add_field("b", 0x16, vec![0x06, 0x08]).unwrap();
        builder
            .add_method_def("M", 0x16, 0, vec![0x00, 0x00, 0x01], &[], Some(vec![0x2A]))
            .unwrap();
        builder.add_type_def("", "Inner", 1, Token::new(0), Some(outer)).unwrap();
        let image = builder.build().unwrap();

        assert_eq!(image.row_count(TableId::TypeDef), 3);
        assert_eq!(image.row_count(TableId::Field), 2);
        assert_eq!(image.row_count(TableId::MethodDef), 1);
        assert_eq!(image.row_count(TableId::NestedClass), 1);
        assert_eq!(image.row_count(TableId::TypeSpec), 0);
        assert_eq!(image.type_defs()[2].field_list, 3);
        assert_eq!(image.type_defs()[2].method_list, 2);
    }

    #[test]
    fn members_need_a_type() {
        let mut builder = ModuleMetadataBuilder::new("App.dll", Guid::ZERO);
        assert!(builder.add_field("f", 0, vec![0x06, 0x08]).is_err());
    }
}
