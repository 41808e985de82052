//! Row layouts of the tables that can appear in an Edit-and-Continue metadata delta.
//!
//! Delta tables streams set every "large index" bit in the heap-size flags, so every heap
//! index, simple table index and coded index is written as 4 bytes. That makes each row
//! size a constant of its table, described by [`columns`]; the writer and the delta reader
//! both rely on it.
//!
//! | Table          | Columns                                                        |
//! |----------------|----------------------------------------------------------------|
//! | `Module`       | Generation(2) Name(4) Mvid(4) EncId(4) EncBaseId(4)            |
//! | `TypeRef`      | ResolutionScope(4) Name(4) Namespace(4)                        |
//! | `TypeDef`      | Flags(4) Name(4) Namespace(4) Extends(4) FieldList(4) MethodList(4) |
//! | `Field`        | Flags(2) Name(4) Signature(4)                                  |
//! | `MethodDef`    | RVA(4) ImplFlags(2) Flags(2) Name(4) Signature(4) ParamList(4) |
//! | `Param`        | Flags(2) Sequence(2) Name(4)                                   |
//! | `MemberRef`    | Class(4) Name(4) Signature(4)                                  |
//! | `StandAloneSig`| Signature(4)                                                   |
//! | `TypeSpec`     | Signature(4)                                                   |
//! | `EncLog`       | Token(4) FuncCode(4)                                           |
//! | `EncMap`       | Token(4)                                                       |
//! | `AssemblyRef`  | Major(2) Minor(2) Build(2) Revision(2) Flags(4) PublicKeyOrToken(4) Name(4) Culture(4) HashValue(4) |
//! | `NestedClass`  | NestedClass(4) EnclosingClass(4)                               |

use crate::{
    file::io::write_le,
    metadata::{
        identity::AssemblyVersion,
        tables::{CodedIndexType, TableId},
        token::Token,
    },
    Result,
};

/// Column widths (in bytes) of `table` in a delta tables stream, or `None` if deltas
/// produced by this crate never contain that table.
#[must_use]
pub fn columns(table: TableId) -> Option<&'static [u8]> {
    Some(match table {
        TableId::Module => &[2, 4, 4, 4, 4],
        TableId::TypeRef | TableId::MemberRef => &[4, 4, 4],
        TableId::TypeDef => &[4, 4, 4, 4, 4, 4],
        TableId::Field => &[2, 4, 4],
        TableId::MethodDef => &[4, 2, 2, 4, 4, 4],
        TableId::Param => &[2, 2, 4],
        TableId::StandAloneSig | TableId::TypeSpec | TableId::EncMap => &[4],
        TableId::EncLog | TableId::NestedClass => &[4, 4],
        TableId::AssemblyRef => &[2, 2, 2, 2, 4, 4, 4, 4, 4],
        _ => return None,
    })
}

/// Size in bytes of one row of `table` in a delta tables stream.
#[must_use]
pub fn row_size(table: TableId) -> Option<usize> {
    columns(table).map(|cols| cols.iter().map(|c| usize::from(*c)).sum())
}

/// A row that can be written into a delta tables stream.
pub trait DeltaRow {
    /// The table this row belongs to.
    const TABLE: TableId;

    /// Appends the row's bytes to `data`.
    ///
    /// # Errors
    /// Returns an error if a coded index column references a table outside its family.
    fn write(&self, data: &mut Vec<u8>) -> Result<()>;
}

/// Operation codes of `EncLog` entries, as understood by the CLR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EncFuncCode {
    /// Row is added or replaced as a whole.
    Default = 0,
    /// The next `MethodDef` row is added to the type named by the entry's token.
    AddMethod = 1,
    /// The next `Field` row is added to the type named by the entry's token.
    AddField = 2,
    /// The next `Param` row is added to the method named by the entry's token.
    AddParameter = 3,
}

impl EncFuncCode {
    /// Decodes a raw `FuncCode` column value.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<EncFuncCode> {
        match value {
            0 => Some(EncFuncCode::Default),
            1 => Some(EncFuncCode::AddMethod),
            2 => Some(EncFuncCode::AddField),
            3 => Some(EncFuncCode::AddParameter),
            _ => None,
        }
    }
}

/// `Module` row carrying the generation markers of a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRow {
    /// Generation number of this delta (1 for the first delta).
    pub generation: u16,
    /// `#Strings` index of the module name.
    pub name: u32,
    /// `#GUID` index of the module version id.
    pub mvid: u32,
    /// `#GUID` index of this generation's id.
    pub enc_id: u32,
    /// `#GUID` index of the previous generation's id (0 for the first delta).
    pub enc_base_id: u32,
}

impl DeltaRow for ModuleRow {
    const TABLE: TableId = TableId::Module;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.generation);
        write_le(data, self.name);
        write_le(data, self.mvid);
        write_le(data, self.enc_id);
        write_le(data, self.enc_base_id);
        Ok(())
    }
}

/// `TypeRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRefRow {
    /// `AssemblyRef` (or enclosing `TypeRef`) the type is resolved in.
    pub resolution_scope: Token,
    /// `#Strings` index of the type name.
    pub name: u32,
    /// `#Strings` index of the namespace.
    pub namespace: u32,
}

impl DeltaRow for TypeRefRow {
    const TABLE: TableId = TableId::TypeRef;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(
            data,
            CodedIndexType::ResolutionScope.encode(self.resolution_scope)?,
        );
        write_le(data, self.name);
        write_le(data, self.namespace);
        Ok(())
    }
}

/// `TypeDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefRow {
    /// `TypeAttributes` bits.
    pub flags: u32,
    /// `#Strings` index of the type name.
    pub name: u32,
    /// `#Strings` index of the namespace.
    pub namespace: u32,
    /// Base type (`TypeDef`, `TypeRef` or `TypeSpec`), null for interfaces and `<Module>`.
    pub extends: Token,
    /// First `Field` row owned by the type.
    pub field_list: u32,
    /// First `MethodDef` row owned by the type.
    pub method_list: u32,
}

impl DeltaRow for TypeDefRow {
    const TABLE: TableId = TableId::TypeDef;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.flags);
        write_le(data, self.name);
        write_le(data, self.namespace);
        write_le(data, CodedIndexType::TypeDefOrRef.encode(self.extends)?);
        write_le(data, self.field_list);
        write_le(data, self.method_list);
        Ok(())
    }
}

/// `Field` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRow {
    /// `FieldAttributes` bits.
    pub flags: u16,
    /// `#Strings` index of the field name.
    pub name: u32,
    /// `#Blob` index of the field signature.
    pub signature: u32,
}

impl DeltaRow for FieldRow {
    const TABLE: TableId = TableId::Field;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.flags);
        write_le(data, self.name);
        write_le(data, self.signature);
        Ok(())
    }
}

/// `MethodDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDefRow {
    /// Offset of the method body in the IL delta, 0 for abstract methods.
    pub rva: u32,
    /// `MethodImplAttributes` bits.
    pub impl_flags: u16,
    /// `MethodAttributes` bits.
    pub flags: u16,
    /// `#Strings` index of the method name.
    pub name: u32,
    /// `#Blob` index of the method signature.
    pub signature: u32,
    /// First `Param` row owned by the method.
    pub param_list: u32,
}

impl DeltaRow for MethodDefRow {
    const TABLE: TableId = TableId::MethodDef;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.rva);
        write_le(data, self.impl_flags);
        write_le(data, self.flags);
        write_le(data, self.name);
        write_le(data, self.signature);
        write_le(data, self.param_list);
        Ok(())
    }
}

/// `Param` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRow {
    /// `ParamAttributes` bits.
    pub flags: u16,
    /// 1-based parameter position, 0 for the return value.
    pub sequence: u16,
    /// `#Strings` index of the parameter name.
    pub name: u32,
}

impl DeltaRow for ParamRow {
    const TABLE: TableId = TableId::Param;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.flags);
        write_le(data, self.sequence);
        write_le(data, self.name);
        Ok(())
    }
}

/// `MemberRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRefRow {
    /// Declaring type of the referenced member.
    pub class: Token,
    /// `#Strings` index of the member name.
    pub name: u32,
    /// `#Blob` index of the member signature.
    pub signature: u32,
}

impl DeltaRow for MemberRefRow {
    const TABLE: TableId = TableId::MemberRef;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, CodedIndexType::MemberRefParent.encode(self.class)?);
        write_le(data, self.name);
        write_le(data, self.signature);
        Ok(())
    }
}

/// `StandAloneSig` row (local variable signatures).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandAloneSigRow {
    /// `#Blob` index of the signature.
    pub signature: u32,
}

impl DeltaRow for StandAloneSigRow {
    const TABLE: TableId = TableId::StandAloneSig;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.signature);
        Ok(())
    }
}

/// `TypeSpec` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpecRow {
    /// `#Blob` index of the type signature.
    pub signature: u32,
}

impl DeltaRow for TypeSpecRow {
    const TABLE: TableId = TableId::TypeSpec;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.signature);
        Ok(())
    }
}

/// `AssemblyRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRefRow {
    /// Version of the referenced assembly.
    pub version: AssemblyVersion,
    /// `AssemblyFlags` bits; `0x0001` marks a full public key.
    pub flags: u32,
    /// `#Blob` index of the public key or token, 0 if none.
    pub public_key_or_token: u32,
    /// `#Strings` index of the simple name.
    pub name: u32,
    /// `#Strings` index of the culture, 0 for neutral.
    pub culture: u32,
    /// `#Blob` index of the hash value, usually 0.
    pub hash_value: u32,
}

impl DeltaRow for AssemblyRefRow {
    const TABLE: TableId = TableId::AssemblyRef;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.version.major);
        write_le(data, self.version.minor);
        write_le(data, self.version.build);
        write_le(data, self.version.revision);
        write_le(data, self.flags);
        write_le(data, self.public_key_or_token);
        write_le(data, self.name);
        write_le(data, self.culture);
        write_le(data, self.hash_value);
        Ok(())
    }
}

/// `NestedClass` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedClassRow {
    /// The nested `TypeDef`.
    pub nested: Token,
    /// The enclosing `TypeDef`.
    pub enclosing: Token,
}

impl DeltaRow for NestedClassRow {
    const TABLE: TableId = TableId::NestedClass;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.nested.row());
        write_le(data, self.enclosing.row());
        Ok(())
    }
}

/// `EncLog` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncLogRow {
    /// Token the operation applies to.
    pub token: Token,
    /// The operation.
    pub func_code: EncFuncCode,
}

impl DeltaRow for EncLogRow {
    const TABLE: TableId = TableId::EncLog;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.token.value());
        write_le(data, self.func_code as u32);
        Ok(())
    }
}

/// `EncMap` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncMapRow {
    /// Token of a row present in the delta.
    pub token: Token,
}

impl DeltaRow for EncMapRow {
    const TABLE: TableId = TableId::EncMap;

    fn write(&self, data: &mut Vec<u8>) -> Result<()> {
        write_le(data, self.token.value());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written<R: DeltaRow>(row: &R) -> Vec<u8> {
        let mut data = Vec::new();
        row.write(&mut data).unwrap();
        assert_eq!(Some(data.len()), row_size(R::TABLE), "{:?}", R::TABLE);
        data
    }

    #[test]
    fn row_sizes_match_columns() {
        written(&ModuleRow {
            generation: 1,
            name: 1,
            mvid: 1,
            enc_id: 2,
            enc_base_id: 0,
        });
        written(&TypeRefRow {
            resolution_scope: Token(0x23000001),
            name: 1,
            namespace: 2,
        });
        written(&TypeDefRow {
            flags: 0x0010_0001,
            name: 1,
            namespace: 0,
            extends: Token(0x01000001),
            field_list: 1,
            method_list: 1,
        });
        written(&FieldRow {
            flags: 0x0016,
            name: 1,
            signature: 1,
        });
        written(&ParamRow {
            flags: 0,
            sequence: 1,
            name: 1,
        });
        written(&MemberRefRow {
            class: Token(0x01000001),
            name: 1,
            signature: 1,
        });
        written(&StandAloneSigRow { signature: 1 });
        written(&TypeSpecRow { signature: 1 });
        written(&AssemblyRefRow {
            version: AssemblyVersion::new(4, 0, 0, 0),
            flags: 0,
            public_key_or_token: 1,
            name: 1,
            culture: 0,
            hash_value: 0,
        });
        written(&NestedClassRow {
            nested: Token(0x02000003),
            enclosing: Token(0x02000002),
        });
        written(&EncMapRow {
            token: Token(0x06000001),
        });
    }

    #[test]
    fn method_def_layout() {
        let data = written(&MethodDefRow {
            rva: 4,
            impl_flags: 0,
            flags: 0x0096,
            name: 0x10,
            signature: 0x20,
            param_list: 1,
        });
        assert_eq!(
            data,
            [
                0x04, 0, 0, 0, 0, 0, 0x96, 0, 0x10, 0, 0, 0, 0x20, 0, 0, 0, 0x01, 0, 0, 0
            ]
        );
    }

    #[test]
    fn enc_log_layout() {
        let data = written(&EncLogRow {
            token: Token(0x02000002),
            func_code: EncFuncCode::AddMethod,
        });
        assert_eq!(data, [0x02, 0, 0, 0x02, 0x01, 0, 0, 0]);
        assert_eq!(EncFuncCode::from_u32(3), Some(EncFuncCode::AddParameter));
        assert_eq!(EncFuncCode::from_u32(4), None);
    }

    #[test]
    fn bad_coded_index() {
        let row = TypeRefRow {
            resolution_scope: Token(0x06000001),
            name: 1,
            namespace: 0,
        };
        assert!(row.write(&mut Vec::new()).is_err());
    }

    #[test]
    fn unsupported_table() {
        assert_eq!(columns(TableId::CustomAttribute), None);
    }
}
