//! Signature blob encoders.
//!
//! # Available Encoders
//!
//! - [`encode_method_signature`] - Method signatures for `MethodDef` and `MemberRef`
//! - [`encode_field_signature`] - Field signatures for `Field` and `MemberRef`
//! - [`encode_local_var_signature`] - Local variable signatures for `StandAloneSig`
//! - [`encode_typespec_signature`] - Type specifications for `TypeSpec`
//! - [`encode_type`] - A single type, the building block of all of the above

use crate::{
    file::io::write_compressed_uint,
    metadata::{
        signatures::{MethodSig, SigType, CALLING_CONVENTION, ELEMENT_TYPE, SIGNATURE_HEADER},
        tables::CodedIndexType,
        token::Token,
    },
    Result,
};

fn encode_type_def_or_ref(token: Token, buffer: &mut Vec<u8>) -> Result<()> {
    let coded = CodedIndexType::TypeDefOrRef.encode(token)?;
    write_compressed_uint(buffer, coded)
}

fn count(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| malformed_error!("Too many {} in signature: {}", what, len))
}

/// Appends the encoding of `ty` to `buffer`.
///
/// # Errors
/// Returns an error if a token is not a valid `TypeDefOrRef` target.
pub fn encode_type(ty: &SigType, buffer: &mut Vec<u8>) -> Result<()> {
    match ty {
        SigType::Void => buffer.push(ELEMENT_TYPE::VOID),
        SigType::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        SigType::Char => buffer.push(ELEMENT_TYPE::CHAR),
        SigType::I1 => buffer.push(ELEMENT_TYPE::I1),
        SigType::U1 => buffer.push(ELEMENT_TYPE::U1),
        SigType::I2 => buffer.push(ELEMENT_TYPE::I2),
        SigType::U2 => buffer.push(ELEMENT_TYPE::U2),
        SigType::I4 => buffer.push(ELEMENT_TYPE::I4),
        SigType::U4 => buffer.push(ELEMENT_TYPE::U4),
        SigType::I8 => buffer.push(ELEMENT_TYPE::I8),
        SigType::U8 => buffer.push(ELEMENT_TYPE::U8),
        SigType::R4 => buffer.push(ELEMENT_TYPE::R4),
        SigType::R8 => buffer.push(ELEMENT_TYPE::R8),
        SigType::String => buffer.push(ELEMENT_TYPE::STRING),
        SigType::Object => buffer.push(ELEMENT_TYPE::OBJECT),
        SigType::I => buffer.push(ELEMENT_TYPE::I),
        SigType::U => buffer.push(ELEMENT_TYPE::U),
        SigType::Class(token) => {
            buffer.push(ELEMENT_TYPE::CLASS);
            encode_type_def_or_ref(*token, buffer)?;
        }
        SigType::ValueType(token) => {
            buffer.push(ELEMENT_TYPE::VALUETYPE);
            encode_type_def_or_ref(*token, buffer)?;
        }
        SigType::GenericInst {
            value_type,
            definition,
            arguments,
        } => {
            buffer.push(ELEMENT_TYPE::GENERICINST);
            buffer.push(if *value_type {
                ELEMENT_TYPE::VALUETYPE
            } else {
                ELEMENT_TYPE::CLASS
            });
            encode_type_def_or_ref(*definition, buffer)?;
            write_compressed_uint(buffer, count(arguments.len(), "type arguments")?)?;
            for argument in arguments {
                encode_type(argument, buffer)?;
            }
        }
        SigType::SzArray(element) => {
            buffer.push(ELEMENT_TYPE::SZARRAY);
            encode_type(element, buffer)?;
        }
        SigType::ByRef(inner) => {
            buffer.push(ELEMENT_TYPE::BYREF);
            encode_type(inner, buffer)?;
        }
        SigType::Var(index) => {
            buffer.push(ELEMENT_TYPE::VAR);
            write_compressed_uint(buffer, *index)?;
        }
        SigType::MVar(index) => {
            buffer.push(ELEMENT_TYPE::MVAR);
            write_compressed_uint(buffer, *index)?;
        }
    }

    Ok(())
}

/// Encodes a `MethodDefSig` / `MethodRefSig` (II.23.2.1, II.23.2.2).
///
/// # Errors
/// Returns an error if a token is not a valid `TypeDefOrRef` target.
pub fn encode_method_signature(signature: &MethodSig) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    let mut calling_convention = CALLING_CONVENTION::DEFAULT;
    if signature.has_this {
        calling_convention |= CALLING_CONVENTION::HASTHIS;
    }
    if signature.generic_arity > 0 {
        calling_convention |= CALLING_CONVENTION::GENERIC;
    }
    buffer.push(calling_convention);

    if signature.generic_arity > 0 {
        write_compressed_uint(&mut buffer, signature.generic_arity)?;
    }

    write_compressed_uint(&mut buffer, count(signature.params.len(), "parameters")?)?;
    encode_type(&signature.ret, &mut buffer)?;
    for param in &signature.params {
        encode_type(param, &mut buffer)?;
    }

    Ok(buffer)
}

/// Encodes a `FieldSig` (II.23.2.4).
///
/// # Errors
/// Returns an error if a token is not a valid `TypeDefOrRef` target.
pub fn encode_field_signature(field_type: &SigType) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::FIELD];
    encode_type(field_type, &mut buffer)?;
    Ok(buffer)
}

/// Encodes a `LocalVarSig` (II.23.2.6).
///
/// # Errors
/// Returns an error if there are no locals (methods without locals have no signature) or
/// a token is not a valid `TypeDefOrRef` target.
pub fn encode_local_var_signature(locals: &[SigType]) -> Result<Vec<u8>> {
    if locals.is_empty() {
        return Err(malformed_error!("Local variable signature without locals"));
    }

    let mut buffer = vec![SIGNATURE_HEADER::LOCAL_SIG];
    write_compressed_uint(&mut buffer, count(locals.len(), "locals")?)?;
    for local in locals {
        encode_type(local, &mut buffer)?;
    }

    Ok(buffer)
}

/// Encodes a `TypeSpec` blob (II.23.2.14).
///
/// # Errors
/// Returns an error if a token is not a valid `TypeDefOrRef` target.
pub fn encode_typespec_signature(ty: &SigType) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_type(ty, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_void_no_args() {
        let sig = MethodSig {
            has_this: false,
            generic_arity: 0,
            ret: SigType::Void,
            params: vec![],
        };
        assert_eq!(encode_method_signature(&sig).unwrap(), [0x00, 0x00, 0x01]);
    }

    #[test]
    fn instance_with_params() {
        let sig = MethodSig {
            has_this: true,
            generic_arity: 0,
            ret: SigType::I4,
            params: vec![SigType::String, SigType::Class(Token(0x01000002))],
        };
        assert_eq!(
            encode_method_signature(&sig).unwrap(),
            [0x20, 0x02, 0x08, 0x0e, 0x12, 0x09]
        );
    }

    #[test]
    fn generic_method() {
        let sig = MethodSig {
            has_this: false,
            generic_arity: 1,
            ret: SigType::MVar(0),
            params: vec![SigType::SzArray(Box::new(SigType::MVar(0)))],
        };
        assert_eq!(
            encode_method_signature(&sig).unwrap(),
            [0x10, 0x01, 0x01, 0x1e, 0x00, 0x1d, 0x1e, 0x00]
        );
    }

    #[test]
    fn generic_instance() {
        let list_of_int = SigType::GenericInst {
            value_type: false,
            definition: Token(0x01000003),
            arguments: vec![SigType::I4],
        };
        assert_eq!(
            encode_typespec_signature(&list_of_int).unwrap(),
            [0x15, 0x12, 0x0d, 0x01, 0x08]
        );
    }

    #[test]
    fn field_and_locals() {
        assert_eq!(
            encode_field_signature(&SigType::ValueType(Token(0x02000002))).unwrap(),
            [0x06, 0x11, 0x08]
        );
        assert_eq!(
            encode_local_var_signature(&[SigType::I4, SigType::ByRef(Box::new(SigType::Object))])
                .unwrap(),
            [0x07, 0x02, 0x08, 0x10, 0x1c]
        );
        assert!(encode_local_var_signature(&[]).is_err());
    }

    #[test]
    fn invalid_token() {
        assert!(encode_field_signature(&SigType::Class(Token(0x06000001))).is_err());
    }
}
