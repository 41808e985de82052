//! CIL instruction encoder.
//!
//! Produces raw instruction bytes with the compact encodings a compiler picks (`ldc.i4.2`
//! over `ldc.i4 2`, `ldloc.0` over `ldloc.s 0`), token operands in little-endian order, and
//! long-form branches whose targets are patched once the label is placed. The encoder
//! tracks the evaluation stack depth to report `max_stack` for the method header.
//!
//! # Examples
//!
//! ```rust,ignore
//! use cildelta::metadata::method::InstructionEncoder;
//! use cildelta::metadata::token::Token;
//!
//! let mut il = InstructionEncoder::new();
//! il.ldc_i4(2)?;
//! il.call(Token::new(0x0A000001), 1, false)?;
//! il.ret(false)?;
//! let code = il.finish()?;
//! assert_eq!(code.bytes, [0x18, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A]);
//! # Ok::<(), cildelta::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    file::io::{write_le, write_le_at},
    metadata::token::Token,
    Error, Result,
};

/// A branch target inside one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Branch flavours; all are emitted in their 4-byte-offset form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// `br`
    Always,
    /// `brtrue`
    True,
    /// `brfalse`
    False,
}

/// Finished instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCode {
    /// Raw CIL bytes.
    pub bytes: Vec<u8>,
    /// Maximum evaluation stack depth.
    pub max_stack: u16,
}

/// Incremental encoder for one method body's instruction stream.
#[derive(Debug, Default)]
pub struct InstructionEncoder {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    label_depth: HashMap<Label, i32>,
    fixups: Vec<(usize, Label)>,
    depth: i32,
    max_depth: i32,
}

impl InstructionEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Returns true if nothing has been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn stack(&mut self, pops: i32, pushes: i32) -> Result<()> {
        self.depth -= pops;
        if self.depth < 0 {
            return Err(malformed_error!(
                "Evaluation stack underflow at IL offset {}",
                self.code.len()
            ));
        }
        self.depth += pushes;
        self.max_depth = self.max_depth.max(self.depth);
        Ok(())
    }

    fn op(&mut self, opcode: u8, pops: i32, pushes: i32) -> Result<()> {
        self.stack(pops, pushes)?;
        self.code.push(opcode);
        Ok(())
    }

    fn op_token(&mut self, opcode: u8, token: Token, pops: i32, pushes: i32) -> Result<()> {
        self.op(opcode, pops, pushes)?;
        write_le(&mut self.code, token.value());
        Ok(())
    }

    /// `nop`
    ///
    /// # Errors
    /// Never fails; returns `Result` for uniformity.
    pub fn nop(&mut self) -> Result<()> {
        self.op(0x00, 0, 0)
    }

    /// `ldnull`
    ///
    /// # Errors
    /// Never fails; returns `Result` for uniformity.
    pub fn ldnull(&mut self) -> Result<()> {
        self.op(0x14, 0, 1)
    }

    /// `dup`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn dup(&mut self) -> Result<()> {
        self.op(0x25, 1, 2)
    }

    /// `pop`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn pop(&mut self) -> Result<()> {
        self.op(0x26, 1, 0)
    }

    /// `add`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn add(&mut self) -> Result<()> {
        self.op(0x58, 2, 1)
    }

    /// `sub`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn sub(&mut self) -> Result<()> {
        self.op(0x59, 2, 1)
    }

    /// `mul`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn mul(&mut self) -> Result<()> {
        self.op(0x5A, 2, 1)
    }

    /// `ret`, popping the return value if the method returns one.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn ret(&mut self, returns_value: bool) -> Result<()> {
        self.op(0x2A, i32::from(returns_value), 0)?;
        self.depth = 0;
        Ok(())
    }

    /// `throw`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn throw(&mut self) -> Result<()> {
        self.op(0x7A, 1, 0)?;
        self.depth = 0;
        Ok(())
    }

    /// Loads a 32-bit constant with the shortest encoding.
    ///
    /// # Errors
    /// Never fails; returns `Result` for uniformity.
    pub fn ldc_i4(&mut self, value: i32) -> Result<()> {
        self.stack(0, 1)?;
        match value {
            -1..=8 => {
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                self.code.push((0x16 + value) as u8);
            }
            -128..=127 => {
                self.code.push(0x1F);
                #[allow(clippy::cast_possible_truncation)]
                write_le(&mut self.code, value as i8);
            }
            _ => {
                self.code.push(0x20);
                write_le(&mut self.code, value);
            }
        }
        Ok(())
    }

    /// Loads an argument with the shortest encoding.
    ///
    /// # Errors
    /// Never fails; returns `Result` for uniformity.
    pub fn ldarg(&mut self, index: u16) -> Result<()> {
        self.stack(0, 1)?;
        self.short_or_long(index, 0x02, 0x0E, 0x09);
        Ok(())
    }

    /// Loads a local with the shortest encoding.
    ///
    /// # Errors
    /// Never fails; returns `Result` for uniformity.
    pub fn ldloc(&mut self, index: u16) -> Result<()> {
        self.stack(0, 1)?;
        self.short_or_long(index, 0x06, 0x11, 0x0C);
        Ok(())
    }

    /// Stores to a local with the shortest encoding.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn stloc(&mut self, index: u16) -> Result<()> {
        self.stack(1, 0)?;
        self.short_or_long(index, 0x0A, 0x13, 0x0E);
        Ok(())
    }

    // Forms: `<macro>.0`..`<macro>.3`, `<short> uint8`, `FE <long> uint16`.
    fn short_or_long(&mut self, index: u16, macro_base: u8, short: u8, long: u8) {
        match index {
            0..=3 => {
                #[allow(clippy::cast_possible_truncation)]
                self.code.push(macro_base + index as u8);
            }
            4..=255 => {
                self.code.push(short);
                #[allow(clippy::cast_possible_truncation)]
                self.code.push(index as u8);
            }
            _ => {
                self.code.push(0xFE);
                self.code.push(long);
                write_le(&mut self.code, index);
            }
        }
    }

    /// `ldstr` with a user string token (`0x70xxxxxx`).
    ///
    /// # Errors
    /// Never fails; returns `Result` for uniformity.
    pub fn ldstr(&mut self, token: Token) -> Result<()> {
        self.op_token(0x72, token, 0, 1)
    }

    /// `call`, popping `args` values (including `this`) and pushing the result if any.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn call(&mut self, token: Token, args: u16, returns_value: bool) -> Result<()> {
        self.op_token(0x28, token, i32::from(args), i32::from(returns_value))
    }

    /// `callvirt`, popping `args` values (including `this`) and pushing the result if any.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn callvirt(&mut self, token: Token, args: u16, returns_value: bool) -> Result<()> {
        self.op_token(0x6F, token, i32::from(args), i32::from(returns_value))
    }

    /// `newobj`, popping the constructor arguments and pushing the new object.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn newobj(&mut self, token: Token, args: u16) -> Result<()> {
        self.op_token(0x73, token, i32::from(args), 1)
    }

    /// `ldfld`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn ldfld(&mut self, token: Token) -> Result<()> {
        self.op_token(0x7B, token, 1, 1)
    }

    /// `stfld`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn stfld(&mut self, token: Token) -> Result<()> {
        self.op_token(0x7D, token, 2, 0)
    }

    /// `ldsfld`
    ///
    /// # Errors
    /// Never fails; returns `Result` for uniformity.
    pub fn ldsfld(&mut self, token: Token) -> Result<()> {
        self.op_token(0x7E, token, 0, 1)
    }

    /// `stsfld`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn stsfld(&mut self, token: Token) -> Result<()> {
        self.op_token(0x80, token, 1, 0)
    }

    /// `box`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn box_value(&mut self, token: Token) -> Result<()> {
        self.op_token(0x8C, token, 1, 1)
    }

    /// `ldftn`
    ///
    /// # Errors
    /// Never fails; returns `Result` for uniformity.
    pub fn ldftn(&mut self, token: Token) -> Result<()> {
        self.stack(0, 1)?;
        self.code.push(0xFE);
        self.code.push(0x06);
        write_le(&mut self.code, token.value());
        Ok(())
    }

    /// Allocates a new, not yet placed label.
    pub fn define_label(&mut self) -> Label {
        #[allow(clippy::cast_possible_truncation)]
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Places `label` at the current offset.
    ///
    /// # Errors
    /// Returns an error if the label is unknown or already placed.
    pub fn mark_label(&mut self, label: Label) -> Result<()> {
        let slot = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or_else(|| malformed_error!("Unknown label {}", label.0))?;
        if slot.is_some() {
            return Err(malformed_error!("Label {} placed twice", label.0));
        }
        *slot = Some(self.code.len());

        if let Some(depth) = self.label_depth.get(&label) {
            self.depth = *depth;
        }
        Ok(())
    }

    /// Emits a long-form branch to `label`.
    ///
    /// # Errors
    /// Returns an error on stack underflow or if the label is unknown.
    pub fn branch(&mut self, kind: BranchKind, label: Label) -> Result<()> {
        if label.0 as usize >= self.labels.len() {
            return Err(malformed_error!("Unknown label {}", label.0));
        }

        let opcode = match kind {
            BranchKind::Always => 0x38,
            BranchKind::False => 0x39,
            BranchKind::True => 0x3A,
        };
        let pops = i32::from(kind != BranchKind::Always);
        self.op(opcode, pops, 0)?;
        self.label_depth.entry(label).or_insert(self.depth);

        self.fixups.push((self.code.len(), label));
        write_le(&mut self.code, 0i32);

        if kind == BranchKind::Always {
            self.depth = 0;
        }
        Ok(())
    }

    /// Resolves branch targets and returns the finished stream.
    ///
    /// # Errors
    /// Returns an error if a branch targets a label that was never placed.
    pub fn finish(mut self) -> Result<EncodedCode> {
        for (position, label) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label.0 as usize]
                .ok_or_else(|| malformed_error!("Label {} was never placed", label.0))?;

            let next = position + 4;
            let delta = i64::try_from(target).unwrap_or(i64::MAX)
                - i64::try_from(next).unwrap_or(i64::MAX);
            let delta = i32::try_from(delta).map_err(|_| Error::OutOfBounds)?;

            let mut offset = position;
            write_le_at(&mut self.code, &mut offset, delta)?;
        }

        Ok(EncodedCode {
            bytes: self.code,
            max_stack: u16::try_from(self.max_depth).unwrap_or(u16::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ldc_i4_forms() {
        let mut il = InstructionEncoder::new();
        il.ldc_i4(-1).unwrap();
        il.ldc_i4(0).unwrap();
        il.ldc_i4(8).unwrap();
        il.ldc_i4(9).unwrap();
        il.ldc_i4(-128).unwrap();
        il.ldc_i4(1000).unwrap();
        let code = il.finish().unwrap();
        assert_eq!(
            code.bytes,
            [0x15, 0x16, 0x1E, 0x1F, 0x09, 0x1F, 0x80, 0x20, 0xE8, 0x03, 0x00, 0x00]
        );
        assert_eq!(code.max_stack, 6);
    }

    #[test]
    fn local_and_arg_forms() {
        let mut il = InstructionEncoder::new();
        il.ldarg(0).unwrap();
        il.ldarg(4).unwrap();
        il.stloc(3).unwrap();
        il.stloc(300).unwrap();
        il.ldloc(2).unwrap();
        il.ldloc(256).unwrap();
        let code = il.finish().unwrap();
        assert_eq!(
            code.bytes,
            [0x02, 0x0E, 0x04, 0x0D, 0xFE, 0x0E, 0x2C, 0x01, 0x08, 0xFE, 0x0C, 0x00, 0x01]
        );
    }

    #[test]
    fn call_with_token() {
        let mut il = InstructionEncoder::new();
        il.ldc_i4(2).unwrap();
        il.call(Token(0x0A000001), 1, false).unwrap();
        il.ret(false).unwrap();
        let code = il.finish().unwrap();
        assert_eq!(code.bytes, [0x18, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A]);
        assert_eq!(code.max_stack, 1);
    }

    #[test]
    fn branches_are_patched() {
        let mut il = InstructionEncoder::new();
        let end = il.define_label();
        let top = il.define_label();
        il.mark_label(top).unwrap();
        il.ldarg(0).unwrap();
        il.branch(BranchKind::False, end).unwrap();
        il.branch(BranchKind::Always, top).unwrap();
        il.mark_label(end).unwrap();
        il.ret(false).unwrap();

        let code = il.finish().unwrap();
        assert_eq!(
            code.bytes,
            [
                0x02, // ldarg.0
                0x39, 0x05, 0x00, 0x00, 0x00, // brfalse end (+5)
                0x38, 0xF5, 0xFF, 0xFF, 0xFF, // br top (-11)
                0x2A,
            ]
        );
    }

    #[test]
    fn unplaced_label() {
        let mut il = InstructionEncoder::new();
        let label = il.define_label();
        il.branch(BranchKind::Always, label).unwrap();
        assert!(il.finish().is_err());
    }

    #[test]
    fn stack_underflow() {
        let mut il = InstructionEncoder::new();
        assert!(il.pop().is_err());
    }

    #[test]
    fn newobj_throw() {
        let mut il = InstructionEncoder::new();
        il.newobj(Token(0x0A000004), 0).unwrap();
        il.throw().unwrap();
        let code = il.finish().unwrap();
        assert_eq!(code.bytes, [0x73, 0x04, 0x00, 0x00, 0x0A, 0x7A]);
        assert_eq!(code.max_stack, 1);
    }
}
