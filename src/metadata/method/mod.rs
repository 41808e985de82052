//! Method bodies and CIL encoding.
//!
//! # Key Components
//!
//! - [`InstructionEncoder`] - Emits CIL with compact encodings, labels and stack tracking
//! - [`encode_method_body`] - Wraps code in a tiny or fat header
//! - [`MethodBody`] - Parses an existing body header
//! - [`IlStreamBuilder`] - Lays out the IL stream accompanying a metadata delta
//! - [`MethodAttributes`], [`MethodImplAttributes`], [`MethodBodyFlags`] - Flag sets
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Common Intermediate Language physical layout
//! - ECMA-335 6th Edition, Partition III - CIL instruction set

mod body;
mod encoder;
mod types;

pub use body::{encode_method_body, IlStreamBuilder, MethodBody, TINY_MAX_CODE_SIZE, TINY_MAX_STACK};
pub use encoder::{BranchKind, EncodedCode, InstructionEncoder, Label};
pub use types::{MethodAttributes, MethodBodyFlags, MethodImplAttributes, METHOD_ACCESS_MASK};
