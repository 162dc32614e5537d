//! Error types and utilities to do with the construction of LLVM IR from the
//! managed intermediate form.

use inkwell::{builder::BuilderError, support::LLVMString};
use thiserror::Error;

/// The result type for use in the IR emission layer.
pub type Result<T> = std::result::Result<T, Error>;

/// This error type is for use during the construction of LLVM IR from the
/// managed program's intermediate form.
///
/// Note that _programmer_ errors (duplicate registration of a type name with
/// a conflicting definition, or re-finalizing an already-finalized layout)
/// are not represented here. Those indicate a bug in the upstream translator
/// and abort immediately via assertion rather than being surfaced as a value.
#[derive(Debug, Error)]
pub enum Error {
    /// Emitted when an operand combination is handed to the instruction
    /// emitter that the managed type system does not allow, such as mixing an
    /// integer and a floating-point operand in one arithmetic operation.
    #[error("Operand combination not supported for {_0}")]
    UnsupportedOperandCombination(String),

    /// Emitted when a byte offset used for field access does not land inside
    /// any declared field of the type being accessed.
    #[error("Invalid offset {offset} for field access on `{type_name}`")]
    InvalidFieldOffset {
        /// The name of the managed type being accessed.
        type_name: String,

        /// The requested byte offset.
        offset: i64,
    },

    /// Emitted when an operation requires a type that has not been registered
    /// under the given name.
    #[error("No managed type is registered under the name `{_0}`")]
    UnknownType(String),

    /// Emitted when a local stack slot is requested on a function that has no
    /// entry block to host the allocation.
    #[error("Cannot allocate a local in bodyless function `{_0}`")]
    EmptyFunction(String),

    /// Emitted when a value that must be addressable has no backing memory
    /// location.
    ///
    /// Most callers of the address-revert query are expected to handle the
    /// `None` case themselves; this error exists for the sites where an
    /// address is a hard precondition, such as pointer-sized-integer argument
    /// coercion.
    #[error("Value of type `{_0}` has no backing address")]
    NoBackingAddress(String),

    /// Emitted when the LLVM verifier rejects the constructed module.
    #[error("Module verification failed:\n{_0}")]
    VerificationFailed(String),

    /// An error when doing IO during serialization of the module.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// An error raised by the LLVM instruction builder.
    #[error("LLVM builder error: {_0}")]
    BuilderError(#[from] BuilderError),

    /// An error coming from LLVM.
    ///
    /// Unfortunately this does not directly contain an `LLVMString` as we want
    /// our error types to be [`Send`] and `LLVMString` is not.
    #[error("LLVM Error: {_0}")]
    LLVMError(String),
}

impl From<LLVMString> for Error {
    /// Wrap an error from LLVM into our error type.
    fn from(value: LLVMString) -> Self {
        Self::LLVMError(value.to_string())
    }
}
