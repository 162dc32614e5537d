//! Useful constants for use within the IR emission layer.
//!
//! Most of these are the well-known names that the managed type system uses
//! for the types the emitter must treat specially. They are names, not types:
//! the corresponding [`crate::types::TypeId`]s only exist once the upstream
//! translator has registered the types with a module's registry.

/// The size of a byte on our architecture.
pub const BYTE_SIZE: u32 = 8;

/// The managed type that is prepended to every reference-type instance.
///
/// Managed references point just past this header, while raw addresses point
/// at its start; the pointer/integer conversions compensate by exactly this
/// type's size.
pub const OBJECT_HEADER_TYPE: &str = "Corten.Runtime.ObjectHeader";

/// The name prefix for the managed wrappers around LLVM primitive types.
///
/// A type named `LLVM.X` is the primitive payload of the managed basic type
/// `X`, e.g. `LLVM.System.Int32` is the raw `i32` inside `System.Int32`.
pub const PRIMITIVE_PREFIX: &str = "LLVM.";

/// The canonical boolean type that comparison results are materialized as.
pub const BOOLEAN_TYPE: &str = "LLVM.System.Boolean";

/// The primitive integer type used to hold pointers converted to integers.
pub const NATIVE_UINT_TYPE: &str = "LLVM.System.UInt32";

/// The primitive 32-bit floating point type.
pub const SINGLE_TYPE: &str = "LLVM.System.Single";

/// The primitive 64-bit floating point type.
pub const DOUBLE_TYPE: &str = "LLVM.System.Double";

/// The primitive pointer-sized signed integer type.
pub const INTPTR_TYPE: &str = "LLVM.System.IntPtr";

/// The primitive pointer-sized unsigned integer type.
pub const UINTPTR_TYPE: &str = "LLVM.System.UIntPtr";

/// The managed pointer-sized integer types.
///
/// The call emitter may pass one of these to a parameter of any other type
/// (and vice versa) by reinterpreting the argument's backing address.
pub const POINTER_SIZED_INT_TYPES: [&str; 2] = ["System.IntPtr", "System.UIntPtr"];

/// The managed void type.
pub const VOID_TYPE: &str = "System.Void";

/// The prefix used when synthesizing names for anonymous globals.
pub const GLOBAL_NAME_PREFIX: &str = "G";
