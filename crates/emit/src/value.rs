//! The value wrapper that flows between the emitters.
//!
//! Every value the emitters produce or consume carries its managed type and
//! whether it is an immediate (a register value) or an address that must be
//! loaded through before use. Wrappers are immutable; operations that change
//! a value's status produce a new wrapper.

use inkwell::values::BasicValueEnum;

use crate::types::TypeId;

/// An LLVM value tagged with its managed type and addressability.
#[derive(Clone, Copy, Debug)]
pub struct EmitValue<'ctx> {
    llvm: BasicValueEnum<'ctx>,
    ty: TypeId,
    immediate: bool,
}

impl<'ctx> EmitValue<'ctx> {
    /// Wraps `llvm` as a value of managed type `ty`.
    ///
    /// An immediate value holds the data itself; a non-immediate value holds
    /// the address of a memory location containing the data.
    #[must_use]
    pub fn new(llvm: BasicValueEnum<'ctx>, ty: TypeId, immediate: bool) -> Self {
        Self { llvm, ty, immediate }
    }

    /// The raw LLVM value.
    #[must_use]
    pub fn llvm(&self) -> BasicValueEnum<'ctx> {
        self.llvm
    }

    /// The managed type of the value.
    #[must_use]
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// True if the wrapper holds the data itself rather than its address.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    /// True if the underlying LLVM value is an integer.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        self.llvm.is_int_value()
    }

    /// True if the underlying LLVM value is a floating-point value.
    #[must_use]
    pub fn is_floating_point(&self) -> bool {
        self.llvm.is_float_value()
    }

    /// True if the underlying LLVM value is a pointer.
    #[must_use]
    pub fn is_pointer(&self) -> bool {
        self.llvm.is_pointer_value()
    }
}
