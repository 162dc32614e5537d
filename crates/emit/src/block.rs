//! The per-basic-block instruction emitter.
//!
//! A [`BlockEmitter`] owns an LLVM builder positioned at the end of one basic
//! block and exposes the operations the upstream translator emits against.
//! Operands arrive as [`EmitValue`]s, which may be immediates or addresses;
//! each operation normalizes its operands as it needs and produces new
//! wrappers for its results.
//!
//! Two helpers underpin almost everything here. Loading to immediate turns
//! an address into the value stored there, and reverting to address undoes
//! exactly that: a value produced by a load can be walked back to the
//! pointer it was loaded through, which is how operations that need memory
//! (copies, reinterpreting argument casts) recover an address without
//! spilling.

use inkwell::{
    basic_block::BasicBlock,
    builder::Builder,
    types::BasicTypeEnum,
    values::{
        BasicMetadataValueEnum, BasicValue, BasicValueEnum, CallSiteValue, InstructionOpcode,
        PointerValue,
    },
    IntPredicate,
};
use itertools::Itertools;
use tracing::warn;

use corten_errors::emit::{Error, Result};

use crate::{
    constant::{
        BOOLEAN_TYPE, BYTE_SIZE, NATIVE_UINT_TYPE, OBJECT_HEADER_TYPE,
        POINTER_SIZED_INT_TYPES, PRIMITIVE_PREFIX, UINTPTR_TYPE,
    },
    function::FunctionEmitter,
    module::ObjectModule,
    ops::{float_predicate, int_predicate, BinaryOp, CmpPredicate, UnaryOp},
    types::{TypeId, TypeRegistry},
    value::EmitValue,
};

/// The instruction emitter for one basic block.
pub struct BlockEmitter<'m, 'ctx> {
    module: &'m ObjectModule<'ctx>,
    function: FunctionEmitter<'m, 'ctx>,
    block: BasicBlock<'ctx>,
    builder: Builder<'ctx>,
}

impl<'m, 'ctx> BlockEmitter<'m, 'ctx> {
    pub(crate) fn new(
        module: &'m ObjectModule<'ctx>,
        function: FunctionEmitter<'m, 'ctx>,
        block: BasicBlock<'ctx>,
    ) -> Self {
        let builder = module.context().create_builder();
        builder.position_at_end(block);
        Self {
            module,
            function,
            block,
            builder,
        }
    }

    /// The underlying LLVM basic block.
    #[must_use]
    pub fn block(&self) -> BasicBlock<'ctx> {
        self.block
    }

    /// The function this block belongs to.
    #[must_use]
    pub fn function(&self) -> &FunctionEmitter<'m, 'ctx> {
        &self.function
    }

    fn types(&self) -> &'m TypeRegistry<'ctx> {
        self.module.types()
    }

    /// Stamps a source location onto the builder.
    ///
    /// The location applies to every instruction emitted afterwards, until
    /// the next stamp. The subprogram for `mangled_name` is created on first
    /// use and attached to the current function.
    pub fn set_debug_info(&self, line: u32, column: u32, source_file: &str, mangled_name: &str) {
        let debug = self.module.debug_info();
        debug.set_current_file(source_file);
        let subprogram = debug.subprogram_for(mangled_name, line, self.function.llvm());
        let location = debug.create_location(self.module.context(), line, column, subprogram);
        self.builder.set_current_debug_location(location);
    }

    /// Turns `value` into an immediate, loading through its address if it is
    /// not one already.
    ///
    /// # Errors
    ///
    /// Returns an error if the load cannot be built.
    pub fn load_to_immediate(&self, value: EmitValue<'ctx>) -> Result<EmitValue<'ctx>> {
        if value.is_immediate() {
            return Ok(value);
        }
        let pointee = self.types().storage_type(value.ty());
        let loaded = self
            .builder
            .build_load(pointee, value.llvm().into_pointer_value(), "")?;
        Ok(EmitValue::new(loaded, value.ty(), true))
    }

    /// Recovers the address `value` lives at, if it has one.
    ///
    /// A non-immediate value already is an address. An immediate produced by
    /// a load instruction is walked back to the loaded-through pointer.
    /// Anything else (constants, arithmetic results) has no backing memory
    /// and yields `None`.
    #[must_use]
    pub fn revert_to_address(&self, value: EmitValue<'ctx>) -> Option<EmitValue<'ctx>> {
        if !value.is_immediate() {
            return Some(value);
        }
        let instruction = value.llvm().as_instruction_value()?;
        if instruction.get_opcode() != InstructionOpcode::Load {
            return None;
        }
        let address = instruction.get_operand(0)?.left()?;
        Some(EmitValue::new(address, value.ty(), false))
    }

    fn require_address(&self, value: EmitValue<'ctx>) -> Result<EmitValue<'ctx>> {
        self.revert_to_address(value)
            .ok_or_else(|| Error::NoBackingAddress(self.types().name(value.ty())))
    }

    /// Stores `src` through the address held by `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be built.
    pub fn insert_store(&self, dst: EmitValue<'ctx>, src: EmitValue<'ctx>) -> Result<()> {
        let src = self.load_to_immediate(src)?;
        if src.ty() != dst.ty() {
            warn!(
                src = %self.types().name(src.ty()),
                dst = %self.types().name(dst.ty()),
                "store between distinct managed types"
            );
        }
        self.builder
            .build_store(dst.llvm().into_pointer_value(), src.llvm())?;
        Ok(())
    }

    /// Stores `src` into the payload slot of the basic-type wrapper `dst`,
    /// returning the destination.
    ///
    /// When `dst` is an address the payload slot is stored through and `dst`
    /// itself comes back. An in-register aggregate cannot be updated in
    /// place; the result is a new aggregate with the payload replaced, and
    /// the original is unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `dst` is not backed by a
    ///   wrapper struct.
    pub fn insert_store_into_bt(
        &self,
        dst: EmitValue<'ctx>,
        src: EmitValue<'ctx>,
    ) -> Result<EmitValue<'ctx>> {
        let src = self.load_to_immediate(src)?;
        if dst.is_pointer() {
            let wrapper = self.types().struct_llvm(dst.ty()).ok_or_else(|| {
                Error::UnsupportedOperandCombination(format!(
                    "basic-type store into `{}`",
                    self.types().name(dst.ty())
                ))
            })?;
            let slot = self.builder.build_struct_gep(
                wrapper,
                dst.llvm().into_pointer_value(),
                0,
                "",
            )?;
            self.builder.build_store(slot, src.llvm())?;
            return Ok(dst);
        }

        let aggregate = dst.llvm().into_struct_value();
        let updated = self
            .builder
            .build_insert_value(aggregate, src.llvm(), 0, "")?;
        Ok(EmitValue::new(
            updated.into_struct_value().into(),
            dst.ty(),
            true,
        ))
    }

    /// Copies formal parameter `index` into the local slot `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the function has no such parameter or the store
    /// cannot be built.
    pub fn insert_store_argument(&self, dst: EmitValue<'ctx>, index: u32) -> Result<()> {
        let argument = self.function.get_function_argument(index)?;
        self.insert_store(dst, argument)
    }

    /// Copies the whole object `src` into the storage behind `dst`.
    ///
    /// When the source has a backing address this is a memcpy of the
    /// destination type's full size. A source that only exists in a register
    /// is decomposed and stored element by element instead.
    ///
    /// # Errors
    ///
    /// - [`Error::NoBackingAddress`] if `dst` has no address to copy into.
    /// - [`Error::UnsupportedOperandCombination`] for a register-only source
    ///   whose destination type is not struct-backed.
    pub fn insert_mem_cpy(&self, dst: EmitValue<'ctx>, src: EmitValue<'ctx>) -> Result<()> {
        let dst = self.require_address(dst)?;
        let dst_ptr = dst.llvm().into_pointer_value();

        if let Some(src) = self.revert_to_address(src) {
            let bytes = self.types().size_in_bits(dst.ty()) / BYTE_SIZE;
            let size = self
                .module
                .context()
                .i32_type()
                .const_int(u64::from(bytes), false);
            self.builder
                .build_memcpy(dst_ptr, 1, src.llvm().into_pointer_value(), 1, size)?;
            return Ok(());
        }

        let struct_ty = self.types().struct_llvm(dst.ty()).ok_or_else(|| {
            Error::UnsupportedOperandCombination(format!(
                "aggregate copy into `{}`",
                self.types().name(dst.ty())
            ))
        })?;
        let aggregate = src.llvm().into_struct_value();
        for i in 0..struct_ty.count_fields() {
            let member = self.builder.build_extract_value(aggregate, i, "")?;
            let slot = self.builder.build_struct_gep(struct_ty, dst_ptr, i, "")?;
            self.builder.build_store(slot, member)?;
        }
        Ok(())
    }

    /// Copies `size` bytes from `src` to `dst`, using memmove when the
    /// ranges may overlap.
    ///
    /// # Errors
    ///
    /// Returns an error if the intrinsic call cannot be built.
    pub fn insert_mem_cpy_sized(
        &self,
        dst: EmitValue<'ctx>,
        src: EmitValue<'ctx>,
        size: EmitValue<'ctx>,
        overlapping: bool,
    ) -> Result<()> {
        let dst = self.load_to_immediate(dst)?;
        let src = self.load_to_immediate(src)?;
        let size = self.load_to_immediate(size)?;
        let dst_ptr = dst.llvm().into_pointer_value();
        let src_ptr = src.llvm().into_pointer_value();
        let size = size.llvm().into_int_value();
        if overlapping {
            self.builder.build_memmove(dst_ptr, 1, src_ptr, 1, size)?;
        } else {
            self.builder.build_memcpy(dst_ptr, 1, src_ptr, 1, size)?;
        }
        Ok(())
    }

    /// Fills the storage behind `dst` with the byte `value`.
    ///
    /// # Errors
    ///
    /// - [`Error::NoBackingAddress`] if `dst` has no address.
    pub fn insert_mem_set(&self, dst: EmitValue<'ctx>, value: u8) -> Result<()> {
        let dst = self.require_address(dst)?;
        let context = self.module.context();
        let bytes = self.types().size_in_bits(dst.ty()) / BYTE_SIZE;
        let fill = context.i8_type().const_int(u64::from(value), false);
        let size = context.i32_type().const_int(u64::from(bytes), false);
        self.builder
            .build_memset(dst.llvm().into_pointer_value(), 1, fill, size)?;
        Ok(())
    }

    /// Emits a two-operand arithmetic or bitwise operation.
    ///
    /// The operands must both be integers or both be floating-point values;
    /// the result has the managed type of the left operand.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] for mixed operand kinds or
    ///   an operation the operand kind does not support.
    pub fn insert_binary_op(
        &self,
        op: BinaryOp,
        left: EmitValue<'ctx>,
        right: EmitValue<'ctx>,
        signed: bool,
    ) -> Result<EmitValue<'ctx>> {
        let ty = left.ty();
        let left = self.load_to_immediate(left)?;
        let right = self.load_to_immediate(right)?;

        let value: BasicValueEnum<'ctx> = if left.is_integer() && right.is_integer() {
            let a = left.llvm().into_int_value();
            let b = right.llvm().into_int_value();
            match op {
                BinaryOp::Add => self.builder.build_int_add(a, b, "")?,
                BinaryOp::Sub => self.builder.build_int_sub(a, b, "")?,
                BinaryOp::Mul => self.builder.build_int_mul(a, b, "")?,
                BinaryOp::Div if signed => self.builder.build_int_signed_div(a, b, "")?,
                BinaryOp::Div => self.builder.build_int_unsigned_div(a, b, "")?,
                BinaryOp::Rem if signed => self.builder.build_int_signed_rem(a, b, "")?,
                BinaryOp::Rem => self.builder.build_int_unsigned_rem(a, b, "")?,
                BinaryOp::And => self.builder.build_and(a, b, "")?,
                BinaryOp::Or => self.builder.build_or(a, b, "")?,
                BinaryOp::Xor => self.builder.build_xor(a, b, "")?,
                BinaryOp::Shl => self.builder.build_left_shift(a, b, "")?,
                BinaryOp::Shr => self.builder.build_right_shift(a, b, signed, "")?,
            }
            .into()
        } else if left.is_floating_point() && right.is_floating_point() {
            let a = left.llvm().into_float_value();
            let b = right.llvm().into_float_value();
            match op {
                BinaryOp::Add => self.builder.build_float_add(a, b, "")?,
                BinaryOp::Sub => self.builder.build_float_sub(a, b, "")?,
                BinaryOp::Mul => self.builder.build_float_mul(a, b, "")?,
                BinaryOp::Div => self.builder.build_float_div(a, b, "")?,
                BinaryOp::Rem => self.builder.build_float_rem(a, b, "")?,
                _ => {
                    return Err(Error::UnsupportedOperandCombination(format!(
                        "floating-point {op}"
                    )))
                }
            }
            .into()
        } else {
            return Err(Error::UnsupportedOperandCombination(format!(
                "binary operation {op}"
            )));
        };

        Ok(EmitValue::new(value, ty, true))
    }

    /// Emits a single-operand operation.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if the operand kind does
    ///   not support the operation.
    pub fn insert_unary_op(&self, op: UnaryOp, value: EmitValue<'ctx>) -> Result<EmitValue<'ctx>> {
        let ty = value.ty();
        let value = self.load_to_immediate(value)?;

        let result: BasicValueEnum<'ctx> = match op {
            UnaryOp::Neg if value.is_integer() => self
                .builder
                .build_int_neg(value.llvm().into_int_value(), "")?
                .into(),
            UnaryOp::Neg if value.is_floating_point() => self
                .builder
                .build_float_neg(value.llvm().into_float_value(), "")?
                .into(),
            UnaryOp::Not if value.is_integer() => self
                .builder
                .build_not(value.llvm().into_int_value(), "")?
                .into(),
            _ => {
                return Err(Error::UnsupportedOperandCombination(format!(
                    "unary operation {op}"
                )))
            }
        };

        Ok(EmitValue::new(result, ty, true))
    }

    /// Emits a comparison and widens the result to the canonical boolean
    /// type.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if the boolean type has not been registered.
    /// - [`Error::UnsupportedOperandCombination`] for mixed operand kinds.
    pub fn insert_cmp(
        &self,
        predicate: CmpPredicate,
        signed: bool,
        left: EmitValue<'ctx>,
        right: EmitValue<'ctx>,
    ) -> Result<EmitValue<'ctx>> {
        let bool_ty = self.types().get_known(BOOLEAN_TYPE)?;
        let left = self.load_to_immediate(left)?;
        let right = self.load_to_immediate(right)?;

        let bit = if left.is_integer() && right.is_integer() {
            self.builder.build_int_compare(
                int_predicate(predicate, signed),
                left.llvm().into_int_value(),
                right.llvm().into_int_value(),
                "cmp",
            )?
        } else if left.is_floating_point() && right.is_floating_point() {
            self.builder.build_float_compare(
                float_predicate(predicate),
                left.llvm().into_float_value(),
                right.llvm().into_float_value(),
                "cmp",
            )?
        } else {
            return Err(Error::UnsupportedOperandCombination(format!(
                "comparison {predicate}"
            )));
        };

        let storage = self.int_storage(bool_ty)?;
        let widened = self
            .builder
            .build_int_z_extend_or_bit_cast(bit, storage, "cmp_bool")?;
        Ok(EmitValue::new(widened.into(), bool_ty, true))
    }

    /// Zero-extends `value` to the storage type of `ty`, keeping only its
    /// `significant_bits` low bits.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `ty` is not stored as an
    ///   integer.
    pub fn insert_z_ext(
        &self,
        value: EmitValue<'ctx>,
        ty: TypeId,
        significant_bits: u32,
    ) -> Result<EmitValue<'ctx>> {
        let narrowed = self.narrow_to_significant(value, significant_bits)?;
        let widened = self
            .builder
            .build_int_z_extend_or_bit_cast(narrowed, self.int_storage(ty)?, "")?;
        Ok(EmitValue::new(widened.into(), ty, true))
    }

    /// Sign-extends `value` to the storage type of `ty`, keeping only its
    /// `significant_bits` low bits.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `ty` is not stored as an
    ///   integer.
    pub fn insert_s_ext(
        &self,
        value: EmitValue<'ctx>,
        ty: TypeId,
        significant_bits: u32,
    ) -> Result<EmitValue<'ctx>> {
        let narrowed = self.narrow_to_significant(value, significant_bits)?;
        let widened = self
            .builder
            .build_int_s_extend_or_bit_cast(narrowed, self.int_storage(ty)?, "")?;
        Ok(EmitValue::new(widened.into(), ty, true))
    }

    /// Truncates `value` to the storage type of `ty`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `ty` is not stored as an
    ///   integer.
    pub fn insert_trunc(&self, value: EmitValue<'ctx>, ty: TypeId) -> Result<EmitValue<'ctx>> {
        let value = self.load_to_immediate(value)?;
        let truncated = self.builder.build_int_truncate_or_bit_cast(
            value.llvm().into_int_value(),
            self.int_storage(ty)?,
            "",
        )?;
        Ok(EmitValue::new(truncated.into(), ty, true))
    }

    /// Converts a signed integer to the floating-point type `ty`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `ty` is not stored as a
    ///   floating-point type.
    pub fn insert_si_to_fp(&self, value: EmitValue<'ctx>, ty: TypeId) -> Result<EmitValue<'ctx>> {
        let value = self.load_to_immediate(value)?;
        let BasicTypeEnum::FloatType(target) = self.types().storage_type(ty) else {
            return Err(Error::UnsupportedOperandCombination(format!(
                "integer-to-float conversion to `{}`",
                self.types().name(ty)
            )));
        };
        let converted =
            self.builder
                .build_signed_int_to_float(value.llvm().into_int_value(), target, "")?;
        Ok(EmitValue::new(converted.into(), ty, true))
    }

    /// Extends a floating-point value to the wider floating-point type `ty`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `ty` is not stored as a
    ///   floating-point type.
    pub fn insert_fp_ext(&self, value: EmitValue<'ctx>, ty: TypeId) -> Result<EmitValue<'ctx>> {
        let value = self.load_to_immediate(value)?;
        let BasicTypeEnum::FloatType(target) = self.types().storage_type(ty) else {
            return Err(Error::UnsupportedOperandCombination(format!(
                "float extension to `{}`",
                self.types().name(ty)
            )));
        };
        let extended =
            self.builder
                .build_float_ext(value.llvm().into_float_value(), target, "")?;
        Ok(EmitValue::new(extended.into(), ty, true))
    }

    /// Converts a floating-point value to the unsigned integer type `ty`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `ty` is not stored as an
    ///   integer.
    pub fn insert_fp_to_ui(&self, value: EmitValue<'ctx>, ty: TypeId) -> Result<EmitValue<'ctx>> {
        let value = self.load_to_immediate(value)?;
        let converted = self.builder.build_float_to_unsigned_int(
            value.llvm().into_float_value(),
            self.int_storage(ty)?,
            "",
        )?;
        Ok(EmitValue::new(converted.into(), ty, true))
    }

    /// Converts a pointer to the native unsigned integer.
    ///
    /// When `skip_object_header` is set and the pointer is a managed
    /// reference, the header size is added so that the integer addresses the
    /// payload rather than the header.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if the native integer or object header type
    ///   has not been registered.
    pub fn insert_pointer_to_int(
        &self,
        value: EmitValue<'ctx>,
        skip_object_header: bool,
    ) -> Result<EmitValue<'ctx>> {
        let ty = self.types().get_known(NATIVE_UINT_TYPE)?;
        let value = self.load_to_immediate(value)?;
        let target = self.int_storage(ty)?;
        let mut int =
            self.builder
                .build_ptr_to_int(value.llvm().into_pointer_value(), target, "")?;
        if skip_object_header && self.is_headered_reference(value.ty()) {
            let offset = target.const_int(u64::from(self.header_bytes()?), false);
            int = self.builder.build_int_add(int, offset, "header_offset_add")?;
        }
        Ok(EmitValue::new(int.into(), ty, true))
    }

    /// Converts an integer to a pointer of managed type `ptr_ty`.
    ///
    /// The inverse of [`Self::insert_pointer_to_int`]: for a managed
    /// reference target the header size is subtracted first.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if the object header type has not been
    ///   registered when it is needed.
    pub fn insert_int_to_pointer(
        &self,
        value: EmitValue<'ctx>,
        ptr_ty: TypeId,
    ) -> Result<EmitValue<'ctx>> {
        let value = self.load_to_immediate(value)?;
        let mut int = value.llvm().into_int_value();
        if self.is_headered_reference(ptr_ty) {
            let offset = int
                .get_type()
                .const_int(u64::from(self.header_bytes()?), false);
            int = self.builder.build_int_sub(int, offset, "header_offset_sub")?;
        }
        let ptr = self.builder.build_int_to_ptr(
            int,
            self.module
                .context()
                .ptr_type(inkwell::AddressSpace::default()),
            "",
        )?;
        Ok(EmitValue::new(ptr.into(), ptr_ty, true))
    }

    fn is_headered_reference(&self, ty: TypeId) -> bool {
        !self.types().is_value_type(ty) && self.types().name(ty) != OBJECT_HEADER_TYPE
    }

    fn header_bytes(&self) -> Result<u32> {
        let header = self.types().get_known(OBJECT_HEADER_TYPE)?;
        Ok(self.types().size_in_bits(header) / BYTE_SIZE)
    }

    /// Reinterprets the address of `value` as a native unsigned pointer.
    ///
    /// # Errors
    ///
    /// - [`Error::NoBackingAddress`] if `value` has no address.
    /// - [`Error::UnknownType`] if the pointer-sized unsigned type has not
    ///   been registered.
    pub fn get_address_as_uintptr(&self, value: EmitValue<'ctx>) -> Result<EmitValue<'ctx>> {
        let ty = self.types().get_known(UINTPTR_TYPE)?;
        let address = self.require_address(value)?;
        Ok(EmitValue::new(address.llvm(), ty, true))
    }

    fn bt_underlying(&self, ty: TypeId) -> Option<TypeId> {
        self.types()
            .get(&format!("{PRIMITIVE_PREFIX}{}", self.types().name(ty)))
    }

    /// Reinterprets the basic-type wrapper `value` as the wrapper type `ty`.
    ///
    /// Wrappers of the same size are reinterpreted in place through the
    /// value's address. Differently sized wrappers go through a fresh stack
    /// slot, resizing the payload with an integer cast on the way. Values
    /// that are not basic-type wrappers pass through unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyFunction`] if a resize is needed in a bodyless
    ///   function.
    pub fn get_bt_cast(&self, value: EmitValue<'ctx>, ty: TypeId) -> Result<EmitValue<'ctx>> {
        if self.bt_underlying(value.ty()).is_none() || self.bt_underlying(ty).is_none() {
            return Ok(value);
        }
        if value.ty() == ty {
            return Ok(value);
        }

        if self.types().size_in_bits(value.ty()) == self.types().size_in_bits(ty) {
            return match self.revert_to_address(value) {
                Some(address) => Ok(EmitValue::new(address.llvm(), ty, false)),
                None => Ok(value),
            };
        }

        let loaded = self.load_to_immediate(value)?;
        let slot = self
            .function
            .get_local_stack_value("for_parameter_integer_cast", ty)?;
        let wrapper = self.types().struct_llvm(ty).ok_or_else(|| {
            Error::UnsupportedOperandCombination(format!(
                "basic-type cast to `{}`",
                self.types().name(ty)
            ))
        })?;
        let Some(BasicTypeEnum::IntType(target)) = wrapper.get_field_type_at_index(0) else {
            return Err(Error::UnsupportedOperandCombination(format!(
                "basic-type cast to `{}`",
                self.types().name(ty)
            )));
        };

        let payload = self
            .builder
            .build_extract_value(loaded.llvm().into_struct_value(), 0, "")?;
        let resized =
            self.builder
                .build_int_cast_sign_flag(payload.into_int_value(), target, false, "")?;
        let field = self.builder.build_struct_gep(
            wrapper,
            slot.llvm().into_pointer_value(),
            0,
            "",
        )?;
        self.builder.build_store(field, resized)?;
        Ok(slot)
    }

    /// Extracts the raw payload out of the basic-type wrapper `value`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if `value`'s type has no registered primitive
    ///   payload type.
    pub fn extract_first_element_from_basic_type(
        &self,
        value: EmitValue<'ctx>,
    ) -> Result<EmitValue<'ctx>> {
        let underlying = self.bt_underlying(value.ty()).ok_or_else(|| {
            Error::UnknownType(format!(
                "{PRIMITIVE_PREFIX}{}",
                self.types().name(value.ty())
            ))
        })?;

        let aggregate = if value.is_pointer() {
            let wrapper = self.types().struct_llvm(value.ty()).ok_or_else(|| {
                Error::UnsupportedOperandCombination(format!(
                    "payload extraction from `{}`",
                    self.types().name(value.ty())
                ))
            })?;
            self.builder
                .build_load(wrapper, value.llvm().into_pointer_value(), "")?
                .into_struct_value()
        } else {
            value.llvm().into_struct_value()
        };

        let payload = self.builder.build_extract_value(aggregate, 0, "m_value")?;
        Ok(EmitValue::new(payload, underlying, true))
    }

    /// Resolves the address of the field at byte `offset` within `obj`.
    ///
    /// A boxed object is first narrowed to its payload slot. A pointer to a
    /// value type descends into the pointee. The offset is then resolved
    /// through the declared layout, descending through embedded base classes
    /// and nested value types, and a single GEP is emitted for the whole
    /// path.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidFieldOffset`] if the offset lands in padding or past
    ///   the end of the type.
    pub fn get_field_address(&self, obj: EmitValue<'ctx>, offset: i64) -> Result<EmitValue<'ctx>> {
        let plain_value = self.types().is_value_type(obj.ty())
            && self.types().underlying_pointer(obj.ty()).is_none();
        let mut obj = if plain_value {
            // The operand is the object itself; field access needs its slot.
            self.require_address(obj)?
        } else {
            self.load_to_immediate(obj)?
        };

        if self.types().is_boxed(obj.ty()) {
            let boxed = self.types().struct_llvm(obj.ty()).ok_or_else(|| {
                Error::UnsupportedOperandCombination(format!(
                    "field access on `{}`",
                    self.types().name(obj.ty())
                ))
            })?;
            let payload = self.builder.build_struct_gep(
                boxed,
                obj.llvm().into_pointer_value(),
                1,
                "boxed_payload",
            )?;
            let underlying = self.types().underlying_boxed(obj.ty()).ok_or_else(|| {
                Error::UnsupportedOperandCombination(format!(
                    "field access on `{}`",
                    self.types().name(obj.ty())
                ))
            })?;
            obj = EmitValue::new(payload.into(), underlying, false);
        }

        let mut container = obj.ty();
        if let Some(pointee) = self.types().underlying_pointer(container) {
            if self.types().is_value_type(pointee) {
                container = pointee;
            }
        }

        let (path, leaf, field_name) = self.types().field_path_for_offset(container, offset)?;
        let struct_ty = self.types().struct_llvm(container).ok_or_else(|| {
            Error::InvalidFieldOffset {
                type_name: self.types().name(container),
                offset,
            }
        })?;

        let i32_ty = self.module.context().i32_type();
        let mut indices = vec![i32_ty.const_zero()];
        indices.extend(path.iter().map(|i| i32_ty.const_int(u64::from(*i), false)));

        let gep_name = format!("{}.{field_name}", self.types().name(container));
        let address = unsafe {
            self.builder.build_gep(
                struct_ty,
                obj.llvm().into_pointer_value(),
                &indices,
                &gep_name,
            )?
        };
        Ok(EmitValue::new(address.into(), leaf, false))
    }

    /// Resolves the address of element `index` of the open-ended array
    /// payload `obj`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `obj` is not an array
    ///   payload.
    /// - [`Error::NoBackingAddress`] if the payload has no address.
    pub fn index_llvm_array(
        &self,
        obj: EmitValue<'ctx>,
        index: EmitValue<'ctx>,
    ) -> Result<EmitValue<'ctx>> {
        let element = self.types().array_element(obj.ty()).ok_or_else(|| {
            Error::UnsupportedOperandCombination(format!(
                "array indexing of `{}`",
                self.types().name(obj.ty())
            ))
        })?;
        let array_ty = self.types().array_llvm(obj.ty()).ok_or_else(|| {
            Error::UnsupportedOperandCombination(format!(
                "array indexing of `{}`",
                self.types().name(obj.ty())
            ))
        })?;

        let obj = self.require_address(obj)?;
        let index = self.load_to_immediate(index)?;
        let zero = self.module.context().i32_type().const_zero();
        let address = unsafe {
            self.builder.build_gep(
                array_ty,
                obj.llvm().into_pointer_value(),
                &[zero, index.llvm().into_int_value()],
                "array_element",
            )?
        };
        Ok(EmitValue::new(address.into(), element, false))
    }

    /// Views the pointer `value` as the address of a `pointee_ty`.
    ///
    /// A boxed pointer is narrowed to the address of its payload instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload GEP cannot be built.
    pub fn load_indirect(
        &self,
        value: EmitValue<'ctx>,
        pointee_ty: TypeId,
    ) -> Result<EmitValue<'ctx>> {
        let loaded = self.load_to_immediate(value)?;

        if self.types().is_boxed(loaded.ty()) {
            let boxed = self.types().struct_llvm(loaded.ty()).ok_or_else(|| {
                Error::UnsupportedOperandCombination(format!(
                    "indirect load through `{}`",
                    self.types().name(loaded.ty())
                ))
            })?;
            let payload = self.builder.build_struct_gep(
                boxed,
                loaded.llvm().into_pointer_value(),
                1,
                "boxed_payload",
            )?;
            let underlying = self.types().underlying_boxed(loaded.ty()).ok_or_else(|| {
                Error::UnsupportedOperandCombination(format!(
                    "indirect load through `{}`",
                    self.types().name(loaded.ty())
                ))
            })?;
            return Ok(EmitValue::new(payload.into(), underlying, false));
        }

        Ok(EmitValue::new(loaded.llvm(), pointee_ty, false))
    }

    /// Extracts the raw code pointer out of the delegate `value` so that it
    /// can be called through the signature `fn_ty`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if the extracted slot is
    ///   not a pointer or pointer-sized integer.
    pub fn cast_to_function_pointer(
        &self,
        value: EmitValue<'ctx>,
        fn_ty: TypeId,
    ) -> Result<EmitValue<'ctx>> {
        let ptr_ty = self.types().get_or_insert_pointer(fn_ty);
        let loaded = self.load_to_immediate(value)?;

        let inner = self
            .builder
            .build_extract_value(loaded.llvm().into_struct_value(), 0, "code_pointer")?;
        let raw = self
            .builder
            .build_extract_value(inner.into_struct_value(), 0, "code_pointer_value")?;

        let pointer: PointerValue<'ctx> = match raw {
            BasicValueEnum::PointerValue(p) => p,
            BasicValueEnum::IntValue(i) => self.builder.build_int_to_ptr(
                i,
                self.module
                    .context()
                    .ptr_type(inkwell::AddressSpace::default()),
                "",
            )?,
            _ => {
                return Err(Error::UnsupportedOperandCombination(
                    "function pointer cast".to_string(),
                ))
            }
        };
        Ok(EmitValue::new(pointer.into(), ptr_ty, false))
    }

    /// Normalizes `args` into the LLVM argument list for a call through the
    /// function type `fn_ty`.
    ///
    /// Two coercions are applied where the managed types disagree. An
    /// argument or parameter of a pointer-sized integer type is reinterpreted
    /// through the argument's backing address. A raw primitive handed to a
    /// wrapper parameter is likewise reloaded at the parameter's storage
    /// type, with constants first promoted into anonymous globals so that
    /// they have an address at all.
    fn load_params(
        &self,
        fn_ty: TypeId,
        callee: &str,
        args: &[EmitValue<'ctx>],
    ) -> Result<Vec<BasicMetadataValueEnum<'ctx>>> {
        let params = self.types().function_args(fn_ty);
        let mut out = Vec::with_capacity(args.len());

        for (i, arg) in args.iter().enumerate() {
            let mut current = self.load_to_immediate(*arg)?;
            let param_ty = params.get(i).copied().ok_or_else(|| {
                Error::UnsupportedOperandCombination(format!(
                    "argument {i} of call to `{callee}`"
                ))
            })?;

            if current.ty() != param_ty {
                let arg_name = self.types().name(current.ty());
                let param_name = self.types().name(param_ty);
                let pointer_sized = POINTER_SIZED_INT_TYPES.contains(&arg_name.as_str())
                    || POINTER_SIZED_INT_TYPES.contains(&param_name.as_str());

                if pointer_sized {
                    current = self.reload_at(current, param_ty)?;
                } else if arg_name.starts_with(PRIMITIVE_PREFIX) {
                    if is_constant(current.llvm()) {
                        current = self.promote_constant(current);
                    }
                    current = self.reload_at(current, param_ty)?;
                }
            }

            out.push(current.llvm().into());
        }
        Ok(out)
    }

    /// Reloads `value` through its backing address at the storage type of
    /// `ty`.
    fn reload_at(&self, value: EmitValue<'ctx>, ty: TypeId) -> Result<EmitValue<'ctx>> {
        let address = self.require_address(value)?;
        let storage = self.types().storage_type(ty);
        let reloaded = self.builder.build_load(
            storage,
            address.llvm().into_pointer_value(),
            "argument_cast",
        )?;
        Ok(EmitValue::new(reloaded, ty, true))
    }

    /// Gives the constant `value` an address by wrapping it in an anonymous
    /// internal global.
    fn promote_constant(&self, value: EmitValue<'ctx>) -> EmitValue<'ctx> {
        let global = self.module.llvm().add_global(
            value.llvm().get_type(),
            None,
            &self.module.next_global_name(),
        );
        global.set_initializer(&value.llvm());
        global.set_linkage(inkwell::module::Linkage::Internal);
        global.set_constant(true);
        EmitValue::new(global.as_pointer_value().into(), value.ty(), false)
    }

    /// Emits a direct call to `function`.
    ///
    /// Returns the call's result, or `None` for a void function.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument cannot be coerced or the call cannot
    /// be built.
    pub fn insert_call(
        &self,
        function: &FunctionEmitter<'m, 'ctx>,
        args: &[EmitValue<'ctx>],
    ) -> Result<Option<EmitValue<'ctx>>> {
        let params = self.load_params(function.ty(), function.name(), args)?;
        let site = self.builder.build_call(function.llvm(), &params, "")?;
        Ok(self.call_result(function.ty(), site))
    }

    /// Emits an indirect call through the delegate `target` with the
    /// signature `fn_ty`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `fn_ty` is not a
    ///   function type or the target cannot produce a code pointer.
    pub fn insert_indirect_call(
        &self,
        fn_ty: TypeId,
        target: EmitValue<'ctx>,
        args: &[EmitValue<'ctx>],
    ) -> Result<Option<EmitValue<'ctx>>> {
        let callee = self.types().name(fn_ty);
        let params = self.load_params(fn_ty, &callee, args)?;
        let target = self.cast_to_function_pointer(target, fn_ty)?;
        let fn_llvm = self.types().fn_llvm(fn_ty).ok_or_else(|| {
            Error::UnsupportedOperandCombination(format!("indirect call through `{callee}`"))
        })?;
        let site = self.builder.build_indirect_call(
            fn_llvm,
            target.llvm().into_pointer_value(),
            &params,
            "",
        )?;
        Ok(self.call_result(fn_ty, site))
    }

    fn call_result(&self, fn_ty: TypeId, site: CallSiteValue<'ctx>) -> Option<EmitValue<'ctx>> {
        let value = site.try_as_basic_value().left()?;
        let ret = self.types().function_return(fn_ty)?;
        Some(EmitValue::new(value, ret, true))
    }

    /// Emits an unconditional branch to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch cannot be built.
    pub fn insert_unconditional_branch(&self, target: &BlockEmitter<'m, 'ctx>) -> Result<()> {
        self.builder.build_unconditional_branch(target.block())?;
        Ok(())
    }

    /// Emits a conditional branch on `condition`, taken when it compares
    /// unequal to zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the comparison or branch cannot be built.
    pub fn insert_conditional_branch(
        &self,
        condition: EmitValue<'ctx>,
        if_true: &BlockEmitter<'m, 'ctx>,
        if_false: &BlockEmitter<'m, 'ctx>,
    ) -> Result<()> {
        let condition = self.load_to_immediate(condition)?;
        let int = condition.llvm().into_int_value();
        let bit = self.builder.build_int_compare(
            IntPredicate::NE,
            int,
            int.get_type().const_zero(),
            "condition",
        )?;
        self.builder
            .build_conditional_branch(bit, if_true.block(), if_false.block())?;
        Ok(())
    }

    /// Emits a switch on `value` with one target block per case constant.
    ///
    /// # Errors
    ///
    /// Returns an error if the switch cannot be built.
    pub fn insert_switch_and_cases(
        &self,
        value: EmitValue<'ctx>,
        default: &BlockEmitter<'m, 'ctx>,
        cases: &[(u64, &BlockEmitter<'m, 'ctx>)],
    ) -> Result<()> {
        let value = self.load_to_immediate(value)?;
        let int = value.llvm().into_int_value();
        let cases = cases
            .iter()
            .map(|(n, block)| (int.get_type().const_int(*n, false), block.block()))
            .collect_vec();
        self.builder.build_switch(int, default.block(), &cases)?;
        Ok(())
    }

    /// Emits a return of `value`, or a void return for `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the return cannot be built.
    pub fn insert_ret(&self, value: Option<EmitValue<'ctx>>) -> Result<()> {
        match value {
            Some(value) => {
                let value = self.load_to_immediate(value)?;
                self.builder.build_return(Some(&value.llvm()))?;
            }
            None => {
                self.builder.build_return(None)?;
            }
        }
        Ok(())
    }

    fn narrow_to_significant(
        &self,
        value: EmitValue<'ctx>,
        significant_bits: u32,
    ) -> Result<inkwell::values::IntValue<'ctx>> {
        let value = self.load_to_immediate(value)?;
        Ok(self.builder.build_int_truncate_or_bit_cast(
            value.llvm().into_int_value(),
            self.module.context().custom_width_int_type(significant_bits),
            "",
        )?)
    }

    fn int_storage(&self, ty: TypeId) -> Result<inkwell::types::IntType<'ctx>> {
        let BasicTypeEnum::IntType(int_ty) = self.types().storage_type(ty) else {
            return Err(Error::UnsupportedOperandCombination(format!(
                "integer operation on `{}`",
                self.types().name(ty)
            )));
        };
        Ok(int_ty)
    }
}

/// True if `value` is an LLVM constant that can initialize a global.
fn is_constant(value: BasicValueEnum) -> bool {
    match value {
        BasicValueEnum::IntValue(v) => v.is_const(),
        BasicValueEnum::FloatValue(v) => v.is_const(),
        BasicValueEnum::PointerValue(v) => v.is_const(),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use anyhow::Result;
    use inkwell::{basic_block::BasicBlock, context::Context};

    use crate::{
        constant::{BOOLEAN_TYPE, NATIVE_UINT_TYPE, OBJECT_HEADER_TYPE, UINTPTR_TYPE, VOID_TYPE},
        module::ObjectModule,
        ops::{BinaryOp, CmpPredicate},
    };

    fn count_instructions(block: BasicBlock) -> usize {
        let mut count = 0;
        let mut current = block.get_first_instruction();
        while let Some(instruction) = current {
            count += 1;
            current = instruction.get_next_instruction();
        }
        count
    }

    fn test_module(context: &Context) -> ObjectModule<'_> {
        let module = ObjectModule::create(context, "test", 32);
        module.get_or_insert_type(VOID_TYPE, 0);
        module.get_or_insert_type(BOOLEAN_TYPE, 8);
        module.get_or_insert_type("LLVM.System.Int32", 32);
        module.get_or_insert_type(NATIVE_UINT_TYPE, 32);
        module.get_or_insert_type(UINTPTR_TYPE, 32);

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let header = module.get_or_insert_type(OBJECT_HEADER_TYPE, 64);
        module.types().add_field(header, "multiuse", 0, int, false);
        module.types().add_field(header, "vtable", 4, int, false);
        module.types().finalize_layout(header);
        module
    }

    fn void_function<'m, 'ctx>(
        module: &'m ObjectModule<'ctx>,
        name: &str,
    ) -> crate::function::FunctionEmitter<'m, 'ctx> {
        let void = module.get_type(VOID_TYPE).unwrap();
        let fn_ty = module.types().get_or_insert_function("fn()->void", void, &[]);
        let function = module.get_or_insert_function(name, fn_ty).unwrap();
        // The tests give these functions bodies, so they are not weak
        // declarations.
        function.set_external_linkage();
        function
    }

    #[test]
    fn load_and_revert_round_trip() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let int = module.get_type("LLVM.System.Int32").unwrap();

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");
        let slot = function.get_local_stack_value("local", int)?;

        let loaded = block.load_to_immediate(slot)?;
        assert!(loaded.is_immediate());

        let reverted = block.revert_to_address(loaded).unwrap();
        assert_eq!(reverted.llvm(), slot.llvm());
        assert!(!reverted.is_immediate());

        // A constant was never loaded from anywhere.
        let constant = module.const_int(int, 1, false)?;
        assert!(block.revert_to_address(constant).is_none());
        Ok(())
    }

    #[test]
    fn mixed_operand_kinds_are_refused() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        module.get_or_insert_type("LLVM.System.Single", 32);

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");

        let lhs = module.const_int(int, 2, false)?;
        let rhs = module.const_float(3.0)?;
        let result = block.insert_binary_op(BinaryOp::Add, lhs, rhs, false);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn comparisons_produce_the_canonical_boolean() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let int = module.get_type("LLVM.System.Int32").unwrap();
        let boolean = module.get_type(BOOLEAN_TYPE).unwrap();

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");

        let lhs = module.const_int(int, 2, false)?;
        let rhs = module.const_int(int, 3, false)?;
        let result = block.insert_cmp(CmpPredicate::Lt, true, lhs, rhs)?;
        assert_eq!(result.ty(), boolean);
        assert!(result.is_immediate());
        assert!(result.llvm().into_int_value().get_type().get_bit_width() == 8);
        Ok(())
    }

    #[test]
    fn pointer_integer_round_trip_compensates_for_the_header() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let types = module.types();

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let header = module.get_type(OBJECT_HEADER_TYPE).unwrap();
        let class = module.get_or_insert_type("Some.Class", 96);
        types.set_value_type(class, false);
        types.add_field(class, "header", 0, header, true);
        types.add_field(class, "value", 8, int, false);
        types.finalize_layout(class);

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");

        let object = function.get_local_stack_value("obj", class)?;
        let as_int = block.insert_pointer_to_int(object, true)?;
        assert_eq!(as_int.ty(), module.get_type(NATIVE_UINT_TYPE).unwrap());
        let back = block.insert_int_to_pointer(as_int, class)?;
        assert!(back.is_pointer());

        // The alloca for the local, load of the reference, ptrtoint, header
        // add, header sub, inttoptr.
        assert_eq!(count_instructions(block.block()), 6);
        block.insert_ret(None)?;
        module.compile()?;
        Ok(())
    }

    #[test]
    fn boxed_field_access_is_one_payload_hop() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let types = module.types();

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let header = module.get_type(OBJECT_HEADER_TYPE).unwrap();
        let wrapper = module.get_or_insert_type("System.Int32", 32);
        types.add_field(wrapper, "m_value", 0, int, false);
        types.finalize_layout(wrapper);

        let boxed = types.get_or_insert_boxed(header, wrapper);
        assert_eq!(types.size_in_bits(boxed), 96);

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");

        let object = function.get_local_stack_value("boxed_instance", boxed)?;
        let field = block.get_field_address(object, 0)?;
        assert_eq!(field.ty(), int);
        assert!(!field.is_immediate());

        // The alloca, load of the reference, one GEP to the payload slot,
        // one for the field path.
        assert_eq!(count_instructions(block.block()), 4);
        block.insert_ret(None)?;
        module.compile()?;
        Ok(())
    }

    #[test]
    fn pointer_sized_arguments_are_reinterpreted_through_memory() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let types = module.types();

        let void = module.get_type(VOID_TYPE).unwrap();
        let native = module.get_type(NATIVE_UINT_TYPE).unwrap();
        let intptr = module.get_or_insert_type("System.IntPtr", 32);
        types.add_field(intptr, "m_value", 0, native, false);
        types.finalize_layout(intptr);

        let callee_ty = types.get_or_insert_function("fn(u32)->void", void, &[native]);
        let callee = module.get_or_insert_function("callee", callee_ty)?;

        let caller = void_function(&module, "caller");
        let block = caller.get_or_insert_basic_block("entry");
        let slot = caller.get_local_stack_value("p", intptr)?;

        assert!(block.insert_call(&callee, &[slot])?.is_none());

        // The alloca, load of the slot, one reinterpreting reload, the call
        // itself.
        assert_eq!(count_instructions(block.block()), 4);
        block.insert_ret(None)?;
        module.compile()?;
        Ok(())
    }

    #[test]
    fn register_only_sources_are_copied_field_by_field() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let types = module.types();

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let pair = module.get_or_insert_type("Pair", 64);
        types.add_field(pair, "a", 0, int, false);
        types.add_field(pair, "b", 4, int, false);
        types.finalize_layout(pair);

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");
        let slot = function.get_local_stack_value("local", pair)?;

        let members = [
            module.const_int(int, 1, false)?.llvm(),
            module.const_int(int, 2, false)?.llvm(),
        ];
        let constant = module.const_struct(pair, &members, false)?;
        block.insert_mem_cpy(slot, constant)?;

        // The alloca, two extracts, two GEPs, two stores.
        assert_eq!(count_instructions(block.block()), 7);
        block.insert_ret(None)?;
        module.compile()?;
        Ok(())
    }

    #[test]
    fn control_flow_round_trips_through_the_verifier() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let int = module.get_type("LLVM.System.Int32").unwrap();

        let function = void_function(&module, "f");
        let entry = function.get_or_insert_basic_block("entry");
        let on_true = function.get_or_insert_basic_block("on_true");
        let on_false = function.get_or_insert_basic_block("on_false");
        let done = function.get_or_insert_basic_block("done");

        let condition = module.const_int(int, 1, false)?;
        entry.insert_conditional_branch(condition, &on_true, &on_false)?;

        let scrutinee = module.const_int(int, 2, false)?;
        on_true.insert_switch_and_cases(scrutinee, &done, &[(0, &done), (1, &done)])?;
        on_false.insert_unconditional_branch(&done)?;
        done.insert_ret(None)?;

        module.compile()?;
        Ok(())
    }

    #[test]
    fn bt_cast_of_equal_sizes_reinterprets_in_place() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let types = module.types();

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let uint = module.get_or_insert_type("LLVM.System.UInt32", 32);

        let int_wrapper = module.get_or_insert_type("System.Int32", 32);
        types.add_field(int_wrapper, "m_value", 0, int, false);
        types.finalize_layout(int_wrapper);

        let uint_wrapper = module.get_or_insert_type("System.UInt32", 32);
        types.add_field(uint_wrapper, "m_value", 0, uint, false);
        types.finalize_layout(uint_wrapper);

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");
        let slot = function.get_local_stack_value("local", int_wrapper)?;

        let cast = block.get_bt_cast(slot, uint_wrapper)?;
        assert_eq!(cast.ty(), uint_wrapper);
        assert!(!cast.is_immediate());
        assert_eq!(cast.llvm(), slot.llvm());

        // Only the slot's alloca; the cast itself needed no instructions.
        assert_eq!(count_instructions(block.block()), 1);
        Ok(())
    }

    #[test]
    fn arguments_can_be_spilled_into_locals() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let types = module.types();

        let void = module.get_type(VOID_TYPE).unwrap();
        let int = module.get_type("LLVM.System.Int32").unwrap();
        let fn_ty = types.get_or_insert_function("fn(i32)->void", void, &[int]);

        let function = module.get_or_insert_function("g", fn_ty)?;
        function.set_external_linkage();
        let block = function.get_or_insert_basic_block("entry");
        let slot = function.get_local_stack_value("arg_shadow", int)?;

        block.insert_store_argument(slot, 0)?;
        assert!(block.insert_store_argument(slot, 1).is_err());

        block.insert_ret(None)?;
        module.compile()?;
        Ok(())
    }

    #[test]
    fn scalar_conversions_verify() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        module.get_or_insert_type("LLVM.System.Single", 32);
        module.get_or_insert_type("LLVM.System.Double", 64);
        let short = module.get_or_insert_type("LLVM.System.Int16", 16);

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let single = module.get_type("LLVM.System.Single").unwrap();
        let double = module.get_type("LLVM.System.Double").unwrap();

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");
        let slot = function.get_local_stack_value("local", int)?;
        let value = block.load_to_immediate(slot)?;

        // Only the low byte survives the sign extension.
        let extended = block.insert_s_ext(value, int, 8)?;
        assert_eq!(extended.ty(), int);
        let narrowed = block.insert_trunc(extended, short)?;
        assert_eq!(narrowed.ty(), short);

        let as_float = block.insert_si_to_fp(value, single)?;
        let as_double = block.insert_fp_ext(as_float, double)?;
        let back = block.insert_fp_to_ui(as_double, int)?;
        assert!(back.is_integer());

        block.insert_ret(None)?;
        module.compile()?;
        Ok(())
    }

    #[test]
    fn wrapper_payload_round_trip() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let types = module.types();

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let wrapper = module.get_or_insert_type("System.Int32", 32);
        types.add_field(wrapper, "m_value", 0, int, false);
        types.finalize_layout(wrapper);

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");
        let slot = function.get_local_stack_value("local", wrapper)?;

        let raw = module.const_int(int, 17, false)?;
        block.insert_store_into_bt(slot, raw)?;

        let loaded = block.load_to_immediate(slot)?;
        let payload = block.extract_first_element_from_basic_type(loaded)?;
        assert_eq!(payload.ty(), int);
        assert!(payload.is_immediate());

        block.insert_ret(None)?;
        module.compile()?;
        Ok(())
    }

    #[test]
    fn bulk_memory_operations_verify() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let types = module.types();

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let native = module.get_type(NATIVE_UINT_TYPE).unwrap();
        let pair = module.get_or_insert_type("Pair", 64);
        types.add_field(pair, "a", 0, int, false);
        types.add_field(pair, "b", 4, int, false);
        types.finalize_layout(pair);

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");
        let first = function.get_local_stack_value("first", pair)?;
        let second = function.get_local_stack_value("second", pair)?;

        block.insert_mem_set(first, 0)?;
        block.insert_mem_cpy(second, first)?;

        let size = module.const_int(native, 8, false)?;
        block.insert_mem_cpy_sized(
            block.get_address_as_uintptr(second)?,
            block.get_address_as_uintptr(first)?,
            size,
            true,
        )?;

        block.insert_ret(None)?;
        module.compile()?;
        Ok(())
    }

    #[test]
    fn in_register_wrapper_stores_produce_a_new_aggregate() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);
        let types = module.types();

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let wrapper = module.get_or_insert_type("System.Int32", 32);
        types.add_field(wrapper, "m_value", 0, int, false);
        types.finalize_layout(wrapper);

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");

        let initial = module.const_struct(
            wrapper,
            &[module.const_int(int, 1, false)?.llvm()],
            false,
        )?;
        let raw = module.const_int(int, 9, false)?;
        let updated = block.insert_store_into_bt(initial, raw)?;
        assert!(updated.is_immediate());
        assert_eq!(updated.ty(), wrapper);
        assert_ne!(updated.llvm(), initial.llvm());

        let payload = block.extract_first_element_from_basic_type(updated)?;
        assert_eq!(payload.ty(), int);

        block.insert_ret(None)?;
        module.compile()?;
        Ok(())
    }

    #[test]
    fn debug_stamps_share_one_subprogram_per_mangled_name() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);

        let function = void_function(&module, "f");
        let entry = function.get_or_insert_basic_block("entry");
        let exit = function.get_or_insert_basic_block("exit");

        entry.set_debug_info(10, 1, "main.cs", "_main_impl");
        entry.insert_unconditional_branch(&exit)?;
        exit.set_debug_info(12, 1, "main.cs", "_main_impl");
        exit.insert_ret(None)?;

        let subprogram = module.debug_info().get_subprogram("_main_impl");
        assert!(subprogram.is_some());
        assert_eq!(function.llvm().get_subprogram(), subprogram);

        module.compile()?;
        Ok(())
    }

    #[test]
    fn typed_value_passes_through_bt_cast_unchanged() -> Result<()> {
        let context = Context::create();
        let module = test_module(&context);

        let int = module.get_type("LLVM.System.Int32").unwrap();
        let class = module.get_or_insert_type("Some.Class", 64);
        module.types().set_value_type(class, false);

        let function = void_function(&module, "f");
        let block = function.get_or_insert_basic_block("entry");

        let value = module.const_int(int, 5, false)?;
        let cast = block.get_bt_cast(value, class)?;
        assert_eq!(cast.ty(), int);
        Ok(())
    }
}
