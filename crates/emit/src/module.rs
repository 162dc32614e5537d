//! The top-level builder for one output object module.
//!
//! An [`ObjectModule`] owns the LLVM module being constructed, the registry
//! of managed types scoped to it, the debug-info state, and the counter used
//! to name synthesized globals. All function and instruction emission is
//! reached through it.

use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use inkwell::{
    context::Context,
    module::{Linkage, Module},
    types::BasicTypeEnum,
    values::BasicValueEnum,
    AddressSpace,
};
use itertools::Itertools;
use tracing::debug;

use corten_errors::emit::{Error, Result};

use crate::{
    constant::{
        DOUBLE_TYPE, GLOBAL_NAME_PREFIX, INTPTR_TYPE, OBJECT_HEADER_TYPE, SINGLE_TYPE,
        UINTPTR_TYPE,
    },
    debug::DebugState,
    function::FunctionEmitter,
    types::{TypeId, TypeRegistry},
    value::EmitValue,
};

/// One output object module under construction.
pub struct ObjectModule<'ctx> {
    ctx: &'ctx Context,
    module: Module<'ctx>,
    types: TypeRegistry<'ctx>,
    debug: DebugState<'ctx>,
    globals_counter: AtomicU64,
}

impl<'ctx> ObjectModule<'ctx> {
    /// Creates an empty module called `name` for a target whose native
    /// integers and pointers are `native_int_size_bits` wide.
    pub fn create(ctx: &'ctx Context, name: &str, native_int_size_bits: u32) -> Self {
        let module = ctx.create_module(name);
        let debug = DebugState::new(&module, name);
        Self {
            ctx,
            module,
            types: TypeRegistry::new(ctx, native_int_size_bits),
            debug,
            globals_counter: AtomicU64::new(0),
        }
    }

    /// The LLVM context everything in this module is allocated in.
    #[must_use]
    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    /// The underlying LLVM module.
    #[must_use]
    pub fn llvm(&self) -> &Module<'ctx> {
        &self.module
    }

    /// The registry of managed types scoped to this module.
    #[must_use]
    pub fn types(&self) -> &TypeRegistry<'ctx> {
        &self.types
    }

    /// The debug-information state attached to this module.
    #[must_use]
    pub fn debug_info(&self) -> &DebugState<'ctx> {
        &self.debug
    }

    /// Interns the managed type called `name`. See
    /// [`TypeRegistry::get_or_insert`].
    pub fn get_or_insert_type(&self, name: &str, size_in_bits: u32) -> TypeId {
        self.types.get_or_insert(name, size_in_bits)
    }

    /// Looks up an already-interned managed type by name.
    #[must_use]
    pub fn get_type(&self, name: &str) -> Option<TypeId> {
        self.types.get(name)
    }

    /// Builds an integer constant of managed type `ty`.
    ///
    /// The pointer-sized integer types are backed by LLVM pointers, so their
    /// constants are emitted as integers converted to pointers.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `ty` is not stored as an
    ///   integer or pointer.
    pub fn const_int(&self, ty: TypeId, value: u64, sign_extend: bool) -> Result<EmitValue<'ctx>> {
        let name = self.types.name(ty);
        if name == INTPTR_TYPE || name == UINTPTR_TYPE {
            let int = self
                .ctx
                .custom_width_int_type(self.types.pointer_size_bits())
                .const_int(value, sign_extend);
            let ptr = int.const_to_pointer(self.ctx.ptr_type(AddressSpace::default()));
            return Ok(EmitValue::new(ptr.into(), ty, true));
        }

        let BasicTypeEnum::IntType(int_ty) = self.types.storage_type(ty) else {
            return Err(Error::UnsupportedOperandCombination(format!(
                "integer constant of type `{name}`"
            )));
        };
        Ok(EmitValue::new(
            int_ty.const_int(value, sign_extend).into(),
            ty,
            true,
        ))
    }

    /// Builds a 32-bit floating point constant.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if the single-precision type has not been
    ///   registered.
    pub fn const_float(&self, value: f32) -> Result<EmitValue<'ctx>> {
        let ty = self.types.get_known(SINGLE_TYPE)?;
        Ok(EmitValue::new(
            self.ctx.f32_type().const_float(f64::from(value)).into(),
            ty,
            true,
        ))
    }

    /// Builds a 64-bit floating point constant.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if the double-precision type has not been
    ///   registered.
    pub fn const_double(&self, value: f64) -> Result<EmitValue<'ctx>> {
        let ty = self.types.get_known(DOUBLE_TYPE)?;
        Ok(EmitValue::new(
            self.ctx.f64_type().const_float(value).into(),
            ty,
            true,
        ))
    }

    /// Builds the null pointer constant viewed as managed type `ty`.
    #[must_use]
    pub fn const_null_pointer(&self, ty: TypeId) -> EmitValue<'ctx> {
        let null = self.ctx.ptr_type(AddressSpace::default()).const_null();
        EmitValue::new(null.into(), ty, true)
    }

    /// Builds the all-zero constant of `ty` at its storage type.
    #[must_use]
    pub fn const_zero(&self, ty: TypeId) -> EmitValue<'ctx> {
        EmitValue::new(self.types.storage_type(ty).const_zero(), ty, true)
    }

    /// Builds a constant struct of managed type `ty` from `members`.
    ///
    /// When `anonymous` is set the constant gets a literal struct type
    /// instead of the named backing type. Otherwise each member must match
    /// the corresponding element of the backing struct; as the one permitted
    /// coercion, a zero constant of the wrong type is replaced by the zero of
    /// the element type.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `ty` is not
    ///   struct-backed or a non-zero member does not match its element type.
    pub fn const_struct(
        &self,
        ty: TypeId,
        members: &[BasicValueEnum<'ctx>],
        anonymous: bool,
    ) -> Result<EmitValue<'ctx>> {
        if anonymous {
            let value = self.ctx.const_struct(members, true);
            return Ok(EmitValue::new(value.into(), ty, true));
        }

        let struct_ty = self.types.struct_llvm(ty).ok_or_else(|| {
            Error::UnsupportedOperandCombination(format!(
                "struct constant of type `{}`",
                self.types.name(ty)
            ))
        })?;

        let mut coerced = Vec::with_capacity(members.len());
        for (i, member) in members.iter().enumerate() {
            let index = u32::try_from(i).unwrap_or(u32::MAX);
            let Some(element_ty) = struct_ty.get_field_type_at_index(index) else {
                return Err(Error::UnsupportedOperandCombination(format!(
                    "member {i} of struct constant `{}`",
                    self.types.name(ty)
                )));
            };
            if member.get_type() == element_ty {
                coerced.push(*member);
            } else if is_const_zero(member) {
                coerced.push(element_ty.const_zero());
            } else {
                return Err(Error::UnsupportedOperandCombination(format!(
                    "member {i} of struct constant `{}` has the wrong type",
                    self.types.name(ty)
                )));
            }
        }

        Ok(EmitValue::new(
            struct_ty.const_named_struct(&coerced).into(),
            ty,
            true,
        ))
    }

    /// Builds a constant array whose elements have the storage type of
    /// `element_ty`. The resulting value is typed as the zero-length array
    /// type of the element.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if the element storage type
    ///   cannot form a constant array.
    pub fn const_array(
        &self,
        element_ty: TypeId,
        members: &[BasicValueEnum<'ctx>],
    ) -> Result<EmitValue<'ctx>> {
        let ty = self.types.get_or_insert_zero_sized_array(element_ty);
        let value = match self.types.storage_type(element_ty) {
            BasicTypeEnum::IntType(t) => {
                t.const_array(&members.iter().map(|m| m.into_int_value()).collect_vec())
            }
            BasicTypeEnum::FloatType(t) => t.const_array(
                &members.iter().map(|m| m.into_float_value()).collect_vec(),
            ),
            BasicTypeEnum::PointerType(t) => t.const_array(
                &members.iter().map(|m| m.into_pointer_value()).collect_vec(),
            ),
            BasicTypeEnum::StructType(t) => t.const_array(
                &members.iter().map(|m| m.into_struct_value()).collect_vec(),
            ),
            BasicTypeEnum::ArrayType(t) => t.const_array(
                &members.iter().map(|m| m.into_array_value()).collect_vec(),
            ),
            _ => {
                return Err(Error::UnsupportedOperandCombination(format!(
                    "array constant of element type `{}`",
                    self.types.name(element_ty)
                )))
            }
        };
        Ok(EmitValue::new(value.into(), ty, true))
    }

    /// Wraps `value` in a freshly named internal global and returns it as a
    /// value of managed type `ty`.
    ///
    /// For a value type the result is the address of the global's storage;
    /// for a reference type the pointer is the reference itself.
    #[must_use]
    pub fn global_from_constant(
        &self,
        ty: TypeId,
        value: BasicValueEnum<'ctx>,
    ) -> EmitValue<'ctx> {
        let name = self.next_global_name();
        let global = self.module.add_global(value.get_type(), None, &name);
        global.set_initializer(&value);
        global.set_linkage(Linkage::Internal);
        EmitValue::new(
            global.as_pointer_value().into(),
            ty,
            !self.types.is_value_type(ty),
        )
    }

    /// Creates a zero-initialized internal global of managed type `ty` under
    /// the given name.
    #[must_use]
    pub fn uninitialized_global(&self, ty: TypeId, name: &str) -> EmitValue<'ctx> {
        let backing = self.types.basic_llvm(ty);
        let global = self.module.add_global(backing, None, name);
        global.set_initializer(&backing.const_zero());
        global.set_linkage(Linkage::Internal);
        EmitValue::new(
            global.as_pointer_value().into(),
            ty,
            !self.types.is_value_type(ty),
        )
    }

    /// True if `derived` is `base` or transitively embeds it as a base class.
    ///
    /// The walk follows the first field of each reference type, which is
    /// where the embedded parent instance lives.
    #[must_use]
    pub fn extends(&self, derived: TypeId, base: TypeId) -> bool {
        let mut current = derived;
        loop {
            if current == base {
                return true;
            }
            if self.types.is_value_type(current)
                || self.types.name(current) == OBJECT_HEADER_TYPE
            {
                return false;
            }
            let Some(first) = self.types.fields(current).into_iter().next() else {
                return false;
            };
            if first.offset != 0 {
                return false;
            }
            current = first.ty;
        }
    }

    /// Returns the function called `name`, declaring it if it does not exist.
    ///
    /// Freshly declared functions default to weak external linkage, which is
    /// what a declaration that may never receive a body needs to link
    /// against the runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if `ty` is not a function
    ///   type.
    pub fn get_or_insert_function(
        &self,
        name: &str,
        ty: TypeId,
    ) -> Result<FunctionEmitter<'_, 'ctx>> {
        let function = match self.module.get_function(name) {
            Some(f) => f,
            None => {
                let fn_ty = self.types.fn_llvm(ty).ok_or_else(|| {
                    Error::UnsupportedOperandCombination(format!(
                        "function declaration of non-function type `{}`",
                        self.types.name(ty)
                    ))
                })?;
                let f = self.module.add_function(name, fn_ty, None);
                f.set_linkage(Linkage::ExternalWeak);
                f
            }
        };
        Ok(FunctionEmitter::new(self, function, ty, name))
    }

    /// Finalizes debug information and verifies the module.
    ///
    /// # Errors
    ///
    /// - [`Error::VerificationFailed`] if the LLVM verifier rejects the
    ///   module.
    pub fn compile(&self) -> Result<()> {
        self.debug.finalize();
        self.verify()?;
        debug!(
            module = self.module.get_name().to_string_lossy().as_ref(),
            "module verified"
        );
        Ok(())
    }

    fn verify(&self) -> Result<()> {
        self.module
            .verify()
            .map_err(|e| Error::VerificationFailed(e.to_string()))
    }

    /// Writes the module to `path`, as textual IR when `as_text` is set and
    /// as bitcode otherwise.
    ///
    /// Debug information is finalized first, so a module dumped before
    /// [`Self::compile`] does not contain unresolved temporary metadata.
    ///
    /// A read-only file at the destination is made writable first, as prior
    /// build outputs are often marked read-only.
    ///
    /// # Errors
    ///
    /// - [`Error::IOError`] if the destination's permissions cannot be
    ///   adjusted.
    /// - [`Error::LLVMError`] if serialization fails.
    pub fn dump_to_file(&self, path: &Path, as_text: bool) -> Result<()> {
        self.debug.finalize();
        if path.exists() {
            let mut permissions = fs::metadata(path)?.permissions();
            if permissions.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                permissions.set_readonly(false);
                fs::set_permissions(path, permissions)?;
            }
        }

        if as_text {
            self.module.print_to_file(path)?;
        } else if !self.module.write_bitcode_to_path(path) {
            return Err(Error::LLVMError(format!(
                "failed to write bitcode to {}",
                path.display()
            )));
        }
        debug!(path = %path.display(), "module written");
        Ok(())
    }

    /// Synthesizes a fresh module-unique name for an anonymous global.
    pub(crate) fn next_global_name(&self) -> String {
        let n = self.globals_counter.fetch_add(1, Ordering::Relaxed);
        format!("{GLOBAL_NAME_PREFIX}{n}")
    }
}

/// True if `value` is a constant zero integer or null pointer.
fn is_const_zero(value: &BasicValueEnum) -> bool {
    match value {
        BasicValueEnum::IntValue(v) => v.is_const() && v.is_null(),
        BasicValueEnum::PointerValue(v) => v.is_const() && v.is_null(),
        _ => false,
    }
}
