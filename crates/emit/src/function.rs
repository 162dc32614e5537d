//! Per-function emission state.
//!
//! A [`FunctionEmitter`] wraps one LLVM function together with its managed
//! function type, and hands out [`BlockEmitter`]s for the basic blocks that
//! make up its body. Blocks are looked up by name so that forward references
//! to a block and its later definition resolve to the same block.

use inkwell::{module::Linkage, values::FunctionValue};
use tracing::warn;

use corten_errors::emit::{Error, Result};

use crate::{block::BlockEmitter, module::ObjectModule, types::TypeId, value::EmitValue};

/// The emission state for one function of the output module.
#[derive(Clone)]
pub struct FunctionEmitter<'m, 'ctx> {
    module: &'m ObjectModule<'ctx>,
    function: FunctionValue<'ctx>,
    ty: TypeId,
    name: String,
}

impl<'m, 'ctx> FunctionEmitter<'m, 'ctx> {
    pub(crate) fn new(
        module: &'m ObjectModule<'ctx>,
        function: FunctionValue<'ctx>,
        ty: TypeId,
        name: &str,
    ) -> Self {
        Self {
            module,
            function,
            ty,
            name: name.to_string(),
        }
    }

    /// The underlying LLVM function.
    #[must_use]
    pub fn llvm(&self) -> FunctionValue<'ctx> {
        self.function
    }

    /// The managed function type of this function.
    #[must_use]
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// The function's symbol name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module this function belongs to.
    #[must_use]
    pub fn module(&self) -> &'m ObjectModule<'ctx> {
        self.module
    }

    /// Returns the basic block called `name`, appending it to the function
    /// if no block of that name exists yet.
    pub fn get_or_insert_basic_block(&self, name: &str) -> BlockEmitter<'m, 'ctx> {
        let block = self
            .function
            .get_basic_blocks()
            .into_iter()
            .find(|bb| bb.get_name().to_bytes() == name.as_bytes())
            .unwrap_or_else(|| self.module.context().append_basic_block(self.function, name));
        BlockEmitter::new(self.module, self.clone(), block)
    }

    /// Allocates a stack slot for a local of managed type `ty`.
    ///
    /// The allocation is placed at the top of the entry block, before any
    /// other instruction, so that it dominates every use regardless of which
    /// block requested it.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyFunction`] if the function has no entry block to host
    ///   the allocation.
    pub fn get_local_stack_value(&self, name: &str, ty: TypeId) -> Result<EmitValue<'ctx>> {
        let entry = self
            .function
            .get_first_basic_block()
            .ok_or_else(|| Error::EmptyFunction(self.name.clone()))?;

        let builder = self.module.context().create_builder();
        match entry.get_first_instruction() {
            Some(instruction) => builder.position_before(&instruction),
            None => builder.position_at_end(entry),
        }

        let storage = self.module.types().storage_type(ty);
        let slot = builder.build_alloca(storage, name)?;
        Ok(EmitValue::new(slot.into(), ty, false))
    }

    /// The `index`th formal parameter as an immediate value of its declared
    /// managed type.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperandCombination`] if the function has no such
    ///   parameter.
    pub fn get_function_argument(&self, index: u32) -> Result<EmitValue<'ctx>> {
        let args = self.module.types().function_args(self.ty);
        let ty = args.get(index as usize).copied().ok_or_else(|| {
            Error::UnsupportedOperandCombination(format!(
                "argument {index} of function `{}`",
                self.name
            ))
        })?;
        let param = self.function.get_nth_param(index).ok_or_else(|| {
            Error::UnsupportedOperandCombination(format!(
                "argument {index} of function `{}`",
                self.name
            ))
        })?;
        Ok(EmitValue::new(param, ty, true))
    }

    /// Restricts the function's visibility to this module.
    pub fn set_internal_linkage(&self) {
        self.function.set_linkage(Linkage::Internal);
    }

    /// Exports the function with strong external linkage.
    pub fn set_external_linkage(&self) {
        self.function.set_linkage(Linkage::External);
    }

    /// Removes every basic block, reducing the function to a declaration.
    pub fn delete_body(&self) {
        for block in self.function.get_basic_blocks() {
            let name = block.get_name().to_string_lossy().into_owned();
            if unsafe { block.delete() }.is_err() {
                warn!(function = %self.name, block = %name, "block could not be deleted");
            }
        }
    }
}
