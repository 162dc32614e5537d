//! Debug information attachment for the module under construction.
//!
//! Debug metadata is built alongside the IR: the module owns one compile
//! unit, source files and subprograms are cached so that repeated references
//! resolve to the same metadata node, and the instruction emitters stamp
//! locations onto the builder so that every subsequent instruction carries
//! them until the position changes.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
};

use inkwell::{
    context::Context,
    debug_info::{
        AsDIScope, DIFile, DIFlags, DIFlagsConstants, DILocation, DISubprogram,
        DWARFEmissionKind, DWARFSourceLanguage, DebugInfoBuilder,
    },
    module::{FlagBehavior, Module},
    values::FunctionValue,
};

/// The debug-information state attached to one module.
pub struct DebugState<'ctx> {
    dib: DebugInfoBuilder<'ctx>,
    files: RefCell<HashMap<String, DIFile<'ctx>>>,
    subprograms: RefCell<HashMap<String, DISubprogram<'ctx>>>,
    current_file: Cell<DIFile<'ctx>>,
}

impl<'ctx> DebugState<'ctx> {
    /// Creates the debug-info builder and compile unit for `module`.
    ///
    /// Also stamps the module-level "Debug Info Version" flag that LLVM
    /// requires before it will keep any debug metadata at all.
    pub fn new(module: &Module<'ctx>, module_name: &str) -> Self {
        let (dib, compile_unit) = module.create_debug_info_builder(
            true,
            DWARFSourceLanguage::C,
            module_name,
            "",
            "corten",
            false,
            "",
            0,
            "",
            DWARFEmissionKind::Full,
            0,
            false,
            false,
            "",
            "",
        );

        let context = module.get_context();
        module.add_basic_value_flag(
            "Debug Info Version",
            FlagBehavior::Warning,
            context.i32_type().const_int(3, false),
        );

        Self {
            dib,
            files: RefCell::new(HashMap::new()),
            subprograms: RefCell::new(HashMap::new()),
            current_file: Cell::new(compile_unit.get_file()),
        }
    }

    /// Makes `path` the source file that new subprograms and locations are
    /// attributed to. Files are created once and cached by path.
    pub fn set_current_file(&self, path: &str) {
        let mut files = self.files.borrow_mut();
        let file = *files
            .entry(path.to_string())
            .or_insert_with(|| self.dib.create_file(path, ""));
        self.current_file.set(file);
    }

    /// Looks up a previously created subprogram by its mangled name.
    #[must_use]
    pub fn get_subprogram(&self, mangled_name: &str) -> Option<DISubprogram<'ctx>> {
        self.subprograms.borrow().get(mangled_name).copied()
    }

    /// Returns the subprogram for `mangled_name`, creating it on first use
    /// and attaching it to `function`.
    ///
    /// The subprogram is scoped to the current source file and carries an
    /// empty signature; parameter metadata is not modeled.
    pub fn subprogram_for(
        &self,
        mangled_name: &str,
        line: u32,
        function: FunctionValue<'ctx>,
    ) -> DISubprogram<'ctx> {
        if let Some(subprogram) = self.get_subprogram(mangled_name) {
            return subprogram;
        }

        let file = self.current_file.get();
        let subroutine_type = self
            .dib
            .create_subroutine_type(file, None, &[], DIFlags::ZERO);
        let subprogram = self.dib.create_function(
            file.as_debug_info_scope(),
            mangled_name,
            None,
            file,
            line,
            subroutine_type,
            true,
            true,
            line,
            DIFlags::ZERO,
            false,
        );
        function.set_subprogram(subprogram);

        self.subprograms
            .borrow_mut()
            .insert(mangled_name.to_string(), subprogram);
        subprogram
    }

    /// Creates a source location within `scope`.
    pub fn create_location(
        &self,
        context: &'ctx Context,
        line: u32,
        column: u32,
        scope: DISubprogram<'ctx>,
    ) -> DILocation<'ctx> {
        self.dib
            .create_debug_location(context, line, column, scope.as_debug_info_scope(), None)
    }

    /// Resolves all temporary metadata. Must run before verification.
    pub fn finalize(&self) {
        self.dib.finalize();
    }
}
