//! The registry of managed types known to a module under construction.
//!
//! Every managed type that the upstream translator mentions is interned here
//! exactly once, keyed by its fully-qualified name, and handed back as a
//! cheap copyable [`TypeId`]. The registry owns the mapping from managed
//! types to the LLVM types that back them, the declared field layouts, and
//! the distinction between a type's in-place size and its storage size (a
//! reference type occupies a pointer slot wherever it is stored).
//!
//! The registry uses interior mutability so that emitters holding shared
//! references to the module can intern types mid-emission.

use std::{cell::RefCell, collections::HashMap};

use inkwell::{
    context::Context,
    types::{
        AnyTypeEnum, ArrayType, AsTypeRef, BasicMetadataTypeEnum, BasicType, BasicTypeEnum,
        FunctionType, StructType,
    },
    AddressSpace,
};

use corten_errors::emit::{Error, Result};

use crate::constant::{
    BYTE_SIZE, DOUBLE_TYPE, INTPTR_TYPE, OBJECT_HEADER_TYPE, PRIMITIVE_PREFIX, SINGLE_TYPE,
    UINTPTR_TYPE, VOID_TYPE,
};

/// A stable handle to a managed type interned in a [`TypeRegistry`].
///
/// Handles are only meaningful for the registry that produced them.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TypeId(usize);

/// A field declared on a managed type.
///
/// The declared byte offset comes from the managed type system; the element
/// index into the backing LLVM struct is only known once the owning type's
/// layout has been finalized.
#[derive(Clone, Debug)]
pub struct TypeField {
    /// The field's name in the managed program.
    pub name: String,

    /// The declared offset of the field, in bytes from the start of the type.
    pub offset: u32,

    /// The type of the field.
    pub ty: TypeId,

    /// True if the field is emitted at its full in-place size rather than at
    /// its storage size. The translator sets this for base-class fields.
    pub force_inline: bool,

    /// The element index of this field in the finalized LLVM struct.
    pub final_idx: u32,
}

/// Everything the registry knows about one interned type.
struct TypeRecord<'ctx> {
    name: String,
    size_in_bits: u32,
    is_value_type: bool,
    is_boxed: bool,
    finalized: bool,
    fields: Vec<TypeField>,
    function_args: Vec<TypeId>,
    function_return: Option<TypeId>,
    underlying_pointer: Option<TypeId>,
    underlying_boxed: Option<TypeId>,
    array_element: Option<TypeId>,
    llvm: AnyTypeEnum<'ctx>,
}

/// The registry of managed types for one module under construction.
pub struct TypeRegistry<'ctx> {
    ctx: &'ctx Context,
    pointer_size_bits: u32,
    records: RefCell<Vec<TypeRecord<'ctx>>>,
    by_name: RefCell<HashMap<String, TypeId>>,
    by_llvm: RefCell<HashMap<usize, TypeId>>,
}

impl<'ctx> TypeRegistry<'ctx> {
    /// Creates an empty registry for types backed by `ctx`, on a target whose
    /// pointers are `pointer_size_bits` wide.
    pub fn new(ctx: &'ctx Context, pointer_size_bits: u32) -> Self {
        Self {
            ctx,
            pointer_size_bits,
            records: RefCell::new(Vec::new()),
            by_name: RefCell::new(HashMap::new()),
            by_llvm: RefCell::new(HashMap::new()),
        }
    }

    /// The width of a pointer on the compilation target, in bits.
    #[must_use]
    pub fn pointer_size_bits(&self) -> u32 {
        self.pointer_size_bits
    }

    /// Interns the type called `name`, creating it if it does not exist yet.
    ///
    /// Well-known primitive names map onto the corresponding LLVM scalar
    /// types; any other name creates a named opaque struct whose body is
    /// filled in later by [`Self::finalize_layout`]. Newly created types
    /// default to being value types until the translator says otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered with a different size, as that
    /// means the upstream translator handed us two conflicting definitions.
    pub fn get_or_insert(&self, name: &str, size_in_bits: u32) -> TypeId {
        if let Some(&id) = self.by_name.borrow().get(name) {
            let records = self.records.borrow();
            assert_eq!(
                records[id.0].size_in_bits, size_in_bits,
                "type `{name}` re-registered with a conflicting size"
            );
            return id;
        }

        let llvm: AnyTypeEnum<'ctx> = match name {
            VOID_TYPE => self.ctx.void_type().into(),
            SINGLE_TYPE => self.ctx.f32_type().into(),
            DOUBLE_TYPE => self.ctx.f64_type().into(),
            INTPTR_TYPE | UINTPTR_TYPE => self.ctx.ptr_type(AddressSpace::default()).into(),
            n if n.starts_with(PRIMITIVE_PREFIX) => {
                self.ctx.custom_width_int_type(size_in_bits).into()
            }
            _ => self.ctx.opaque_struct_type(name).into(),
        };

        self.insert_record(TypeRecord {
            name: name.to_string(),
            size_in_bits,
            is_value_type: true,
            is_boxed: false,
            finalized: false,
            fields: Vec::new(),
            function_args: Vec::new(),
            function_return: None,
            underlying_pointer: None,
            underlying_boxed: None,
            array_element: None,
            llvm,
        })
    }

    /// Looks up an already-interned type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<TypeId> {
        self.by_name.borrow().get(name).copied()
    }

    /// Looks up an already-interned type by name, turning a miss into an
    /// error naming the missing type.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if no type is registered under `name`.
    pub fn get_known(&self, name: &str) -> Result<TypeId> {
        self.get(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    /// Looks up the managed type backed by the provided LLVM type, if any.
    ///
    /// Only named struct types participate in this mapping, as LLVM uniques
    /// scalar and pointer types and several managed types can therefore share
    /// one backing type.
    #[must_use]
    pub fn get_by_llvm<T: AsTypeRef>(&self, ty: &T) -> Option<TypeId> {
        self.by_llvm.borrow().get(&(ty.as_type_ref() as usize)).copied()
    }

    /// Interns the pointer type to `underlying` under the conventional
    /// `<name> *` spelling.
    pub fn get_or_insert_pointer(&self, underlying: TypeId) -> TypeId {
        let name = format!("{} *", self.name(underlying));
        self.get_or_insert_pointer_named(&name, underlying)
    }

    /// Interns a pointer type to `underlying` under an explicit name.
    ///
    /// Pointer types are value types: they are stored as themselves, and they
    /// do not carry an object header.
    pub fn get_or_insert_pointer_named(&self, name: &str, underlying: TypeId) -> TypeId {
        if let Some(&id) = self.by_name.borrow().get(name) {
            return id;
        }

        self.insert_record(TypeRecord {
            name: name.to_string(),
            size_in_bits: self.pointer_size_bits,
            is_value_type: true,
            is_boxed: false,
            finalized: false,
            fields: Vec::new(),
            function_args: Vec::new(),
            function_return: None,
            underlying_pointer: Some(underlying),
            underlying_boxed: None,
            array_element: None,
            llvm: self.ctx.ptr_type(AddressSpace::default()).into(),
        })
    }

    /// Interns the boxed form of the value type `underlying` under the
    /// conventional `Boxed <name>` spelling.
    pub fn get_or_insert_boxed(&self, header: TypeId, underlying: TypeId) -> TypeId {
        let name = format!("Boxed {}", self.name(underlying));
        self.get_or_insert_boxed_named(&name, header, underlying)
    }

    /// Interns the boxed form of the value type `underlying` under an
    /// explicit managed name.
    ///
    /// The boxed form is a packed struct of the object header followed by the
    /// underlying type's storage, and its size is the sum of the two.
    pub fn get_or_insert_boxed_named(
        &self,
        name: &str,
        header: TypeId,
        underlying: TypeId,
    ) -> TypeId {
        if let Some(&id) = self.by_name.borrow().get(name) {
            return id;
        }

        let body = [self.basic_llvm(header), self.storage_type(underlying)];
        let st = self.ctx.opaque_struct_type(name);
        st.set_body(&body, true);

        let size_in_bits = self.size_in_bits(header) + self.storage_size_bits(underlying);

        self.insert_record(TypeRecord {
            name: name.to_string(),
            size_in_bits,
            is_value_type: false,
            is_boxed: true,
            finalized: true,
            fields: Vec::new(),
            function_args: Vec::new(),
            function_return: None,
            underlying_pointer: None,
            underlying_boxed: Some(underlying),
            array_element: None,
            llvm: st.into(),
        })
    }

    /// Interns the zero-length array type with elements of type `element`.
    ///
    /// Zero-length arrays back the open-ended payloads of managed array
    /// instances, whose real lengths only exist at runtime.
    pub fn get_or_insert_zero_sized_array(&self, element: TypeId) -> TypeId {
        let name = format!("MemoryArray of {}", self.name(element));
        if let Some(&id) = self.by_name.borrow().get(&name) {
            return id;
        }

        let llvm = self.storage_type(element).array_type(0);

        self.insert_record(TypeRecord {
            name,
            size_in_bits: self.storage_size_bits(element),
            is_value_type: true,
            is_boxed: false,
            finalized: false,
            fields: Vec::new(),
            function_args: Vec::new(),
            function_return: None,
            underlying_pointer: None,
            underlying_boxed: None,
            array_element: Some(element),
            llvm: llvm.into(),
        })
    }

    /// Interns the function type named `name` with the given signature.
    ///
    /// Parameters and the return value are passed at their storage types, so
    /// reference-type parameters become pointer parameters.
    pub fn get_or_insert_function(
        &self,
        name: &str,
        return_type: TypeId,
        args: &[TypeId],
    ) -> TypeId {
        if let Some(&id) = self.by_name.borrow().get(name) {
            return id;
        }

        let params = args
            .iter()
            .map(|arg| BasicMetadataTypeEnum::from(self.storage_type(*arg)))
            .collect::<Vec<_>>();

        let returns_void = matches!(
            self.records.borrow()[return_type.0].llvm,
            AnyTypeEnum::VoidType(_)
        );
        let fn_ty = if returns_void {
            self.ctx.void_type().fn_type(&params, false)
        } else {
            self.storage_type(return_type).fn_type(&params, false)
        };

        self.insert_record(TypeRecord {
            name: name.to_string(),
            size_in_bits: 0,
            is_value_type: true,
            is_boxed: false,
            finalized: false,
            fields: Vec::new(),
            function_args: args.to_vec(),
            function_return: (!returns_void).then_some(return_type),
            underlying_pointer: None,
            underlying_boxed: None,
            array_element: None,
            llvm: fn_ty.into(),
        })
    }

    /// Declares a field on `owner` at the given byte offset.
    ///
    /// Fields are kept sorted by their declared offset regardless of the
    /// order they arrive in.
    ///
    /// # Panics
    ///
    /// Panics if `owner`'s layout has already been finalized.
    pub fn add_field(
        &self,
        owner: TypeId,
        name: &str,
        offset_bytes: u32,
        ty: TypeId,
        force_inline: bool,
    ) {
        let mut records = self.records.borrow_mut();
        let record = &mut records[owner.0];
        assert!(
            !record.finalized,
            "field `{name}` added to `{}` after its layout was finalized",
            record.name
        );

        let field = TypeField {
            name: name.to_string(),
            offset: offset_bytes,
            ty,
            force_inline,
            final_idx: 0,
        };
        let position = record
            .fields
            .iter()
            .position(|f| f.offset > offset_bytes)
            .unwrap_or(record.fields.len());
        record.fields.insert(position, field);
    }

    /// Computes the final LLVM struct body for `id` from its declared fields.
    ///
    /// The body is built by walking the type's declared size byte by byte:
    /// each field is placed at its declared offset, gaps become single `i8`
    /// padding elements, and every element's index is recorded back onto the
    /// field so that later field accesses can be resolved. The struct is
    /// always packed; alignment is entirely the translator's business.
    ///
    /// A field is emitted at its full in-place size when it is force-inlined
    /// or when it is the first field of a reference type other than the
    /// object header (the embedded base-class instance). All other fields
    /// are emitted at their storage size.
    ///
    /// Types not backed by a named struct are left untouched.
    ///
    /// # Panics
    ///
    /// Panics on a second finalization of the same type.
    pub fn finalize_layout(&self, id: TypeId) {
        let (st, fields, size_bytes, emit_parent_inline) = {
            let records = self.records.borrow();
            let record = &records[id.0];
            let AnyTypeEnum::StructType(st) = record.llvm else {
                return;
            };
            if record.is_boxed {
                return;
            }
            assert!(
                !record.finalized,
                "layout of `{}` finalized twice",
                record.name
            );
            let emit_parent_inline =
                !record.is_value_type && record.name != OBJECT_HEADER_TYPE;
            (
                st,
                record.fields.clone(),
                record.size_in_bits / BYTE_SIZE,
                emit_parent_inline,
            )
        };

        let mut elements: Vec<BasicTypeEnum<'ctx>> = Vec::new();
        let mut final_indices: Vec<(usize, u32)> = Vec::new();
        let mut offset = 0u32;
        let mut next = 0usize;

        while offset < size_bytes {
            if next < fields.len() && fields[next].offset == offset {
                let field = &fields[next];
                let inline = field.force_inline || (next == 0 && emit_parent_inline);
                let (element, advance) = if inline {
                    (self.basic_llvm(field.ty), self.size_in_bits(field.ty))
                } else {
                    (self.storage_type(field.ty), self.storage_size_bits(field.ty))
                };
                final_indices.push((next, u32::try_from(elements.len()).unwrap_or(u32::MAX)));
                elements.push(element);
                offset += advance / BYTE_SIZE;
                next += 1;
            } else {
                elements.push(self.ctx.i8_type().into());
                offset += 1;
            }
        }

        // Zero-sized trailing fields, such as open-ended array payloads.
        while next < fields.len() {
            final_indices.push((next, u32::try_from(elements.len()).unwrap_or(u32::MAX)));
            elements.push(self.storage_type(fields[next].ty));
            next += 1;
        }

        st.set_body(&elements, true);

        let mut records = self.records.borrow_mut();
        let record = &mut records[id.0];
        for (field_idx, element_idx) in final_indices {
            record.fields[field_idx].final_idx = element_idx;
        }
        record.finalized = true;
    }

    /// Marks `id` as a value type or a reference type.
    ///
    /// Newly interned types default to being value types; the translator
    /// flips the flag for class types before any layout or storage query.
    pub fn set_value_type(&self, id: TypeId, is_value_type: bool) {
        self.records.borrow_mut()[id.0].is_value_type = is_value_type;
    }

    /// The fully-qualified managed name of `id`.
    #[must_use]
    pub fn name(&self, id: TypeId) -> String {
        self.records.borrow()[id.0].name.clone()
    }

    /// The declared in-place size of `id`, in bits.
    #[must_use]
    pub fn size_in_bits(&self, id: TypeId) -> u32 {
        self.records.borrow()[id.0].size_in_bits
    }

    /// The size `id` occupies when stored in a field, local, or parameter.
    ///
    /// Value types are stored in place; reference types are stored as
    /// pointers.
    #[must_use]
    pub fn storage_size_bits(&self, id: TypeId) -> u32 {
        let records = self.records.borrow();
        let record = &records[id.0];
        if record.is_value_type {
            record.size_in_bits
        } else {
            self.pointer_size_bits
        }
    }

    /// True if `id` is a value type.
    #[must_use]
    pub fn is_value_type(&self, id: TypeId) -> bool {
        self.records.borrow()[id.0].is_value_type
    }

    /// True if `id` is the boxed form of some value type.
    #[must_use]
    pub fn is_boxed(&self, id: TypeId) -> bool {
        self.records.borrow()[id.0].is_boxed
    }

    /// The declared fields of `id`, sorted by offset.
    #[must_use]
    pub fn fields(&self, id: TypeId) -> Vec<TypeField> {
        self.records.borrow()[id.0].fields.clone()
    }

    /// The parameter types of a function type.
    #[must_use]
    pub fn function_args(&self, id: TypeId) -> Vec<TypeId> {
        self.records.borrow()[id.0].function_args.clone()
    }

    /// The return type of a function type, or `None` for void.
    #[must_use]
    pub fn function_return(&self, id: TypeId) -> Option<TypeId> {
        self.records.borrow()[id.0].function_return
    }

    /// The pointee type if `id` is a pointer type.
    #[must_use]
    pub fn underlying_pointer(&self, id: TypeId) -> Option<TypeId> {
        self.records.borrow()[id.0].underlying_pointer
    }

    /// The payload type if `id` is a boxed type.
    #[must_use]
    pub fn underlying_boxed(&self, id: TypeId) -> Option<TypeId> {
        self.records.borrow()[id.0].underlying_boxed
    }

    /// The element type if `id` is a zero-length array type.
    #[must_use]
    pub fn array_element(&self, id: TypeId) -> Option<TypeId> {
        self.records.borrow()[id.0].array_element
    }

    /// The LLVM type that backs `id` in full, at its in-place size.
    #[must_use]
    pub fn any_llvm(&self, id: TypeId) -> AnyTypeEnum<'ctx> {
        self.records.borrow()[id.0].llvm
    }

    /// The LLVM type that backs `id` in full, as a basic type.
    ///
    /// # Panics
    ///
    /// Panics for void and function types, which are not first-class values.
    #[must_use]
    pub fn basic_llvm(&self, id: TypeId) -> BasicTypeEnum<'ctx> {
        let records = self.records.borrow();
        let record = &records[id.0];
        BasicTypeEnum::try_from(record.llvm).unwrap_or_else(|()| {
            panic!("type `{}` is not a first-class value type", record.name)
        })
    }

    /// The LLVM type at which values of `id` are stored.
    ///
    /// Value types are stored at their own backing type; reference types are
    /// stored as pointers.
    #[must_use]
    pub fn storage_type(&self, id: TypeId) -> BasicTypeEnum<'ctx> {
        if self.is_value_type(id) {
            self.basic_llvm(id)
        } else {
            self.ctx.ptr_type(AddressSpace::default()).into()
        }
    }

    /// The backing LLVM struct of `id`, if it is struct-backed.
    #[must_use]
    pub fn struct_llvm(&self, id: TypeId) -> Option<StructType<'ctx>> {
        match self.records.borrow()[id.0].llvm {
            AnyTypeEnum::StructType(st) => Some(st),
            _ => None,
        }
    }

    /// The backing LLVM function type of `id`, if it is a function type.
    #[must_use]
    pub fn fn_llvm(&self, id: TypeId) -> Option<FunctionType<'ctx>> {
        match self.records.borrow()[id.0].llvm {
            AnyTypeEnum::FunctionType(f) => Some(f),
            _ => None,
        }
    }

    /// The backing LLVM array type of `id`, if it is an array type.
    #[must_use]
    pub fn array_llvm(&self, id: TypeId) -> Option<ArrayType<'ctx>> {
        match self.records.borrow()[id.0].llvm {
            AnyTypeEnum::ArrayType(a) => Some(a),
            _ => None,
        }
    }

    /// Resolves the byte offset `offset` within `ty` to a path of struct
    /// element indices, descending through embedded base classes and nested
    /// value types until it lands exactly on a field.
    ///
    /// Returns the indices to hand to a GEP (without the leading zero), the
    /// type of the field reached, and the field's name.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidFieldOffset`] if the offset does not land inside any
    ///   declared field at some level of the descent.
    pub fn field_path_for_offset(
        &self,
        ty: TypeId,
        offset: i64,
    ) -> Result<(Vec<u32>, TypeId, String)> {
        let mut indices = Vec::new();
        let (leaf, name) = self.descend_for_offset(ty, offset, &mut indices)?;
        Ok((indices, leaf, name))
    }

    fn descend_for_offset(
        &self,
        ty: TypeId,
        offset: i64,
        indices: &mut Vec<u32>,
    ) -> Result<(TypeId, String)> {
        let (fields, is_value_type, name) = {
            let records = self.records.borrow();
            let record = &records[ty.0];
            (record.fields.clone(), record.is_value_type, record.name.clone())
        };

        for (i, field) in fields.iter().enumerate() {
            let field_is_parent =
                i == 0 && !is_value_type && name != OBJECT_HEADER_TYPE;
            let field_size = if field_is_parent || field.force_inline {
                self.size_in_bits(field.ty)
            } else {
                self.storage_size_bits(field.ty)
            } / BYTE_SIZE;

            let field_offset = i64::from(field.offset);
            if field_offset > offset {
                break;
            }
            if field_offset + i64::from(field_size) <= offset {
                continue;
            }

            indices.push(field.final_idx);
            if field_is_parent || field_offset != offset {
                return self.descend_for_offset(field.ty, offset - field_offset, indices);
            }
            return Ok((field.ty, field.name.clone()));
        }

        Err(Error::InvalidFieldOffset {
            type_name: name,
            offset,
        })
    }

    fn insert_record(&self, record: TypeRecord<'ctx>) -> TypeId {
        let mut records = self.records.borrow_mut();
        let id = TypeId(records.len());
        self.by_name.borrow_mut().insert(record.name.clone(), id);
        if let AnyTypeEnum::StructType(st) = record.llvm {
            self.by_llvm
                .borrow_mut()
                .insert(st.as_type_ref() as usize, id);
        }
        records.push(record);
        id
    }
}

#[cfg(test)]
mod test {
    use inkwell::{context::Context, types::BasicTypeEnum};

    use crate::constant::OBJECT_HEADER_TYPE;

    use super::TypeRegistry;

    #[test]
    fn registration_is_idempotent() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let first = registry.get_or_insert("LLVM.System.Int32", 32);
        let second = registry.get_or_insert("LLVM.System.Int32", 32);
        assert_eq!(first, second);
    }

    #[test]
    #[should_panic(expected = "conflicting size")]
    fn conflicting_re_registration_panics() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        registry.get_or_insert("LLVM.System.Int32", 32);
        registry.get_or_insert("LLVM.System.Int32", 64);
    }

    #[test]
    #[should_panic(expected = "finalized twice")]
    fn re_finalizing_a_layout_panics() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let int = registry.get_or_insert("LLVM.System.Int32", 32);
        let holder = registry.get_or_insert("Holder", 32);
        registry.add_field(holder, "value", 0, int, false);
        registry.finalize_layout(holder);
        registry.finalize_layout(holder);
    }

    #[test]
    #[should_panic(expected = "after its layout was finalized")]
    fn adding_a_field_after_finalization_panics() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let int = registry.get_or_insert("LLVM.System.Int32", 32);
        let holder = registry.get_or_insert("Holder", 32);
        registry.add_field(holder, "value", 0, int, false);
        registry.finalize_layout(holder);
        registry.add_field(holder, "late", 4, int, false);
    }

    #[test]
    fn layout_pads_gaps_with_single_bytes() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let byte = registry.get_or_insert("LLVM.System.Byte", 8);
        let int = registry.get_or_insert("LLVM.System.Int32", 32);

        // One byte at 0, a three-byte hole, then an i32 at 4.
        let holder = registry.get_or_insert("Holder", 64);
        registry.add_field(holder, "flag", 0, byte, false);
        registry.add_field(holder, "count", 4, int, false);
        registry.finalize_layout(holder);

        let st = registry.struct_llvm(holder).unwrap();
        assert!(st.is_packed());
        assert_eq!(st.count_fields(), 5);
        assert!(matches!(st.get_field_type_at_index(0), Some(BasicTypeEnum::IntType(t)) if t.get_bit_width() == 8));
        for idx in 1..4 {
            assert!(matches!(st.get_field_type_at_index(idx), Some(BasicTypeEnum::IntType(t)) if t.get_bit_width() == 8));
        }
        assert!(matches!(st.get_field_type_at_index(4), Some(BasicTypeEnum::IntType(t)) if t.get_bit_width() == 32));

        let fields = registry.fields(holder);
        assert_eq!(fields[0].final_idx, 0);
        assert_eq!(fields[1].final_idx, 4);
    }

    #[test]
    fn fields_are_sorted_by_offset_regardless_of_declaration_order() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let int = registry.get_or_insert("LLVM.System.Int32", 32);
        let holder = registry.get_or_insert("Pair", 64);
        registry.add_field(holder, "second", 4, int, false);
        registry.add_field(holder, "first", 0, int, false);
        registry.finalize_layout(holder);

        let fields = registry.fields(holder);
        assert_eq!(fields[0].name, "first");
        assert_eq!(fields[1].name, "second");
        assert_eq!(fields[0].final_idx, 0);
        assert_eq!(fields[1].final_idx, 1);
    }

    #[test]
    fn derived_class_embeds_base_at_full_size() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let int = registry.get_or_insert("LLVM.System.Int32", 32);

        let header = registry.get_or_insert(OBJECT_HEADER_TYPE, 64);
        registry.add_field(header, "multiuse", 0, int, false);
        registry.add_field(header, "vtable", 4, int, false);
        registry.finalize_layout(header);

        let base = registry.get_or_insert("Base", 64);
        registry.set_value_type(base, false);
        registry.add_field(base, "header", 0, header, true);
        registry.finalize_layout(base);

        let derived = registry.get_or_insert("Derived", 96);
        registry.set_value_type(derived, false);
        registry.add_field(derived, "base", 0, base, false);
        registry.add_field(derived, "extra", 8, int, false);
        registry.finalize_layout(derived);

        // The base class is embedded whole, so no padding elements appear.
        let st = registry.struct_llvm(derived).unwrap();
        assert_eq!(st.count_fields(), 2);
        assert!(matches!(st.get_field_type_at_index(0), Some(BasicTypeEnum::StructType(_))));
        assert!(matches!(st.get_field_type_at_index(1), Some(BasicTypeEnum::IntType(t)) if t.get_bit_width() == 32));
    }

    #[test]
    fn offset_descends_through_embedded_base() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let int = registry.get_or_insert("LLVM.System.Int32", 32);

        let header = registry.get_or_insert(OBJECT_HEADER_TYPE, 64);
        registry.add_field(header, "multiuse", 0, int, false);
        registry.add_field(header, "vtable", 4, int, false);
        registry.finalize_layout(header);

        let base = registry.get_or_insert("Base", 96);
        registry.set_value_type(base, false);
        registry.add_field(base, "header", 0, header, true);
        registry.add_field(base, "first", 8, int, false);
        registry.finalize_layout(base);

        let derived = registry.get_or_insert("Derived", 128);
        registry.set_value_type(derived, false);
        registry.add_field(derived, "base", 0, base, false);
        registry.add_field(derived, "second", 12, int, false);
        registry.finalize_layout(derived);

        // Offset 8 lands on `first`, one level down inside the base.
        let (indices, leaf, name) = registry.field_path_for_offset(derived, 8).unwrap();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(leaf, int);
        assert_eq!(name, "first");

        // Offset 12 is `second` on the derived class itself.
        let (indices, _, name) = registry.field_path_for_offset(derived, 12).unwrap();
        assert_eq!(indices, vec![1]);
        assert_eq!(name, "second");

        // Offset 16 is past the last field.
        let err = registry.field_path_for_offset(derived, 16);
        assert!(err.is_err());
    }

    #[test]
    fn boxed_type_is_header_plus_payload() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let int = registry.get_or_insert("LLVM.System.Int32", 32);
        let header = registry.get_or_insert(OBJECT_HEADER_TYPE, 64);
        registry.add_field(header, "multiuse", 0, int, false);
        registry.add_field(header, "vtable", 4, int, false);
        registry.finalize_layout(header);

        let boxed = registry.get_or_insert_boxed(header, int);
        assert_eq!(registry.size_in_bits(boxed), 96);
        assert!(registry.is_boxed(boxed));
        assert_eq!(registry.underlying_boxed(boxed), Some(int));

        let st = registry.struct_llvm(boxed).unwrap();
        assert!(st.is_packed());
        assert_eq!(st.count_fields(), 2);
    }

    #[test]
    fn boxed_types_can_carry_their_own_managed_name() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let int = registry.get_or_insert("LLVM.System.Int32", 32);
        let header = registry.get_or_insert(OBJECT_HEADER_TYPE, 64);
        registry.add_field(header, "multiuse", 0, int, false);
        registry.add_field(header, "vtable", 4, int, false);
        registry.finalize_layout(header);

        let boxed = registry.get_or_insert_boxed_named("System.Int32 [boxed]", header, int);
        assert_eq!(registry.get("System.Int32 [boxed]"), Some(boxed));
        assert_eq!(registry.underlying_boxed(boxed), Some(int));
        assert!(registry.is_boxed(boxed));

        // Re-registration under the same name resolves to the same type,
        // while the derived-name convenience interns a distinct one.
        let again = registry.get_or_insert_boxed_named("System.Int32 [boxed]", header, int);
        assert_eq!(again, boxed);
        assert_ne!(registry.get_or_insert_boxed(header, int), boxed);
    }

    #[test]
    fn reference_types_store_as_pointers() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let class = registry.get_or_insert("Some.Class", 64);
        registry.set_value_type(class, false);

        assert_eq!(registry.storage_size_bits(class), 32);
        assert!(registry.storage_type(class).is_pointer_type());
        assert_eq!(registry.size_in_bits(class), 64);
    }

    #[test]
    fn named_structs_resolve_back_from_their_backing_type() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let class = registry.get_or_insert("Some.Class", 64);
        let st = registry.struct_llvm(class).unwrap();
        assert_eq!(registry.get_by_llvm(&st), Some(class));

        // Uniqued scalar types identify no managed type.
        let int = registry.get_or_insert("LLVM.System.Int32", 32);
        let backing = registry.basic_llvm(int);
        assert_eq!(registry.get_by_llvm(&backing), None);
    }

    #[test]
    fn zero_sized_array_has_zero_length_backing() {
        let context = Context::create();
        let registry = TypeRegistry::new(&context, 32);

        let int = registry.get_or_insert("LLVM.System.Int32", 32);
        let array = registry.get_or_insert_zero_sized_array(int);

        assert_eq!(registry.name(array), "MemoryArray of LLVM.System.Int32");
        assert_eq!(registry.array_llvm(array).unwrap().len(), 0);
        assert_eq!(registry.array_element(array), Some(int));
    }
}
