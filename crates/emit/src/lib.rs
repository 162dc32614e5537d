//! This library implements the [LLVM IR](https://llvm.org/docs/LangRef.html)
//! construction layer of the Corten compiler, which translates programs in a
//! managed intermediate form into native object code for small Cortex-M
//! targets.
//!
//! The upstream translator walks the managed program and drives this crate,
//! which is responsible for everything on the LLVM side of that boundary:
//!
//! 1. Interning the managed types and deciding how each is represented, laid
//!    out, and stored (the [`types`] module).
//! 2. Building functions, basic blocks, and instructions from the operations
//!    the translator emits, bridging the gap between the managed model
//!    (object headers, boxed values, basic-type wrappers) and LLVM's (the
//!    [`function`] and [`block`] modules).
//! 3. Producing constants, globals, and the finished, verified module (the
//!    [`module`] module).
//! 4. Attaching source-level debug information as the IR is built (the
//!    [`debug`] module).
//!
//! The crate never inspects the managed program itself; it trusts the
//! translator's declared types, offsets, and sizes, and fails loudly when
//! those declarations are inconsistent.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

pub mod block;
pub mod constant;
pub mod debug;
pub mod function;
pub mod module;
pub mod ops;
pub mod types;
pub mod value;

pub use block::BlockEmitter;
pub use function::FunctionEmitter;
pub use module::ObjectModule;
pub use ops::{BinaryOp, CmpPredicate, UnaryOp};
pub use types::{TypeId, TypeRegistry};
pub use value::EmitValue;
