//! The operation selectors accepted by the instruction emitter.
//!
//! The upstream translator hands operations across as small enums rather than
//! as LLVM opcodes so that one selector can fan out to the integer or the
//! floating-point instruction depending on the operand types, and so that
//! signedness stays a separate argument instead of being baked into the
//! selector.

use std::fmt::{Display, Formatter};

use inkwell::{FloatPredicate, IntPredicate};

/// A two-operand arithmetic or bitwise operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    /// Addition of both operand kinds.
    Add,

    /// Subtraction of both operand kinds.
    Sub,

    /// Multiplication of both operand kinds.
    Mul,

    /// Division; selects the signed or unsigned integer instruction based on
    /// the signedness flag passed alongside the operation.
    Div,

    /// Integer remainder, signed or unsigned.
    Rem,

    /// Bitwise and.
    And,

    /// Bitwise or.
    Or,

    /// Bitwise exclusive or.
    Xor,

    /// Logical shift left.
    Shl,

    /// Shift right; arithmetic when the signedness flag is set.
    Shr,
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Sub",
            BinaryOp::Mul => "Mul",
            BinaryOp::Div => "Div",
            BinaryOp::Rem => "Rem",
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
            BinaryOp::Shl => "Shl",
            BinaryOp::Shr => "Shr",
        };
        write!(f, "{name}")
    }
}

/// A single-operand operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    /// Arithmetic negation of integer or floating-point operands.
    Neg,

    /// Bitwise complement of integer operands.
    Not,
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnaryOp::Neg => "Neg",
            UnaryOp::Not => "Not",
        };
        write!(f, "{name}")
    }
}

/// A comparison selector, independent of operand kind and signedness.
///
/// The selector is resolved to a concrete LLVM predicate by
/// [`int_predicate`] or [`float_predicate`] once the operand types are known.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CmpPredicate {
    /// Equality.
    Eq,

    /// Greater than or equal.
    Ge,

    /// Greater than.
    Gt,

    /// Less than or equal.
    Le,

    /// Less than.
    Lt,

    /// Inequality.
    Ne,
}

impl Display for CmpPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CmpPredicate::Eq => "Eq",
            CmpPredicate::Ge => "Ge",
            CmpPredicate::Gt => "Gt",
            CmpPredicate::Le => "Le",
            CmpPredicate::Lt => "Lt",
            CmpPredicate::Ne => "Ne",
        };
        write!(f, "{name}")
    }
}

/// Resolves a comparison selector to the LLVM integer predicate, taking the
/// requested signedness into account.
///
/// Equality and inequality have no signed variants.
#[must_use]
pub fn int_predicate(predicate: CmpPredicate, signed: bool) -> IntPredicate {
    if signed {
        match predicate {
            CmpPredicate::Eq => IntPredicate::EQ,
            CmpPredicate::Ge => IntPredicate::SGE,
            CmpPredicate::Gt => IntPredicate::SGT,
            CmpPredicate::Le => IntPredicate::SLE,
            CmpPredicate::Lt => IntPredicate::SLT,
            CmpPredicate::Ne => IntPredicate::NE,
        }
    } else {
        match predicate {
            CmpPredicate::Eq => IntPredicate::EQ,
            CmpPredicate::Ge => IntPredicate::UGE,
            CmpPredicate::Gt => IntPredicate::UGT,
            CmpPredicate::Le => IntPredicate::ULE,
            CmpPredicate::Lt => IntPredicate::ULT,
            CmpPredicate::Ne => IntPredicate::NE,
        }
    }
}

/// Resolves a comparison selector to the LLVM floating-point predicate.
///
/// We use the ordered predicates, so every comparison involving a NaN
/// operand is false.
#[must_use]
pub fn float_predicate(predicate: CmpPredicate) -> FloatPredicate {
    match predicate {
        CmpPredicate::Eq => FloatPredicate::OEQ,
        CmpPredicate::Ge => FloatPredicate::OGE,
        CmpPredicate::Gt => FloatPredicate::OGT,
        CmpPredicate::Le => FloatPredicate::OLE,
        CmpPredicate::Lt => FloatPredicate::OLT,
        CmpPredicate::Ne => FloatPredicate::ONE,
    }
}
