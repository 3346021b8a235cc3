//! Closed instruction set of the stack machine.
//!
//! Every instruction is a 4-byte native-endian tag, optionally followed by one
//! immediate whose kind is fixed per opcode ([`OperandKind`]). Each opcode has a
//! constant effect on the evaluation stack, except `call` whose effect depends
//! on its argument count operand.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Size of an opcode tag in bytes.
pub const TAG_SIZE: usize = 4;
/// Size of a pointer-width immediate (symbol, string, function ids, branch targets).
pub const PTR_SIZE: usize = 8;

/// Immediate carried by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OperandKind {
    /// No immediate.
    None,
    /// 32-bit integer (slots, argument counts, int constants, packed foreach slots).
    Int32,
    /// 32-bit float constant.
    Float32,
    /// Pointer-width integer (ids and branch addresses).
    Ptr,
}

impl OperandKind {
    /// Encoded size of the immediate.
    pub const fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Int32 | Self::Float32 => 4,
            Self::Ptr => PTR_SIZE,
        }
    }
}

macro_rules! opcodes {
    ($($(#[$doc:meta])* $name:ident = $mnemonic:literal, $operand:ident, $delta:literal;)*) => {
        /// Instruction tags. The discriminant is the encoded tag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[repr(u32)]
        pub enum Opcode {
            $($(#[$doc])* $name,)*
        }

        impl Opcode {
            /// Every opcode, in tag order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            /// Mnemonic used by the disassembler.
            pub const fn mnemonic(self) -> &'static str {
                match self { $(Opcode::$name => $mnemonic,)* }
            }

            /// Kind of immediate following the tag.
            pub const fn operand(self) -> OperandKind {
                match self { $(Opcode::$name => OperandKind::$operand,)* }
            }

            /// Fixed stack delta. `call` is described by [`Opcode::stack_effect`].
            pub const fn stack_delta(self) -> i32 {
                match self { $(Opcode::$name => $delta,)* }
            }
        }
    };
}

opcodes! {
    /// No operation.
    Nop = "nop", None, 0;
    /// Debug line marker.
    Line = "line", None, 0;
    /// `obj -> obj.sym`.
    GetDot = "get-dot", Ptr, 0;
    /// `obj value -> `, stores `obj.sym = value`.
    SetDot = "set-dot", Ptr, -2;
    /// `obj key -> obj[key]`.
    GetIndex = "get-index", None, -1;
    /// `obj key value -> `.
    SetIndex = "set-index", None, -3;
    /// Unconditional branch.
    Branch = "bra", Ptr, 0;
    /// Pops and branches when zero.
    BranchZero = "brz", Ptr, -1;
    /// Pops and branches when non-zero.
    BranchNonZero = "brnz", Ptr, -1;
    /// Branches when zero, keeping the value.
    BranchZeroKeep = "brzk", Ptr, 0;
    /// Branches when non-zero, keeping the value.
    BranchNonZeroKeep = "brnzk", Ptr, 0;
    /// `this fn args.. -> result`, operand = argument count.
    Call = "call", Int32, -1;
    /// Returns null.
    Return = "ret", None, 0;
    /// Returns the popped value.
    ReturnValue = "retv", None, -1;
    /// `table iter -> table iter' more`, operand = (key slot << 16) | value slot.
    Foreach = "foreach", Int32, 1;
    /// Drops the top.
    Pop = "pop", None, -1;
    /// Drops the two top values.
    Pop2 = "pop2", None, -2;
    /// Duplicates the top.
    Dup = "dup", None, 1;
    /// Duplicates the two top values.
    Dup2 = "dup2", None, 2;
    /// Swaps the two top values.
    Swap = "swap", None, 0;
    /// Pushes null.
    PushNull = "push-null", None, 1;
    /// Pushes an int immediate.
    PushInt = "push-int", Int32, 1;
    /// Pushes 0.
    PushInt0 = "push-int-0", None, 1;
    /// Pushes 1.
    PushInt1 = "push-int-1", None, 1;
    /// Pushes a float immediate.
    PushFloat = "push-fp", Float32, 1;
    /// Pushes a string by id.
    PushString = "push-str", Ptr, 1;
    /// Pushes a new table.
    PushTable = "push-tbl", None, 1;
    /// Pushes a function by id.
    PushFunction = "push-fn", Ptr, 1;
    /// Pushes the receiver.
    PushThis = "push-this", None, 1;
    /// Pushes a local slot.
    GetLocal = "get-local", Int32, 1;
    /// Pops into a local slot.
    SetLocal = "set-local", Int32, -1;
    /// Pushes a global by symbol id.
    GetGlobal = "get-global", Ptr, 1;
    /// Pops into a global.
    SetGlobal = "set-global", Ptr, -1;
    /// Pushes a member of the receiver.
    GetThis = "get-this", Ptr, 1;
    /// Pops into a member of the receiver.
    SetThis = "set-this", Ptr, -1;
    /// `a b -> a + b`.
    Add = "add", None, -1;
    /// `a b -> a - b`.
    Sub = "sub", None, -1;
    /// `a b -> a * b`.
    Mul = "mul", None, -1;
    /// `a b -> a / b`.
    Div = "div", None, -1;
    /// `a b -> a % b`.
    Rem = "rem", None, -1;
    /// Bitwise or.
    BitOr = "bit-or", None, -1;
    /// Bitwise xor.
    BitXor = "bit-xor", None, -1;
    /// Bitwise and.
    BitAnd = "bit-and", None, -1;
    /// Shift left.
    Shl = "shl", None, -1;
    /// Shift right.
    Shr = "shr", None, -1;
    /// Bitwise complement.
    BitInv = "bit-inv", None, 0;
    /// Less than.
    Lt = "lt", None, -1;
    /// Greater than.
    Gt = "gt", None, -1;
    /// Less or equal.
    Lte = "lte", None, -1;
    /// Greater or equal.
    Gte = "gte", None, -1;
    /// Equality.
    Eq = "eq", None, -1;
    /// Inequality.
    Neq = "neq", None, -1;
    /// Arithmetic negation.
    Neg = "neg", None, 0;
    /// Unary plus.
    Pos = "pos", None, 0;
    /// Logical not.
    Not = "not", None, 0;
}

impl Opcode {
    /// Encoded tag.
    pub const fn tag(self) -> u32 { self as u32 }

    /// Decodes a tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        usize::try_from(tag).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Total encoded length (tag + immediate).
    pub const fn encoded_len(self) -> usize { TAG_SIZE + self.operand().size() }

    /// Stack effect of one execution, given the raw 32-bit operand.
    /// `call n` consumes the receiver, the callable and `n` arguments and
    /// leaves one result: `-(n + 1)`.
    pub fn stack_effect(self, operand: u32) -> i32 {
        match self {
            Self::Call => -(i32::try_from(operand).unwrap_or(i32::MAX - 1) + 1),
            other => other.stack_delta(),
        }
    }

    /// True for the five branch instructions (their immediate is a code address).
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Self::Branch
                | Self::BranchZero
                | Self::BranchNonZero
                | Self::BranchZeroKeep
                | Self::BranchNonZeroKeep
        )
    }
}

/// Packs foreach key/value slots into the `foreach` immediate.
pub const fn pack_foreach(key_slot: u16, value_slot: u16) -> u32 {
    ((key_slot as u32) << 16) | value_slot as u32
}

/// Inverse of [`pack_foreach`].
pub const fn unpack_foreach(operand: u32) -> (u16, u16) {
    ((operand >> 16) as u16, (operand & 0xFFFF) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tags_are_dense_and_decodable() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.tag() as usize, i);
            assert_eq!(Opcode::from_tag(op.tag()), Some(*op));
        }
        assert_eq!(Opcode::from_tag(Opcode::ALL.len() as u32), None);
    }

    #[test]
    fn call_effect_depends_on_argc() {
        assert_eq!(Opcode::Call.stack_effect(0), -1);
        assert_eq!(Opcode::Call.stack_effect(3), -4);
        assert_eq!(Opcode::SetDot.stack_effect(99), -2);
    }

    #[test]
    fn encoded_lengths() {
        assert_eq!(Opcode::Return.encoded_len(), 4);
        assert_eq!(Opcode::PushFloat.encoded_len(), 8);
        assert_eq!(Opcode::Branch.encoded_len(), 12);
        assert!(Opcode::BranchZeroKeep.is_branch());
        assert!(!Opcode::Call.is_branch());
    }

    #[test]
    fn foreach_packing() {
        let packed = pack_foreach(3, 7);
        assert_eq!(packed, 0x0003_0007);
        assert_eq!(unpack_foreach(packed), (3, 7));
    }
}
