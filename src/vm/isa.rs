//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the
//! canonical opcode definitions and invokes a callback macro for code
//! generation, so other modules can generate opcode-related code without
//! duplicating the list.
//!
//! This module generates:
//! - The [`Opcode`] enum with opcode byte mappings
//! - `TryFrom<u8>` for decoding
//! - Mnemonics and per-opcode operand widths
//!
//! # Bytecode Format
//!
//! Instructions are variable-length, little-endian:
//! - Opcode: 1 byte
//! - Register operand: 1 byte (`1..=3` for `r1..r3`)
//! - Immediate i64: 8 bytes
//! - Jump target: 8 bytes (absolute byte offset into the body)
//! - Object identifier: 8 bytes (pmap key)

use crate::vm::errors::VmError;

/// Invokes a callback macro with the complete opcode definition list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Control
            // =========================
            /// HALT ; terminate, yielding the register state as result
            Halt = 0x00, "HALT" => [],
            // =========================
            // Arithmetic
            // =========================
            /// ADD rd, rs1, rs2 ; rd = rs1 + rs2
            Add = 0x01, "ADD" => [rd: Reg, rs1: Reg, rs2: Reg],
            /// SUB rd, rs1, rs2 ; rd = rs1 - rs2
            Sub = 0x02, "SUB" => [rd: Reg, rs1: Reg, rs2: Reg],
            /// MUL rd, rs1, rs2 ; rd = rs1 * rs2
            Mul = 0x03, "MUL" => [rd: Reg, rs1: Reg, rs2: Reg],
            /// DIV rd, rs1, rs2 ; rd = rs1 / rs2 (fault on zero divisor)
            Div = 0x04, "DIV" => [rd: Reg, rs1: Reg, rs2: Reg],
            // =========================
            // Data movement
            // =========================
            /// LOAD rd, id, off ; rd = word at byte offset off in the data
            /// segment of the object registered under id
            Load = 0x05, "LOAD" => [rd: Reg, id: ObjId, offset: ImmU64],
            /// LOADI rd, imm ; rd = imm
            Loadi = 0x06, "LOADI" => [rd: Reg, imm: ImmI64],
            /// MOV rd, rs ; rd = rs
            Mov = 0x07, "MOV" => [rd: Reg, rs: Reg],
            /// INC r ; r = r + 1
            Inc = 0x08, "INC" => [r: Reg],
            /// DEC r ; r = r - 1
            Dec = 0x09, "DEC" => [r: Reg],
            // =========================
            // Comparison / bitwise
            // =========================
            /// CMP rs1, rs2 ; set the condition flag to rs1 <=> rs2
            Cmp = 0x0A, "CMP" => [rs1: Reg, rs2: Reg],
            /// AND rd, rs1, rs2 ; rd = rs1 & rs2
            And = 0x0B, "AND" => [rd: Reg, rs1: Reg, rs2: Reg],
            /// OR rd, rs1, rs2 ; rd = rs1 | rs2
            Or = 0x0C, "OR" => [rd: Reg, rs1: Reg, rs2: Reg],
            /// XOR rd, rs1, rs2 ; rd = rs1 ^ rs2
            Xor = 0x0D, "XOR" => [rd: Reg, rs1: Reg, rs2: Reg],
            /// NOT rd, rs ; rd = !rs (bitwise complement)
            Not = 0x0E, "NOT" => [rd: Reg, rs: Reg],
            // =========================
            // Jumps
            // =========================
            /// JMP target ; ip = target
            Jmp = 0x0F, "JMP" => [target: Addr],
            /// JEQ target ; ip = target if the last CMP was equal
            Jeq = 0x10, "JEQ" => [target: Addr],
            /// JNE target ; ip = target if the last CMP was not equal
            Jne = 0x11, "JNE" => [target: Addr],
            /// JGT target ; ip = target if the last CMP was greater
            Jgt = 0x12, "JGT" => [target: Addr],
            /// JGE target ; ip = target if the last CMP was greater or equal
            Jge = 0x13, "JGE" => [target: Addr],
            /// JLT target ; ip = target if the last CMP was less
            Jlt = 0x14, "JLT" => [target: Addr],
            /// JLE target ; ip = target if the last CMP was less or equal
            Jle = 0x15, "JLE" => [target: Addr],
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        /// One opcode of the instruction set.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        #[repr(u8)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VmError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Opcode::$name), )*
                    _ => Err(VmError::IllegalOpcode {
                        opcode: value,
                        ip: 0,
                    }),
                }
            }
        }

        impl Opcode {
            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Total width of the operands following the opcode byte.
            pub const fn operand_bytes(&self) -> usize {
                match self {
                    $( Opcode::$name => 0 $( + define_opcodes!(@width $kind) )*, )*
                }
            }
        }
    };

    // ---------- operand widths ----------
    (@width Reg)    => { 1 };
    (@width ImmI64) => { 8 };
    (@width ImmU64) => { 8 };
    (@width Addr)   => { 8 };
    (@width ObjId)  => { 8 };
}

for_each_opcode!(define_opcodes);
