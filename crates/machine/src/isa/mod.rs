//! Instruction-set definitions shared by the interpreter.
//!
//! This module holds the encoding constants the decoder keys on:
//! 1. **Opcodes:** Major opcodes and funct3/funct5/funct7 selectors for RV64IMA+Zicsr.
//! 2. **Causes:** Exception and interrupt cause codes for `mcause`/`scause`.

/// Trap cause codes for `mcause` and `scause`.
pub mod cause;

/// Major opcodes and function-field selectors.
pub mod opcodes;
