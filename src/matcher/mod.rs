//! # Matcher Programs
//!
//! A matcher is a compact bytecode program that accepts or rejects a
//! feature based on its type and tags. Programs are compiled from GOQL by
//! the query layer and interpreted by [`engine`]; one program serves a
//! whole query (selectors in OR relation are chained with jumps).
//!
//! ## Instruction encoding
//!
//! The instruction stream is a sequence of 16-bit words. Each operation
//! word carries the opcode in its low byte and the **negate** flag in bit
//! 8; operands follow inline:
//!
//! | Opcode          | Operands                  | Semantics |
//! |-----------------|---------------------------|-----------|
//! | `Return`        | —                         | result = last test (0/1) |
//! | `Goto`          | i16 offset                | unconditional jump |
//! | `GotoIfMatched` | i16 offset                | jump if last test (xor negate) |
//! | `LoadGlobalKey` | u16 key code              | find tag by interned key |
//! | `LoadLocalKey`  | varstr                    | find tag by inline key |
//! | `CmpStrEq`      | varstr                    | loaded value == operand |
//! | `CmpNum`        | u16 op, f64 (4 words)     | numeric compare of loaded value |
//! | `CmpRegex`      | u16 pool index            | whole-value regex match |
//! | `CmpType`       | u32 mask (2 words)        | feature type in mask |
//! | `FirstClause`   | —                         | clause entry marker (no-op) |
//!
//! Jump offsets are in words, relative to the operand's own position; the
//! not-taken path resumes one word past the operand. String operands are a
//! u16 byte length followed by the bytes packed low-byte-first into words.
//! Doubles are `f64::to_bits` split into four words, lowest first.
//!
//! The interpreter performs no allocation and never traps: any malformed
//! fetch — unknown opcode, truncated operand, jump out of bounds — makes
//! the program fail closed (return 0).

pub mod engine;

use eyre::Result;
use regex::Regex;
use smallvec::SmallVec;

use crate::feature::FeatureTypes;

/// Comparison selector for `CmpNum`'s first operand word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NumOp {
    Eq = 0,
    Ne = 1,
    Lt = 2,
    Le = 3,
    Gt = 4,
    Ge = 5,
}

impl NumOp {
    fn from_word(word: u16) -> Option<NumOp> {
        match word {
            0 => Some(NumOp::Eq),
            1 => Some(NumOp::Ne),
            2 => Some(NumOp::Lt),
            3 => Some(NumOp::Le),
            4 => Some(NumOp::Gt),
            5 => Some(NumOp::Ge),
            _ => None,
        }
    }

    pub fn eval(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            NumOp::Eq => lhs == rhs,
            NumOp::Ne => lhs != rhs,
            NumOp::Lt => lhs < rhs,
            NumOp::Le => lhs <= rhs,
            NumOp::Gt => lhs > rhs,
            NumOp::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Return = 0,
    Goto = 1,
    GotoIfMatched = 2,
    LoadGlobalKey = 3,
    LoadLocalKey = 4,
    CmpStrEq = 5,
    CmpNum = 6,
    CmpRegex = 7,
    CmpType = 8,
    FirstClause = 9,
}

impl Opcode {
    pub const NEGATE_BIT: u16 = 1 << 8;

    fn from_word(word: u16) -> Option<Opcode> {
        match (word & 0xFF) as u8 {
            0 => Some(Opcode::Return),
            1 => Some(Opcode::Goto),
            2 => Some(Opcode::GotoIfMatched),
            3 => Some(Opcode::LoadGlobalKey),
            4 => Some(Opcode::LoadLocalKey),
            5 => Some(Opcode::CmpStrEq),
            6 => Some(Opcode::CmpNum),
            7 => Some(Opcode::CmpRegex),
            8 => Some(Opcode::CmpType),
            9 => Some(Opcode::FirstClause),
            _ => None,
        }
    }

    pub fn is_negated(word: u16) -> bool {
        word & Self::NEGATE_BIT != 0
    }
}

/// Per-selector facts the pipeline uses before any feature is touched:
/// which types the selector can accept at all, and which key categories it
/// requires from a tile.
#[derive(Debug, Clone, Copy)]
pub struct SelectorInfo {
    pub types: FeatureTypes,
    pub index_bits: u32,
}

/// A compiled, immutable matcher. Shared between `Features` handles by
/// reference count; the constant pool (inline strings, regexes) lives and
/// dies with it.
#[derive(Debug)]
pub struct MatcherProgram {
    code: Vec<u16>,
    regexes: Vec<Regex>,
    selectors: SmallVec<[SelectorInfo; 4]>,
    source: String,
}

impl MatcherProgram {
    pub(crate) fn new(
        code: Vec<u16>,
        regexes: Vec<Regex>,
        selectors: SmallVec<[SelectorInfo; 4]>,
        source: String,
    ) -> Self {
        Self {
            code,
            regexes,
            selectors,
            source,
        }
    }

    /// The GOQL text this program was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn code(&self) -> &[u16] {
        &self.code
    }

    pub(crate) fn regexes(&self) -> &[Regex] {
        &self.regexes
    }

    /// Union of the types any selector can accept.
    pub fn accepted_types(&self) -> FeatureTypes {
        self.selectors
            .iter()
            .fold(FeatureTypes::NONE, |acc, s| acc.union(s.types))
    }

    /// Coarse tile test: can any selector be satisfied by a tile whose
    /// payload advertises `tile_index_bits`? A selector requires all of its
    /// `index_bits` categories to be present.
    pub fn can_match_tile(&self, tile_index_bits: u32) -> bool {
        self.selectors
            .iter()
            .any(|s| s.index_bits & !tile_index_bits == 0)
    }

    /// Runs the program against one feature record. 1 = accepted, 0 =
    /// rejected (higher values are reserved for multi-way selectors).
    pub fn accept(&self, record: &crate::feature::RecordView<'_>) -> i32 {
        engine::run(self, record)
    }
}

/// Emits matcher code; the query compiler drives this.
#[derive(Debug, Default)]
pub(crate) struct ProgramBuilder {
    code: Vec<u16>,
    regexes: Vec<Regex>,
}

/// Position of a jump operand awaiting its target.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JumpSlot(usize);

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn emit_op(&mut self, op: Opcode, negate: bool) {
        let word = op as u16 | if negate { Opcode::NEGATE_BIT } else { 0 };
        self.code.push(word);
    }

    pub fn emit_word(&mut self, word: u16) {
        self.code.push(word);
    }

    /// Emits a jump and returns its operand slot for later patching.
    pub fn emit_jump(&mut self, op: Opcode, negate: bool) -> JumpSlot {
        self.emit_op(op, negate);
        let slot = self.code.len();
        self.code.push(0);
        JumpSlot(slot)
    }

    pub fn patch(&mut self, slot: JumpSlot, target: usize) {
        let offset = target as isize - slot.0 as isize;
        debug_assert!(offset >= i16::MIN as isize && offset <= i16::MAX as isize);
        self.code[slot.0] = offset as i16 as u16;
    }

    pub fn emit_str(&mut self, s: &str) {
        debug_assert!(s.len() <= u16::MAX as usize);
        self.code.push(s.len() as u16);
        let bytes = s.as_bytes();
        for pair in bytes.chunks(2) {
            let word = pair[0] as u16 | ((*pair.get(1).unwrap_or(&0) as u16) << 8);
            self.code.push(word);
        }
    }

    pub fn emit_f64(&mut self, value: f64) {
        let bits = value.to_bits();
        for i in 0..4 {
            self.code.push((bits >> (16 * i)) as u16);
        }
    }

    pub fn emit_u32(&mut self, value: u32) {
        self.code.push(value as u16);
        self.code.push((value >> 16) as u16);
    }

    /// Compiles and interns a regex; `~` matches the whole value, so the
    /// pattern is anchored.
    pub fn add_regex(&mut self, pattern: &str) -> Result<u16> {
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored)
            .map_err(|e| eyre::eyre!("invalid regex pattern '{}': {}", pattern, e))?;
        let index = self.regexes.len();
        self.regexes.push(regex);
        Ok(index as u16)
    }

    pub fn finish(
        self,
        selectors: SmallVec<[SelectorInfo; 4]>,
        source: String,
    ) -> MatcherProgram {
        MatcherProgram::new(self.code, self.regexes, selectors, source)
    }
}
