//! # Matcher Engine
//!
//! The interpreter for compiled matcher programs. One `run` call walks the
//! instruction stream against a single feature record; the engine state is
//! a handful of stack locals — instruction pointer, the last test outcome,
//! and the lazily resolved value offset of the most recently loaded tag.
//!
//! The engine allocates nothing and never panics on malformed programs:
//! every fetch is bounds-checked and any inconsistency fails closed by
//! returning 0. Successive comparisons against the same key reuse the
//! loaded value offset, so `[k>10][k<20]` scans the tag table once.

use crate::feature::{RecordView, TagTable};

use super::{MatcherProgram, NumOp, Opcode};

struct Engine<'a> {
    code: &'a [u16],
    ip: usize,
    matched: bool,
    /// Offset of the loaded tag's value in the payload, if the last load
    /// hit. Reset by each load, reused by every comparison after it.
    value_ofs: Option<u32>,
    tags: Option<TagTable<'a>>,
}

pub(super) fn run(program: &MatcherProgram, record: &RecordView<'_>) -> i32 {
    let mut engine = Engine {
        code: program.code(),
        ip: 0,
        matched: false,
        value_ofs: None,
        tags: None,
    };

    loop {
        let Some(&word) = engine.code.get(engine.ip) else {
            return 0;
        };
        engine.ip += 1;
        let Some(op) = Opcode::from_word(word) else {
            return 0;
        };
        let negate = Opcode::is_negated(word);

        match op {
            Opcode::Return => return engine.matched as i32,
            Opcode::FirstClause => {}
            Opcode::Goto => {
                if !engine.jump() {
                    return 0;
                }
            }
            Opcode::GotoIfMatched => {
                if engine.matched ^ negate {
                    if !engine.jump() {
                        return 0;
                    }
                } else {
                    engine.ip += 1;
                }
            }
            Opcode::LoadGlobalKey => {
                let Some(key) = engine.fetch_word() else {
                    return 0;
                };
                let hit = engine.tags(record).and_then(|t| t.find_global(key));
                engine.value_ofs = hit;
                engine.matched = hit.is_some() ^ negate;
            }
            Opcode::LoadLocalKey => {
                let Some((ofs, len)) = engine.fetch_str() else {
                    return 0;
                };
                let hit = engine.find_local(record, ofs, len);
                engine.value_ofs = hit;
                engine.matched = hit.is_some() ^ negate;
            }
            Opcode::CmpStrEq => {
                let Some((ofs, len)) = engine.fetch_str() else {
                    return 0;
                };
                let eq = match engine.value(record) {
                    Some(value) => operand_eq(engine.code, ofs, len, value.as_bytes()),
                    None => false,
                };
                engine.matched = eq ^ negate;
            }
            Opcode::CmpNum => {
                let Some(num_op) = engine.fetch_word().and_then(NumOp::from_word) else {
                    return 0;
                };
                let Some(rhs) = engine.fetch_f64() else {
                    return 0;
                };
                let outcome = match engine.value(record).and_then(|v| v.parse::<f64>().ok()) {
                    Some(lhs) => num_op.eval(lhs, rhs),
                    // A value that is not a number differs from every
                    // number and equals none.
                    None => num_op == NumOp::Ne,
                };
                engine.matched = outcome ^ negate;
            }
            Opcode::CmpRegex => {
                let Some(index) = engine.fetch_word() else {
                    return 0;
                };
                let Some(regex) = program.regexes().get(index as usize) else {
                    return 0;
                };
                let hit = engine
                    .value(record)
                    .map(|v| regex.is_match(v))
                    .unwrap_or(false);
                engine.matched = hit ^ negate;
            }
            Opcode::CmpType => {
                let Some(mask) = engine.fetch_u32() else {
                    return 0;
                };
                let hit = match record.feature_type() {
                    Ok(t) => mask & (1 << t as u32) != 0,
                    Err(_) => false,
                };
                engine.matched = hit ^ negate;
            }
        }
    }
}

impl<'a> Engine<'a> {
    /// Takes the i16 offset at `ip` and jumps relative to it. False on any
    /// out-of-bounds target (the caller fails closed).
    fn jump(&mut self) -> bool {
        let Some(&offset) = self.code.get(self.ip) else {
            return false;
        };
        let target = self.ip as isize + offset as i16 as isize;
        if target < 0 || target as usize > self.code.len() {
            return false;
        }
        self.ip = target as usize;
        true
    }

    fn fetch_word(&mut self) -> Option<u16> {
        let word = *self.code.get(self.ip)?;
        self.ip += 1;
        Some(word)
    }

    /// Consumes a string operand; returns its (word offset, byte length).
    fn fetch_str(&mut self) -> Option<(usize, usize)> {
        let len = self.fetch_word()? as usize;
        let words = len.div_ceil(2);
        let ofs = self.ip;
        if ofs + words > self.code.len() {
            return None;
        }
        self.ip += words;
        Some((ofs, len))
    }

    fn fetch_f64(&mut self) -> Option<f64> {
        if self.ip + 4 > self.code.len() {
            return None;
        }
        let mut bits = 0u64;
        for i in 0..4 {
            bits |= (self.code[self.ip + i] as u64) << (16 * i);
        }
        self.ip += 4;
        Some(f64::from_bits(bits))
    }

    fn fetch_u32(&mut self) -> Option<u32> {
        let lo = self.fetch_word()? as u32;
        let hi = self.fetch_word()? as u32;
        Some(lo | (hi << 16))
    }

    fn tags(&mut self, record: &RecordView<'a>) -> Option<TagTable<'a>> {
        if self.tags.is_none() {
            self.tags = record.tags().ok();
        }
        self.tags
    }

    fn value(&mut self, record: &RecordView<'a>) -> Option<&'a str> {
        let ofs = self.value_ofs?;
        self.tags(record)?.value_at(ofs)
    }

    fn find_local(&mut self, record: &RecordView<'a>, ofs: usize, len: usize) -> Option<u32> {
        let tags = self.tags(record)?;
        let code = self.code;
        for (key_ofs, value_ofs) in tags.local_entries() {
            if let Some(key) = tags.value_at(key_ofs) {
                if operand_eq(code, ofs, len, key.as_bytes()) {
                    return Some(value_ofs);
                }
            }
        }
        None
    }
}

/// Compares a packed string operand against raw bytes without unpacking.
fn operand_eq(code: &[u16], word_ofs: usize, len: usize, other: &[u8]) -> bool {
    if other.len() != len {
        return false;
    }
    for (j, &expected) in other.iter().enumerate() {
        let word = code[word_ofs + j / 2];
        let byte = (word >> ((j & 1) * 8)) as u8;
        if byte != expected {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::feature::{
        write_varstr, FeatureType, FeatureTypes, GlobalTagEntry, LocalTagEntry, RawRecord,
        TilePayload, RECORD_SIZE,
    };
    use crate::geom::BBox;
    use crate::matcher::{ProgramBuilder, SelectorInfo};
    use zerocopy::IntoBytes;

    /// Builds a single-feature payload with the given global and local tags.
    fn payload_with_tags(
        feature_type: FeatureType,
        globals: &[(u16, &str)],
        locals: &[(&str, &str)],
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        let record_ofs = bytes.len();
        bytes.resize(record_ofs + RECORD_SIZE, 0);

        let mut global_entries = Vec::new();
        for &(code, value) in globals {
            let value_ofs = bytes.len() as u32;
            write_varstr(&mut bytes, value);
            global_entries.push(GlobalTagEntry::new(code, value_ofs));
        }
        let mut local_entries = Vec::new();
        for &(key, value) in locals {
            let key_ofs = bytes.len() as u32;
            write_varstr(&mut bytes, key);
            let value_ofs = bytes.len() as u32;
            write_varstr(&mut bytes, value);
            local_entries.push(LocalTagEntry::new(key_ofs, value_ofs));
        }

        let tag_ofs = bytes.len() as u32;
        bytes.extend_from_slice(&(global_entries.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(local_entries.len() as u16).to_le_bytes());
        for entry in &global_entries {
            bytes.extend_from_slice(entry.as_bytes());
        }
        for entry in &local_entries {
            bytes.extend_from_slice(entry.as_bytes());
        }

        let record = RawRecord::new(
            feature_type,
            1,
            BBox::new(0, 0, 0, 0),
            tag_ofs,
            !local_entries.is_empty(),
        );
        bytes[record_ofs..record_ofs + RECORD_SIZE].copy_from_slice(record.as_bytes());
        bytes
    }

    fn run_program(builder: ProgramBuilder, bytes: &[u8]) -> i32 {
        let program = builder.finish(
            smallvec![SelectorInfo {
                types: FeatureTypes::ALL,
                index_bits: 0,
            }],
            String::new(),
        );
        let payload = TilePayload::parse(1, bytes).unwrap();
        let record = payload.record_at(8).unwrap();
        program.accept(&record)
    }

    /// `[key=value]` as the compiler would emit it.
    fn key_eq_value_program(key_code: u16, value: &str) -> ProgramBuilder {
        let mut b = ProgramBuilder::new();
        b.emit_op(Opcode::LoadGlobalKey, false);
        b.emit_word(key_code);
        let fail = b.emit_jump(Opcode::GotoIfMatched, true);
        b.emit_op(Opcode::CmpStrEq, false);
        b.emit_str(value);
        let done = b.here();
        b.patch(fail, done);
        b.emit_op(Opcode::Return, false);
        b
    }

    #[test]
    fn key_eq_accepts_matching_value() {
        let bytes = payload_with_tags(FeatureType::Way, &[(3, "primary")], &[]);

        assert_eq!(run_program(key_eq_value_program(3, "primary"), &bytes), 1);
    }

    #[test]
    fn key_eq_rejects_other_value() {
        let bytes = payload_with_tags(FeatureType::Way, &[(3, "secondary")], &[]);

        assert_eq!(run_program(key_eq_value_program(3, "primary"), &bytes), 0);
    }

    #[test]
    fn key_eq_rejects_missing_key() {
        let bytes = payload_with_tags(FeatureType::Way, &[], &[]);

        assert_eq!(run_program(key_eq_value_program(3, "primary"), &bytes), 0);
    }

    #[test]
    fn matcher_is_deterministic() {
        let bytes = payload_with_tags(FeatureType::Way, &[(3, "primary")], &[]);
        let program = key_eq_value_program(3, "primary").finish(
            smallvec![SelectorInfo {
                types: FeatureTypes::ALL,
                index_bits: 0,
            }],
            String::new(),
        );
        let payload = TilePayload::parse(1, &bytes).unwrap();
        let record = payload.record_at(8).unwrap();

        let first = program.accept(&record);
        for _ in 0..10 {
            assert_eq!(program.accept(&record), first);
        }
    }

    #[test]
    fn local_key_load_and_compare() {
        let bytes = payload_with_tags(FeatureType::Node, &[], &[("note", "keep")]);

        let mut b = ProgramBuilder::new();
        b.emit_op(Opcode::LoadLocalKey, false);
        b.emit_str("note");
        let fail = b.emit_jump(Opcode::GotoIfMatched, true);
        b.emit_op(Opcode::CmpStrEq, false);
        b.emit_str("keep");
        let done = b.here();
        b.patch(fail, done);
        b.emit_op(Opcode::Return, false);

        assert_eq!(run_program(b, &bytes), 1);
    }

    #[test]
    fn negated_load_implements_key_absence() {
        // [!fee] — accept when the key is missing
        let make = || {
            let mut b = ProgramBuilder::new();
            b.emit_op(Opcode::LoadGlobalKey, true);
            b.emit_word(9);
            b.emit_op(Opcode::Return, false);
            b
        };

        let without = payload_with_tags(FeatureType::Node, &[], &[]);
        let with = payload_with_tags(FeatureType::Node, &[(9, "yes")], &[]);

        assert_eq!(run_program(make(), &without), 1);
        assert_eq!(run_program(make(), &with), 0);
    }

    #[test]
    fn numeric_comparison_parses_values() {
        let program = |op: NumOp, rhs: f64| {
            let mut b = ProgramBuilder::new();
            b.emit_op(Opcode::LoadGlobalKey, false);
            b.emit_word(1);
            let fail = b.emit_jump(Opcode::GotoIfMatched, true);
            b.emit_op(Opcode::CmpNum, false);
            b.emit_word(op as u16);
            b.emit_f64(rhs);
            let done = b.here();
            b.patch(fail, done);
            b.emit_op(Opcode::Return, false);
            b
        };

        let bytes = payload_with_tags(FeatureType::Way, &[(1, "50")], &[]);
        assert_eq!(run_program(program(NumOp::Gt, 30.0), &bytes), 1);
        assert_eq!(run_program(program(NumOp::Gt, 50.0), &bytes), 0);
        assert_eq!(run_program(program(NumOp::Le, 50.0), &bytes), 1);

        // Non-numeric value: only `!=` holds.
        let text = payload_with_tags(FeatureType::Way, &[(1, "fast")], &[]);
        assert_eq!(run_program(program(NumOp::Eq, 50.0), &text), 0);
        assert_eq!(run_program(program(NumOp::Ne, 50.0), &text), 1);
    }

    #[test]
    fn regex_matches_whole_value() {
        let make = |pattern: &str| {
            let mut b = ProgramBuilder::new();
            b.emit_op(Opcode::LoadGlobalKey, false);
            b.emit_word(2);
            let fail = b.emit_jump(Opcode::GotoIfMatched, true);
            let index = b.add_regex(pattern).unwrap();
            b.emit_op(Opcode::CmpRegex, false);
            b.emit_word(index);
            let done = b.here();
            b.patch(fail, done);
            b.emit_op(Opcode::Return, false);
            b
        };

        let bytes = payload_with_tags(FeatureType::Way, &[(2, "primary_link")], &[]);
        assert_eq!(run_program(make("primary.*"), &bytes), 1);
        // Unanchored substring must not match the whole value.
        assert_eq!(run_program(make("primary"), &bytes), 0);
        assert_eq!(run_program(make(".*link"), &bytes), 1);
    }

    #[test]
    fn type_mask_gates_feature_types() {
        let make = |mask: u32| {
            let mut b = ProgramBuilder::new();
            b.emit_op(Opcode::CmpType, false);
            b.emit_u32(mask);
            b.emit_op(Opcode::Return, false);
            b
        };

        let node = payload_with_tags(FeatureType::Node, &[], &[]);
        let way = payload_with_tags(FeatureType::Way, &[], &[]);

        assert_eq!(run_program(make(FeatureTypes::NODES.0), &node), 1);
        assert_eq!(run_program(make(FeatureTypes::NODES.0), &way), 0);
        assert_eq!(run_program(make(FeatureTypes::AREAS.0), &way), 1);
    }

    #[test]
    fn unknown_opcode_fails_closed() {
        let mut b = ProgramBuilder::new();
        b.emit_word(0xFE);

        let bytes = payload_with_tags(FeatureType::Node, &[], &[]);
        assert_eq!(run_program(b, &bytes), 0);
    }

    #[test]
    fn truncated_program_fails_closed() {
        let mut b = ProgramBuilder::new();
        b.emit_op(Opcode::LoadGlobalKey, false); // operand missing

        let bytes = payload_with_tags(FeatureType::Node, &[], &[]);
        assert_eq!(run_program(b, &bytes), 0);
    }

    #[test]
    fn wild_jump_fails_closed() {
        let mut b = ProgramBuilder::new();
        b.emit_op(Opcode::Goto, false);
        b.emit_word(0x7FFF);

        let bytes = payload_with_tags(FeatureType::Node, &[], &[]);
        assert_eq!(run_program(b, &bytes), 0);
    }

    #[test]
    fn empty_program_returns_zero() {
        let b = ProgramBuilder::new();
        let bytes = payload_with_tags(FeatureType::Node, &[], &[]);

        assert_eq!(run_program(b, &bytes), 0);
    }
}
