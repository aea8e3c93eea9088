//! # Matcher Compiler
//!
//! Turns a parsed selector chain into one matcher program. Selectors are
//! emitted back to back; a failing test inside a selector jumps to the
//! start of the next one (OR), and falling off the end of a selector's
//! clause list returns 1. The program ends with a shared failure return.
//!
//! Emission per selector:
//!
//! ```text
//! CMP_TYPE mask
//! GOTO_IF_MATCHED(!) -> next        ; wrong type
//! per clause (ascending key order):
//!   FIRST_CLAUSE
//!   LOAD_*_KEY key   (negated for [!k])
//!   required/absent:  GOTO_IF_MATCHED(!) -> next
//!   optional ([k!=v]): GOTO_IF_MATCHED -> tests ; GOTO -> clause end
//!   per value test:   CMP_* ; GOTO_IF_MATCHED(!) -> next
//! RETURN                            ; last test outcome is true here
//! ```

use smallvec::SmallVec;

use eyre::Result;

use crate::feature::FeatureStore;
use crate::matcher::{MatcherProgram, Opcode, ProgramBuilder, SelectorInfo};

use super::parser::{parse_query, Selector, TagClause, TagKey, ValueTest};

/// Compiles GOQL text against a store's key table.
pub fn compile(text: &str, store: &FeatureStore) -> Result<MatcherProgram> {
    let selectors = parse_query(text, store)?;
    compile_selectors(&selectors, text.to_string())
}

pub fn compile_selectors(selectors: &[Selector], source: String) -> Result<MatcherProgram> {
    let mut builder = ProgramBuilder::new();
    let mut info: SmallVec<[SelectorInfo; 4]> = SmallVec::new();

    for selector in selectors {
        info.push(SelectorInfo {
            types: selector.types,
            index_bits: selector.index_bits,
        });

        let mut fail_slots = Vec::new();

        builder.emit_op(Opcode::CmpType, false);
        builder.emit_u32(selector.types.0);
        fail_slots.push(builder.emit_jump(Opcode::GotoIfMatched, true));

        for clause in &selector.clauses {
            emit_clause(&mut builder, clause, &mut fail_slots)?;
        }

        builder.emit_op(Opcode::Return, false);

        let next = builder.here();
        for slot in fail_slots {
            builder.patch(slot, next);
        }
    }

    // Shared failure exit: every selector's fail path lands here with the
    // last test having failed.
    builder.emit_op(Opcode::Return, false);

    Ok(builder.finish(info, source))
}

fn emit_clause(
    builder: &mut ProgramBuilder,
    clause: &TagClause,
    fail_slots: &mut Vec<crate::matcher::JumpSlot>,
) -> Result<()> {
    builder.emit_op(Opcode::FirstClause, false);

    // An optional clause ([k!=v]) loads negated, exactly like [!k]: the
    // test outcome is then "key absent", which doubles as the clause's
    // result when it short-circuits past the value tests.
    let optional = !clause.absent && !clause.required;
    let negate_load = clause.absent || optional;

    match &clause.key {
        TagKey::Global { code, .. } => {
            builder.emit_op(Opcode::LoadGlobalKey, negate_load);
            builder.emit_word(*code);
        }
        TagKey::Local(name) => {
            builder.emit_op(Opcode::LoadLocalKey, negate_load);
            builder.emit_str(name);
        }
    }

    let mut skip_to_end = None;
    if optional {
        // Absent key: clause holds, skip the value tests.
        skip_to_end = Some(builder.emit_jump(Opcode::GotoIfMatched, false));
    } else {
        // Required key missing, or forbidden key present: selector fails.
        fail_slots.push(builder.emit_jump(Opcode::GotoIfMatched, true));
    }

    for test in &clause.tests {
        match test {
            ValueTest::StrEq(value) => {
                builder.emit_op(Opcode::CmpStrEq, false);
                builder.emit_str(value);
            }
            ValueTest::StrNe(value) => {
                builder.emit_op(Opcode::CmpStrEq, true);
                builder.emit_str(value);
            }
            ValueTest::Num(op, value) => {
                builder.emit_op(Opcode::CmpNum, false);
                builder.emit_word(*op as u16);
                builder.emit_f64(*value);
            }
            ValueTest::Regex(pattern) => {
                let index = builder.add_regex(pattern)?;
                builder.emit_op(Opcode::CmpRegex, false);
                builder.emit_word(index);
            }
        }
        fail_slots.push(builder.emit_jump(Opcode::GotoIfMatched, true));
    }

    if let Some(slot) = skip_to_end {
        builder.patch(slot, builder.here());
    }
    Ok(())
}
