//! # GOQL
//!
//! The textual query language of the Features façade. A query is a list of
//! selectors in OR relation; each selector is a type mask plus a
//! conjunction of tag clauses:
//!
//! ```text
//! w[highway=primary][maxspeed>=100]     fast primary ways
//! na[tourism=hotel], na[tourism=motel]  hotels or motels
//! *[name~"Haupt.*"][!opening_hours]     named, hours unknown
//! ```
//!
//! Compilation goes lexer -> parser -> selector chain -> one matcher
//! bytecode program. Key spellings are interned against the store's global
//! string table at compile time, so the hot accept path compares small
//! integers, not strings.

mod compiler;
mod lexer;
mod parser;

pub use compiler::{compile, compile_selectors};
pub use lexer::{Lexer, Token};
pub use parser::{parse_query, Selector, TagClause, TagKey, ValueTest};
