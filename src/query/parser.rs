//! # GOQL Parser
//!
//! Recursive descent over the token stream, producing a chain of
//! [`Selector`]s (OR relation). Each selector carries an accepted-type
//! mask and its tag clauses in ascending key order; a clause repeated for
//! the same key is *absorbed* into the existing clause, so a selector has
//! at most one clause per key.
//!
//! Grammar:
//!
//! ```text
//! query    := selector (',' selector)*
//! selector := types? clause*
//! types    := '*' | letters        (letters from n, w, a, r)
//! clause   := '[' '!' key ']'
//!           | '[' key ']'
//!           | '[' key op value ']'
//! op       := '=' | '!=' | '<' | '<=' | '>' | '>=' | '~'
//! key      := identifier | string
//! value    := identifier | string | number
//! ```
//!
//! Key spellings are resolved against the store's global-string table at
//! parse time; unknown keys become local-key clauses.

use smallvec::SmallVec;

use eyre::Result;

use crate::error::QueryError;
use crate::feature::{key_category_bit, FeatureStore, FeatureTypes};
use crate::matcher::NumOp;

use super::lexer::{Lexer, Token};

/// How a clause tests the loaded tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTest {
    StrEq(String),
    StrNe(String),
    Num(NumOp, f64),
    Regex(String),
}

/// A tag key, ordered globals-by-code first, then locals by name. Global
/// keys scan faster and sort deterministically, so clause emission keeps
/// this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagKey {
    Global { code: u16, name: String },
    Local(String),
}

impl TagKey {
    pub fn name(&self) -> &str {
        match self {
            TagKey::Global { name, .. } => name,
            TagKey::Local(name) => name,
        }
    }

    fn order_key(&self) -> (u8, u16, &str) {
        match self {
            TagKey::Global { code, .. } => (0, *code, ""),
            TagKey::Local(name) => (1, 0, name),
        }
    }
}

/// One `[...]` clause after absorption.
#[derive(Debug, Clone, PartialEq)]
pub struct TagClause {
    pub key: TagKey,
    /// `[!k]` — the key must be absent.
    pub absent: bool,
    /// The key must be present for the clause to hold (`[k]`, `[k=v]`,
    /// `[k<v]`, `[k~p]`). A pure `[k!=v]` clause also holds on absence.
    pub required: bool,
    pub tests: SmallVec<[ValueTest; 2]>,
}

/// One conjunction of clauses plus a type mask; a query is a list of
/// selectors in OR relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub types: FeatureTypes,
    pub index_bits: u32,
    pub clauses: Vec<TagClause>,
}

impl Selector {
    pub fn new(types: FeatureTypes) -> Self {
        Self {
            types,
            index_bits: 0,
            clauses: Vec::new(),
        }
    }

    /// Inserts a clause in ascending key order; an existing clause with the
    /// same key absorbs the new one instead.
    pub fn add_clause(&mut self, clause: TagClause) {
        let mut insert_at = self.clauses.len();
        let mut absorb_at = None;
        for (i, current) in self.clauses.iter().enumerate() {
            match current.key.order_key().cmp(&clause.key.order_key()) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => {
                    absorb_at = Some(i);
                    break;
                }
                std::cmp::Ordering::Greater => {
                    insert_at = i;
                    break;
                }
            }
        }
        match absorb_at {
            Some(i) => self.clauses[i].absorb(clause),
            None => self.clauses.insert(insert_at, clause),
        }
        self.recompute_index_bits();
    }

    fn recompute_index_bits(&mut self) {
        self.index_bits = 0;
        for clause in &self.clauses {
            if clause.required {
                if let TagKey::Global { code, .. } = clause.key {
                    self.index_bits |= key_category_bit(code);
                }
            }
        }
    }
}

impl TagClause {
    fn absorb(&mut self, other: TagClause) {
        debug_assert_eq!(self.key, other.key);
        self.absent |= other.absent;
        self.required |= other.required;
        self.tests.extend(other.tests);
    }
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    store: &'a FeatureStore,
    token: Token<'a>,
    column: usize,
}

/// Parses GOQL text into its selector chain.
pub fn parse_query<'a>(text: &'a str, store: &'a FeatureStore) -> Result<Vec<Selector>> {
    let mut parser = Parser::new(text, store)?;
    parser.query()
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, store: &'a FeatureStore) -> Result<Self> {
        let mut lexer = Lexer::new(text);
        let (token, column) = lexer.next_token()?;
        Ok(Self {
            lexer,
            store,
            token,
            column,
        })
    }

    fn advance(&mut self) -> Result<()> {
        let (token, column) = self.lexer.next_token()?;
        self.token = token;
        self.column = column;
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> eyre::Report {
        QueryError::Syntax {
            column: self.column,
            message: message.into(),
        }
        .into()
    }

    fn query(&mut self) -> Result<Vec<Selector>> {
        let mut selectors = vec![self.selector()?];
        while self.token == Token::Comma {
            self.advance()?;
            selectors.push(self.selector()?);
        }
        if self.token != Token::Eof {
            return Err(self.error(format!(
                "expected ',' or end of query, found {}",
                self.token.describe()
            )));
        }
        Ok(selectors)
    }

    fn selector(&mut self) -> Result<Selector> {
        let types = match self.token {
            Token::Star => {
                self.advance()?;
                FeatureTypes::ALL
            }
            Token::Ident(letters) => {
                let types = self.type_letters(letters)?;
                self.advance()?;
                types
            }
            // A selector may start directly with its first clause.
            Token::LBracket => FeatureTypes::ALL,
            _ => {
                return Err(self.error(format!(
                    "expected a type selector or '[', found {}",
                    self.token.describe()
                )))
            }
        };

        let mut selector = Selector::new(types);
        while self.token == Token::LBracket {
            let clause = self.clause()?;
            selector.add_clause(clause);
        }
        Ok(selector)
    }

    fn type_letters(&self, letters: &str) -> Result<FeatureTypes> {
        let mut types = FeatureTypes::NONE;
        for (i, c) in letters.chars().enumerate() {
            types = types.union(match c {
                'n' => FeatureTypes::NODES,
                'w' => FeatureTypes::WAYS,
                'a' => FeatureTypes::AREAS,
                'r' => FeatureTypes::RELATIONS,
                _ => {
                    return Err(QueryError::Syntax {
                        column: self.column + i,
                        message: format!("unknown type letter '{}'", c),
                    }
                    .into())
                }
            });
        }
        Ok(types)
    }

    fn clause(&mut self) -> Result<TagClause> {
        debug_assert_eq!(self.token, Token::LBracket);
        self.advance()?;

        if self.token == Token::Bang {
            self.advance()?;
            let key = self.key()?;
            self.expect_rbracket()?;
            return Ok(TagClause {
                key,
                absent: true,
                required: false,
                tests: SmallVec::new(),
            });
        }

        let key = self.key()?;
        let (required, tests) = match self.token {
            Token::RBracket => (true, SmallVec::new()),
            Token::Eq => {
                self.advance()?;
                let test = self.equality_test(false)?;
                (true, SmallVec::from_elem(test, 1))
            }
            Token::Ne => {
                self.advance()?;
                let test = self.equality_test(true)?;
                // `[k!=v]` also holds when k is absent.
                (false, SmallVec::from_elem(test, 1))
            }
            Token::Lt | Token::Le | Token::Gt | Token::Ge => {
                let op = match self.token {
                    Token::Lt => NumOp::Lt,
                    Token::Le => NumOp::Le,
                    Token::Gt => NumOp::Gt,
                    _ => NumOp::Ge,
                };
                self.advance()?;
                let value = self.number_value()?;
                (true, SmallVec::from_elem(ValueTest::Num(op, value), 1))
            }
            Token::Tilde => {
                self.advance()?;
                let pattern = self.string_value()?;
                (true, SmallVec::from_elem(ValueTest::Regex(pattern), 1))
            }
            _ => {
                return Err(self.error(format!(
                    "expected an operator or ']', found {}",
                    self.token.describe()
                )))
            }
        };
        self.expect_rbracket()?;

        Ok(TagClause {
            key,
            absent: false,
            required,
            tests,
        })
    }

    fn equality_test(&mut self, negated: bool) -> Result<ValueTest> {
        match self.token {
            Token::Number(text) => {
                let value = self.parse_number(text)?;
                self.advance()?;
                Ok(ValueTest::Num(
                    if negated { NumOp::Ne } else { NumOp::Eq },
                    value,
                ))
            }
            Token::Ident(s) | Token::Str(s) => {
                let s = s.to_string();
                self.advance()?;
                Ok(if negated {
                    ValueTest::StrNe(s)
                } else {
                    ValueTest::StrEq(s)
                })
            }
            _ => Err(self.error(format!("expected a value, found {}", self.token.describe()))),
        }
    }

    fn key(&mut self) -> Result<TagKey> {
        let name = match self.token {
            Token::Ident(s) | Token::Str(s) => s,
            _ => {
                return Err(self.error(format!(
                    "expected a tag key, found {}",
                    self.token.describe()
                )))
            }
        };
        let key = match self.store.key_code(name) {
            Some(code) => TagKey::Global {
                code,
                name: name.to_string(),
            },
            None => TagKey::Local(name.to_string()),
        };
        self.advance()?;
        Ok(key)
    }

    fn number_value(&mut self) -> Result<f64> {
        match self.token {
            Token::Number(text) => {
                let value = self.parse_number(text)?;
                self.advance()?;
                Ok(value)
            }
            _ => Err(self.error(format!(
                "expected a number, found {}",
                self.token.describe()
            ))),
        }
    }

    fn parse_number(&self, text: &str) -> Result<f64> {
        text.parse::<f64>()
            .map_err(|_| self.error(format!("invalid number '{}'", text)))
    }

    fn string_value(&mut self) -> Result<String> {
        match self.token {
            Token::Ident(s) | Token::Str(s) => {
                let s = s.to_string();
                self.advance()?;
                Ok(s)
            }
            _ => Err(self.error(format!(
                "expected a pattern, found {}",
                self.token.describe()
            ))),
        }
    }

    fn expect_rbracket(&mut self) -> Result<()> {
        if self.token != Token::RBracket {
            return Err(self.error(format!("expected ']', found {}", self.token.describe())));
        }
        self.advance()
    }
}
