//! Condition predicates for conditional and loop steps.
//!
//! A small closed grammar, parsed once into a [`Condition`] tree when a plan
//! is accepted and evaluated at dispatch time:
//!
//! ```text
//! expr    := or
//! or      := and ( OR and )*
//! and     := unary ( AND unary )*
//! unary   := NOT unary | primary
//! primary := "(" expr ")" | true | false | call
//! call    := element_exists(s) | context_exists(s)
//!          | context_equals(s, s) | step_completed(s)
//! ```
//!
//! Keywords are case-insensitive. Strings are single- or double-quoted with
//! backslash escapes. Unknown predicates are parse errors, so a typo can
//! never silently evaluate to `true`.

use std::fmt;

use flowpilot_types::action::ActionRequest;
use flowpilot_types::run::StepStatus;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;

use super::run_state::RunState;
use super::template;
use crate::actuator::scripted::FIND_ELEMENT_ACTION;
use crate::actuator::{ActuatorError, BoxActuator};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unknown predicate '{0}'")]
    UnknownPredicate(String),

    #[error("predicate '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("element lookup failed: {0}")]
    Actuator(#[from] ActuatorError),
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Parsed predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Literal(bool),
    /// Asks the actuator whether an element with this text is on screen.
    ElementExists(String),
    ContextExists(String),
    ContextEquals(String, String),
    StepCompleted(String),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Step IDs referenced through `step_completed(...)`.
    pub fn referenced_steps(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_steps(&mut out);
        out
    }

    fn collect_steps<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::StepCompleted(id) => out.push(id),
            Condition::Not(inner) => inner.collect_steps(out),
            Condition::And(l, r) | Condition::Or(l, r) => {
                l.collect_steps(out);
                r.collect_steps(out);
            }
            _ => {}
        }
    }

    /// Evaluate against a run, short-circuiting left to right.
    ///
    /// Only `element_exists` touches the actuator; its transport errors
    /// propagate so the owning step attempt fails.
    pub fn evaluate<'a>(
        &'a self,
        run: &'a RunState,
        actuator: &'a BoxActuator,
    ) -> BoxFuture<'a, Result<bool, ConditionError>> {
        Box::pin(async move {
            match self {
                Condition::Literal(value) => Ok(*value),
                Condition::ElementExists(text) => element_exists(actuator, text).await,
                Condition::ContextExists(key) => Ok(lookup(run, key).is_some_and(|v| !v.is_null())),
                Condition::ContextEquals(key, expected) => Ok(match lookup(run, key) {
                    Some(Value::String(s)) => s == *expected,
                    Some(Value::Null) | None => false,
                    Some(other) => other.to_string() == *expected,
                }),
                Condition::StepCompleted(id) => {
                    Ok(run.step_status(id) == Some(StepStatus::Completed))
                }
                Condition::Not(inner) => Ok(!inner.evaluate(run, actuator).await?),
                Condition::And(l, r) => {
                    Ok(l.evaluate(run, actuator).await? && r.evaluate(run, actuator).await?)
                }
                Condition::Or(l, r) => {
                    Ok(l.evaluate(run, actuator).await? || r.evaluate(run, actuator).await?)
                }
            }
        })
    }
}

fn lookup(run: &RunState, path: &str) -> Option<Value> {
    template::lookup_path(path, |key| run.context_value(key))
}

async fn element_exists(actuator: &BoxActuator, text: &str) -> Result<bool, ConditionError> {
    let mut params = Map::new();
    params.insert("text".into(), Value::String(text.to_string()));
    let result = actuator
        .execute(&ActionRequest::new(FIND_ELEMENT_ACTION, params))
        .await?;
    let found = result.payload.get("found").and_then(Value::as_bool) != Some(false);
    tracing::debug!(text, found = result.success && found, "element_exists evaluated");
    Ok(result.success && found)
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Literal(v) => write!(f, "{v}"),
            Condition::ElementExists(s) => write!(f, "element_exists({s:?})"),
            Condition::ContextExists(s) => write!(f, "context_exists({s:?})"),
            Condition::ContextEquals(k, v) => write!(f, "context_equals({k:?}, {v:?})"),
            Condition::StepCompleted(s) => write!(f, "step_completed({s:?})"),
            Condition::Not(inner) => write!(f, "NOT {inner}"),
            Condition::And(l, r) => write!(f, "({l} AND {r})"),
            Condition::Or(l, r) => write!(f, "({l} OR {r})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    Ident(String),
    Str(String),
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push((offset, Token::LParen));
            }
            ')' => {
                chars.next();
                tokens.push((offset, Token::RParen));
            }
            ',' => {
                chars.next();
                tokens.push((offset, Token::Comma));
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        ch if ch == quote => {
                            closed = true;
                            break;
                        }
                        ch => value.push(ch),
                    }
                }
                if !closed {
                    return Err(ConditionError::Syntax {
                        offset,
                        message: "unterminated string".to_string(),
                    });
                }
                tokens.push((offset, Token::Str(value)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((offset, Token::Ident(ident)));
            }
            other => {
                return Err(ConditionError::Syntax {
                    offset,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Deepest `(` / `NOT` nesting a condition may use.
pub const MAX_NESTING: usize = 64;

/// Most `AND` / `OR` operators a single condition may chain.
pub const MAX_OPERATORS: usize = 256;

/// Parse a predicate string.
pub fn parse_condition(src: &str) -> Result<Condition, ConditionError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
        depth: 0,
        operators: 0,
    };
    let condition = parser.parse_or()?;
    if let Some((offset, token)) = parser.tokens.get(parser.pos) {
        return Err(ConditionError::Syntax {
            offset: *offset,
            message: format!("unexpected trailing {token:?}"),
        });
    }
    Ok(condition)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ConditionError {
        ConditionError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    /// Enter one level of `(` or `NOT`.
    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("condition nested too deeply"));
        }
        Ok(())
    }

    /// Count one `AND` / `OR`. Chains build a left-deep tree.
    fn combine(&mut self) -> Result<(), ConditionError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(self.error("condition has too many operators"));
        }
        Ok(())
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn parse_or(&mut self) -> Result<Condition, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.combine()?;
            self.pos += 1;
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek_keyword("and") {
            self.combine()?;
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition, ConditionError> {
        if self.peek_keyword("not") {
            self.descend()?;
            self.pos += 1;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, ConditionError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ConditionError::Syntax {
                        offset,
                        message: "unclosed '('".to_string(),
                    }),
                }
            }
            Some(Token::Ident(word)) => {
                let lowered = word.to_ascii_lowercase();
                match lowered.as_str() {
                    "true" => Ok(Condition::Literal(true)),
                    "false" => Ok(Condition::Literal(false)),
                    "element_exists" | "context_exists" | "context_equals" | "step_completed" => {
                        let mut args = self.parse_args()?;
                        let expected = if lowered == "context_equals" { 2 } else { 1 };
                        if args.len() != expected {
                            return Err(ConditionError::Arity {
                                name: lowered.clone(),
                                expected,
                                got: args.len(),
                            });
                        }
                        let first = args.remove(0);
                        Ok(match lowered.as_str() {
                            "element_exists" => Condition::ElementExists(first),
                            "context_exists" => Condition::ContextExists(first),
                            "step_completed" => Condition::StepCompleted(first),
                            _ => Condition::ContextEquals(first, args.remove(0)),
                        })
                    }
                    _ => Err(ConditionError::UnknownPredicate(word)),
                }
            }
            Some(other) => Err(ConditionError::Syntax {
                offset,
                message: format!("unexpected {other:?}"),
            }),
            None => Err(ConditionError::Syntax {
                offset,
                message: "unexpected end of condition".to_string(),
            }),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<String>, ConditionError> {
        if self.next() != Some(Token::LParen) {
            return Err(self.error("expected '(' after predicate name"));
        }
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            match self.next() {
                Some(Token::Str(s)) => args.push(s),
                _ => return Err(self.error("expected a quoted string argument")),
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
