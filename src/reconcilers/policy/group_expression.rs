// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Validation of policy groups.
//!
//! A group combines its members with a boolean expression such as
//! `signed() && (trusted() || !privileged())`. Each call names a member of the group.
//! The policy server evaluates the expression; the controller only checks that it
//! parses and that everything it references exists.
//!
//! # Grammar
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | primary
//! primary := ident "(" ")" | "true" | "false" | "(" expr ")"
//! ```

use crate::crd::PolicyGroupMember;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Module reference schemes understood by the policy server.
const MODULE_SCHEMES: &[&str] = &["registry://", "https://", "http://", "file://"];

/// Reasons a group is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("group has no members")]
    NoMembers,

    #[error("group expression is empty")]
    EmptyExpression,

    #[error("unexpected character '{found}' at position {position}")]
    UnexpectedCharacter { found: char, position: usize },

    #[error("unexpected '{found}' at position {position}, expected {expected}")]
    UnexpectedToken {
        found: String,
        position: usize,
        expected: &'static str,
    },

    #[error("expression ended unexpectedly, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("invalid member name '{0}'")]
    InvalidMemberName(String),

    #[error("member '{member}' has an invalid module reference '{module}'")]
    InvalidModule { member: String, module: String },

    #[error("expression references unknown member '{0}'")]
    UnknownMember(String),
}

/// Parsed group expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Call(String),
    Literal(bool),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Names of every member called by the expression.
    #[must_use]
    pub fn calls(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_calls(&mut names);
        names
    }

    fn collect_calls<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Self::Call(name) => {
                names.insert(name.as_str());
            }
            Self::Literal(_) => {}
            Self::Not(inner) => inner.collect_calls(names),
            Self::And(lhs, rhs) | Self::Or(lhs, rhs) => {
                lhs.collect_calls(names);
                rhs.collect_calls(names);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    LParen,
    RParen,
    Not,
    And,
    Or,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(name) => name.clone(),
            Self::LParen => "(".into(),
            Self::RParen => ")".into(),
            Self::Not => "!".into(),
            Self::And => "&&".into(),
            Self::Or => "||".into(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, GroupError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((position, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '!' => Token::Not,
            '&' | '|' => {
                if chars.next_if(|(_, next)| *next == c).is_none() {
                    return Err(GroupError::UnexpectedCharacter { found: c, position });
                }
                if c == '&' {
                    Token::And
                } else {
                    Token::Or
                }
            }
            c if is_ident_start(c) => {
                let mut ident = String::from(c);
                while let Some((_, next)) = chars.next_if(|(_, next)| is_ident_continue(*next)) {
                    ident.push(next);
                }
                Token::Ident(ident)
            }
            found => return Err(GroupError::UnexpectedCharacter { found, position }),
        };
        tokens.push((position, token));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, token)| token)
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let next = self.tokens.get(self.cursor).cloned();
        self.cursor += 1;
        next
    }

    fn expect(&mut self, wanted: &Token, expected: &'static str) -> Result<(), GroupError> {
        match self.advance() {
            Some((_, ref token)) if token == wanted => Ok(()),
            Some((position, token)) => Err(GroupError::UnexpectedToken {
                found: token.describe(),
                position,
                expected,
            }),
            None => Err(GroupError::UnexpectedEnd { expected }),
        }
    }

    fn or(&mut self) -> Result<Expr, GroupError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.cursor += 1;
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, GroupError> {
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.cursor += 1;
            lhs = Expr::And(Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, GroupError> {
        if self.peek() == Some(&Token::Not) {
            self.cursor += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, GroupError> {
        const EXPECTED: &str = "a member call, a literal or '('";

        match self.advance() {
            Some((_, Token::LParen)) => {
                let inner = self.or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some((_, Token::Ident(name))) if name == "true" => Ok(Expr::Literal(true)),
            Some((_, Token::Ident(name))) if name == "false" => Ok(Expr::Literal(false)),
            Some((_, Token::Ident(name))) => {
                self.expect(&Token::LParen, "'(' after member name")?;
                self.expect(&Token::RParen, "')'")?;
                Ok(Expr::Call(name))
            }
            Some((position, token)) => Err(GroupError::UnexpectedToken {
                found: token.describe(),
                position,
                expected: EXPECTED,
            }),
            None => Err(GroupError::UnexpectedEnd { expected: EXPECTED }),
        }
    }
}

/// Parse a group expression.
///
/// # Errors
///
/// Returns a [`GroupError`] describing the first syntax error.
pub fn parse_expression(input: &str) -> Result<Expr, GroupError> {
    if input.trim().is_empty() {
        return Err(GroupError::EmptyExpression);
    }

    let mut parser = Parser {
        tokens: tokenize(input)?,
        cursor: 0,
    };
    let expr = parser.or()?;

    match parser.advance() {
        None => Ok(expr),
        Some((position, token)) => Err(GroupError::UnexpectedToken {
            found: token.describe(),
            position,
            expected: "end of expression",
        }),
    }
}

/// Member names are used as function names inside the expression.
#[must_use]
pub fn is_valid_member_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_ident_start)
        && chars.all(is_ident_continue)
        && name != "true"
        && name != "false"
}

/// Whether the policy server can fetch a module from this reference.
#[must_use]
pub fn is_valid_module_reference(module: &str) -> bool {
    let module = module.trim();
    if module.is_empty() || module.chars().any(char::is_whitespace) {
        return false;
    }

    match MODULE_SCHEMES.iter().find(|scheme| module.starts_with(**scheme)) {
        Some(scheme) => module.len() > scheme.len(),
        // Bare OCI reference such as ghcr.io/kubewarden/policies/safe-labels:v1
        None => !module.contains("://"),
    }
}

/// Check a group's members and expression.
///
/// # Errors
///
/// Returns the first problem found. Any invalid member fails the whole group.
pub fn validate_group(
    members: &BTreeMap<String, PolicyGroupMember>,
    expression: &str,
) -> Result<(), GroupError> {
    if members.is_empty() {
        return Err(GroupError::NoMembers);
    }

    for (name, member) in members {
        if !is_valid_member_name(name) {
            return Err(GroupError::InvalidMemberName(name.clone()));
        }
        if !is_valid_module_reference(&member.module) {
            return Err(GroupError::InvalidModule {
                member: name.clone(),
                module: member.module.clone(),
            });
        }
    }

    let expr = parse_expression(expression)?;
    if let Some(unknown) = expr.calls().into_iter().find(|call| !members.contains_key(*call)) {
        return Err(GroupError::UnknownMember(unknown.to_string()));
    }

    Ok(())
}

#[cfg(test)]
#[path = "group_expression_tests.rs"]
mod group_expression_tests;
