//! `python_interpreter` tool: a sandboxed arithmetic calculator.
//!
//! The source's `PythonInterpreterTool` hands the model a real, unrestricted
//! Python REPL. That surface can't be reproduced safely without embedding a
//! Python runtime, so this implementation keeps the tool's contract (take an
//! expression, return its evaluated result as the answer a research/ask
//! handle needs for unit conversions and quick sums) while restricting the
//! grammar to arithmetic: `+ - * / ( )`, integer and decimal literals.

use asupersync::Cx;
use handlemail_core::{Error, Result};
use serde_json::Value as Json;

use crate::registry::{names, BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

pub struct PythonInterpreterTool;

impl Tool for PythonInterpreterTool {
    fn name(&self) -> &'static str {
        names::PYTHON_INTERPRETER
    }

    fn call<'a>(
        &'a self,
        _cx: &'a Cx,
        args: Json,
        _ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let expr = args
                .get("code")
                .or_else(|| args.get("expression"))
                .and_then(Json::as_str)
                .ok_or_else(|| Error::ToolError {
                    tool_name: names::PYTHON_INTERPRETER.to_string(),
                    message: "missing required string argument 'code'".to_string(),
                })?;
            let value = eval_arithmetic(expr).map_err(|message| Error::ToolError {
                tool_name: names::PYTHON_INTERPRETER.to_string(),
                message,
            })?;
            Ok(ToolOutputWithCitations::text(format!("{value}")))
        })
    }
}

fn eval_arithmetic(expr: &str) -> std::result::Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let value = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("unexpected trailing input".to_string());
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| format!("invalid number literal '{literal}'"))?;
                tokens.push(Token::Num(value));
            }
            other => return Err(format!("unsupported character '{other}' — only arithmetic is allowed")),
        }
    }
    Ok(tokens)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_expr(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.parse_term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.parse_factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.parse_factor()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    if rhs == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value /= rhs;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_factor(&mut self) -> std::result::Result<f64, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.parse_factor()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.parse_factor()
            }
            Some(Token::Num(n)) => {
                let n = *n;
                self.pos += 1;
                Ok(n)
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let value = self.parse_expr()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            _ => Err("expected a number or '('".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_operator_precedence() {
        assert_eq!(eval_arithmetic("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(eval_arithmetic("(2 + 3) * 4").unwrap(), 20.0);
    }

    #[test]
    fn evaluates_unary_minus() {
        assert_eq!(eval_arithmetic("-5 + 2").unwrap(), -3.0);
    }

    #[test]
    fn rejects_division_by_zero() {
        assert!(eval_arithmetic("1 / 0").is_err());
    }

    #[test]
    fn rejects_non_arithmetic_characters() {
        assert!(eval_arithmetic("import os").is_err());
    }

    #[test]
    fn rejects_unbalanced_parens() {
        assert!(eval_arithmetic("(1 + 2").is_err());
    }
}
