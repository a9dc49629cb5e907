//! `code_job` restricted to a tiny safe expression subset over the input
//! JSON: arithmetic over numbers, string/bool/null literals, object
//! construction, and `input.<handle>` field lookups. No shelling out, no
//! interpreter embedding, no loops or function calls — this is not a
//! general scripting sandbox, just enough to exercise the Engine's
//! input-resolution and output-capture paths end to end.
//!
//! Grammar (informal):
//! ```text
//! code     := "return"? object | arith
//! object   := "{" (pair ("," pair)*)? "}"
//! pair     := ident ":" code
//! arith    := term (("+" | "-") term)*
//! term     := factor (("*" | "/") factor)*
//! factor   := number | string | "true" | "false" | "null"
//!           | "(" arith ")" | "input" ("." ident)*
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value};

use dipeo_state::NodeOutput;

use crate::contract::{Handler, Inputs, NodeContext, Services};
use crate::error::HandlerError;

pub struct CodeJobHandler;

#[async_trait]
impl Handler for CodeJobHandler {
    async fn execute(
        &self,
        props: &Value,
        context: &NodeContext,
        inputs: &Inputs,
        _services: &Services,
    ) -> Result<NodeOutput, HandlerError> {
        let code = props.get("code").and_then(Value::as_str).ok_or_else(|| HandlerError::Failed {
            node_id: context.current_node_id.clone(),
            message: "code_job requires a string 'code' field".to_string(),
            code: None,
        })?;

        let value = eval_code(code, inputs).map_err(|message| HandlerError::Failed {
            node_id: context.current_node_id.clone(),
            message,
            code: None,
        })?;

        Ok(NodeOutput { value, metadata: Default::default() })
    }
}

fn eval_code(code: &str, inputs: &Inputs) -> Result<Value, String> {
    let trimmed = code.trim().strip_prefix("return").unwrap_or(code).trim();
    let mut parser = Parser { chars: trimmed.chars().collect(), pos: 0, inputs };
    let value = parser.parse_expr()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(format!("unexpected trailing input at position {}", parser.pos));
    }
    Ok(value)
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    inputs: &'a Inputs,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, c: char) -> Result<(), String> {
        self.skip_ws();
        if self.chars.get(self.pos) == Some(&c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{c}' at position {}", self.pos))
        }
    }

    fn parse_expr(&mut self) -> Result<Value, String> {
        match self.peek() {
            Some('{') => self.parse_object(),
            _ => self.parse_arith(),
        }
    }

    fn parse_object(&mut self) -> Result<Value, String> {
        self.expect('{')?;
        let mut map = Map::new();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(Value::Object(map));
        }
        loop {
            let key = self.parse_ident()?;
            self.expect(':')?;
            let value = self.parse_expr()?;
            map.insert(key, value);
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                other => return Err(format!("expected ',' or '}}', found {other:?}")),
            }
        }
        Ok(Value::Object(map))
    }

    fn parse_ident(&mut self) -> Result<String, String> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.chars.len() && (self.chars[self.pos].is_alphanumeric() || self.chars[self.pos] == '_') {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(format!("expected identifier at position {start}"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_arith(&mut self) -> Result<Value, String> {
        let mut acc = self.parse_term()?;
        loop {
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    acc = Value::from(num(&acc)? + num(&rhs)?);
                }
                Some('-') => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    acc = Value::from(num(&acc)? - num(&rhs)?);
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn parse_term(&mut self) -> Result<Value, String> {
        let mut acc = self.parse_factor()?;
        loop {
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    acc = Value::from(num(&acc)? * num(&rhs)?);
                }
                Some('/') => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    let divisor = num(&rhs)?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    acc = Value::from(num(&acc)? / divisor);
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn parse_factor(&mut self) -> Result<Value, String> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.parse_arith()?;
                self.expect(')')?;
                Ok(value)
            }
            Some('"') => self.parse_string(),
            Some(c) if c.is_ascii_digit() || c == '-' => self.parse_number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_ident_expr(),
            other => Err(format!("unexpected token {other:?} at position {}", self.pos)),
        }
    }

    fn parse_string(&mut self) -> Result<Value, String> {
        self.expect('"')?;
        let start = self.pos;
        while self.pos < self.chars.len() && self.chars[self.pos] != '"' {
            self.pos += 1;
        }
        if self.pos >= self.chars.len() {
            return Err("unterminated string literal".to_string());
        }
        let s: String = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        Ok(Value::String(s))
    }

    fn parse_number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        if self.chars.get(self.pos) == Some(&'-') {
            self.pos += 1;
        }
        while self.pos < self.chars.len() && (self.chars[self.pos].is_ascii_digit() || self.chars[self.pos] == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(|n| Value::from(n))
            .map_err(|_| format!("invalid number literal '{text}'"))
    }

    fn parse_ident_expr(&mut self) -> Result<Value, String> {
        let ident = self.parse_ident()?;
        match ident.as_str() {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "null" => return Ok(Value::Null),
            "input" => {}
            other => return Err(format!("unknown identifier '{other}'")),
        }

        let mut current = if self.chars.get(self.pos) == Some(&'.') {
            self.pos += 1;
            let field = self.parse_ident()?;
            self.inputs.get(&field).cloned().unwrap_or(Value::Null)
        } else {
            self.inputs.values().next().cloned().unwrap_or(Value::Null)
        };

        while self.chars.get(self.pos) == Some(&'.') {
            self.pos += 1;
            let field = self.parse_ident()?;
            current = current.get(&field).cloned().unwrap_or(Value::Null);
        }
        Ok(current)
    }
}

fn num(value: &Value) -> Result<f64, String> {
    value.as_f64().ok_or_else(|| format!("expected a number, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> NodeContext {
        NodeContext::new("e1", "A", Arc::new(HashMap::new()), CancellationToken::new(), Arc::new(|_| {}))
    }

    #[tokio::test]
    async fn evaluates_an_object_literal() {
        let handler = CodeJobHandler;
        let props = serde_json::json!({"code": "return {x:1}"});
        let out = handler.execute(&props, &ctx(), &Inputs::new(), &Services::new()).await.unwrap();
        assert_eq!(out.value, serde_json::json!({"x": 1.0}));
    }

    #[tokio::test]
    async fn evaluates_arithmetic() {
        let handler = CodeJobHandler;
        let props = serde_json::json!({"code": "1 + 2 * 3"});
        let out = handler.execute(&props, &ctx(), &Inputs::new(), &Services::new()).await.unwrap();
        assert_eq!(out.value, serde_json::json!(7.0));
    }

    #[tokio::test]
    async fn reads_an_input_field() {
        let handler = CodeJobHandler;
        let mut inputs = Inputs::new();
        inputs.insert("in".to_string(), serde_json::json!({"count": 4}));
        let props = serde_json::json!({"code": "return {doubled: input.in.count * 2}"});
        let out = handler.execute(&props, &ctx(), &inputs, &Services::new()).await.unwrap();
        assert_eq!(out.value, serde_json::json!({"doubled": 8.0}));
    }

    #[tokio::test]
    async fn rejects_division_by_zero() {
        let handler = CodeJobHandler;
        let props = serde_json::json!({"code": "1 / 0"});
        assert!(handler.execute(&props, &ctx(), &Inputs::new(), &Services::new()).await.is_err());
    }

    #[tokio::test]
    async fn rejects_missing_code_field() {
        let handler = CodeJobHandler;
        let out = handler
            .execute(&serde_json::json!({}), &ctx(), &Inputs::new(), &Services::new())
            .await;
        assert!(out.is_err());
    }
}
