//! 容错的增量 JSON 解码
//!
//! 模型的工具参数是逐段到达的，任一时刻的累计快照通常是不完整的 JSON。
//! 这里用递归下降对快照做尽力解码：未闭合的字符串/对象/数组按已到达部分补齐，
//! 悬空的键、冒号、逗号被丢弃，不完整的字面量（`tru`、`nu`）与数字（`1.`、`-`）被补全或忽略。
//! 每次都重新解析整个快照，不保留增量状态。

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// 解码失败（快照中出现了无法容忍的字符）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PartialJsonError {
    #[error("no JSON value in input")]
    Empty,

    #[error("unexpected character {ch:?} at offset {offset}")]
    Unexpected { ch: char, offset: usize },

    #[error("invalid number {0:?}")]
    InvalidNumber(String),
}

/// 解码一个可能被截断的 JSON 文本
///
/// 开头的 Markdown 代码围栏会被跳过；完整值之后的多余内容被忽略。
pub fn parse_partial(text: &str) -> Result<Value, PartialJsonError> {
    let body = strip_leading_fence(text);
    let mut parser = Parser {
        chars: body.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    parser.parse_value()?.ok_or(PartialJsonError::Empty)
}

fn strip_leading_fence(text: &str) -> &str {
    let trimmed = text.trim_start();
    match trimmed.strip_prefix("```") {
        Some(rest) => rest.split_once('\n').map(|(_, body)| body).unwrap_or(""),
        None => trimmed,
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn unexpected(&self, ch: char) -> PartialJsonError {
        PartialJsonError::Unexpected { ch, offset: self.pos }
    }

    /// Ok(None)：输入在值开始前（或值尚无任何意义时）结束
    fn parse_value(&mut self) -> Result<Option<Value>, PartialJsonError> {
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        match c {
            '{' => {
                self.pos += 1;
                self.parse_object().map(Some)
            }
            '[' => {
                self.pos += 1;
                self.parse_array().map(Some)
            }
            '"' => {
                self.pos += 1;
                let (s, _) = self.parse_string();
                Ok(Some(Value::String(s)))
            }
            't' | 'f' | 'n' => self.parse_literal(),
            '-' | '0'..='9' => self.parse_number(),
            other => Err(self.unexpected(other)),
        }
    }

    fn parse_object(&mut self) -> Result<Value, PartialJsonError> {
        let mut map = Map::new();
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else {
                return Ok(Value::Object(map));
            };
            match c {
                '}' => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                ',' => {
                    self.pos += 1;
                }
                '"' => {
                    self.pos += 1;
                    let (key, complete) = self.parse_string();
                    if !complete {
                        return Ok(Value::Object(map));
                    }
                    self.skip_ws();
                    match self.peek() {
                        None => return Ok(Value::Object(map)),
                        Some(':') => self.pos += 1,
                        Some(other) => return Err(self.unexpected(other)),
                    }
                    match self.parse_value()? {
                        Some(value) => {
                            map.insert(key, value);
                        }
                        None => return Ok(Value::Object(map)),
                    }
                }
                other => return Err(self.unexpected(other)),
            }
        }
    }

    fn parse_array(&mut self) -> Result<Value, PartialJsonError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else {
                return Ok(Value::Array(items));
            };
            match c {
                ']' => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                ',' => {
                    self.pos += 1;
                }
                _ => match self.parse_value()? {
                    Some(value) => items.push(value),
                    None => return Ok(Value::Array(items)),
                },
            }
        }
    }

    /// 读取字符串内容（起始引号已消费）；返回 (内容, 是否遇到结束引号)
    fn parse_string(&mut self) -> (String, bool) {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '"' => return (out, true),
                '\\' => match self.parse_escape() {
                    Some(ch) => out.push(ch),
                    None => return (out, false),
                },
                other => out.push(other),
            }
        }
        (out, false)
    }

    /// 转义序列（反斜杠已消费）；截断的转义返回 None
    fn parse_escape(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        let ch = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{0008}',
            'f' => '\u{000C}',
            'u' => return self.parse_unicode_escape(),
            other => other,
        };
        Some(ch)
    }

    fn read_hex4(&mut self) -> Option<u32> {
        if self.pos + 4 > self.chars.len() {
            self.pos = self.chars.len();
            return None;
        }
        let hex: String = self.chars[self.pos..self.pos + 4].iter().collect();
        self.pos += 4;
        Some(u32::from_str_radix(&hex, 16).unwrap_or(0xFFFD))
    }

    fn parse_unicode_escape(&mut self) -> Option<char> {
        let high = self.read_hex4()?;
        if (0xD800..0xDC00).contains(&high) {
            if self.peek() == Some('\\') && self.peek_at(1) == Some('u') {
                self.pos += 2;
                let low = self.read_hex4()?;
                let code = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
                return Some(char::from_u32(code).unwrap_or('\u{FFFD}'));
            }
            let remaining = self.chars.len().saturating_sub(self.pos);
            if remaining == 0 || (remaining == 1 && self.peek() == Some('\\')) {
                self.pos = self.chars.len();
                return None;
            }
        }
        Some(char::from_u32(high).unwrap_or('\u{FFFD}'))
    }

    fn parse_literal(&mut self) -> Result<Option<Value>, PartialJsonError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        let at_end = self.pos >= self.chars.len();
        for (name, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if word == name || (at_end && name.starts_with(word.as_str())) {
                return Ok(Some(value));
            }
        }
        Err(PartialJsonError::Unexpected {
            ch: self.chars[start],
            offset: start,
        })
    }

    fn parse_number(&mut self) -> Result<Option<Value>, PartialJsonError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || "-+.eE".contains(c)) {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        let text = if self.pos >= self.chars.len() {
            raw.trim_end_matches(['-', '+', '.', 'e', 'E'])
        } else {
            raw.as_str()
        };
        if text.is_empty() {
            return Ok(None);
        }
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Some(Value::Number(i.into())));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(|n| Some(Value::Number(n)))
            .ok_or_else(|| PartialJsonError::InvalidNumber(raw.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_documents_match_serde() {
        let doc = concat!(
            r#"{"cells":[{"cell_type":"code","source":"print(\"hi\")\n"}],"#,
            r#""n":-1.5e2,"ok":true,"x":null}"#,
        );
        let expected: Value = serde_json::from_str(doc).unwrap();
        assert_eq!(parse_partial(doc).unwrap(), expected);
    }

    #[test]
    fn test_unterminated_string_and_containers() {
        assert_eq!(
            parse_partial(r#"{"cells":[{"source":"import pa"#).unwrap(),
            json!({"cells": [{"source": "import pa"}]})
        );
    }

    #[test]
    fn test_dangling_key_colon_and_comma() {
        assert_eq!(parse_partial(r#"{"a":1,"b"#).unwrap(), json!({"a": 1}));
        assert_eq!(parse_partial(r#"{"a":1,"b":"#).unwrap(), json!({"a": 1}));
        assert_eq!(parse_partial(r#"{"a":1,"#).unwrap(), json!({"a": 1}));
        assert_eq!(parse_partial(r#"[1,2,"#).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_partial_literals_and_numbers() {
        assert_eq!(parse_partial(r#"{"ok":tr"#).unwrap(), json!({"ok": true}));
        assert_eq!(parse_partial(r#"{"x":n"#).unwrap(), json!({"x": null}));
        assert_eq!(parse_partial(r#"{"n":12."#).unwrap(), json!({"n": 12}));
        assert_eq!(parse_partial(r#"{"n":-"#).unwrap(), json!({}));
        assert!(parse_partial(r#"{"ok":trx}"#).is_err());
    }

    #[test]
    fn test_escapes_cut_midway() {
        assert_eq!(parse_partial(r#"["a\"#).unwrap(), json!(["a"]));
        assert_eq!(parse_partial(r#"["a\u00"#).unwrap(), json!(["a"]));
        assert_eq!(parse_partial(r#"["é😀"]"#).unwrap(), json!(["é😀"]));
    }

    #[test]
    fn test_fence_and_garbage() {
        assert_eq!(parse_partial("```json\n{\"a\":1}\n```").unwrap(), json!({"a": 1}));
        assert_eq!(parse_partial("  ").unwrap_err(), PartialJsonError::Empty);
        assert!(matches!(
            parse_partial("Sure! here you go"),
            Err(PartialJsonError::Unexpected { .. })
        ));
    }

    #[test]
    fn test_every_prefix_decodes() {
        let doc = concat!(
            r##"{"cells": [{"cell_type": "markdown", "source": "# Title"}, "##,
            r##"{"source": "x = [1, 2.5, true]\nprint(x)"}]}"##,
        );
        let full: Value = serde_json::from_str(doc).unwrap();
        let chars: Vec<char> = doc.chars().collect();
        for end in 1..=chars.len() {
            let prefix: String = chars[..end].iter().collect();
            let value = parse_partial(&prefix).unwrap_or_else(|e| panic!("prefix {prefix:?}: {e}"));
            assert!(value.is_object());
        }
        assert_eq!(parse_partial(doc).unwrap(), full);
    }
}
