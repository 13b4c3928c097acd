//! Whitespace token scanner for the text formats
//!
//! Values may be split across lines arbitrarily; only whitespace separates
//! them. The current line number is kept for diagnostics.

use std::collections::VecDeque;
use std::io::BufRead;
use std::str::FromStr;

use butterfly_common::{Error, Result};

pub struct Tokens<R> {
    reader: R,
    line: Vec<u8>,
    line_no: usize,
    pending: VecDeque<String>,
}

impl<R: BufRead> Tokens<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            line_no: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn line_no(&self) -> usize {
        self.line_no
    }

    /// Next raw token, or `None` at end of input
    pub fn token(&mut self) -> Result<Option<String>> {
        while self.pending.is_empty() {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let text = std::str::from_utf8(&self.line).map_err(|e| {
                Error::malformed(
                    format!("line {}", self.line_no),
                    format!("invalid UTF-8 at byte {}", e.valid_up_to()),
                )
            })?;
            self.pending.extend(text.split_whitespace().map(str::to_owned));
        }
        Ok(self.pending.pop_front())
    }

    /// Parse the next token as `T`; `what` names the field in error messages
    pub fn parse<T: FromStr>(&mut self, what: &str) -> Result<T> {
        let token = self.token()?.ok_or_else(|| {
            Error::malformed(
                format!("line {}", self.line_no),
                format!("unexpected end of input while reading {what}"),
            )
        })?;
        token.parse().map_err(|_| {
            Error::malformed(
                format!("line {}: '{}'", self.line_no, token),
                format!("invalid {what}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_across_lines() {
        let input = "3\n  10 20\n\n30\t40 \n";
        let mut tokens = Tokens::new(input.as_bytes());
        assert_eq!(tokens.parse::<u32>("count").unwrap(), 3);
        assert_eq!(tokens.parse::<i32>("a").unwrap(), 10);
        assert_eq!(tokens.parse::<i32>("b").unwrap(), 20);
        assert_eq!(tokens.parse::<i32>("c").unwrap(), 30);
        assert_eq!(tokens.line_no(), 4);
        assert_eq!(tokens.parse::<i32>("d").unwrap(), 40);
        assert_eq!(tokens.token().unwrap(), None);
    }

    #[test]
    fn test_parse_errors_are_malformed() {
        let mut tokens = Tokens::new("abc".as_bytes());
        let err = tokens.parse::<u32>("node count").unwrap_err();
        assert_eq!(err.kind(), butterfly_common::ErrorKind::MalformedRecord);
        assert!(err.to_string().contains("node count"));

        let err = tokens.parse::<u32>("edge count").unwrap_err();
        assert!(err.to_string().contains("unexpected end of input"));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut tokens = Tokens::new(&b"1 2\n3 \xff\n"[..]);
        assert_eq!(tokens.parse::<u32>("a").unwrap(), 1);
        assert_eq!(tokens.parse::<u32>("b").unwrap(), 2);
        let err = tokens.parse::<u32>("c").unwrap_err();
        assert_eq!(err.kind(), butterfly_common::ErrorKind::MalformedRecord);
        assert!(err.to_string().contains("line 2"));
    }
}
