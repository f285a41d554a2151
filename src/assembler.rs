//! Assembly language parser and bytecode compiler.
//!
//! Converts human-readable assembly source into executable bytecode in one
//! character-level scan, using [`for_each_instruction!`](crate::for_each_instruction)
//! generated lookups for mnemonics and operand shapes.
//!
//! # Syntax
//!
//! ```text
//! main:                / a label definition
//!     pushi 2
//!     pushi 3
//!     add
//!     writelni
//!     jump end         / address operands accept labels or numbers
//! end: stop
//! ```
//!
//! - The source is free-form; whitespace only separates tokens
//! - Mnemonics are case-insensitive
//! - A label definition is an identifier followed by `:`
//! - String literals are delimited by `"` or `'` with `\n`, `\t`, `\r`,
//!   `\0` escapes; `\` before any other character yields that character
//! - A single `/` starts a comment running to the end of the line
//!
//! # Label resolution
//!
//! Address operands that name a label are emitted as zero placeholders
//! during the main pass while the definition offsets are collected; a second
//! pass patches every placeholder through the writer's overwrite cursor.
//! References to labels that were never defined fail with `MissingLabel`.

use std::collections::HashMap;

use crate::bytecode::{Reader, Writer};
use crate::errors::VMError;
use crate::isa::{Instruction, OperandKind};
use crate::source_map::{SourceMap, TextPosition};

const COMMENT_CHAR: u8 = b'/';
const LABEL_SUFFIX: u8 = b':';

/// An unresolved label reference awaiting back-patching.
struct Placeholder {
    label: String,
    /// Byte position of the zero placeholder in the bytecode stream.
    patch_position: usize,
    /// Where the reference appeared in the source, for diagnostics.
    position: TextPosition,
}

/// Character-level assembler.
///
/// Owns its source text. After a failed [`parse`](Parser::parse) the parser
/// holds a diagnostic message and the position it stopped at;
/// [`current_line`](Parser::current_line) and
/// [`source_span`](Parser::source_span) recover the surrounding text for
/// error reporting.
pub struct Parser {
    source: String,
    position: TextPosition,
    err_message: Option<String>,
    source_map: SourceMap,
}

impl Parser {
    /// Creates a parser over the given source text.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            position: TextPosition::default(),
            err_message: None,
            source_map: SourceMap::new(),
        }
    }

    /// The position the parser currently points at.
    pub fn position(&self) -> TextPosition {
        self.position
    }

    /// The diagnostic message recorded by the last failed parse.
    pub fn err_message(&self) -> Option<&str> {
        self.err_message.as_deref()
    }

    /// Transfers the populated source map out of the parser.
    pub fn take_source_map(&mut self) -> SourceMap {
        self.source_map.take()
    }

    /// Returns the source line containing the current position.
    pub fn current_line(&self) -> &str {
        self.line_at(self.position)
    }

    /// Returns the source line containing `position`.
    pub fn line_at(&self, position: TextPosition) -> &str {
        let bytes = self.source.as_bytes();
        let offset = (position.offset as usize).min(bytes.len());
        let start = bytes[..offset]
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let end = bytes[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| offset + i)
            .unwrap_or(bytes.len());
        self.source[start..end].trim_end_matches('\r')
    }

    /// Returns the source text between two positions.
    pub fn source_span(&self, start: TextPosition, end: TextPosition) -> &str {
        let from = (start.offset as usize).min(self.source.len());
        let to = (end.offset as usize).clamp(from, self.source.len());
        &self.source[from..to]
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.position.offset as usize).copied()
    }

    fn bump(&mut self) {
        if let Some(byte) = self.peek() {
            self.position.offset += 1;
            if byte == b'\n' {
                self.position.line += 1;
                self.position.column = 0;
            } else {
                self.position.column += 1;
            }
        }
    }

    fn at_eof(&self) -> bool {
        self.position.offset as usize >= self.source.len()
    }

    /// Skips whitespace and `/...` line comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(byte) if byte.is_ascii_whitespace() => self.bump(),
                Some(COMMENT_CHAR) => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Reads `[A-Za-z_][A-Za-z0-9_]*`.
    fn read_identifier(&mut self) -> Result<String, VMError> {
        match self.peek() {
            Some(byte) if byte.is_ascii_alphabetic() || byte == b'_' => {}
            _ => {
                return Err(VMError::NoMatch {
                    message: "expected an identifier".to_string(),
                });
            }
        }

        let start = self.position.offset as usize;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || byte == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        Ok(self.source[start..self.position.offset as usize].to_string())
    }

    /// Reads an optional sign followed by digits into `buffer`. Returns
    /// false without advancing when no digit begins at the position.
    fn read_digits(&mut self, buffer: &mut String, signed: bool) -> bool {
        let start = self.position;
        if signed && matches!(self.peek(), Some(b'+') | Some(b'-')) {
            buffer.push(self.peek().unwrap_or(b'+') as char);
            self.bump();
        }
        let mut any = false;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_digit() {
                buffer.push(byte as char);
                self.bump();
                any = true;
            } else {
                break;
            }
        }
        if !any {
            self.position = start;
            buffer.clear();
        }
        any
    }

    /// Reads a signed 32-bit integer literal.
    fn read_i32(&mut self) -> Result<i32, VMError> {
        let mut text = String::new();
        if !self.read_digits(&mut text, true) {
            return Err(VMError::NoMatch {
                message: "expected an integer operand".to_string(),
            });
        }
        text.parse::<i32>().map_err(|_| VMError::InvalidNumber {
            literal: text,
        })
    }

    /// Reads an unsigned address literal.
    fn read_usize(&mut self) -> Result<usize, VMError> {
        let mut text = String::new();
        if !self.read_digits(&mut text, false) {
            return Err(VMError::NoMatch {
                message: "expected an address operand".to_string(),
            });
        }
        text.parse::<usize>().map_err(|_| VMError::InvalidNumber {
            literal: text,
        })
    }

    /// Reads a float literal: optional sign, digits, optional `.` digits.
    fn read_f64(&mut self) -> Result<f64, VMError> {
        let mut text = String::new();
        if !self.read_digits(&mut text, true) {
            return Err(VMError::NoMatch {
                message: "expected a float operand".to_string(),
            });
        }
        if self.peek() == Some(b'.') {
            text.push('.');
            self.bump();
            let mut fraction = String::new();
            if !self.read_digits(&mut fraction, false) {
                return Err(VMError::InvalidNumber { literal: text });
            }
            text.push_str(&fraction);
        }
        text.parse::<f64>().map_err(|_| VMError::InvalidNumber {
            literal: text,
        })
    }

    /// Reads a quoted string literal, decoding escapes.
    fn read_string(&mut self) -> Result<Vec<u8>, VMError> {
        let quote = match self.peek() {
            Some(byte @ (b'"' | b'\'')) => byte,
            _ => {
                return Err(VMError::NoMatch {
                    message: "expected a string operand".to_string(),
                });
            }
        };
        self.bump();

        let mut decoded = Vec::new();
        loop {
            let Some(byte) = self.peek() else {
                return Err(VMError::NoMatch {
                    message: "unterminated string literal".to_string(),
                });
            };
            if byte == quote {
                self.bump();
                return Ok(decoded);
            }
            if byte == b'\\' {
                self.bump();
                let Some(escaped) = self.peek() else {
                    return Err(VMError::InvalidEscape);
                };
                decoded.push(match escaped {
                    b'n' => b'\n',
                    b't' => b'\t',
                    b'r' => b'\r',
                    b'0' => 0,
                    other => other,
                });
                self.bump();
            } else {
                decoded.push(byte);
                self.bump();
            }
        }
    }

    /// Parses the whole source into bytecode.
    ///
    /// On failure the structural error is returned and a human-readable
    /// message plus the failure position stay stored on the parser.
    pub fn parse(&mut self) -> Result<Reader, VMError> {
        self.err_message = None;
        self.position = TextPosition::default();
        let result = self.parse_program();
        if let Err(err) = &result {
            if self.err_message.is_none() {
                self.err_message = Some(err.to_string());
            }
        }
        result
    }

    fn parse_program(&mut self) -> Result<Reader, VMError> {
        let mut writer = Writer::new();
        let mut labels: HashMap<String, usize> = HashMap::new();
        let mut placeholders: Vec<Placeholder> = Vec::new();

        loop {
            self.skip_trivia();
            if self.at_eof() {
                break;
            }

            let token_start = self.position;
            let name = self.read_identifier().map_err(|_| {
                let message = format!(
                    "expected an instruction or label, found {:?}",
                    self.peek().map(|b| b as char).unwrap_or('\0')
                );
                self.err_message = Some(message.clone());
                VMError::NoMatch { message }
            })?;

            self.skip_trivia();
            if self.peek() == Some(LABEL_SUFFIX) {
                self.bump();
                // Last definition wins; only unresolved references fail.
                labels.insert(name, writer.len());
                continue;
            }

            let Some(instruction) = Instruction::from_mnemonic(&name) else {
                let message = format!("unknown instruction '{name}'");
                self.position = token_start;
                self.err_message = Some(message.clone());
                return Err(VMError::NoMatch { message });
            };

            self.source_map.begin(writer.len(), token_start);
            writer.write_instruction(instruction);

            match instruction.operand_kind() {
                OperandKind::None => {}
                OperandKind::Integer => {
                    self.skip_trivia();
                    let value = self.read_i32()?;
                    writer.write_i32(value);
                }
                OperandKind::Float => {
                    self.skip_trivia();
                    let value = self.read_f64()?;
                    writer.write_f64(value);
                }
                OperandKind::Address => {
                    self.skip_trivia();
                    let saved = self.position;
                    match self.read_usize() {
                        Ok(address) => writer.write_usize(address),
                        Err(_) => {
                            self.position = saved;
                            let label = self.read_identifier().map_err(|_| {
                                let message =
                                    format!("'{name}' expects an address or label operand");
                                self.err_message = Some(message.clone());
                                VMError::NoMatch { message }
                            })?;
                            placeholders.push(Placeholder {
                                label,
                                patch_position: writer.len(),
                                position: saved,
                            });
                            writer.write_usize(0);
                        }
                    }
                }
                OperandKind::String => {
                    self.skip_trivia();
                    let bytes = self.read_string()?;
                    writer.write_string(&bytes);
                }
            }

            self.source_map.end(self.position);
        }

        for placeholder in placeholders {
            let Some(&target) = labels.get(&placeholder.label) else {
                self.position = placeholder.position;
                self.err_message = Some(format!("missing label: {}", placeholder.label));
                return Err(VMError::MissingLabel {
                    label: placeholder.label,
                });
            };
            writer.set_cursor(placeholder.patch_position);
            writer.write_usize(target);
            writer.clear_cursor();
        }

        Ok(writer.into_reader())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(source: &str) -> Vec<u8> {
        let mut parser = Parser::new(source);
        let mut reader = parser.parse().expect("assembly failed");
        let mut bytes = Vec::new();
        while !reader.end_of_file() {
            bytes.push(reader.read_u8().unwrap());
        }
        bytes
    }

    fn assemble_err(source: &str) -> (VMError, Parser) {
        let mut parser = Parser::new(source);
        let err = parser.parse().expect_err("expected assembly failure");
        (err, parser)
    }

    #[test]
    fn empty_source_is_empty_bytecode() {
        assert!(assemble("").is_empty());
        assert!(assemble("   \n\t\n").is_empty());
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let bytes = assemble("/ whole line\nnop / trailing\nnop");
        assert_eq!(bytes, vec![Instruction::Nop as u8, Instruction::Nop as u8]);
    }

    #[test]
    fn lone_slash_at_eof_is_a_comment() {
        assert!(assemble("/").is_empty());
    }

    #[test]
    fn integer_operand_encoding() {
        let bytes = assemble("pushi -2");
        assert_eq!(bytes[0], Instruction::PushI as u8);
        assert_eq!(i32::from_be_bytes(bytes[1..5].try_into().unwrap()), -2);
        assert_eq!(bytes.len(), 5);
    }

    #[test]
    fn float_operand_encoding() {
        let bytes = assemble("pushf 2.5");
        assert_eq!(bytes[0], Instruction::PushF as u8);
        let bits = u64::from_be_bytes(bytes[1..9].try_into().unwrap());
        assert_eq!(f64::from_bits(bits), 2.5);
    }

    #[test]
    fn float_operand_accepts_sign_and_integer_form() {
        let bytes = assemble("pushf -3");
        let bits = u64::from_be_bytes(bytes[1..9].try_into().unwrap());
        assert_eq!(f64::from_bits(bits), -3.0);
    }

    #[test]
    fn address_operand_numeric() {
        let bytes = assemble("jump 9");
        assert_eq!(bytes[0], Instruction::Jump as u8);
        assert_eq!(u64::from_be_bytes(bytes[1..9].try_into().unwrap()), 9);
    }

    #[test]
    fn string_operand_is_length_prefixed() {
        let bytes = assemble(r#"pushs "ab""#);
        assert_eq!(bytes[0], Instruction::PushS as u8);
        assert_eq!(u64::from_be_bytes(bytes[1..9].try_into().unwrap()), 2);
        assert_eq!(&bytes[9..], b"ab");
    }

    #[test]
    fn string_escapes_decode() {
        let bytes = assemble(r#"pushs "a\n\t\r\0\q""#);
        assert_eq!(&bytes[9..], &[b'a', b'\n', b'\t', b'\r', 0, b'q']);
    }

    #[test]
    fn single_quoted_strings() {
        let bytes = assemble("pushs 'hi'");
        assert_eq!(&bytes[9..], b"hi");
    }

    #[test]
    fn mnemonics_are_case_insensitive() {
        assert_eq!(assemble("NOP"), assemble("nop"));
        assert_eq!(assemble("PushI 1"), assemble("pushi 1"));
    }

    #[test]
    fn backward_label_reference() {
        let bytes = assemble("top: nop jump top");
        assert_eq!(bytes[0], Instruction::Nop as u8);
        assert_eq!(bytes[1], Instruction::Jump as u8);
        assert_eq!(u64::from_be_bytes(bytes[2..10].try_into().unwrap()), 0);
    }

    #[test]
    fn forward_label_is_backpatched() {
        // jump(9) skips the nop at offset 9; the label lands at offset 10.
        let bytes = assemble("jump end nop end: stop");
        assert_eq!(u64::from_be_bytes(bytes[1..9].try_into().unwrap()), 10);
        assert_eq!(bytes[10], Instruction::Stop as u8);
    }

    #[test]
    fn label_definition_allows_space_before_colon() {
        let bytes = assemble("here : jump here");
        assert_eq!(bytes[0], Instruction::Jump as u8);
        assert_eq!(u64::from_be_bytes(bytes[1..9].try_into().unwrap()), 0);
    }

    #[test]
    fn missing_label_fails() {
        let (err, parser) = assemble_err("jump nowhere");
        assert!(matches!(err, VMError::MissingLabel { ref label } if label == "nowhere"));
        assert_eq!(parser.err_message(), Some("missing label: nowhere"));
    }

    #[test]
    fn duplicate_label_last_definition_wins() {
        let bytes = assemble("l: nop l: jump l");
        assert_eq!(u64::from_be_bytes(bytes[2..10].try_into().unwrap()), 1);
    }

    #[test]
    fn unknown_mnemonic_is_no_match() {
        let (err, parser) = assemble_err("pushq 1");
        assert!(matches!(err, VMError::NoMatch { .. }));
        assert_eq!(
            parser.err_message(),
            Some("unknown instruction 'pushq'")
        );
        assert_eq!(parser.position().line, 0);
        assert_eq!(parser.position().column, 0);
    }

    #[test]
    fn stroeg_misspelling_is_rejected() {
        let (err, _) = assemble_err("stroeg 0");
        assert!(matches!(err, VMError::NoMatch { .. }));
        let bytes = assemble("storeg 0");
        assert_eq!(bytes[0], Instruction::StoreG as u8);
    }

    #[test]
    fn integer_overflow_is_invalid_number() {
        let (err, _) = assemble_err("pushi 99999999999");
        assert!(matches!(err, VMError::InvalidNumber { .. }));
    }

    #[test]
    fn missing_operand_is_no_match() {
        let (err, _) = assemble_err("pushi");
        assert!(matches!(err, VMError::NoMatch { .. }));
    }

    #[test]
    fn unterminated_string_is_no_match() {
        let (err, parser) = assemble_err("pushs \"abc");
        assert!(matches!(err, VMError::NoMatch { .. }));
        assert_eq!(parser.err_message(), Some("unterminated string literal"));
    }

    #[test]
    fn parsing_is_deterministic() {
        let source = r#"
            start pushi 10 pusha f call writelni stop
            f: pushl -1 pushi 1 add return
        "#;
        assert_eq!(assemble(source), assemble(source));
    }

    #[test]
    fn source_map_covers_every_instruction() {
        let mut parser = Parser::new("pushi 1\npushi 2\nadd stop");
        parser.parse().unwrap();
        let map = parser.take_source_map();
        assert_eq!(map.len(), 4);

        let offsets: Vec<usize> = map.iter().map(|s| s.instruction).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);

        // The add at bytecode offset 10 sits on line 2.
        let span = map.find(10).unwrap();
        assert_eq!(span.instruction, 10);
        assert_eq!(span.start.line, 2);
    }

    #[test]
    fn current_line_reports_failure_context() {
        let (_, parser) = assemble_err("nop\nbogus 1\nnop");
        assert_eq!(parser.current_line(), "bogus 1");
        assert_eq!(parser.position().line, 1);
    }

    #[test]
    fn source_span_slices_between_positions() {
        let parser = Parser::new("pushi 42");
        let start = TextPosition::new(0, 0, 0);
        let end = TextPosition::new(0, 5, 5);
        assert_eq!(parser.source_span(start, end), "pushi");
    }
}
