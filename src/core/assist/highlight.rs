//! Syntax highlighting for the input line.
//!
//! Tokenizing is for display only. The command parser never looks at these
//! tokens, so a mistake here can change colours but not what gets sent.

use serde::Serialize;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Command,
    Parameter,
    Value,
    Comment,
    Unknown,
}

/// A byte range of the line and how to render it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub span: Range<usize>,
    pub kind: TokenKind,
}

impl Token {
    fn new(span: Range<usize>, kind: TokenKind) -> Self {
        Self { span, kind }
    }
}

/// Split `line` into highlighted spans, in order. Whitespace and the `,`
/// separators between commands are not covered by any token.
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();

    let code_end = if line.trim_start().starts_with('#') {
        line.len() - line.trim_start().len()
    } else {
        line.find(';').unwrap_or(line.len())
    };

    let mut segment_start = 0;
    for segment in line[..code_end].split(',') {
        tokenize_command(segment, segment_start, &mut tokens);
        segment_start += segment.len() + 1;
    }

    if code_end < line.len() {
        tokens.push(Token::new(code_end..line.len(), TokenKind::Comment));
    }
    tokens
}

fn tokenize_command(segment: &str, offset: usize, tokens: &mut Vec<Token>) {
    let mut words = words(segment, offset);
    let Some((start, command)) = words.next() else {
        return;
    };

    let builtin = command.starts_with(':');
    let kind = if is_command_name(command) {
        TokenKind::Command
    } else {
        TokenKind::Unknown
    };
    tokens.push(Token::new(start..start + command.len(), kind));

    for (start, word) in words {
        if builtin {
            tokens.push(Token::new(start..start + word.len(), TokenKind::Value));
        } else {
            tokenize_argument(word, start, tokens);
        }
    }
}

fn tokenize_argument(word: &str, start: usize, tokens: &mut Vec<Token>) {
    let end = start + word.len();

    // Extended syntax: KEY=VALUE
    if let Some(eq) = word.find('=') {
        if eq > 0 && is_identifier(&word[..eq]) {
            tokens.push(Token::new(start..start + eq + 1, TokenKind::Parameter));
            if eq + 1 < word.len() {
                tokens.push(Token::new(start + eq + 1..end, TokenKind::Value));
            }
            return;
        }
        tokens.push(Token::new(start..end, TokenKind::Unknown));
        return;
    }

    // Classic syntax: a letter followed by an optional number, e.g. X10.5
    let mut chars = word.chars();
    if let Some(letter) = chars.next() {
        let rest = chars.as_str();
        if letter.is_ascii_alphabetic() && (rest.is_empty() || rest.parse::<f64>().is_ok()) {
            tokens.push(Token::new(start..start + 1, TokenKind::Parameter));
            if !rest.is_empty() {
                tokens.push(Token::new(start + 1..end, TokenKind::Value));
            }
            return;
        }
    }

    tokens.push(Token::new(start..end, TokenKind::Unknown));
}

fn is_command_name(word: &str) -> bool {
    match word.strip_prefix(':') {
        Some(builtin) => !builtin.is_empty() && builtin.chars().all(|c| c.is_ascii_alphabetic()),
        None => is_identifier(word),
    }
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        }
        _ => false,
    }
}

/// Whitespace-separated words of `text` with their absolute byte offsets
fn words(text: &str, offset: usize) -> impl Iterator<Item = (usize, &str)> {
    let mut rest = text;
    let mut position = offset;
    std::iter::from_fn(move || {
        let trimmed = rest.trim_start();
        position += rest.len() - trimmed.len();
        if trimmed.is_empty() {
            return None;
        }
        let len = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let word = &trimmed[..len];
        let start = position;
        position += len;
        rest = &trimmed[len..];
        Some((start, word))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(line: &str) -> Vec<(&str, TokenKind)> {
        tokenize(line)
            .into_iter()
            .map(|t| (&line[t.span], t.kind))
            .collect()
    }

    #[test]
    fn test_classic_gcode() {
        assert_eq!(
            kinds("G1 X10.5 Y-3 F3000"),
            vec![
                ("G1", Command),
                ("X", Parameter),
                ("10.5", Value),
                ("Y", Parameter),
                ("-3", Value),
                ("F", Parameter),
                ("3000", Value),
            ]
        );
    }

    #[test]
    fn test_extended_parameters() {
        assert_eq!(
            kinds("SET_HEATER_TEMPERATURE HEATER=extruder TARGET=210"),
            vec![
                ("SET_HEATER_TEMPERATURE", Command),
                ("HEATER=", Parameter),
                ("extruder", Value),
                ("TARGET=", Parameter),
                ("210", Value),
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(kinds("G28 ; home"), vec![("G28", Command), ("; home", Comment)]);
        assert_eq!(kinds("# setup"), vec![("# setup", Comment)]);
        assert_eq!(kinds("  ;only"), vec![(";only", Comment)]);
    }

    #[test]
    fn test_multiple_commands() {
        assert_eq!(
            kinds("G28, M105"),
            vec![("G28", Command), ("M105", Command)]
        );
    }

    #[test]
    fn test_builtins_and_unknown() {
        assert_eq!(kinds(":printer voron"), vec![(":printer", Command), ("voron", Value)]);
        assert_eq!(kinds("12abc =5"), vec![("12abc", Unknown), ("=5", Unknown)]);
        assert_eq!(kinds("M117 hello"), vec![("M117", Command), ("hello", Unknown)]);
    }

    #[test]
    fn test_spans_are_ordered_and_in_bounds() {
        let line = "  G1 X1 , CLEAN_NOZZLE  TEMP=200 ; done";
        let tokens = tokenize(line);
        assert!(tokens.windows(2).all(|w| w[0].span.end <= w[1].span.start));
        assert!(tokens.iter().all(|t| t.span.end <= line.len()));
    }

    #[test]
    fn test_empty_line() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ").is_empty());
    }
}
