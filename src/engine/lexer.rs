//! Splits template source into text and actions, and tokenizes action bodies.

use super::{ParseError, ParseErrorKind};
use crate::data::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// One piece of template source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Piece<'a> {
    Text(String),
    Action {
        /// Source between the delimiters, without trim markers.
        body: &'a str,
        line: usize,
        /// The whole placeholder, delimiters included.
        raw: &'a str,
    },
}

fn is_space(c: char) -> bool {
    c.is_ascii_whitespace()
}

/// `{{- ` trims only when the dash is followed by whitespace, so `{{-3}}` is a number.
fn has_left_trim(src: &str, body_start: usize) -> bool {
    let mut rest = src[body_start..].chars();
    rest.next() == Some('-') && rest.next().map_or(false, is_space)
}

fn has_right_trim(src: &str, close: usize, body_start: usize) -> bool {
    close >= body_start + 2 && src[..close].ends_with('-') && src[..close - 1].ends_with(is_space)
}

/// Byte offset of the `}}` that ends an action whose body starts at `from`.
///
/// Quoted strings, raw strings and rune literals are skipped so a literal
/// containing `}}` does not end the action.
fn find_close(src: &str, from: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
                i += 1;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Splits `src` into text and actions, applying trim markers and dropping comments.
pub(crate) fn split<'a>(name: &str, src: &'a str) -> Result<Vec<Piece<'a>>, ParseError> {
    let mut pieces = Vec::new();
    let mut pos = 0;
    let mut line = 1;
    let mut trim_next = false;

    while let Some(rel) = src[pos..].find(OPEN) {
        let open = pos + rel;
        let mut text = &src[pos..open];
        if trim_next {
            text = text.trim_start_matches(is_space);
        }
        let mut body_start = open + OPEN.len();
        if has_left_trim(src, body_start) {
            text = text.trim_end_matches(is_space);
            body_start += 2;
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text.to_string()));
        }
        line += src[pos..open].matches('\n').count();

        let unclosed = |message: &str| ParseError {
            name: name.to_string(),
            line,
            message: message.to_string(),
            placeholder: Some(src[open..].chars().take(40).collect()),
            kind: ParseErrorKind::UnclosedAction,
        };

        let close = if src[body_start..].starts_with("/*") {
            let comment_end = src[body_start..]
                .find("*/")
                .map(|i| body_start + i + 2)
                .ok_or_else(|| unclosed("unclosed comment"))?;
            let tail = src[comment_end..].trim_start_matches(is_space);
            let tail = tail.strip_prefix('-').unwrap_or(tail);
            if !tail.starts_with(CLOSE) {
                return Err(unclosed("comment ends before closing delimiter"));
            }
            src.len() - tail.len()
        } else {
            find_close(src, body_start).ok_or_else(|| unclosed("unclosed action"))?
        };

        let right_trim = has_right_trim(src, close, body_start);
        let body_end = if right_trim { close - 1 } else { close };
        let end = close + CLOSE.len();
        let body = &src[body_start..body_end.max(body_start)];
        if !body.starts_with("/*") {
            pieces.push(Piece::Action {
                body,
                line,
                raw: &src[open..end],
            });
        }

        line += src[open..end].matches('\n').count();
        pos = end;
        trim_next = right_trim;
    }

    let mut text = &src[pos..];
    if trim_next {
        text = text.trim_start_matches(is_space);
    }
    if !text.is_empty() {
        pieces.push(Piece::Text(text.to_string()));
    }
    Ok(pieces)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// Keyword or helper name.
    Ident(String),
    /// `.Name`
    Field(String),
    /// `.` on its own.
    Dot,
    /// `$` or `$name`; the name excludes the sigil.
    Variable(String),
    Literal(Value),
    Pipe,
    LeftParen,
    RightParen,
    Declare,
    Assign,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    /// Whitespace preceded the token; field chains must be unspaced.
    pub spaced: bool,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn take_while(chars: &[char], start: usize, pred: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && pred(chars[end]) {
        end += 1;
    }
    end
}

/// Tokenizes the body of one action.
pub(crate) fn tokenize(body: &str) -> Result<Vec<Spanned>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut spaced = false;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            spaced = true;
            i += 1;
            continue;
        }
        let next = chars.get(i + 1).copied();
        let token = match c {
            '|' => {
                i += 1;
                Token::Pipe
            }
            '(' => {
                i += 1;
                Token::LeftParen
            }
            ')' => {
                i += 1;
                Token::RightParen
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            ':' if next == Some('=') => {
                i += 2;
                Token::Declare
            }
            '=' => {
                i += 1;
                Token::Assign
            }
            '.' if next.map_or(false, is_ident_start) => {
                let end = take_while(&chars, i + 1, is_ident_char);
                let name: String = chars[i + 1..end].iter().collect();
                i = end;
                Token::Field(name)
            }
            '.' if next.map_or(false, |n| n.is_ascii_digit()) => {
                let (value, end) = number(&chars, i)?;
                i = end;
                Token::Literal(value)
            }
            '.' => {
                i += 1;
                Token::Dot
            }
            '$' => {
                let end = take_while(&chars, i + 1, is_ident_char);
                let name: String = chars[i + 1..end].iter().collect();
                i = end;
                Token::Variable(name)
            }
            '"' => {
                let (text, end) = quoted(&chars, i, '"')?;
                i = end;
                Token::Literal(Value::String(text))
            }
            '\'' => {
                let (text, end) = quoted(&chars, i, '\'')?;
                let mut runes = text.chars();
                match (runes.next(), runes.next()) {
                    (Some(rune), None) => {
                        i = end;
                        Token::Literal(Value::Int(rune as i64))
                    }
                    _ => return Err(format!("malformed character constant: '{}'", text)),
                }
            }
            '`' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '`')
                    .ok_or_else(|| "unterminated raw quoted string".to_string())?;
                let text: String = chars[i + 1..i + 1 + close].iter().collect();
                i += close + 2;
                Token::Literal(Value::String(text))
            }
            '-' | '+' if next.map_or(false, |n| n.is_ascii_digit() || n == '.') => {
                let (value, end) = number(&chars, i)?;
                i = end;
                Token::Literal(value)
            }
            d if d.is_ascii_digit() => {
                let (value, end) = number(&chars, i)?;
                i = end;
                Token::Literal(value)
            }
            s if is_ident_start(s) => {
                let end = take_while(&chars, i, is_ident_char);
                let word: String = chars[i..end].iter().collect();
                i = end;
                match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "nil" => Token::Literal(Value::Null),
                    _ => Token::Ident(word),
                }
            }
            other => return Err(format!("unexpected {:?} in command", other)),
        };
        tokens.push(Spanned { token, spaced });
        spaced = false;
    }
    Ok(tokens)
}

/// Reads a quoted literal starting at `chars[start]`, returning the decoded
/// text and the offset just past the closing quote.
fn quoted(chars: &[char], start: usize, quote: char) -> Result<(String, usize), String> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escape = chars.get(i + 1).copied().ok_or("unterminated quoted string")?;
                i += 2;
                match escape {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' | '"' | '\'' => out.push(escape),
                    'x' | 'u' | 'U' => {
                        let width = match escape {
                            'x' => 2,
                            'u' => 4,
                            _ => 8,
                        };
                        let digits: String = chars.get(i..i + width).unwrap_or_default().iter().collect();
                        let code = u32::from_str_radix(&digits, 16)
                            .ok()
                            .filter(|_| digits.len() == width)
                            .and_then(char::from_u32)
                            .ok_or_else(|| format!("invalid escape \\{}{}", escape, digits))?;
                        out.push(code);
                        i += width;
                    }
                    other => return Err(format!("unknown escape sequence: \\{}", other)),
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated quoted string".to_string())
}

/// Reads a number: decimal or hex integers, and floats with optional exponent.
fn number(chars: &[char], start: usize) -> Result<(Value, usize), String> {
    let mut end = start;
    if matches!(chars[end], '-' | '+') {
        end += 1;
    }
    let is_hex = chars.get(end) == Some(&'0') && matches!(chars.get(end + 1), Some('x' | 'X'));
    if is_hex {
        end = take_while(chars, end + 2, |c| c.is_ascii_hexdigit() || c == '_');
    } else {
        end = take_while(chars, end, |c| c.is_ascii_digit() || c == '_' || c == '.');
        if matches!(chars.get(end), Some('e' | 'E')) {
            let mut exp = end + 1;
            if matches!(chars.get(exp), Some('-' | '+')) {
                exp += 1;
            }
            end = take_while(chars, exp, |c| c.is_ascii_digit());
        }
    }
    if chars.get(end).map_or(false, |&c| is_ident_char(c)) {
        let bad: String = chars[start..=end].iter().collect();
        return Err(format!("bad number syntax: {:?}", bad));
    }

    let text: String = chars[start..end].iter().filter(|&&c| c != '_').collect();
    let bad = || format!("bad number syntax: {:?}", text);
    let value = if is_hex {
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.trim_start_matches('+')),
        };
        let n = i64::from_str_radix(&digits[2..], 16).map_err(|_| bad())?;
        Value::Int(if negative { -n } else { n })
    } else if text.contains(['.', 'e', 'E']) {
        Value::Float(text.parse().map_err(|_| bad())?)
    } else if let Ok(n) = text.parse::<i64>() {
        Value::Int(n)
    } else {
        Value::Uint(text.trim_start_matches('+').parse().map_err(|_| bad())?)
    };
    Ok((value, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts_and_bodies(src: &str) -> Vec<String> {
        split("t", src)
            .unwrap()
            .into_iter()
            .map(|p| match p {
                Piece::Text(t) => format!("T:{}", t),
                Piece::Action { body, .. } => format!("A:{}", body),
            })
            .collect()
    }

    fn kinds(body: &str) -> Vec<Token> {
        tokenize(body).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_split_text_and_actions() {
        assert_eq!(texts_and_bodies("a {{.B}} c"), vec!["T:a ", "A:.B", "T: c"]);
    }

    #[test]
    fn test_trim_markers() {
        assert_eq!(texts_and_bodies("a  {{- .B -}}\n c"), vec!["T:a", "A:.B ", "T:c"]);
        assert_eq!(texts_and_bodies("a {{-3}}"), vec!["T:a ", "A:-3"]);
    }

    #[test]
    fn test_comments_dropped() {
        assert_eq!(texts_and_bodies("a {{/* note */}} b"), vec!["T:a ", "T: b"]);
        assert_eq!(texts_and_bodies("a {{- /* note */ -}} b"), vec!["T:a", "T:b"]);
    }

    #[test]
    fn test_close_inside_literal_ignored() {
        assert_eq!(texts_and_bodies(r#"{{ print "}}" }}!"#), vec![r#"A: print "}}" "#, "T:!"]);
    }

    #[test]
    fn test_unclosed_action() {
        let err = split("t", "line\n{{ .A ").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnclosedAction);
        assert_eq!(err.line, 2);
        assert_eq!(err.to_string(), "template: t:2: unclosed action");
    }

    #[test]
    fn test_line_numbers() {
        let pieces = split("t", "a\nb {{.X}}\n{{.Y}}").unwrap();
        let lines: Vec<usize> = pieces
            .iter()
            .filter_map(|p| match p {
                Piece::Action { line, .. } => Some(*line),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn test_tokens() {
        assert_eq!(
            kinds(r#"$x := .A.B | printf "%d" 0x1F -2 1.5 'a' `r\n` true nil"#),
            vec![
                Token::Variable("x".into()),
                Token::Declare,
                Token::Field("A".into()),
                Token::Field("B".into()),
                Token::Pipe,
                Token::Ident("printf".into()),
                Token::Literal(Value::from("%d")),
                Token::Literal(Value::Int(31)),
                Token::Literal(Value::Int(-2)),
                Token::Literal(Value::Float(1.5)),
                Token::Literal(Value::Int(97)),
                Token::Literal(Value::from("r\\n")),
                Token::Literal(Value::Bool(true)),
                Token::Literal(Value::Null),
            ]
        );
    }

    #[test]
    fn test_field_adjacency() {
        let tokens = tokenize("(.A).B .C").unwrap();
        assert!(!tokens[3].spaced);
        assert!(tokens[4].spaced);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\"b\né""#), vec![Token::Literal(Value::from("a\"b\né"))]);
        assert!(tokenize(r#""open"#).is_err());
        assert!(tokenize("3x").is_err());
    }
}
