//! Tokenizer for the runtime expression language.
//!
//! String literals are tokenized into segments so that `\( expr )`
//! interpolations survive as raw sub-sources; the parser lexes and parses
//! them recursively.

use grantor_types::error::Problem;

/// A piece of a string literal: literal text or an interpolated expression
/// source (the text between `\(` and its matching `)`).
#[derive(Debug, Clone, PartialEq)]
pub enum StrSegment {
    Literal(String),
    Interp(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Dot,
    Ident(String),
    Var(String),
    Num(f64),
    Str(Vec<StrSegment>),
    True,
    False,
    Null,
    If,
    Then,
    Elif,
    Else,
    End,
    And,
    Or,
    Not,
    LBracket,
    RBracket,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    Pipe,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `//` null-coalescing alternative.
    Alt,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, Problem> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                pos += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                pos += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                pos += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            ';' => {
                tokens.push(Token::Semi);
                pos += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                pos += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                pos += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                pos += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                pos += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                pos += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                pos += 1;
            }
            '/' => {
                if chars.get(pos + 1) == Some(&'/') {
                    tokens.push(Token::Alt);
                    pos += 2;
                } else {
                    tokens.push(Token::Slash);
                    pos += 1;
                }
            }
            '=' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    pos += 2;
                } else {
                    return Err(unexpected(c, pos));
                }
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    pos += 2;
                } else {
                    return Err(unexpected(c, pos));
                }
            }
            '<' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    pos += 2;
                } else {
                    tokens.push(Token::Lt);
                    pos += 1;
                }
            }
            '>' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    pos += 2;
                } else {
                    tokens.push(Token::Gt);
                    pos += 1;
                }
            }
            '$' => {
                pos += 1;
                let start = pos;
                while pos < chars.len() && is_ident_char(chars[pos]) {
                    pos += 1;
                }
                if start == pos {
                    return Err(Problem::expression("expected variable name after '$'"));
                }
                tokens.push(Token::Var(chars[start..pos].iter().collect()));
            }
            '"' => {
                let (segments, next) = lex_string(&chars, pos)?;
                tokens.push(Token::Str(segments));
                pos = next;
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_ascii_digit() || chars[pos] == '.' || chars[pos] == 'e'
                        || chars[pos] == 'E'
                        || ((chars[pos] == '+' || chars[pos] == '-')
                            && matches!(chars.get(pos - 1), Some('e') | Some('E'))))
                {
                    // A '.' followed by a non-digit terminates the number so
                    // `1.foo` stays a parse error rather than a field access.
                    if chars[pos] == '.'
                        && !chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit())
                    {
                        break;
                    }
                    pos += 1;
                }
                let text: String = chars[start..pos].iter().collect();
                let value: f64 = text
                    .parse()
                    .map_err(|_| Problem::expression(format!("invalid number literal '{text}'")))?;
                tokens.push(Token::Num(value));
            }
            c if is_ident_start(c) => {
                let start = pos;
                while pos < chars.len() && is_ident_char(chars[pos]) {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "if" => Token::If,
                    "then" => Token::Then,
                    "elif" => Token::Elif,
                    "else" => Token::Else,
                    "end" => Token::End,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(unexpected(other, pos)),
        }
    }

    Ok(tokens)
}

/// Lex a string literal starting at the opening quote. Returns the segments
/// and the position just past the closing quote.
fn lex_string(chars: &[char], open: usize) -> Result<(Vec<StrSegment>, usize), Problem> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut pos = open + 1;

    loop {
        let Some(&c) = chars.get(pos) else {
            return Err(Problem::expression("unterminated string literal"));
        };
        match c {
            '"' => {
                if !literal.is_empty() || segments.is_empty() {
                    segments.push(StrSegment::Literal(std::mem::take(&mut literal)));
                }
                return Ok((segments, pos + 1));
            }
            '\\' => {
                let Some(&esc) = chars.get(pos + 1) else {
                    return Err(Problem::expression("dangling escape in string literal"));
                };
                match esc {
                    '"' => {
                        literal.push('"');
                        pos += 2;
                    }
                    '\\' => {
                        literal.push('\\');
                        pos += 2;
                    }
                    'n' => {
                        literal.push('\n');
                        pos += 2;
                    }
                    't' => {
                        literal.push('\t');
                        pos += 2;
                    }
                    'r' => {
                        literal.push('\r');
                        pos += 2;
                    }
                    '(' => {
                        // Interpolation: capture raw source until the
                        // matching close paren, honoring nesting and nested
                        // string literals.
                        if !literal.is_empty() {
                            segments.push(StrSegment::Literal(std::mem::take(&mut literal)));
                        }
                        let (inner, next) = capture_interp(chars, pos + 2)?;
                        segments.push(StrSegment::Interp(inner));
                        pos = next;
                    }
                    other => {
                        return Err(Problem::expression(format!(
                            "unsupported escape '\\{other}' in string literal"
                        )));
                    }
                }
            }
            other => {
                literal.push(other);
                pos += 1;
            }
        }
    }
}

/// Capture the raw interpolation source starting just after `\(`. Returns
/// the source and the position just past the matching `)`.
fn capture_interp(chars: &[char], start: usize) -> Result<(String, usize), Problem> {
    let mut depth = 1usize;
    let mut pos = start;
    let mut in_string = false;

    while pos < chars.len() {
        let c = chars[pos];
        if in_string {
            match c {
                '\\' => pos += 1, // skip the escaped character
                '"' => in_string = false,
                _ => {}
            }
        } else {
            match c {
                '"' => in_string = true,
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let inner: String = chars[start..pos].iter().collect();
                        return Ok((inner, pos + 1));
                    }
                }
                _ => {}
            }
        }
        pos += 1;
    }

    Err(Problem::expression("unterminated interpolation in string literal"))
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn unexpected(c: char, pos: usize) -> Problem {
    Problem::expression(format!("unexpected character '{c}' at offset {pos}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_field_access() {
        let tokens = tokenize(".user.name").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Dot,
                Token::Ident("user".into()),
                Token::Dot,
                Token::Ident("name".into()),
            ]
        );
    }

    #[test]
    fn distinguishes_alt_from_division() {
        assert_eq!(tokenize("a // b").unwrap()[1], Token::Alt);
        assert_eq!(tokenize("4 / 2").unwrap()[1], Token::Slash);
    }

    #[test]
    fn lexes_variables() {
        let tokens = tokenize("$context.role").unwrap();
        assert_eq!(tokens[0], Token::Var("context".into()));
    }

    #[test]
    fn lexes_interpolated_string() {
        let tokens = tokenize(r#""The user \(.user.name) is here.""#).unwrap();
        match &tokens[0] {
            Token::Str(segments) => {
                assert_eq!(segments.len(), 3);
                assert_eq!(segments[0], StrSegment::Literal("The user ".into()));
                assert_eq!(segments[1], StrSegment::Interp(".user.name".into()));
                assert_eq!(segments[2], StrSegment::Literal(" is here.".into()));
            }
            other => panic!("expected string token, got {other:?}"),
        }
    }

    #[test]
    fn interpolation_tracks_nested_parens_and_strings() {
        let tokens = tokenize(r#""\( (.a + (1)) )|\( "lit)eral" )""#).unwrap();
        match &tokens[0] {
            Token::Str(segments) => {
                assert_eq!(segments[0], StrSegment::Interp(" (.a + (1)) ".into()));
                assert_eq!(segments[1], StrSegment::Literal("|".into()));
                assert_eq!(segments[2], StrSegment::Interp(" \"lit)eral\" ".into()));
            }
            other => panic!("expected string token, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(tokenize(r#""oops"#).is_err());
        assert!(tokenize(r#""\(.a""#).is_err());
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(tokenize("42").unwrap(), vec![Token::Num(42.0)]);
        assert_eq!(tokenize("3.25").unwrap(), vec![Token::Num(3.25)]);
    }

    #[test]
    fn keywords_are_not_identifiers() {
        let tokens = tokenize("if .a then 1 else 2 end").unwrap();
        assert_eq!(tokens[0], Token::If);
        assert_eq!(tokens[3], Token::Then);
    }
}
