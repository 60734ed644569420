use crate::error::RegistrationErrorKind;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Named(String),
    Positional(usize),
    Int(i64),
    Float(f64),
    Text(String),
    Dot,
    Comma,
    LParen,
    RParen,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
}

impl Token {
    /// Case-insensitive keyword test.
    pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident(word) if word.eq_ignore_ascii_case(keyword))
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Ident(word) => format!("'{word}'"),
            Token::Named(name) => format!("':{name}'"),
            Token::Positional(n) => format!("'?{n}'"),
            Token::Int(i) => format!("'{i}'"),
            Token::Float(f) => format!("'{f}'"),
            Token::Text(s) => format!("string '{s}'"),
            Token::Dot => "'.'".into(),
            Token::Comma => "','".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Eq => "'='".into(),
            Token::NotEq => "'<>'".into(),
            Token::Lt => "'<'".into(),
            Token::Le => "'<='".into(),
            Token::Gt => "'>'".into(),
            Token::Ge => "'>='".into(),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
        }
    }
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

fn syntax(position: usize, message: impl Into<String>) -> RegistrationErrorKind {
    RegistrationErrorKind::Syntax {
        position,
        message: message.into(),
    }
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, RegistrationErrorKind> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let token = match c {
            b'.' => {
                i += 1;
                Token::Dot
            }
            b',' => {
                i += 1;
                Token::Comma
            }
            b'(' => {
                i += 1;
                Token::LParen
            }
            b')' => {
                i += 1;
                Token::RParen
            }
            b'+' => {
                i += 1;
                Token::Plus
            }
            b'-' => {
                i += 1;
                Token::Minus
            }
            b'*' => {
                i += 1;
                Token::Star
            }
            b'/' => {
                i += 1;
                Token::Slash
            }
            b'=' => {
                i += 1;
                Token::Eq
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                Token::NotEq
            }
            b'<' => match bytes.get(i + 1) {
                Some(b'=') => {
                    i += 2;
                    Token::Le
                }
                Some(b'>') => {
                    i += 2;
                    Token::NotEq
                }
                _ => {
                    i += 1;
                    Token::Lt
                }
            },
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    i += 2;
                    Token::Ge
                } else {
                    i += 1;
                    Token::Gt
                }
            }
            b':' => {
                i += 1;
                let name_start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if i == name_start {
                    return Err(syntax(start, "expected a parameter name after ':'"));
                }
                Token::Named(input[name_start..i].to_string())
            }
            b'?' => {
                i += 1;
                let digits_start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let n: usize = input[digits_start..i]
                    .parse()
                    .map_err(|_| syntax(start, "expected a position after '?'"))?;
                if n == 0 {
                    return Err(syntax(start, "positional parameters start at ?1"));
                }
                Token::Positional(n)
            }
            b'\'' => {
                i += 1;
                let mut text = String::new();
                loop {
                    match input[i..].find('\'') {
                        Some(offset) => {
                            text.push_str(&input[i..i + offset]);
                            i += offset + 1;
                            // '' escapes a quote
                            if bytes.get(i) == Some(&b'\'') {
                                text.push('\'');
                                i += 1;
                            } else {
                                break;
                            }
                        }
                        None => return Err(syntax(start, "unterminated string literal")),
                    }
                }
                Token::Text(text)
            }
            c if c.is_ascii_digit() => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let is_float = bytes.get(i) == Some(&b'.')
                    && bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
                if is_float {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                    let f: f64 = input[start..i]
                        .parse()
                        .map_err(|_| syntax(start, "invalid number"))?;
                    Token::Float(f)
                } else {
                    let n: i64 = input[start..i]
                        .parse()
                        .map_err(|_| syntax(start, "integer out of range"))?;
                    Token::Int(n)
                }
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                Token::Ident(input[start..i].to_string())
            }
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(syntax(start, format!("unexpected character '{ch}'")));
            }
        };
        out.push(Spanned { token, pos: start });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn placeholders_and_operators() {
        assert_eq!(
            tokens("m.age >=:age and m.id <> ?2"),
            vec![
                Token::Ident("m".into()),
                Token::Dot,
                Token::Ident("age".into()),
                Token::Ge,
                Token::Named("age".into()),
                Token::Ident("and".into()),
                Token::Ident("m".into()),
                Token::Dot,
                Token::Ident("id".into()),
                Token::NotEq,
                Token::Positional(2),
            ]
        );
    }

    #[test]
    fn string_literal_with_escaped_quote() {
        assert_eq!(tokens("'it''s'"), vec![Token::Text("it's".into())]);
    }

    #[test]
    fn numbers() {
        assert_eq!(tokens("1 2.5"), vec![Token::Int(1), Token::Float(2.5)]);
    }

    #[test]
    fn positions_are_byte_offsets() {
        let spanned = tokenize("select  m").unwrap();
        assert_eq!(spanned[1].pos, 8);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            tokenize("m.age # 1"),
            Err(RegistrationErrorKind::Syntax { position: 6, .. })
        ));
        assert!(tokenize("'open").is_err());
        assert!(tokenize("?0").is_err());
    }
}
