//! Tokeniser for the expression sublanguage.

use rb_core::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Dot,
    LParen,
    RParen,
    Not,
    And,
    Or,
    StrictEq,
    StrictNe,
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string '{s}'"),
            Token::Dot => "'.'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Not => "'!'".into(),
            Token::And => "'&&'".into(),
            Token::Or => "'||'".into(),
            Token::StrictEq => "'==='".into(),
            Token::StrictNe => "'!=='".into(),
            Token::Eq => "'=='".into(),
            Token::Ne => "'!='".into(),
            Token::Ge => "'>='".into(),
            Token::Le => "'<='".into(),
            Token::Gt => "'>'".into(),
            Token::Lt => "'<'".into(),
        }
    }
}

/// A token plus its byte offset in the source expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

fn error(position: usize, message: impl Into<String>) -> EngineError {
    EngineError::Template {
        position,
        message: message.into(),
    }
}

/// Tokenise an expression. `base_offset` shifts reported positions so that
/// errors inside `{{ … }}` segments point into the full template string.
pub fn tokenize(source: &str, base_offset: usize) -> Result<Vec<Spanned>, EngineError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let at = base_offset + i;
        let rest = &source[i..];
        let ch = bytes[i] as char;

        if ch.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // Longest-match punctuation first.
        let punct = [
            ("===", Token::StrictEq),
            ("!==", Token::StrictNe),
            ("==", Token::Eq),
            ("!=", Token::Ne),
            ("&&", Token::And),
            ("||", Token::Or),
            (">=", Token::Ge),
            ("<=", Token::Le),
            (">", Token::Gt),
            ("<", Token::Lt),
            ("!", Token::Not),
            ("(", Token::LParen),
            (")", Token::RParen),
            (".", Token::Dot),
        ]
        .into_iter()
        .find(|(text, _)| rest.starts_with(text));

        if let Some((text, token)) = punct {
            tokens.push(Spanned {
                token,
                position: at,
            });
            i += text.len();
            continue;
        }

        if ch == '\'' || ch == '"' {
            let (literal, consumed) = scan_string(rest, ch, at)?;
            tokens.push(Spanned {
                token: Token::Str(literal),
                position: at,
            });
            i += consumed;
            continue;
        }

        if ch.is_ascii_digit() || (ch == '-' && rest[1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            let end = rest
                .char_indices()
                .skip(1)
                .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
                .map(|(idx, _)| idx)
                .unwrap_or(rest.len());
            let text = &rest[..end];
            let value: f64 = text
                .parse()
                .map_err(|_| error(at, format!("invalid number '{text}'")))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                position: at,
            });
            i += end;
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' || ch == '$' {
            let end = rest
                .char_indices()
                .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_' && *c != '$')
                .map(|(idx, _)| idx)
                .unwrap_or(rest.len());
            tokens.push(Spanned {
                token: Token::Ident(rest[..end].to_string()),
                position: at,
            });
            i += end;
            continue;
        }

        return Err(error(at, format!("unexpected character '{ch}'")));
    }

    Ok(tokens)
}

/// Scan a quoted string literal, returning (unescaped value, bytes consumed).
fn scan_string(rest: &str, quote: char, at: usize) -> Result<(String, usize), EngineError> {
    let mut value = String::new();
    let mut chars = rest.char_indices().skip(1).peekable();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((value, idx + c.len_utf8())),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, escaped)) => value.push(escaped),
                None => return Err(error(at, "unterminated escape in string literal")),
            },
            other => value.push(other),
        }
    }
    Err(error(at, "unterminated string literal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source, 0)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_dotted_path() {
        assert_eq!(
            kinds("state.answers.foo"),
            vec![
                Token::Ident("state".into()),
                Token::Dot,
                Token::Ident("answers".into()),
                Token::Dot,
                Token::Ident("foo".into()),
            ]
        );
    }

    #[test]
    fn test_longest_match_operators() {
        assert_eq!(kinds("==="), vec![Token::StrictEq]);
        assert_eq!(kinds("!=="), vec![Token::StrictNe]);
        assert_eq!(kinds("!= !"), vec![Token::Ne, Token::Not]);
        assert_eq!(kinds(">= >"), vec![Token::Ge, Token::Gt]);
    }

    #[test]
    fn test_string_literals_both_quotes() {
        assert_eq!(kinds("'abc'"), vec![Token::Str("abc".into())]);
        assert_eq!(kinds("\"a'b\""), vec![Token::Str("a'b".into())]);
        assert_eq!(kinds(r#"'a\'b'"#), vec![Token::Str("a'b".into())]);
        assert_eq!(kinds(r#"'line\nbreak'"#), vec![Token::Str("line\nbreak".into())]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42"), vec![Token::Number(42.0)]);
        assert_eq!(kinds("-3.5"), vec![Token::Number(-3.5)]);
    }

    #[test]
    fn test_unterminated_string_errors_with_position() {
        let err = tokenize("a 'oops", 10).unwrap_err();
        let rb_core::EngineError::Template { position, .. } = err else {
            panic!("expected template error");
        };
        assert_eq!(position, 12);
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a @ b", 0).unwrap_err();
        assert!(err.to_string().contains("unexpected character '@'"));
    }
}
