// Expression Lexer

use super::{ExprError, ExprResult};

/// Token kinds produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Ident(name) => format!("'{}'", name),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Dot => "'.'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Bang => "'!'".to_string(),
            Token::AndAnd => "'&&'".to_string(),
            Token::OrOr => "'||'".to_string(),
            Token::EqEq => "'=='".to_string(),
            Token::NotEq => "'!='".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Le => "'<='".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::Ge => "'>='".to_string(),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::Percent => "'%'".to_string(),
        }
    }
}

/// A token with its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

fn syntax(pos: usize, message: impl Into<String>) -> ExprError {
    ExprError::Syntax {
        pos,
        message: message.into(),
    }
}

/// Split an expression source into tokens
pub(crate) fn tokenize(src: &str) -> ExprResult<Vec<Spanned>> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    // Peek at the char after index i
    let next_is = |i: usize, expected: char| i + 1 < len && chars[i + 1].1 == expected;

    while i < len {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < len && chars[i].1.is_ascii_digit() {
                i += 1;
            }
            if i + 1 < len && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
                i += 1;
                while i < len && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| syntax(pos, format!("invalid number '{}'", text)))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                pos,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                if i >= len {
                    return Err(syntax(pos, "unterminated string"));
                }
                let ch = chars[i].1;
                i += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    if i >= len {
                        return Err(syntax(pos, "unterminated string"));
                    }
                    let escaped = chars[i].1;
                    i += 1;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                } else {
                    text.push(ch);
                }
            }
            tokens.push(Spanned {
                token: Token::Str(text),
                pos,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < len && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$') {
                i += 1;
            }
            let name: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            tokens.push(Spanned {
                token: Token::Ident(name),
                pos,
            });
            continue;
        }

        let (token, width) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '.' => (Token::Dot, 1),
            ',' => (Token::Comma, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '&' if next_is(i, '&') => (Token::AndAnd, 2),
            '|' if next_is(i, '|') => (Token::OrOr, 2),
            // Accept both == and ===
            '=' if next_is(i, '=') => (Token::EqEq, if next_is(i + 1, '=') { 3 } else { 2 }),
            '!' if next_is(i, '=') => (Token::NotEq, if next_is(i + 1, '=') { 3 } else { 2 }),
            '!' => (Token::Bang, 1),
            '<' if next_is(i, '=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if next_is(i, '=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '=' => return Err(syntax(pos, "'=' is not an operator, use '=='")),
            other => return Err(syntax(pos, format!("unexpected character '{}'", other))),
        };
        tokens.push(Spanned { token, pos });
        i += width;
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_tokens() {
        assert_eq!(
            kinds("data.count >= 10 && !x"),
            vec![
                Token::Ident("data".into()),
                Token::Dot,
                Token::Ident("count".into()),
                Token::Ge,
                Token::Number(10.0),
                Token::AndAnd,
                Token::Bang,
                Token::Ident("x".into()),
            ]
        );
        assert_eq!(kinds("a === b"), kinds("a == b"));
        assert_eq!(kinds("1.5"), vec![Token::Number(1.5)]);
        assert_eq!(kinds("'it\\'s'"), vec![Token::Str("it's".into())]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            tokenize("\"open"),
            Err(ExprError::Syntax { pos: 0, .. })
        ));
        assert!(matches!(tokenize("a = b"), Err(ExprError::Syntax { pos: 2, .. })));
        assert!(matches!(tokenize("a # b"), Err(ExprError::Syntax { .. })));
    }
}
