use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    True,
    False,
    Null,
    In,
    OrOr,
    AndAnd,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Bang,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Int(n) => format!("integer {n}"),
            Token::Str(_) => "string literal".to_string(),
            Token::True => "'true'".to_string(),
            Token::False => "'false'".to_string(),
            Token::Null => "'null'".to_string(),
            Token::In => "'in'".to_string(),
            Token::OrOr => "'||'".to_string(),
            Token::AndAnd => "'&&'".to_string(),
            Token::EqEq => "'=='".to_string(),
            Token::Ne => "'!='".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Le => "'<='".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::Ge => "'>='".to_string(),
            Token::Bang => "'!'".to_string(),
            Token::Dot => "'.'".to_string(),
            Token::Comma => "','".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
        }
    }
}

/// Split source text into tokens, each tagged with its byte offset.
pub fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let mut lexer = Lexer {
        chars: src.char_indices().peekable(),
        src,
    };
    let mut out = Vec::new();
    while let Some((token, at)) = lexer.next_token()? {
        out.push((token, at));
    }
    Ok(out)
}

struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    src: &'a str,
}

impl Lexer<'_> {
    fn next_token(&mut self) -> Result<Option<(Token, usize)>, ExprError> {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
        let Some(&(at, c)) = self.chars.peek() else {
            return Ok(None);
        };

        let token = match c {
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '.' => self.single(Token::Dot),
            ',' => self.single(Token::Comma),
            '|' => self.pair(at, '|', Token::OrOr)?,
            '&' => self.pair(at, '&', Token::AndAnd)?,
            '=' => self.pair(at, '=', Token::EqEq)?,
            '!' => {
                self.chars.next();
                if self.eat('=') {
                    Token::Ne
                } else {
                    Token::Bang
                }
            }
            '<' => {
                self.chars.next();
                if self.eat('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                self.chars.next();
                if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '"' | '\'' => self.string(at, c)?,
            '-' => self.int(at)?,
            c if c.is_ascii_digit() => self.int(at)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.ident(at),
            other => {
                return Err(ExprError::parse(at, format!("unexpected character '{other}'")));
            }
        };
        Ok(Some((token, at)))
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn pair(&mut self, at: usize, second: char, token: Token) -> Result<Token, ExprError> {
        let (_, first) = self.chars.next().expect("peeked");
        if self.eat(second) {
            Ok(token)
        } else {
            Err(ExprError::parse(
                at,
                format!("expected '{first}{second}' after '{first}'"),
            ))
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn string(&mut self, at: usize, quote: char) -> Result<Token, ExprError> {
        self.chars.next();
        let mut out = String::new();
        loop {
            let Some((pos, c)) = self.chars.next() else {
                return Err(ExprError::parse(at, "unterminated string literal"));
            };
            match c {
                c if c == quote => return Ok(Token::Str(out)),
                '\\' => {
                    let Some((_, esc)) = self.chars.next() else {
                        return Err(ExprError::parse(at, "unterminated string literal"));
                    };
                    match esc {
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        '\'' => out.push('\''),
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        other => {
                            return Err(ExprError::parse(
                                pos,
                                format!("unknown escape sequence '\\{other}'"),
                            ));
                        }
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn int(&mut self, at: usize) -> Result<Token, ExprError> {
        let mut end = at;
        if matches!(self.chars.peek(), Some(&(_, '-'))) {
            self.chars.next();
            if !matches!(self.chars.peek(), Some(&(_, c)) if c.is_ascii_digit()) {
                return Err(ExprError::parse(at, "expected digits after '-'"));
            }
        }
        while let Some(&(pos, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = pos;
                self.chars.next();
            } else {
                break;
            }
        }
        let text = &self.src[at..=end];
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| ExprError::parse(at, format!("integer literal '{text}' out of range")))
    }

    fn ident(&mut self, at: usize) -> Token {
        let mut end = at;
        while let Some(&(pos, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                end = pos;
                self.chars.next();
            } else {
                break;
            }
        }
        let text = &self.src[at..=end];
        match text {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "in" => Token::In,
            other => Token::Ident(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lexes_operators_and_keywords() {
        assert_eq!(
            tokens("a == b && !c || d in e"),
            vec![
                Token::Ident("a".into()),
                Token::EqEq,
                Token::Ident("b".into()),
                Token::AndAnd,
                Token::Bang,
                Token::Ident("c".into()),
                Token::OrOr,
                Token::Ident("d".into()),
                Token::In,
                Token::Ident("e".into()),
            ]
        );
    }

    #[test]
    fn lexes_comparisons() {
        assert_eq!(
            tokens("< <= > >= !="),
            vec![Token::Lt, Token::Le, Token::Gt, Token::Ge, Token::Ne]
        );
    }

    #[test]
    fn lexes_string_literals_with_escapes() {
        assert_eq!(tokens(r#""admin""#), vec![Token::Str("admin".into())]);
        assert_eq!(tokens("'admin'"), vec![Token::Str("admin".into())]);
        assert_eq!(
            tokens(r#""a\"b\n""#),
            vec![Token::Str("a\"b\n".into())]
        );
    }

    #[test]
    fn lexes_negative_integers() {
        assert_eq!(tokens("-42"), vec![Token::Int(-42)]);
        assert_eq!(tokens("0"), vec![Token::Int(0)]);
    }

    #[test]
    fn offsets_point_into_the_source() {
        let toks = tokenize("ab  ==  cd").unwrap();
        assert_eq!(toks[1], (Token::EqEq, 4));
        assert_eq!(toks[2], (Token::Ident("cd".into()), 8));
    }

    #[test]
    fn rejects_lone_equals_and_ampersand() {
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("a & b").is_err());
        assert!(tokenize("a | b").is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = tokenize(r#""abc"#).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn rejects_unknown_characters() {
        assert!(tokenize("a @ b").is_err());
        assert!(tokenize("a + b").is_err());
    }
}
