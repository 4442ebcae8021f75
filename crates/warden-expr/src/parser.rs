use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::error::ExprError;
use crate::lexer::{tokenize, Token};

/// Parse expression source into an AST.
///
/// Precedence, low to high: `||`, `&&`, relations (`==` `!=` `<` `<=` `>`
/// `>=` `in`, non-associative), unary `!`, member access / indexing.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
    };
    let expr = parser.or_expr()?;
    if let Some((token, at)) = parser.peek() {
        return Err(ExprError::parse(
            at,
            format!("unexpected {}", token.describe()),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, at)| (t, *at))
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if matches!(self.peek(), Some((t, _)) if t == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.next() {
            Some((t, _)) if &t == expected => Ok(()),
            Some((t, at)) => Err(ExprError::parse(
                at,
                format!("expected {}, found {}", expected.describe(), t.describe()),
            )),
            None => Err(ExprError::parse(
                self.end,
                format!("expected {}, found end of expression", expected.describe()),
            )),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and_expr()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.rel_expr()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.rel_expr()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    // Relations do not chain: `a == b == c` is a parse error.
    fn rel_expr(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.unary_expr()?;
        let op = match self.peek() {
            Some((Token::EqEq, _)) => BinaryOp::Eq,
            Some((Token::Ne, _)) => BinaryOp::Ne,
            Some((Token::Lt, _)) => BinaryOp::Lt,
            Some((Token::Le, _)) => BinaryOp::Le,
            Some((Token::Gt, _)) => BinaryOp::Gt,
            Some((Token::Ge, _)) => BinaryOp::Ge,
            Some((Token::In, _)) => BinaryOp::In,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.unary_expr()?;
        Ok(binary(op, lhs, rhs))
    }

    fn unary_expr(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Bang) {
            let operand = self.unary_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary_expr()?;
        loop {
            if self.eat(&Token::Dot) {
                let field = match self.next() {
                    Some((Token::Ident(name), _)) => name,
                    Some((t, at)) => {
                        return Err(ExprError::parse(
                            at,
                            format!("expected field name after '.', found {}", t.describe()),
                        ));
                    }
                    None => {
                        return Err(ExprError::parse(
                            self.end,
                            "expected field name after '.'",
                        ));
                    }
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    field,
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.or_expr()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary_expr(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some((Token::Int(n), _)) => Ok(Expr::Literal(Literal::Int(n))),
            Some((Token::Str(s), _)) => Ok(Expr::Literal(Literal::Str(s))),
            Some((Token::True, _)) => Ok(Expr::Literal(Literal::Bool(true))),
            Some((Token::False, _)) => Ok(Expr::Literal(Literal::Bool(false))),
            Some((Token::Null, _)) => Ok(Expr::Literal(Literal::Null)),
            Some((Token::Ident(name), _)) => Ok(Expr::Var(name)),
            Some((Token::LParen, _)) => {
                let inner = self.or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some((Token::LBracket, _)) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.or_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RBracket)?;
                }
                Ok(Expr::List(items))
            }
            Some((t, at)) => Err(ExprError::parse(
                at,
                format!("unexpected {}", t.describe()),
            )),
            None => Err(ExprError::parse(self.end, "unexpected end of expression")),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
