//! Recursive-descent parser for the mini language.
//!
//! Grammar (loosely):
//!
//! ```text
//! program    := (stmt NEWLINE?)* EOF
//! stmt       := if | while | for | pass | break | continue | simple
//! simple     := target "=" expr | target AUGOP expr | expr
//! suite      := ":" (NEWLINE INDENT stmt+ DEDENT | simple)
//! expr       := or
//! or         := and ("or" and)*
//! and        := not ("and" not)*
//! not        := "not" not | comparison
//! comparison := arith ((CMPOP | "in" | "not in") arith)*
//! arith      := term (("+" | "-") term)*
//! term       := factor (("*" | "/" | "//" | "%") factor)*
//! factor     := ("-" | "+") factor | "await" factor | power
//! power      := postfix ("**" factor)?
//! postfix    := atom (call | "." NAME | "[" expr "]")*
//! ```

use crate::ast::{
    AssignTarget, BinOp, BoolOpKind, CmpOp, Expr, FStringPart, Literal, Stmt, UnaryOp,
};
use crate::error::{InterpError, Result};
use crate::lexer::{tokenize, RawFPart, Tok};

/// Parse a complete source fragment into statements.
pub fn parse(source: &str) -> Result<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

/// Parse a single expression (used for f-string interpolations).
fn parse_expression_source(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    parser.skip_newlines();
    parser.expect(&Tok::Eof)?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens.get(self.pos + offset).unwrap_or(&Tok::Eof)
    }

    fn bump(&mut self) -> Tok {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Tok) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Tok) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(InterpError::syntax(format!(
                "expected {token:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Tok::Newline) {}
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek() == &Tok::Eof {
                return Ok(stmts);
            }
            stmts.push(self.parse_stmt()?);
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Tok::KwIf => self.parse_if(),
            Tok::KwWhile => {
                self.bump();
                let test = self.parse_expr()?;
                let body = self.parse_suite()?;
                Ok(Stmt::While { test, body })
            }
            Tok::KwFor => {
                self.bump();
                let target = match self.bump() {
                    Tok::Name(name) => name,
                    other => {
                        return Err(InterpError::syntax(format!(
                            "expected loop variable, found {other:?}"
                        )));
                    }
                };
                self.expect(&Tok::KwIn)?;
                let iter = self.parse_expr()?;
                let body = self.parse_suite()?;
                Ok(Stmt::For { target, iter, body })
            }
            Tok::KwPass => {
                self.bump();
                self.end_simple_stmt()?;
                Ok(Stmt::Pass)
            }
            Tok::KwBreak => {
                self.bump();
                self.end_simple_stmt()?;
                Ok(Stmt::Break)
            }
            Tok::KwContinue => {
                self.bump();
                self.end_simple_stmt()?;
                Ok(Stmt::Continue)
            }
            _ => self.parse_simple_stmt(),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(&Tok::KwIf)?;
        let mut branches = Vec::new();
        let test = self.parse_expr()?;
        let body = self.parse_suite()?;
        branches.push((test, body));

        let mut else_body = None;
        loop {
            match self.peek() {
                Tok::KwElif => {
                    self.bump();
                    let test = self.parse_expr()?;
                    let body = self.parse_suite()?;
                    branches.push((test, body));
                }
                Tok::KwElse => {
                    self.bump();
                    else_body = Some(self.parse_suite()?);
                    break;
                }
                _ => break,
            }
        }

        Ok(Stmt::If {
            branches,
            else_body,
        })
    }

    /// Parse `: suite` -- either an indented block or a single inline
    /// statement.
    fn parse_suite(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Tok::Colon)?;
        if self.eat(&Tok::Newline) {
            self.expect(&Tok::Indent)?;
            let mut stmts = Vec::new();
            loop {
                self.skip_newlines();
                if self.eat(&Tok::Dedent) {
                    break;
                }
                if self.peek() == &Tok::Eof {
                    return Err(InterpError::syntax("unexpected end of block"));
                }
                stmts.push(self.parse_stmt()?);
            }
            if stmts.is_empty() {
                return Err(InterpError::syntax("empty block"));
            }
            Ok(stmts)
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt> {
        let expr = self.parse_expr()?;

        let stmt = if self.eat(&Tok::Assign) {
            let target = to_assign_target(expr)?;
            let value = self.parse_expr()?;
            Stmt::Assign { target, value }
        } else if let Some(op) = aug_op(self.peek()) {
            self.bump();
            let target = to_assign_target(expr)?;
            let value = self.parse_expr()?;
            Stmt::AugAssign { target, op, value }
        } else {
            Stmt::Expr(expr)
        };

        self.end_simple_stmt()?;
        Ok(stmt)
    }

    /// A simple statement must end at a newline, dedent boundary, or EOF.
    fn end_simple_stmt(&mut self) -> Result<()> {
        match self.peek() {
            Tok::Newline => {
                self.bump();
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            other => Err(InterpError::syntax(format!(
                "unexpected {other:?} after statement"
            ))),
        }
    }

    // -- Expressions --------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let first = self.parse_and()?;
        if self.peek() != &Tok::KwOr {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&Tok::KwOr) {
            values.push(self.parse_and()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::Or,
            values,
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let first = self.parse_not()?;
        if self.peek() != &Tok::KwAnd {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&Tok::KwAnd) {
            values.push(self.parse_not()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::And,
            values,
        })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat(&Tok::KwNot) {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_arith()?;
        let mut comparisons = Vec::new();

        loop {
            let op = match self.peek() {
                Tok::Eq => CmpOp::Eq,
                Tok::NotEq => CmpOp::NotEq,
                Tok::Lt => CmpOp::Lt,
                Tok::LtEq => CmpOp::LtEq,
                Tok::Gt => CmpOp::Gt,
                Tok::GtEq => CmpOp::GtEq,
                Tok::KwIn => CmpOp::In,
                Tok::KwNot if self.peek_at(1) == &Tok::KwIn => CmpOp::NotIn,
                _ => break,
            };
            self.bump();
            if op == CmpOp::NotIn {
                self.bump();
            }
            comparisons.push((op, self.parse_arith()?));
        }

        if comparisons.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                comparisons,
            })
        }
    }

    fn parse_arith(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        match self.peek() {
            Tok::Minus => {
                self.bump();
                let operand = self.parse_factor()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            Tok::Plus => {
                self.bump();
                let operand = self.parse_factor()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Pos,
                    operand: Box::new(operand),
                })
            }
            Tok::KwAwait => {
                self.bump();
                let operand = self.parse_factor()?;
                Ok(Expr::Await(Box::new(operand)))
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_postfix()?;
        if self.eat(&Tok::DoubleStar) {
            let exponent = self.parse_factor()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    self.bump();
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Tok::Dot => {
                    self.bump();
                    let attr = match self.bump() {
                        Tok::Name(name) => name,
                        other => {
                            return Err(InterpError::syntax(format!(
                                "expected attribute name, found {other:?}"
                            )));
                        }
                    };
                    expr = Expr::Attribute {
                        base: Box::new(expr),
                        attr,
                    };
                }
                Tok::LBracket => {
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(&Tok::RBracket)?;
                    expr = Expr::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        if self.eat(&Tok::RParen) {
            return Ok((args, kwargs));
        }

        loop {
            // `name=expr` is a keyword argument.
            if let (Tok::Name(name), Tok::Assign) = (self.peek(), self.peek_at(1)) {
                let name = name.clone();
                self.bump();
                self.bump();
                kwargs.push((name, self.parse_expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(InterpError::syntax(
                        "positional argument follows keyword argument",
                    ));
                }
                args.push(self.parse_expr()?);
            }
            if self.eat(&Tok::Comma) {
                if self.peek() == &Tok::RParen {
                    break;
                }
                continue;
            }
            break;
        }

        self.expect(&Tok::RParen)?;
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.bump() {
            Tok::Int(i) => Ok(Expr::Literal(Literal::Int(i))),
            Tok::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            Tok::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            Tok::KwTrue => Ok(Expr::Literal(Literal::Bool(true))),
            Tok::KwFalse => Ok(Expr::Literal(Literal::Bool(false))),
            Tok::KwNone => Ok(Expr::Literal(Literal::None)),
            Tok::Name(name) => Ok(Expr::Name(name)),
            Tok::FString(raw_parts) => {
                let mut parts = Vec::new();
                for part in raw_parts {
                    match part {
                        RawFPart::Text(text) => parts.push(FStringPart::Text(text)),
                        RawFPart::ExprSrc(src) => {
                            parts.push(FStringPart::Expr(parse_expression_source(&src)?));
                        }
                    }
                }
                Ok(Expr::FString(parts))
            }
            Tok::LParen => {
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.eat(&Tok::Comma) {
                    let mut items = vec![first];
                    while self.peek() != &Tok::RParen {
                        items.push(self.parse_expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(&Tok::RParen)?;
                    Ok(Expr::Tuple(items))
                } else {
                    self.expect(&Tok::RParen)?;
                    Ok(first)
                }
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                while self.peek() != &Tok::RBracket {
                    items.push(self.parse_expr()?);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RBracket)?;
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                let mut entries = Vec::new();
                while self.peek() != &Tok::RBrace {
                    let key = self.parse_expr()?;
                    self.expect(&Tok::Colon)?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RBrace)?;
                Ok(Expr::Dict(entries))
            }
            other => Err(InterpError::syntax(format!(
                "unexpected {other:?} in expression"
            ))),
        }
    }
}

fn aug_op(token: &Tok) -> Option<BinOp> {
    match token {
        Tok::PlusAssign => Some(BinOp::Add),
        Tok::MinusAssign => Some(BinOp::Sub),
        Tok::StarAssign => Some(BinOp::Mul),
        Tok::SlashAssign => Some(BinOp::Div),
        _ => None,
    }
}

fn to_assign_target(expr: Expr) -> Result<AssignTarget> {
    match expr {
        Expr::Name(name) => Ok(AssignTarget::Name(name)),
        Expr::Attribute { base, attr } => Ok(AssignTarget::Attribute { base: *base, attr }),
        Expr::Index { base, index } => Ok(AssignTarget::Index {
            base: *base,
            index: *index,
        }),
        other => Err(InterpError::syntax(format!(
            "cannot assign to {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_await_call_statement() {
        let stmts = parse("await Say(\"user\", \"Hello!\")\n").expect("parse");
        assert_eq!(stmts.len(), 1);
        let Stmt::Expr(Expr::Await(inner)) = &stmts[0] else {
            panic!("expected await expr, got {:?}", stmts[0]);
        };
        let Expr::Call { func, args, .. } = inner.as_ref() else {
            panic!("expected call");
        };
        assert_eq!(**func, Expr::Name("Say".into()));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn parses_assignment_targets() {
        let stmts = parse("x = 1\nself.state.count = 2\nitems[0] = 3\n").expect("parse");
        assert!(matches!(
            stmts[0],
            Stmt::Assign {
                target: AssignTarget::Name(_),
                ..
            }
        ));
        assert!(matches!(
            stmts[1],
            Stmt::Assign {
                target: AssignTarget::Attribute { .. },
                ..
            }
        ));
        assert!(matches!(
            stmts[2],
            Stmt::Assign {
                target: AssignTarget::Index { .. },
                ..
            }
        ));
    }

    #[test]
    fn parses_if_elif_else() {
        let source = "if x > 1:\n    a = 1\nelif x > 0:\n    a = 2\nelse:\n    a = 3\n";
        let stmts = parse(source).expect("parse");
        let Stmt::If {
            branches,
            else_body,
        } = &stmts[0]
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(else_body.is_some());
    }

    #[test]
    fn parses_while_and_for() {
        let stmts = parse("while x < 3:\n    x += 1\nfor item in items:\n    pass\n")
            .expect("parse");
        assert!(matches!(stmts[0], Stmt::While { .. }));
        assert!(matches!(stmts[1], Stmt::For { .. }));
    }

    #[test]
    fn parses_kwargs() {
        let stmts = parse("await Compute(5, retries=2)\n").expect("parse");
        let Stmt::Expr(Expr::Await(inner)) = &stmts[0] else {
            panic!("expected await");
        };
        let Expr::Call { args, kwargs, .. } = inner.as_ref() else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs[0].0, "retries");
    }

    #[test]
    fn parses_chained_comparison() {
        let stmts = parse("ok = 1 < x <= 10\n").expect("parse");
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected assign");
        };
        let Expr::Compare { comparisons, .. } = value else {
            panic!("expected comparison");
        };
        assert_eq!(comparisons.len(), 2);
    }

    #[test]
    fn parses_fstring_interpolation() {
        let stmts = parse("msg = f\"Hi {name}, you are {age} years old\"\n").expect("parse");
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected assign");
        };
        let Expr::FString(parts) = value else {
            panic!("expected f-string");
        };
        // "Hi ", {name}, ", you are ", {age}, " years old"
        assert_eq!(parts.len(), 5);
    }

    #[test]
    fn incomplete_block_fails() {
        assert!(parse("if x:\n").is_err());
        assert!(parse("if x:").is_err());
    }

    #[test]
    fn inline_suite() {
        let stmts = parse("if done: await Return(result)\n").expect("parse");
        let Stmt::If { branches, .. } = &stmts[0] else {
            panic!("expected if");
        };
        assert_eq!(branches[0].1.len(), 1);
    }

    #[test]
    fn not_in_operator() {
        let stmts = parse("missing = key not in data\n").expect("parse");
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected assign");
        };
        let Expr::Compare { comparisons, .. } = value else {
            panic!("expected comparison");
        };
        assert_eq!(comparisons[0].0, CmpOp::NotIn);
    }
}
