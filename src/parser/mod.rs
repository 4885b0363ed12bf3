//! Recursive-descent LL(1) parser with operator-precedence climbing.

use crate::ast::*;
use crate::directive::{Directive, DirectiveStack};
use crate::error::{Error, Result};
use crate::lexer::{Keyword, Operator, Token, TokenKind};
use crate::source::SourceLocation;
use std::collections::HashMap;

/// Parses a token stream into a [`Module`].
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    node_counter: u32,
    directives: DirectiveStack,
}

impl Parser {
    /// Construct a parser over a complete token stream (including the
    /// trailing `Eof`, as produced by [`crate::lexer::Scanner::scan_all`]).
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            node_counter: 0,
            directives: DirectiveStack::new(),
        }
    }

    fn next_node_id(&mut self) -> u32 {
        let id = self.node_counter;
        self.node_counter += 1;
        id
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn location(&self) -> SourceLocation {
        self.peek().location
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check_op(&self, op: Operator) -> bool {
        matches!(&self.peek().kind, TokenKind::Operator(o) if *o == op)
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        matches!(&self.peek().kind, TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_op(&mut self, op: Operator, expected: &str) -> Result<Token> {
        if self.check_op(op) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        Error::UnexpectedToken {
            location: self.location(),
            expected: expected.to_string(),
            found: describe(&self.peek().kind),
        }
    }

    fn identifier(&mut self) -> Result<String> {
        if let TokenKind::Identifier(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    // ---- top level ------------------------------------------------------

    /// Parse an entire module (source file).
    pub fn parse_module(&mut self) -> Result<Module> {
        let mut items = Vec::new();
        while !matches!(self.peek().kind, TokenKind::Eof) {
            items.push(self.parse_item()?);
        }
        Ok(Module { items })
    }

    fn parse_directives(&mut self) -> Result<Vec<Directive>> {
        let mut directives = Vec::new();
        while self.check_op(Operator::Hash) {
            self.advance();
            self.eat_op(Operator::LBracket, "'['")?;
            let name = self.identifier()?;
            let mut args = HashMap::new();
            if self.check_op(Operator::LParen) {
                self.advance();
                while !self.check_op(Operator::RParen) {
                    let key = self.identifier()?;
                    self.eat_op(Operator::Eq, "'='")?;
                    let value = match &self.peek().kind {
                        TokenKind::StringLiteral(s) => {
                            let s = s.clone();
                            self.advance();
                            s
                        }
                        TokenKind::Identifier(s) => {
                            let s = s.clone();
                            self.advance();
                            s
                        }
                        TokenKind::IntLiteral(i) => {
                            let s = i.to_string();
                            self.advance();
                            s
                        }
                        _ => return Err(self.unexpected("directive value")),
                    };
                    args.insert(key, value);
                    if self.check_op(Operator::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.eat_op(Operator::RParen, "')'")?;
            }
            self.eat_op(Operator::RBracket, "']'")?;
            directives.push(Directive::new(name, args));
        }
        Ok(directives)
    }

    fn parse_item(&mut self) -> Result<Item> {
        let location = self.location();
        let directives = self.parse_directives()?;
        self.directives.push(directives.clone());
        let node_id = self.next_node_id();

        let kind = if self.check_kw(Keyword::Import) {
            self.advance();
            let path = self.parse_dotted_path()?;
            self.eat_op(Operator::Semi, "';'")?;
            ItemKind::Import { path }
        } else if self.check_kw(Keyword::Const) {
            self.advance();
            let name = self.identifier()?;
            let type_expr = self.parse_optional_type_annotation()?;
            self.eat_op(Operator::Eq, "'='")?;
            let init = self.parse_expr()?;
            self.eat_op(Operator::Semi, "';'")?;
            ItemKind::Const {
                name,
                type_expr,
                init,
            }
        } else if self.check_kw(Keyword::Let) {
            self.advance();
            let name = self.identifier()?;
            let type_expr = self.parse_optional_type_annotation()?;
            self.eat_op(Operator::Eq, "'='")?;
            let init = self.parse_expr()?;
            self.eat_op(Operator::Semi, "';'")?;
            ItemKind::Global {
                name,
                type_expr,
                init,
            }
        } else if self.check_kw(Keyword::Struct) {
            self.advance();
            let name = self.identifier()?;
            self.eat_op(Operator::LBrace, "'{'")?;
            let mut fields = Vec::new();
            while !self.check_op(Operator::RBrace) {
                let fname = self.identifier()?;
                self.eat_op(Operator::Colon, "':'")?;
                let ty = self.parse_type_expr()?;
                fields.push(Param {
                    name: fname,
                    type_expr: ty,
                });
                if self.check_op(Operator::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.eat_op(Operator::RBrace, "'}'")?;
            ItemKind::Struct { name, fields }
        } else if self.check_kw(Keyword::Fn) {
            self.advance();
            let name = self.identifier()?;
            let args = self.parse_param_list()?;
            self.eat_op(Operator::Arrow, "'->'")?;
            let return_type = self.parse_type_expr()?;
            let body = if self.check_op(Operator::Semi) {
                self.advance();
                None
            } else {
                Some(self.parse_block()?)
            };
            ItemKind::Function {
                name,
                args,
                return_type,
                body,
            }
        } else if self.check_kw(Keyword::Macro) {
            self.advance();
            let name = self.macro_name_token()?;
            self.eat_op(Operator::LBrace, "'{'")?;
            let mut branches = Vec::new();
            while !self.check_op(Operator::RBrace) {
                branches.push(self.parse_macro_branch()?);
            }
            self.eat_op(Operator::RBrace, "'}'")?;
            ItemKind::Macro { name, branches }
        } else {
            return Err(self.unexpected("top-level item"));
        };

        self.directives.pop();
        Ok(Item {
            node_id,
            kind,
            location,
            directives,
        })
    }

    fn parse_macro_branch(&mut self) -> Result<MacroBranch> {
        self.eat_op(Operator::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check_op(Operator::RParen) {
            let dollar_name = self.macro_identifier()?;
            self.eat_op(Operator::Colon, "':'")?;
            self.identifier_or_keyword_expr()?; // parameter kind, always `expr`
            let variadic = self.check_op(Operator::Ellipsis);
            if variadic {
                self.advance();
            }
            params.push(MacroParam {
                name: dollar_name,
                variadic,
            });
            if self.check_op(Operator::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.eat_op(Operator::RParen, "')'")?;
        self.eat_op(Operator::FatArrow, "'=>'")?;
        let body = self.parse_block()?;
        self.eat_op(Operator::Semi, "';'")?;
        Ok(MacroBranch { params, body })
    }

    /// Consume a `name!` token, as produced by the scanner for macro names
    /// (there is no separate `!` token once a name is fused with it).
    fn macro_name_token(&mut self) -> Result<String> {
        if let TokenKind::MacroName(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected("macro name (name!)"))
        }
    }

    fn macro_identifier(&mut self) -> Result<String> {
        if let TokenKind::MacroIdentifier(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected("macro identifier ($name)"))
        }
    }

    fn identifier_or_keyword_expr(&mut self) -> Result<()> {
        // Only `expr` is a recognized macro parameter kind.
        let name = self.identifier()?;
        if name != "expr" {
            return Err(self.unexpected("'expr'"));
        }
        Ok(())
    }

    fn parse_param_list(&mut self) -> Result<Vec<Param>> {
        self.eat_op(Operator::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check_op(Operator::RParen) {
            let name = self.identifier()?;
            self.eat_op(Operator::Colon, "':'")?;
            let type_expr = self.parse_type_expr()?;
            params.push(Param { name, type_expr });
            if self.check_op(Operator::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.eat_op(Operator::RParen, "')'")?;
        Ok(params)
    }

    fn parse_optional_type_annotation(&mut self) -> Result<Option<TypeExpr>> {
        if self.check_op(Operator::Colon) {
            self.advance();
            Ok(Some(self.parse_type_expr()?))
        } else {
            Ok(None)
        }
    }

    fn parse_type_expr(&mut self) -> Result<TypeExpr> {
        if self.check_op(Operator::LBracket) {
            self.advance();
            let inner = self.parse_type_expr()?;
            self.eat_op(Operator::RBracket, "']'")?;
            return Ok(TypeExpr::Array(Box::new(inner)));
        }
        let mut path = Vec::new();
        let mut name = self.identifier()?;
        while self.check_op(Operator::ColonColon) {
            self.advance();
            path.push(name);
            name = self.identifier()?;
        }
        Ok(TypeExpr::Named { path, name })
    }

    fn parse_dotted_path(&mut self) -> Result<Vec<String>> {
        let mut path = vec![self.identifier()?];
        while self.check_op(Operator::ColonColon) {
            self.advance();
            path.push(self.identifier()?);
        }
        Ok(path)
    }

    // ---- statements -------------------------------------------------------

    fn parse_block(&mut self) -> Result<Block> {
        let brace_loc = self.location();
        self.eat_op(Operator::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check_op(Operator::RBrace) {
            if matches!(self.peek().kind, TokenKind::Eof) {
                return Err(Error::UnterminatedBlock { location: brace_loc });
            }
            stmts.push(self.parse_stmt()?);
        }
        self.eat_op(Operator::RBrace, "'}'")?;
        Ok(Block { stmts })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let location = self.location();
        let directives = self.parse_directives()?;
        let node_id = self.next_node_id();

        let kind = if self.check_kw(Keyword::Let) {
            self.advance();
            let name = self.identifier()?;
            let type_expr = self.parse_optional_type_annotation()?;
            self.eat_op(Operator::Eq, "'='")?;
            let init = self.parse_expr()?;
            self.eat_op(Operator::Semi, "';'")?;
            StmtKind::Let {
                name,
                type_expr,
                init,
            }
        } else if self.check_kw(Keyword::If) {
            self.advance();
            self.eat_op(Operator::LParen, "'('")?;
            let cond = self.parse_expr()?;
            self.eat_op(Operator::RParen, "')'")?;
            let then_branch = self.parse_block()?;
            let else_branch = if self.check_kw(Keyword::Else) {
                self.advance();
                Some(self.parse_block()?)
            } else {
                None
            };
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            }
        } else if self.check_kw(Keyword::While) {
            self.advance();
            self.eat_op(Operator::LParen, "'('")?;
            let cond = self.parse_expr()?;
            self.eat_op(Operator::RParen, "')'")?;
            let body = self.parse_block()?;
            StmtKind::While { cond, body }
        } else if self.check_kw(Keyword::Break) {
            self.advance();
            self.eat_op(Operator::Semi, "';'")?;
            StmtKind::Break
        } else if self.check_kw(Keyword::Continue) {
            self.advance();
            self.eat_op(Operator::Semi, "';'")?;
            StmtKind::Continue
        } else if self.check_kw(Keyword::Return) {
            self.advance();
            let value = if self.check_op(Operator::Semi) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.eat_op(Operator::Semi, "';'")?;
            StmtKind::Return(value)
        } else {
            let expr = self.parse_expr()?;
            self.eat_op(Operator::Semi, "';'")?;
            StmtKind::Expr(expr)
        };

        Ok(Stmt {
            node_id,
            kind,
            location,
            directives,
        })
    }

    // ---- expressions: precedence climbing --------------------------------

    /// Parse a full expression (the lowest-precedence level: assignment).
    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let location = self.location();
        let lhs = self.parse_logor()?;
        let op = match &self.peek().kind {
            TokenKind::Operator(Operator::Eq) => Some(AssignOp::Assign),
            TokenKind::Operator(Operator::PlusEq) => Some(AssignOp::AddAssign),
            TokenKind::Operator(Operator::MinusEq) => Some(AssignOp::SubAssign),
            TokenKind::Operator(Operator::StarEq) => Some(AssignOp::MulAssign),
            TokenKind::Operator(Operator::SlashEq) => Some(AssignOp::DivAssign),
            TokenKind::Operator(Operator::PercentEq) => Some(AssignOp::ModAssign),
            TokenKind::Operator(Operator::AmpEq) => Some(AssignOp::AndAssign),
            TokenKind::Operator(Operator::PipeEq) => Some(AssignOp::OrAssign),
            TokenKind::Operator(Operator::ShlEq) => Some(AssignOp::ShlAssign),
            TokenKind::Operator(Operator::ShrEq) => Some(AssignOp::ShrAssign),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(lhs);
        };
        self.advance();
        // Assignment is right-associative: recurse back into assignment.
        let value = self.parse_assignment()?;
        Ok(self.make_expr(
            ExprKind::Assign {
                op,
                target: Box::new(lhs),
                value: Box::new(value),
            },
            location,
        ))
    }

    fn make_expr(&mut self, kind: ExprKind, location: SourceLocation) -> Expr {
        let node_id = self.next_node_id();
        Expr {
            node_id,
            kind,
            location,
            directives: self.directives.current().to_vec(),
        }
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(Operator, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let location = self.location();
        let mut lhs = next(self)?;
        loop {
            let found = ops.iter().find(|(op, _)| self.check_op(*op)).cloned();
            let Some((_, bop)) = found else { break };
            self.advance();
            let rhs = next(self)?;
            lhs = self.make_expr(
                ExprKind::Binary {
                    op: bop,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                location,
            );
        }
        Ok(lhs)
    }

    fn parse_logor(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(Operator::PipePipe, BinaryOp::LogOr)], Self::parse_logand)
    }

    fn parse_logand(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(Operator::AmpAmp, BinaryOp::LogAnd)], Self::parse_bitor)
    }

    fn parse_bitor(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(Operator::Pipe, BinaryOp::BitOr)], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(Operator::Caret, BinaryOp::BitXor)], Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(Operator::Amp, BinaryOp::BitAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (Operator::EqEq, BinaryOp::Eq),
                (Operator::NotEq, BinaryOp::Ne),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (Operator::Lt, BinaryOp::Lt),
                (Operator::LtEq, BinaryOp::Le),
                (Operator::Gt, BinaryOp::Gt),
                (Operator::GtEq, BinaryOp::Ge),
            ],
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (Operator::Shl, BinaryOp::Shl),
                (Operator::Shr, BinaryOp::Shr),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (Operator::Plus, BinaryOp::Add),
                (Operator::Minus, BinaryOp::Sub),
            ],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (Operator::Star, BinaryOp::Mul),
                (Operator::Slash, BinaryOp::Div),
                (Operator::Percent, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let location = self.location();
        let op = match &self.peek().kind {
            TokenKind::Operator(Operator::Plus) => Some(UnaryOp::Plus),
            TokenKind::Operator(Operator::Minus) => Some(UnaryOp::Neg),
            TokenKind::Operator(Operator::Bang) => Some(UnaryOp::Not),
            TokenKind::Operator(Operator::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Operator(Operator::PlusPlus) => Some(UnaryOp::PreInc),
            TokenKind::Operator(Operator::MinusMinus) => Some(UnaryOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(self.make_expr(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                location,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let location = self.location();
        let mut expr = self.parse_primary()?;
        loop {
            if self.check_op(Operator::LParen) {
                // Only bare identifiers / namespaced names are callable.
                let (path, name) = match &expr.kind {
                    ExprKind::Identifier(name) => (Vec::new(), name.clone()),
                    ExprKind::Namespaced { path, name } => (path.clone(), name.clone()),
                    _ => return Err(self.unexpected("callable expression")),
                };
                self.advance();
                let mut args = Vec::new();
                while !self.check_op(Operator::RParen) {
                    args.push(self.parse_expr()?);
                    if self.check_op(Operator::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.eat_op(Operator::RParen, "')'")?;
                expr = self.make_expr(ExprKind::Call { path, name, args }, location);
            } else if self.check_op(Operator::LBracket) {
                self.advance();
                let index = self.parse_expr()?;
                self.eat_op(Operator::RBracket, "']'")?;
                expr = self.make_expr(
                    ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    location,
                );
            } else if self.check_op(Operator::Dot) {
                self.advance();
                let member = self.identifier()?;
                expr = self.make_expr(
                    ExprKind::Member {
                        base: Box::new(expr),
                        member,
                    },
                    location,
                );
            } else if self.check_op(Operator::ColonColon) {
                self.advance();
                let name = self.identifier()?;
                let path = match expr.kind {
                    ExprKind::Identifier(prior) => vec![prior],
                    ExprKind::Namespaced { mut path, name } => {
                        path.push(name);
                        path
                    }
                    _ => return Err(self.unexpected("namespace path component")),
                };
                expr = self.make_expr(ExprKind::Namespaced { path, name }, location);
            } else if self.check_kw(Keyword::As) {
                self.advance();
                let type_expr = self.parse_type_expr()?;
                expr = self.make_expr(
                    ExprKind::Cast {
                        expr: Box::new(expr),
                        type_expr,
                    },
                    location,
                );
            } else if self.check_op(Operator::PlusPlus) {
                self.advance();
                expr = self.make_expr(
                    ExprKind::Postfix {
                        op: PostfixOp::Inc,
                        operand: Box::new(expr),
                    },
                    location,
                );
            } else if self.check_op(Operator::MinusMinus) {
                self.advance();
                expr = self.make_expr(
                    ExprKind::Postfix {
                        op: PostfixOp::Dec,
                        operand: Box::new(expr),
                    },
                    location,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let location = self.location();
        match self.peek().kind.clone() {
            TokenKind::IntLiteral(i) => {
                self.advance();
                Ok(self.make_expr(ExprKind::IntLiteral(i), location))
            }
            TokenKind::FloatLiteral(f) => {
                self.advance();
                Ok(self.make_expr(ExprKind::FloatLiteral(f), location))
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(self.make_expr(ExprKind::StringLiteral(s), location))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(self.make_expr(ExprKind::NullLiteral, location))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(self.make_expr(ExprKind::IntLiteral(1), location))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(self.make_expr(ExprKind::IntLiteral(0), location))
            }
            TokenKind::Keyword(Keyword::New) => {
                self.advance();
                let type_expr = self.parse_type_expr()?;
                self.eat_op(Operator::LBracket, "'['")?;
                let size = self.parse_expr()?;
                self.eat_op(Operator::RBracket, "']'")?;
                Ok(self.make_expr(
                    ExprKind::NewArray {
                        type_expr,
                        size: Box::new(size),
                    },
                    location,
                ))
            }
            TokenKind::MacroName(name) => {
                self.advance();
                self.parse_macro_call(Vec::new(), name, location)
            }
            TokenKind::MacroIdentifier(name) => {
                // `$x` inside a macro branch body, referencing one of its
                // own parameters. Outside macro expansion this is just an
                // identifier named `x`; the expander is what gives it
                // meaning by substituting the bound argument.
                self.advance();
                Ok(self.make_expr(ExprKind::Identifier(name), location))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                let mut path = Vec::new();
                let mut final_name = name;
                loop {
                    if !self.check_op(Operator::ColonColon) {
                        break;
                    }
                    // The scanner fuses a trailing `!` into the identifier
                    // ahead of it, so `pkg::name!(...)` arrives as
                    // `Identifier("pkg") ColonColon MacroName("name")`: a
                    // namespaced macro call, handled here rather than below.
                    if let TokenKind::MacroName(_) = self.peek_at(1).kind {
                        self.advance();
                        let mname = self.macro_name_token()?;
                        path.push(final_name.clone());
                        return self.parse_macro_call(path, mname, location);
                    }
                    self.advance();
                    path.push(final_name.clone());
                    final_name = self.identifier()?;
                }
                if self.check_op(Operator::LBrace) {
                    return self.parse_struct_init(path, final_name, location);
                }
                if path.is_empty() {
                    Ok(self.make_expr(ExprKind::Identifier(final_name), location))
                } else {
                    Ok(self.make_expr(
                        ExprKind::Namespaced {
                            path,
                            name: final_name,
                        },
                        location,
                    ))
                }
            }
            TokenKind::Operator(Operator::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.eat_op(Operator::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Operator(Operator::LBracket) => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check_op(Operator::RBracket) {
                    elements.push(self.parse_expr()?);
                    if self.check_op(Operator::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.eat_op(Operator::RBracket, "']'")?;
                Ok(self.make_expr(ExprKind::ArrayLiteral(elements), location))
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    /// Parse a macro call's argument list once its (possibly namespaced)
    /// name has already been consumed.
    fn parse_macro_call(
        &mut self,
        path: Vec<String>,
        name: String,
        location: SourceLocation,
    ) -> Result<Expr> {
        self.eat_op(Operator::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.check_op(Operator::RParen) {
            args.push(self.parse_expr()?);
            if self.check_op(Operator::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.eat_op(Operator::RParen, "')'")?;
        Ok(self.make_expr(ExprKind::Macro(MacroInvocation { path, name, args }), location))
    }

    fn parse_struct_init(
        &mut self,
        path: Vec<String>,
        name: String,
        location: SourceLocation,
    ) -> Result<Expr> {
        self.advance(); // '{'
        // Disambiguate named vs. anonymous by lookahead: `ident :` means named.
        let is_named = matches!(&self.peek().kind, TokenKind::Identifier(_))
            && matches!(&self.peek_at(1).kind, TokenKind::Operator(Operator::Colon));
        let fields = if is_named {
            let mut named = Vec::new();
            while !self.check_op(Operator::RBrace) {
                let fname = self.identifier()?;
                self.eat_op(Operator::Colon, "':'")?;
                let value = self.parse_expr()?;
                named.push((fname, value));
                if self.check_op(Operator::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            StructInitFields::Named(named)
        } else {
            let mut positional = Vec::new();
            while !self.check_op(Operator::RBrace) {
                positional.push(self.parse_expr()?);
                if self.check_op(Operator::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            StructInitFields::Anonymous(positional)
        };
        self.eat_op(Operator::RBrace, "'}'")?;
        Ok(self.make_expr(ExprKind::StructInit { path, name, fields }, location))
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Identifier(s) => format!("identifier '{s}'"),
        TokenKind::Keyword(k) => format!("keyword '{}'", k.as_str()),
        TokenKind::Operator(_) => "operator".to_string(),
        TokenKind::IntLiteral(i) => format!("integer literal {i}"),
        TokenKind::FloatLiteral(f) => format!("float literal {f}"),
        TokenKind::StringLiteral(s) => format!("string literal {s:?}"),
        TokenKind::MacroIdentifier(s) => format!("macro identifier ${s}"),
        TokenKind::MacroName(s) => format!("macro name {s}!"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn parse(src: &str) -> Module {
        let tokens = Scanner::new(src).scan_all().unwrap();
        Parser::new(tokens).parse_module().unwrap()
    }

    #[test]
    fn parses_array_let() {
        let m = parse("fn f() -> void { let x: [i32] = new i32[2]; }");
        let ItemKind::Function { body, .. } = &m.items[0].kind else {
            panic!()
        };
        let StmtKind::Let { type_expr, .. } = &body.as_ref().unwrap().stmts[0].kind else {
            panic!()
        };
        assert_eq!(
            type_expr,
            &Some(TypeExpr::Array(Box::new(TypeExpr::simple("i32"))))
        );
    }

    #[test]
    fn member_access_left_associative_lower_than_plus() {
        let m = parse("fn f() -> i32 { return a.b.c + d; }");
        let ItemKind::Function { body, .. } = &m.items[0].kind else {
            panic!()
        };
        let StmtKind::Return(Some(expr)) = &body.as_ref().unwrap().stmts[0].kind else {
            panic!()
        };
        let ExprKind::Binary { op, lhs, .. } = &expr.kind else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(lhs.kind, ExprKind::Member { .. }));
    }

    #[test]
    fn array_literal_initializer() {
        let m = parse("fn f() -> void { let x: [i32] = [1, 2]; }");
        let ItemKind::Function { body, .. } = &m.items[0].kind else {
            panic!()
        };
        let StmtKind::Let { init, .. } = &body.as_ref().unwrap().stmts[0].kind else {
            panic!()
        };
        let ExprKind::ArrayLiteral(elements) = &init.kind else {
            panic!()
        };
        assert_eq!(elements.len(), 2);
    }

    #[test]
    fn variadic_macro_branch() {
        let m = parse("macro m! { ($a: expr, $b: expr ...) => { $a; }; }");
        let ItemKind::Macro { branches, .. } = &m.items[0].kind else {
            panic!()
        };
        assert!(branches[0].params.last().unwrap().variadic);
    }
}
