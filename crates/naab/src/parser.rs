//! Recursive-descent parser.
//!
//! On a local syntax error the parser records a structured diagnostic and
//! resynchronizes at the next statement boundary, so a single run can report
//! several errors. A recursion-depth guard rejects pathological nesting
//! after 1000 nested productions.

use std::rc::Rc;

use crate::{
    ast::{
        BinOp, EnumDecl, Expr, FunctionDecl, ImportItems, Literal, Param, Program, Stmt,
        StructDecl, UnOp,
    },
    errors::{Diagnostic, RunError},
    lexer::Lexer,
    token::{Span, Token, TokenKind},
    types::{Type, TypeKind},
};

const MAX_DEPTH: usize = 1000;

type PResult<T> = Result<T, Diagnostic>;

/// Parses a source buffer, failing with a `SyntaxError` that folds every
/// recorded diagnostic.
pub fn parse_program(source: &str, file: &str) -> Result<Program, Box<RunError>> {
    let (program, diagnostics) = parse_with_diagnostics(source, file)?;
    if diagnostics.is_empty() {
        Ok(program)
    } else {
        Err(Diagnostic::into_error(&diagnostics, file))
    }
}

/// Parses as far as possible, returning the (possibly partial) program plus
/// all recorded diagnostics. Lex failures are fatal since there is no token
/// stream to recover on.
pub fn parse_with_diagnostics(
    source: &str,
    file: &str,
) -> Result<(Program, Vec<Diagnostic>), Box<RunError>> {
    let tokens = Lexer::new(source).lex().map_err(|err| {
        let mut e = RunError::syntax(err.message);
        e.span = Some(err.span);
        e.file = Some(file.to_owned());
        e
    })?;
    let mut parser = Parser::new(tokens, file);
    let program = parser.parse();
    Ok((program, parser.diagnostics))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: String,
    diagnostics: Vec<Diagnostic>,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, file: &str) -> Self {
        Self {
            tokens,
            pos: 0,
            file: file.to_owned(),
            diagnostics: Vec::new(),
            depth: 0,
        }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_ahead(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> PResult<Span> {
        if self.peek() == kind {
            Ok(self.advance().span)
        } else {
            Err(Diagnostic::new(
                format!(
                    "expected {}, found {}",
                    kind.describe(),
                    self.peek().describe()
                ),
                self.span(),
            ))
        }
    }

    fn expect_ident(&mut self) -> PResult<(String, Span)> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            other => Err(Diagnostic::new(
                format!("expected an identifier, found {}", other.describe()),
                self.span(),
            )),
        }
    }

    /// Consumes an identifier only if it spells `word` (contextual keyword).
    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), TokenKind::Ident(name) if name == word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Skips ahead to the next statement boundary after an error.
    fn synchronize(&mut self) {
        loop {
            match self.peek() {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::Let
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Try
                | TokenKind::Throw
                | TokenKind::Fn
                | TokenKind::Struct
                | TokenKind::Enum
                | TokenKind::Use
                | TokenKind::Import
                | TokenKind::Export
                | TokenKind::Main => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn parse(&mut self) -> Program {
        let mut program = Program {
            file: self.file.clone(),
            ..Program::default()
        };
        while !matches!(self.peek(), TokenKind::Eof) {
            match self.parse_top_item(&mut program) {
                Ok(()) => {}
                Err(diagnostic) => {
                    self.record(diagnostic);
                    self.synchronize();
                }
            }
        }
        program
    }

    fn parse_top_item(&mut self, program: &mut Program) -> PResult<()> {
        match self.peek() {
            TokenKind::Use => {
                let stmt = self.parse_use()?;
                match &stmt {
                    Stmt::UseBlock { .. } => program.block_uses.push(stmt),
                    _ => program.module_uses.push(stmt),
                }
            }
            TokenKind::Import => {
                let stmt = self.parse_import()?;
                program.imports.push(stmt);
            }
            TokenKind::Struct => {
                let decl = self.parse_struct(false)?;
                program.structs.push(decl);
            }
            TokenKind::Enum => {
                let decl = self.parse_enum(false)?;
                program.enums.push(decl);
            }
            TokenKind::Fn => {
                let decl = self.parse_function(false)?;
                program.functions.push(Rc::new(decl));
            }
            TokenKind::Export => {
                self.parse_export(program)?;
            }
            TokenKind::Main => {
                let span = self.advance().span;
                self.expect(&TokenKind::LBrace)?;
                let body = self.parse_stmt_list()?;
                self.expect(&TokenKind::RBrace)?;
                if program.main.is_some() {
                    return Err(Diagnostic::new("duplicate `main` block", span));
                }
                program.main = Some(body);
            }
            _ => {
                let stmt = self.parse_stmt()?;
                program.top_level.push(stmt);
            }
        }
        Ok(())
    }

    fn parse_export(&mut self, program: &mut Program) -> PResult<()> {
        let span = self.expect(&TokenKind::Export)?;
        match self.peek() {
            TokenKind::Fn => {
                let decl = self.parse_function(true)?;
                program.functions.push(Rc::new(decl));
            }
            TokenKind::Struct => {
                let decl = self.parse_struct(true)?;
                program.structs.push(decl);
            }
            TokenKind::Enum => {
                let decl = self.parse_enum(true)?;
                program.enums.push(decl);
            }
            TokenKind::Let => {
                let stmt = self.parse_var_decl(true)?;
                program.top_level.push(stmt);
            }
            TokenKind::Ident(word) if word == "default" => {
                self.advance();
                let expr = self.parse_expr()?;
                self.eat(&TokenKind::Semicolon);
                program.top_level.push(Stmt::ExportDefault(expr, span));
            }
            other => {
                return Err(Diagnostic::new(
                    format!(
                        "`export` must be followed by a function, struct, enum, `let`, or `default`, found {}",
                        other.describe()
                    ),
                    self.span(),
                ));
            }
        }
        Ok(())
    }

    fn parse_use(&mut self) -> PResult<Stmt> {
        let span = self.expect(&TokenKind::Use)?;
        match self.peek().clone() {
            // `use "block-id" as alias` binds a registry block.
            TokenKind::Str(id) => {
                self.advance();
                let alias = self.parse_alias()?;
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::UseBlock { id, alias, span })
            }
            TokenKind::Ident(_) => {
                let (first, _) = self.expect_ident()?;
                let mut path = first;
                while self.eat(&TokenKind::Dot) {
                    let (segment, _) = self.expect_ident()?;
                    path.push('.');
                    path.push_str(&segment);
                }
                let alias = self.parse_alias()?;
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::UseModule { path, alias, span })
            }
            other => Err(Diagnostic::new(
                format!(
                    "`use` expects a module path or a quoted block id, found {}",
                    other.describe()
                ),
                self.span(),
            )),
        }
    }

    fn parse_alias(&mut self) -> PResult<Option<String>> {
        if self.eat_word("as") {
            let (alias, _) = self.expect_ident()?;
            Ok(Some(alias))
        } else {
            Ok(None)
        }
    }

    fn parse_import(&mut self) -> PResult<Stmt> {
        let span = self.expect(&TokenKind::Import)?;
        let items = if self.eat(&TokenKind::Star) {
            if !self.eat_word("as") {
                return Err(Diagnostic::new(
                    "`import *` requires `as alias`",
                    self.span(),
                ));
            }
            let (alias, _) = self.expect_ident()?;
            ImportItems::Wildcard(alias)
        } else {
            self.expect(&TokenKind::LBrace)?;
            let mut names = Vec::new();
            loop {
                if self.eat(&TokenKind::RBrace) {
                    break;
                }
                let (name, _) = self.expect_ident()?;
                let alias = if self.eat_word("as") {
                    let (alias, _) = self.expect_ident()?;
                    Some(alias)
                } else {
                    None
                };
                names.push((name, alias));
                if !self.eat(&TokenKind::Comma) {
                    self.expect(&TokenKind::RBrace)?;
                    break;
                }
            }
            ImportItems::Named(names)
        };
        if !self.eat_word("from") {
            return Err(Diagnostic::new(
                "expected `from \"path\"` after import items",
                self.span(),
            ));
        }
        let path = match self.peek().clone() {
            TokenKind::Str(path) => {
                self.advance();
                path
            }
            other => {
                return Err(Diagnostic::new(
                    format!("import path must be a quoted string, found {}", other.describe()),
                    self.span(),
                ));
            }
        };
        self.eat(&TokenKind::Semicolon);
        Ok(Stmt::Import { path, items, span })
    }

    fn parse_struct(&mut self, exported: bool) -> PResult<StructDecl> {
        let span = self.expect(&TokenKind::Struct)?;
        let (name, _) = self.expect_ident()?;
        let type_params = self.parse_type_params()?;
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        loop {
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            let (field, _) = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type(&type_params)?;
            fields.push((field, ty));
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RBrace)?;
                break;
            }
        }
        Ok(StructDecl {
            name,
            type_params,
            fields,
            span,
            exported,
        })
    }

    fn parse_enum(&mut self, exported: bool) -> PResult<EnumDecl> {
        let span = self.expect(&TokenKind::Enum)?;
        let (name, _) = self.expect_ident()?;
        self.expect(&TokenKind::LBrace)?;
        let mut variants = Vec::new();
        let mut next_value: i64 = 0;
        loop {
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            let (variant, _) = self.expect_ident()?;
            if self.eat(&TokenKind::Assign) {
                match self.peek().clone() {
                    TokenKind::Int(v) => {
                        self.advance();
                        next_value = v;
                    }
                    other => {
                        return Err(Diagnostic::new(
                            format!(
                                "enum member value must be an integer, found {}",
                                other.describe()
                            ),
                            self.span(),
                        ));
                    }
                }
            }
            variants.push((variant, next_value));
            next_value += 1;
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RBrace)?;
                break;
            }
        }
        Ok(EnumDecl {
            name,
            variants,
            span,
            exported,
        })
    }

    fn parse_type_params(&mut self) -> PResult<Vec<String>> {
        let mut params = Vec::new();
        if self.eat(&TokenKind::Lt) {
            loop {
                let (name, _) = self.expect_ident()?;
                params.push(name);
                if !self.eat(&TokenKind::Comma) {
                    self.expect(&TokenKind::Gt)?;
                    break;
                }
            }
        }
        Ok(params)
    }

    fn parse_function(&mut self, exported: bool) -> PResult<FunctionDecl> {
        let span = self.expect(&TokenKind::Fn)?;
        let name = match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            // `fn main()` gets its dedicated diagnostic; `main { … }` is the
            // entry-point production. Parsing still continues so the rest of
            // the file is checked.
            TokenKind::Main => {
                self.advance();
                self.record(Diagnostic::new(
                    "`fn main()` is not the program entry point; write `main { … }` instead",
                    span,
                ));
                "main".to_owned()
            }
            other => {
                return Err(Diagnostic::new(
                    format!("expected a function name, found {}", other.describe()),
                    self.span(),
                ));
            }
        };
        let type_params = self.parse_type_params()?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        loop {
            if self.eat(&TokenKind::RParen) {
                break;
            }
            let is_reference = self.eat_word("ref");
            let (param_name, _) = self.expect_ident()?;
            let mut ty = if self.eat(&TokenKind::Colon) {
                self.parse_type(&type_params)?
            } else {
                Type::any()
            };
            ty.reference = is_reference;
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param {
                name: param_name,
                ty,
                default,
            });
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RParen)?;
                break;
            }
        }
        let return_type = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_type(&type_params)?)
        } else {
            None
        };
        self.expect(&TokenKind::LBrace)?;
        let body = self.parse_stmt_list()?;
        self.expect(&TokenKind::RBrace)?;
        Ok(FunctionDecl {
            name,
            type_params,
            params,
            return_type,
            body,
            span,
            exported,
        })
    }

    /// Parses a union type: one or more alternatives separated by `|`, each
    /// with an optional `?` suffix.
    fn parse_type(&mut self, type_params: &[String]) -> PResult<Type> {
        let first = self.parse_type_alternative(type_params)?;
        if self.peek() != &TokenKind::Pipe {
            return Ok(first);
        }
        let mut alternatives = vec![first];
        while self.eat(&TokenKind::Pipe) {
            alternatives.push(self.parse_type_alternative(type_params)?);
        }
        Ok(Type::union_of(alternatives))
    }

    fn parse_type_alternative(&mut self, type_params: &[String]) -> PResult<Type> {
        let (name, span) = self.expect_ident()?;
        let mut ty = match name.as_str() {
            "any" => Type::any(),
            "void" => Type::void(),
            "int" => Type::int(),
            "float" => Type::float(),
            "bool" => Type::bool_(),
            "string" => Type::string(),
            "list" => {
                self.expect(&TokenKind::Lt)?;
                let element = self.parse_type(type_params)?;
                self.expect(&TokenKind::Gt)?;
                Type::list_of(element)
            }
            "dict" => {
                self.expect(&TokenKind::Lt)?;
                let key = self.parse_type(type_params)?;
                self.expect(&TokenKind::Comma)?;
                let value = self.parse_type(type_params)?;
                self.expect(&TokenKind::Gt)?;
                Type::dict_of(key, value)
            }
            _ if type_params.contains(&name) => Type::new(TypeKind::TypeParameter(name)),
            _ => {
                // A named struct or enum type, optionally module-prefixed
                // (`mod.Type`) and optionally generic (`Box<int>`).
                let (module, base) = if self.peek() == &TokenKind::Dot
                    && matches!(self.peek_ahead(1), TokenKind::Ident(_))
                {
                    self.advance();
                    let (inner, _) = self.expect_ident()?;
                    (Some(name), inner)
                } else {
                    (None, name)
                };
                let mut type_args = Vec::new();
                if self.eat(&TokenKind::Lt) {
                    loop {
                        type_args.push(self.parse_type(type_params)?);
                        if !self.eat(&TokenKind::Comma) {
                            self.expect(&TokenKind::Gt)?;
                            break;
                        }
                    }
                }
                Type::new(TypeKind::Struct {
                    name: base,
                    type_args,
                    module,
                })
            }
        };
        if self.eat(&TokenKind::Question) {
            if matches!(ty.kind, TypeKind::Void) {
                return Err(Diagnostic::new("`void` cannot be nullable", span));
            }
            ty.nullable = true;
        }
        Ok(ty)
    }

    fn parse_stmt_list(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                TokenKind::RBrace | TokenKind::Eof => return Ok(stmts),
                _ => match self.parse_stmt() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(diagnostic) => {
                        self.record(diagnostic);
                        self.synchronize();
                        if matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
                            return Ok(stmts);
                        }
                    }
                },
            }
        }
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        if self.depth >= MAX_DEPTH {
            return Err(Diagnostic::new(
                "statement nesting exceeds the recursion limit",
                self.span(),
            ));
        }
        self.depth += 1;
        let result = self.parse_stmt_inner();
        self.depth -= 1;
        result
    }

    fn parse_stmt_inner(&mut self) -> PResult<Stmt> {
        match self.peek() {
            TokenKind::LBrace => {
                let span = self.advance().span;
                let body = self.parse_stmt_list()?;
                self.expect(&TokenKind::RBrace)?;
                Ok(Stmt::Compound(body, span))
            }
            TokenKind::Let => self.parse_var_decl(false),
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                let span = self.advance().span;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::LBrace)?;
                let body = self.parse_stmt_list()?;
                self.expect(&TokenKind::RBrace)?;
                Ok(Stmt::While { cond, body, span })
            }
            TokenKind::For => {
                let span = self.advance().span;
                let (var, _) = self.expect_ident()?;
                self.expect(&TokenKind::In)?;
                let iter = self.parse_expr()?;
                self.expect(&TokenKind::LBrace)?;
                let body = self.parse_stmt_list()?;
                self.expect(&TokenKind::RBrace)?;
                Ok(Stmt::For {
                    var,
                    iter,
                    body,
                    span,
                })
            }
            TokenKind::Return => {
                let span = self.advance().span;
                let value = match self.peek() {
                    TokenKind::RBrace | TokenKind::Semicolon | TokenKind::Eof => None,
                    _ => Some(self.parse_expr()?),
                };
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::Return(value, span))
            }
            TokenKind::Break => {
                let span = self.advance().span;
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::Break(span))
            }
            TokenKind::Continue => {
                let span = self.advance().span;
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::Continue(span))
            }
            TokenKind::Try => self.parse_try(),
            TokenKind::Throw => {
                let span = self.advance().span;
                let value = self.parse_expr()?;
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::Throw(value, span))
            }
            TokenKind::Use => self.parse_use(),
            TokenKind::Import => self.parse_import(),
            TokenKind::Fn => Ok(Stmt::Function(Rc::new(self.parse_function(false)?))),
            TokenKind::Struct => Ok(Stmt::Struct(self.parse_struct(false)?)),
            TokenKind::Enum => Ok(Stmt::Enum(self.parse_enum(false)?)),
            TokenKind::Export => Err(Diagnostic::new(
                "`export` is only allowed at the top level of a module",
                self.span(),
            )),
            _ => {
                let expr = self.parse_expr()?;
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_var_decl(&mut self, exported: bool) -> PResult<Stmt> {
        let span = self.expect(&TokenKind::Let)?;
        let (name, _) = self.expect_ident()?;
        let ty = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type(&[])?)
        } else {
            None
        };
        let init = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.eat(&TokenKind::Semicolon);
        Ok(Stmt::VarDecl {
            name,
            ty,
            init,
            exported,
            span,
        })
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let span = self.expect(&TokenKind::If)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::LBrace)?;
        let then_body = self.parse_stmt_list()?;
        self.expect(&TokenKind::RBrace)?;
        let else_body = if self.eat(&TokenKind::Else) {
            if self.peek() == &TokenKind::If {
                Some(vec![self.parse_if()?])
            } else {
                self.expect(&TokenKind::LBrace)?;
                let body = self.parse_stmt_list()?;
                self.expect(&TokenKind::RBrace)?;
                Some(body)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            span,
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let span = self.expect(&TokenKind::Try)?;
        self.expect(&TokenKind::LBrace)?;
        let body = self.parse_stmt_list()?;
        self.expect(&TokenKind::RBrace)?;
        self.expect(&TokenKind::Catch)?;
        self.expect(&TokenKind::LParen)?;
        let (catch_name, _) = self.expect_ident()?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;
        let catch_body = self.parse_stmt_list()?;
        self.expect(&TokenKind::RBrace)?;
        let finally_body = if self.eat(&TokenKind::Finally) {
            self.expect(&TokenKind::LBrace)?;
            let body = self.parse_stmt_list()?;
            self.expect(&TokenKind::RBrace)?;
            Some(body)
        } else {
            None
        };
        Ok(Stmt::Try {
            body,
            catch_name,
            catch_body,
            finally_body,
            span,
        })
    }

    // --- Expressions -----------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        if self.depth >= MAX_DEPTH {
            return Err(Diagnostic::new(
                "expression nesting exceeds the recursion limit",
                self.span(),
            ));
        }
        self.depth += 1;
        let result = self.parse_assignment();
        self.depth -= 1;
        result
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let target = self.parse_pipeline()?;
        if self.peek() == &TokenKind::Assign {
            let span = self.advance().span;
            let value = self.parse_assignment()?;
            return Ok(Expr::Binary {
                op: BinOp::Assign,
                left: Box::new(target),
                right: Box::new(value),
                span,
            });
        }
        Ok(target)
    }

    /// `|>` is left-associative; the token stream has no newline markers, so
    /// the right-hand side crossing a newline needs no special handling.
    fn parse_pipeline(&mut self) -> PResult<Expr> {
        let mut left = self.parse_range()?;
        while self.peek() == &TokenKind::Pipeline {
            let span = self.advance().span;
            let right = self.parse_range()?;
            left = Expr::Binary {
                op: BinOp::Pipeline,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_range(&mut self) -> PResult<Expr> {
        let start = self.parse_or()?;
        let inclusive = match self.peek() {
            TokenKind::DotDot => false,
            TokenKind::DotDotEq => true,
            _ => return Ok(start),
        };
        let span = self.advance().span;
        let end = self.parse_or()?;
        Ok(Expr::Range {
            start: Box::new(start),
            end: Box::new(end),
            inclusive,
            span,
        })
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == &TokenKind::OrOr {
            let span = self.advance().span;
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.peek() == &TokenKind::AndAnd {
            let span = self.advance().span;
            let right = self.parse_equality()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => return Ok(left),
            };
            let span = self.advance().span;
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => return Ok(left),
            };
            let span = self.advance().span;
            let right = self.parse_additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            let span = self.advance().span;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(left),
            };
            let span = self.advance().span;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Bang => UnOp::Not,
            _ => return self.parse_postfix(),
        };
        let span = self.advance().span;
        let expr = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
            span,
        })
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    let span = self.advance().span;
                    let mut args = Vec::new();
                    loop {
                        if self.eat(&TokenKind::RParen) {
                            break;
                        }
                        args.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            self.expect(&TokenKind::RParen)?;
                            break;
                        }
                    }
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        type_args: Vec::new(),
                        span,
                    };
                }
                TokenKind::Dot => {
                    let span = self.advance().span;
                    let (name, _) = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        name,
                        span,
                    };
                }
                TokenKind::LBracket => {
                    let span = self.advance().span;
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Binary {
                        op: BinOp::Subscript,
                        left: Box::new(expr),
                        right: Box::new(index),
                        span,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.span();
        match self.peek().clone() {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(v), span))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(v), span))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s), span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true), span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false), span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Literal::Null, span))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Identifier(name, span))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    if self.eat(&TokenKind::RBracket) {
                        break;
                    }
                    items.push(self.parse_expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBracket)?;
                        break;
                    }
                }
                Ok(Expr::List(items, span))
            }
            TokenKind::LBrace => self.parse_dict_literal(),
            TokenKind::New => self.parse_struct_literal(),
            TokenKind::InlineBlock {
                language,
                bound,
                code,
            } => {
                self.advance();
                Ok(Expr::InlineCode {
                    language,
                    code,
                    bound,
                    span,
                })
            }
            other => Err(Diagnostic::new(
                format!("expected an expression, found {}", other.describe()),
                span,
            )),
        }
    }

    fn parse_dict_literal(&mut self) -> PResult<Expr> {
        let span = self.expect(&TokenKind::LBrace)?;
        let mut entries = Vec::new();
        loop {
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            let key = match self.peek().clone() {
                TokenKind::Str(key) => {
                    self.advance();
                    key
                }
                TokenKind::Ident(word) => {
                    // The classic dict/struct confusion deserves its own
                    // message.
                    return Err(Diagnostic::new(
                        format!(
                            "dict literal keys must be quoted strings (`\"{word}\": …`); \
                             bareword fields belong to struct literals, written `new TypeName {{ {word}: … }}`"
                        ),
                        self.span(),
                    ));
                }
                other => {
                    return Err(Diagnostic::new(
                        format!(
                            "dict literal keys must be quoted strings, found {}",
                            other.describe()
                        ),
                        self.span(),
                    ));
                }
            };
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RBrace)?;
                break;
            }
        }
        Ok(Expr::Dict(entries, span))
    }

    fn parse_struct_literal(&mut self) -> PResult<Expr> {
        let span = self.expect(&TokenKind::New)?;
        let (name, _) = self.expect_ident()?;
        let mut type_args = Vec::new();
        if self.eat(&TokenKind::Lt) {
            loop {
                type_args.push(self.parse_type(&[])?);
                if !self.eat(&TokenKind::Comma) {
                    self.expect(&TokenKind::Gt)?;
                    break;
                }
            }
        }
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        loop {
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            let (field, _) = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expr()?;
            fields.push((field, value));
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RBrace)?;
                break;
            }
        }
        Ok(Expr::StructLiteral {
            name,
            type_args,
            fields,
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse_program(source, "test.naab").expect("program should parse")
    }

    fn parse_errs(source: &str) -> Vec<Diagnostic> {
        let (_, diagnostics) =
            parse_with_diagnostics(source, "test.naab").expect("lexing should succeed");
        diagnostics
    }

    #[test]
    fn main_is_a_block_not_a_function() {
        let program = parse_ok("main { print(\"hi\") }");
        assert!(program.main.is_some());

        let diags = parse_errs("fn main() { }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("main { … }"));
    }

    #[test]
    fn bareword_dict_key_mentions_struct_syntax() {
        let diags = parse_errs("main { let d = { name: 1 } }");
        assert!(!diags.is_empty());
        assert!(diags[0].message.contains("quoted strings"));
        assert!(diags[0].message.contains("new TypeName"));
    }

    #[test]
    fn error_position_points_at_offending_token() {
        let diags = parse_errs("main {\n  let = 3\n}");
        assert_eq!(diags[0].span, Span::new(2, 7));
    }

    #[test]
    fn recovery_reports_multiple_errors() {
        let diags = parse_errs("main {\n  let = 1\n  let = 2\n}");
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn pipeline_is_left_associative_and_crosses_newlines() {
        let program = parse_ok("main { let r = 5 |> inc\n    |> dbl }");
        let Some(main) = program.main else {
            panic!("expected main");
        };
        let Stmt::VarDecl { init: Some(expr), .. } = &main[0] else {
            panic!("expected let, got {:?}", main[0]);
        };
        let Expr::Binary {
            op: BinOp::Pipeline,
            left,
            ..
        } = expr
        else {
            panic!("expected pipeline, got {expr:?}");
        };
        assert!(matches!(
            **left,
            Expr::Binary {
                op: BinOp::Pipeline,
                ..
            }
        ));
    }

    #[test]
    fn range_forms() {
        let program = parse_ok("main { for i in 0..10 { } for j in 0..=10 { } }");
        let main = program.main.unwrap();
        let Stmt::For { iter, .. } = &main[0] else {
            panic!("expected for");
        };
        assert!(matches!(iter, Expr::Range { inclusive: false, .. }));
        let Stmt::For { iter, .. } = &main[1] else {
            panic!("expected for");
        };
        assert!(matches!(iter, Expr::Range { inclusive: true, .. }));
    }

    #[test]
    fn nullable_union_and_generic_types() {
        let program = parse_ok(
            "fn f(a: int?, b: int | string, c: Box<int>, ref d: list<int>) -> void { }",
        );
        let func = &program.functions[0];
        assert!(func.params[0].ty.nullable);
        assert!(matches!(func.params[1].ty.kind, TypeKind::Union(_)));
        assert!(
            matches!(&func.params[2].ty.kind, TypeKind::Struct { name, type_args, .. }
                if name == "Box" && type_args.len() == 1)
        );
        assert!(func.params[3].ty.reference);
    }

    #[test]
    fn struct_literal_requires_new() {
        let program = parse_ok(
            "struct P { x: int }\nmain { let p = new P { x: 1 }\nlet q = p }",
        );
        assert_eq!(program.structs.len(), 1);
        let main = program.main.unwrap();
        assert!(matches!(
            &main[0],
            Stmt::VarDecl {
                init: Some(Expr::StructLiteral { .. }),
                ..
            }
        ));
    }

    #[test]
    fn generic_struct_decl_resolves_type_parameters() {
        let program = parse_ok("struct Box<T> { value: T }");
        let decl = &program.structs[0];
        assert_eq!(decl.type_params, vec!["T".to_owned()]);
        assert!(matches!(
            decl.fields[0].1.kind,
            TypeKind::TypeParameter(ref n) if n == "T"
        ));
    }

    #[test]
    fn imports_both_forms() {
        let program = parse_ok(
            "import { helper, other as o } from \"lib/util\"\nimport * as util from \"lib/util\"\nuse mylib.text as t\nuse \"b-123\" as fast",
        );
        assert_eq!(program.imports.len(), 2);
        assert_eq!(program.module_uses.len(), 1);
        assert_eq!(program.block_uses.len(), 1);
    }

    #[test]
    fn deep_nesting_hits_the_guard() {
        let source = format!("main {{ let x = {}1{} }}", "(".repeat(1200), ")".repeat(1200));
        let diags = parse_errs(&source);
        assert!(diags
            .iter()
            .any(|d| d.message.contains("recursion limit")));
    }

    #[test]
    fn inline_block_expression() {
        let program = parse_ok("main { let y = <<python[x] x * 2 >> }");
        let main = program.main.unwrap();
        let Stmt::VarDecl { init: Some(expr), .. } = &main[0] else {
            panic!("expected let");
        };
        let Expr::InlineCode {
            language, bound, ..
        } = expr
        else {
            panic!("expected inline code, got {expr:?}");
        };
        assert_eq!(language, "python");
        assert_eq!(bound, &vec!["x".to_owned()]);
    }

    #[test]
    fn try_catch_finally() {
        let program = parse_ok(
            "main { try { throw \"a\" } catch(e) { print(e) } finally { print(\"f\") } }",
        );
        let main = program.main.unwrap();
        assert!(matches!(
            &main[0],
            Stmt::Try {
                finally_body: Some(_),
                ..
            }
        ));
    }
}
