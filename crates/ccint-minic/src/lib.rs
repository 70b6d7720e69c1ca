//! ccint-minic — front-end C de référence des sessions ccint
//!
//! Un micro sous-ensemble C, suffisant pour exercer toute la chaîne
//! session → front-end → moteur sans dépendre d'un vrai compilateur :
//!
//! - globales `int` de session (déclarées dans le contexte partagé au
//!   moment où le moteur exécute les initialiseurs, jamais avant)
//! - fonctions sans argument `void f() { .. }` / `int f() { .. }`
//! - expressions entières (`+ - * / %`, unaires, parenthèses,
//!   affectation), littéraux char traités comme des entiers
//! - builtins `printf` (conversions `%d`/`%i`/`%s`/`%%`) et `puts`,
//!   écrits au travers du puits de sortie du contexte
//! - `using …;` accepté et ignoré en C++, refusé en C
//!
//! Grammaire :
//! ```text
//! unit     := item*
//! item     := "using" … ";"
//!           | ("void" | "int") ident "(" "void"? ")" "{" stmt* "}"
//!           | "int" ident ("=" expr)? ";"
//! stmt     := "int" ident ("=" expr)? ";"
//!           | "return" expr? ";"
//!           | expr ";"
//!           | ";"
//! expr     := ident "=" expr | binaire
//! binaire  := unaire (op unaire)*        (priorités C : * / % avant + -)
//! unaire   := ("-" | "+") unaire | primaire
//! primaire := INT | CHAR | STRING | ident | ident "(" args? ")" | "(" expr ")"
//! args     := expr ("," expr)*
//! ```
//!
//! La compilation est pure : une unité refusée ne laisse aucune trace
//! dans le contexte. Les corps deviennent des objets code qui capturent
//! un clone du contexte partagé et la table des fonctions de l'unité.
//!
//! Exemple éclair :
//! ```
//! use ccint_core::{SharedContext, Value};
//! use ccint_frontend::{Frontend, Invocation};
//! use ccint_minic::MinicFrontend;
//!
//! let (ctx, _out) = SharedContext::with_captured_output();
//! let mut front = MinicFrontend::new(ctx.clone());
//! let module = front
//!     .compile(&Invocation::default(), "int x = 6 * 7;")
//!     .unwrap();
//! let (_, _, inits) = module.into_parts();
//! for mut init in inits {
//!     init.invoke().unwrap();
//! }
//! assert_eq!(ctx.get_global("x"), Some(Value::Int(42)));
//! ```

#![deny(missing_docs)]

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use ccint_core::{CodeObject, CompiledModule, Decl, RunError, RunResult, SharedContext, Span, Value};
use ccint_frontend::{CompileError, CompileResult, Diagnostic, Frontend, Invocation, Lang, Severity};
use ccint_lexer::{Keyword, Lexer, LineMap, Token, TokenKind};

/* ─────────────────────────── AST interne ─────────────────────────── */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnOp {
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone)]
enum Expr {
    Int(i64),
    Str(String),
    Var(String, Span),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Assign(String, Span, Box<Expr>),
    Call(String, Span, Vec<Expr>),
}

#[derive(Debug, Clone)]
enum Stmt {
    Local {
        name: String,
        span: Span,
        init: Option<Expr>,
    },
    Expr(Expr),
    Return(Option<Expr>, Span),
    Empty,
}

#[derive(Debug, Clone)]
enum Item {
    Using(Span),
    Global {
        name: String,
        span: Span,
        init: Option<Expr>,
    },
    Func {
        name: String,
        span: Span,
        returns_int: bool,
        body: Vec<Stmt>,
    },
}

/* ─────────────────────────── Parseur ─────────────────────────── */

/// Échec de parse (interne, converti en `Diagnostic` localisé).
#[derive(Debug)]
struct ParseError {
    span: Span,
    message: String,
}

struct Parser<'a> {
    /// Flux complet, terminé par `Eof` (garanti par le lexer).
    toks: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(toks: Vec<Token<'a>>) -> Self {
        Self { toks, pos: 0 }
    }

    #[inline]
    fn peek_n(&self, n: usize) -> &Token<'a> {
        &self.toks[(self.pos + n).min(self.toks.len() - 1)]
    }

    #[inline]
    fn peek(&self) -> &Token<'a> {
        self.peek_n(0)
    }

    /// Genre du jeton courant, détaché du flux.
    #[inline]
    fn kind(&self) -> TokenKind<'a> {
        self.peek().value.clone()
    }

    #[inline]
    fn span(&self) -> Span {
        self.peek().span
    }

    /// Avance d'un jeton ; reste calé sur `Eof` en fin de flux.
    fn bump(&mut self) -> Token<'a> {
        let i = self.pos.min(self.toks.len() - 1);
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        self.toks[i].clone()
    }

    #[inline]
    fn at(&self, kind: &TokenKind<'_>) -> bool {
        mem::discriminant(&self.peek().value) == mem::discriminant(kind)
    }

    #[inline]
    fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek().value, TokenKind::Kw(k) if k == kw)
    }

    fn eat(&mut self, kind: &TokenKind<'_>) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind<'_>, what: &str) -> Result<Token<'a>, ParseError> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.fail(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Span), ParseError> {
        let span = self.span();
        if let TokenKind::Ident(s) = self.peek().value {
            let name = s.to_owned();
            self.bump();
            Ok((name, span))
        } else {
            Err(self.fail(format!("expected {what}")))
        }
    }

    fn fail(&self, message: impl Into<String>) -> ParseError {
        ParseError { span: self.span(), message: message.into() }
    }

    fn parse_unit(&mut self) -> Result<Vec<Item>, ParseError> {
        let mut items = Vec::new();
        loop {
            match self.kind() {
                TokenKind::Eof => break,
                TokenKind::Kw(Keyword::Using) => items.push(self.parse_using()?),
                TokenKind::Kw(Keyword::Void) => {
                    self.bump();
                    let (name, span) = self.expect_ident("a name after `void`")?;
                    items.push(self.parse_func_tail(name, span, false)?);
                }
                TokenKind::Kw(Keyword::Int) => {
                    self.bump();
                    let (name, span) = self.expect_ident("a name after `int`")?;
                    if self.at(&TokenKind::LParen) {
                        items.push(self.parse_func_tail(name, span, true)?);
                    } else {
                        let init = if self.eat(&TokenKind::Eq) {
                            Some(self.parse_expr()?)
                        } else {
                            None
                        };
                        self.expect(&TokenKind::Semi, "`;` after the declaration")?;
                        items.push(Item::Global { name, span, init });
                    }
                }
                TokenKind::Kw(kw) => {
                    return Err(
                        self.fail(format!("`{}` is outside the supported subset", kw_name(kw)))
                    );
                }
                _ => return Err(self.fail("expected a declaration (`int`, `void` or `using`)")),
            }
        }
        Ok(items)
    }

    /// `using …;` : tout est ignoré jusqu'au `;` (le dialecte est vérifié
    /// plus tard, avec un span couvrant la déclaration entière).
    fn parse_using(&mut self) -> Result<Item, ParseError> {
        let start = self.span();
        self.bump();
        loop {
            match self.kind() {
                TokenKind::Semi => {
                    let end = self.span();
                    self.bump();
                    return Ok(Item::Using(Span::new(start.start, end.end)));
                }
                TokenKind::Eof => return Err(self.fail("expected `;` after `using`")),
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_func_tail(
        &mut self,
        name: String,
        span: Span,
        returns_int: bool,
    ) -> Result<Item, ParseError> {
        self.expect(&TokenKind::LParen, "`(` to open the parameter list")?;
        if self.at_kw(Keyword::Void) {
            self.bump();
        }
        self.expect(&TokenKind::RParen, "`)` (parameters are not supported)")?;
        self.expect(&TokenKind::LBrace, "`{` to open the function body")?;
        let mut body = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.fail("unexpected end of input inside a function body"));
            }
            body.push(self.parse_stmt()?);
        }
        self.bump();
        Ok(Item::Func { name, span, returns_int, body })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.kind() {
            TokenKind::Semi => {
                self.bump();
                Ok(Stmt::Empty)
            }
            TokenKind::Kw(Keyword::Int) => {
                self.bump();
                let (name, span) = self.expect_ident("a name after `int`")?;
                let init = if self.eat(&TokenKind::Eq) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.expect(&TokenKind::Semi, "`;` after the declaration")?;
                Ok(Stmt::Local { name, span, init })
            }
            TokenKind::Kw(Keyword::Return) => {
                let span = self.span();
                self.bump();
                let value = if self.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&TokenKind::Semi, "`;` after `return`")?;
                Ok(Stmt::Return(value, span))
            }
            TokenKind::Kw(kw) => {
                Err(self.fail(format!("`{}` is outside the supported subset", kw_name(kw))))
            }
            _ => {
                let e = self.parse_expr()?;
                self.expect(&TokenKind::Semi, "`;` after the expression")?;
                Ok(Stmt::Expr(e))
            }
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        // Affectation : associative à droite, cible identifiant simple.
        if let TokenKind::Ident(name) = self.peek().value {
            if matches!(self.peek_n(1).value, TokenKind::Eq) {
                let span = self.span();
                self.bump();
                self.bump();
                let value = self.parse_expr()?;
                return Ok(Expr::Assign(name.to_owned(), span, Box::new(value)));
            }
        }
        self.parse_binary(0)
    }

    /// Montée de précédence classique (lbp/rbp).
    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let Some((lbp, rbp, op)) = precedence(&self.peek().value) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_binary(rbp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.kind() {
            TokenKind::Minus => {
                self.bump();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            TokenKind::Plus => {
                self.bump();
                Ok(Expr::Unary(UnOp::Pos, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.kind() {
            TokenKind::Int(v) => {
                self.bump();
                Ok(Expr::Int(v))
            }
            // Les littéraux char sont des entiers, comme en C.
            TokenKind::Char(c) => {
                self.bump();
                Ok(Expr::Int(i64::from(u32::from(c))))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Expr::Str(s))
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.eat(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !self.at(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "`)` to close the call")?;
                    Ok(Expr::Call(name.to_owned(), span, args))
                } else {
                    Ok(Expr::Var(name.to_owned(), span))
                }
            }
            TokenKind::LParen => {
                self.bump();
                let e = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(e)
            }
            TokenKind::Float(_) => {
                Err(self.fail("floating-point literals are outside the supported subset"))
            }
            _ => Err(self.fail("expected an expression")),
        }
    }
}

/// Priorités C du sous-ensemble : `* / %` lient plus fort que `+ -`.
fn precedence(op: &TokenKind<'_>) -> Option<(u8, u8, BinOp)> {
    match op {
        TokenKind::Plus => Some((9, 10, BinOp::Add)),
        TokenKind::Minus => Some((9, 10, BinOp::Sub)),
        TokenKind::Star => Some((11, 12, BinOp::Mul)),
        TokenKind::Slash => Some((11, 12, BinOp::Div)),
        TokenKind::Percent => Some((11, 12, BinOp::Rem)),
        _ => None,
    }
}

fn kw_name(kw: Keyword) -> &'static str {
    match kw {
        Keyword::Using => "using",
        Keyword::Namespace => "namespace",
        Keyword::Int => "int",
        Keyword::Void => "void",
        Keyword::Char => "char",
        Keyword::Const => "const",
        Keyword::Static => "static",
        Keyword::Extern => "extern",
        Keyword::If => "if",
        Keyword::Else => "else",
        Keyword::While => "while",
        Keyword::For => "for",
        Keyword::Return => "return",
        Keyword::Struct => "struct",
        Keyword::Enum => "enum",
        Keyword::Sizeof => "sizeof",
    }
}

/* ─────────────────────────── Analyse sémantique ─────────────────────────── */

/// Fonctions fournies par le front-end lui-même.
const BUILTINS: &[&str] = &["printf", "puts"];

/// Vérifie l'unité sans toucher au contexte : les noms se résolvent dans
/// les locales, puis les globales de l'unité, puis celles de la session.
struct Checker<'a> {
    ctx: &'a SharedContext,
    lines: &'a LineMap,
    input: &'a str,
    diags: Vec<Diagnostic>,
}

impl<'a> Checker<'a> {
    fn new(ctx: &'a SharedContext, lines: &'a LineMap, input: &'a str) -> Self {
        Self { ctx, lines, input, diags: Vec::new() }
    }

    fn located(&self, span: Span, msg: &str) -> String {
        let (line, col) = self.lines.line_col(span.start);
        format!("{}:{line}:{col}: {msg}", self.input)
    }

    fn error(&mut self, span: Span, msg: impl AsRef<str>) {
        let text = self.located(span, msg.as_ref());
        self.diags.push(Diagnostic::error(text, Some(span)));
    }

    fn warn(&mut self, span: Span, msg: impl AsRef<str>) {
        let text = self.located(span, msg.as_ref());
        self.diags.push(Diagnostic::warn(text, Some(span)));
    }

    fn check_unit(&mut self, items: &[Item], lang: Lang) {
        let mut globals: Vec<&str> = Vec::new();
        let mut funcs: Vec<&str> = Vec::new();

        // Passe 1 : noms de l'unité. Les fonctions sont visibles partout,
        // y compris avant leur définition.
        for it in items {
            let (name, span) = match it {
                Item::Using(span) => {
                    if lang == Lang::C {
                        self.error(*span, "`using` is a C++ declaration");
                    }
                    continue;
                }
                Item::Global { name, span, .. } | Item::Func { name, span, .. } => {
                    (name.as_str(), *span)
                }
            };
            if globals.contains(&name) || funcs.contains(&name) {
                self.error(span, format!("redefinition of `{name}`"));
                continue;
            }
            if BUILTINS.contains(&name) {
                self.error(span, format!("`{name}` is a builtin and cannot be redefined"));
                continue;
            }
            match it {
                Item::Global { .. } => globals.push(name),
                Item::Func { .. } => funcs.push(name),
                Item::Using(_) => {}
            }
        }

        // Passe 2 : initialiseurs de globales. Chacun ne voit que les
        // globales déclarées avant lui (elles s'exécutent dans l'ordre).
        let mut seen: Vec<&str> = Vec::new();
        for it in items {
            if let Item::Global { name, init, .. } = it {
                if let Some(e) = init {
                    self.check_expr(e, &[], &seen, &funcs);
                }
                seen.push(name.as_str());
            }
        }

        // Passe 3 : corps de fonctions, avec toutes les globales en vue.
        for it in items {
            if let Item::Func { returns_int, body, .. } = it {
                self.check_body(body, *returns_int, &globals, &funcs);
            }
        }
    }

    fn check_body(&mut self, body: &[Stmt], returns_int: bool, globals: &[&str], funcs: &[&str]) {
        let mut locals: Vec<&str> = Vec::new();
        for s in body {
            match s {
                Stmt::Local { name, span, init } => {
                    // L'initialiseur précède la déclaration : `int x = x;`
                    // n'atteint que les portées extérieures.
                    if let Some(e) = init {
                        self.check_expr(e, &locals, globals, funcs);
                    }
                    if locals.contains(&name.as_str()) {
                        self.error(*span, format!("redefinition of `{name}`"));
                    } else {
                        if globals.contains(&name.as_str()) || self.ctx.has_global(name) {
                            self.warn(*span, format!("local `{name}` shadows a session global"));
                        }
                        locals.push(name.as_str());
                    }
                }
                Stmt::Expr(e) => self.check_expr(e, &locals, globals, funcs),
                Stmt::Return(value, span) => {
                    if let Some(e) = value {
                        if !returns_int {
                            self.error(*span, "`return` with a value in a function returning void");
                        }
                        self.check_expr(e, &locals, globals, funcs);
                    }
                }
                Stmt::Empty => {}
            }
        }
    }

    fn check_expr(&mut self, e: &Expr, locals: &[&str], globals: &[&str], funcs: &[&str]) {
        match e {
            Expr::Int(_) | Expr::Str(_) => {}
            Expr::Var(name, span) => {
                if locals.contains(&name.as_str())
                    || globals.contains(&name.as_str())
                    || self.ctx.has_global(name)
                {
                    // résolu
                } else if funcs.contains(&name.as_str()) {
                    self.error(*span, format!("function `{name}` used as a value"));
                } else {
                    self.error(*span, format!("use of undeclared identifier `{name}`"));
                }
            }
            Expr::Unary(_, inner) => self.check_expr(inner, locals, globals, funcs),
            Expr::Binary(_, lhs, rhs) => {
                self.check_expr(lhs, locals, globals, funcs);
                self.check_expr(rhs, locals, globals, funcs);
            }
            Expr::Assign(name, span, value) => {
                if !(locals.contains(&name.as_str())
                    || globals.contains(&name.as_str())
                    || self.ctx.has_global(name))
                {
                    self.error(*span, format!("assignment to undeclared identifier `{name}`"));
                }
                self.check_expr(value, locals, globals, funcs);
            }
            Expr::Call(name, span, args) => {
                if funcs.contains(&name.as_str()) {
                    if !args.is_empty() {
                        self.error(*span, format!("`{name}` takes no arguments in this subset"));
                    }
                } else if name == "printf" {
                    if args.is_empty() {
                        self.error(*span, "`printf` needs a format string");
                    }
                } else if name == "puts" {
                    if args.len() != 1 {
                        self.error(*span, "`puts` takes exactly one argument");
                    }
                } else {
                    self.error(*span, format!("call to unknown function `{name}`"));
                }
                for a in args {
                    self.check_expr(a, locals, globals, funcs);
                }
            }
        }
    }
}

/* ─────────────────────────── Évaluation ─────────────────────────── */

/// Corps de fonctions de l'unité, partagés par tous ses objets code.
type FnTable = HashMap<String, Arc<Vec<Stmt>>>;

enum Flow {
    Normal,
    Return(i64),
}

fn run_body(ctx: &SharedContext, fns: &FnTable, body: &[Stmt]) -> RunResult<i64> {
    let mut locals: HashMap<String, i64> = HashMap::new();
    for s in body {
        if let Flow::Return(v) = run_stmt(ctx, fns, &mut locals, s)? {
            return Ok(v);
        }
    }
    Ok(0)
}

fn run_stmt(
    ctx: &SharedContext,
    fns: &FnTable,
    locals: &mut HashMap<String, i64>,
    s: &Stmt,
) -> RunResult<Flow> {
    match s {
        Stmt::Local { name, init, .. } => {
            let v = match init {
                Some(e) => i64::try_from(eval(ctx, fns, locals, e)?)?,
                None => 0,
            };
            locals.insert(name.clone(), v);
            Ok(Flow::Normal)
        }
        Stmt::Expr(e) => {
            eval(ctx, fns, locals, e)?;
            Ok(Flow::Normal)
        }
        Stmt::Return(value, _) => {
            let v = match value {
                Some(e) => i64::try_from(eval(ctx, fns, locals, e)?)?,
                None => 0,
            };
            Ok(Flow::Return(v))
        }
        Stmt::Empty => Ok(Flow::Normal),
    }
}

fn eval(
    ctx: &SharedContext,
    fns: &FnTable,
    locals: &mut HashMap<String, i64>,
    e: &Expr,
) -> RunResult<Value> {
    match e {
        Expr::Int(v) => Ok(Value::Int(*v)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Var(name, _) => {
            if let Some(v) = locals.get(name) {
                Ok(Value::Int(*v))
            } else if let Some(v) = ctx.get_global(name) {
                Ok(v)
            } else {
                Err(RunError::UndefinedGlobal(name.clone()))
            }
        }
        Expr::Unary(op, inner) => {
            let v = i64::try_from(eval(ctx, fns, locals, inner)?)?;
            Ok(Value::Int(match op {
                UnOp::Neg => v.wrapping_neg(),
                UnOp::Pos => v,
            }))
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = i64::try_from(eval(ctx, fns, locals, lhs)?)?;
            let b = i64::try_from(eval(ctx, fns, locals, rhs)?)?;
            let v = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        return Err(RunError::DivideByZero);
                    }
                    a.wrapping_div(b)
                }
                BinOp::Rem => {
                    if b == 0 {
                        return Err(RunError::DivideByZero);
                    }
                    a.wrapping_rem(b)
                }
            };
            Ok(Value::Int(v))
        }
        Expr::Assign(name, _, value) => {
            let v = i64::try_from(eval(ctx, fns, locals, value)?)?;
            if let Some(slot) = locals.get_mut(name) {
                *slot = v;
            } else if ctx.has_global(name) {
                ctx.set_global(name, Value::Int(v));
            } else {
                return Err(RunError::UndefinedGlobal(name.clone()));
            }
            Ok(Value::Int(v))
        }
        Expr::Call(name, _, args) => {
            // Arguments évalués de gauche à droite avant l'appel.
            let mut vals = Vec::with_capacity(args.len());
            for a in args {
                vals.push(eval(ctx, fns, locals, a)?);
            }
            if let Some(body) = fns.get(name) {
                run_body(ctx, fns, body).map(Value::Int)
            } else {
                match name.as_str() {
                    "printf" => builtin_printf(ctx, &vals).map(Value::Int),
                    "puts" => builtin_puts(ctx, &vals).map(Value::Int),
                    _ => Err(RunError::Msg(format!("unknown function `{name}`"))),
                }
            }
        }
    }
}

/* ─────────────────────────── Builtins ─────────────────────────── */

/// `printf` : conversions `%d`/`%i`/`%s`/`%%`, renvoie le nombre de
/// caractères écrits. Toute la ligne part d'un bloc vers le puits.
fn builtin_printf(ctx: &SharedContext, args: &[Value]) -> RunResult<i64> {
    let fmt = match args.first() {
        Some(Value::Str(s)) => s,
        Some(other) => {
            return Err(RunError::Type { expected: "string", got: other.type_name() });
        }
        None => return Err(RunError::Format("printf needs a format string".into())),
    };
    let mut out = String::new();
    let mut rest = args.iter().skip(1);
    let mut it = fmt.chars();
    while let Some(c) = it.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match it.next() {
            Some('%') => out.push('%'),
            Some('d' | 'i') => match rest.next() {
                Some(Value::Int(n)) => out.push_str(&n.to_string()),
                Some(other) => {
                    return Err(RunError::Type { expected: "int", got: other.type_name() });
                }
                None => return Err(RunError::Format("not enough arguments for `%d`".into())),
            },
            Some('s') => match rest.next() {
                Some(Value::Str(s)) => out.push_str(s),
                Some(other) => {
                    return Err(RunError::Type { expected: "string", got: other.type_name() });
                }
                None => return Err(RunError::Format("not enough arguments for `%s`".into())),
            },
            Some(other) => {
                return Err(RunError::Format(format!("unsupported conversion `%{other}`")));
            }
            None => return Err(RunError::Format("dangling `%` at end of format".into())),
        }
    }
    ctx.write_str(&out)?;
    Ok(i64::try_from(out.len()).unwrap_or(i64::MAX))
}

/// `puts` : la chaîne plus un saut de ligne, renvoie les caractères écrits.
fn builtin_puts(ctx: &SharedContext, args: &[Value]) -> RunResult<i64> {
    match args {
        [Value::Str(s)] => {
            ctx.writeln_str(s)?;
            Ok(i64::try_from(s.len()).unwrap_or(i64::MAX).saturating_add(1))
        }
        [other] => Err(RunError::Type { expected: "string", got: other.type_name() }),
        _ => Err(RunError::Format("puts takes exactly one string".into())),
    }
}

/* ─────────────────────────── Génération ─────────────────────────── */

enum Lowered {
    Global { name: String, init: Option<Expr> },
    Func { name: String },
}

/// Abaisse l'unité vérifiée en module : une décl par globale et par
/// fonction, un initialiseur par globale, dans l'ordre de déclaration.
fn lower_unit(ctx: &SharedContext, input_name: &str, items: Vec<Item>) -> CompiledModule {
    let mut module = CompiledModule::new(input_name);

    let mut table: FnTable = HashMap::new();
    let mut plan = Vec::new();
    for it in items {
        match it {
            Item::Using(_) => {}
            Item::Global { name, init, .. } => plan.push(Lowered::Global { name, init }),
            Item::Func { name, body, .. } => {
                table.insert(name.clone(), Arc::new(body));
                plan.push(Lowered::Func { name });
            }
        }
    }
    let table = Arc::new(table);

    for lowered in plan {
        match lowered {
            Lowered::Global { name, init } => {
                module.push_decl(Decl::global(name.as_str()));
                let ctx = ctx.clone();
                let fns = Arc::clone(&table);
                module.push_init(CodeObject::new(move || {
                    ctx.declare_global(&name);
                    if let Some(e) = &init {
                        let mut locals = HashMap::new();
                        let v = i64::try_from(eval(&ctx, &fns, &mut locals, e)?)?;
                        ctx.set_global(&name, Value::Int(v));
                    }
                    Ok(0)
                }));
            }
            Lowered::Func { name } => {
                let ctx = ctx.clone();
                let fns = Arc::clone(&table);
                let body = match fns.get(&name) {
                    Some(b) => Arc::clone(b),
                    None => Arc::new(Vec::new()),
                };
                let code = CodeObject::new(move || run_body(&ctx, &fns, &body));
                module.push_decl(Decl::function(name, code));
            }
        }
    }
    module
}

/* ─────────────────────────── Front-end ─────────────────────────── */

/// Front-end de référence, branché sur le contexte partagé de la session.
///
/// Les chemins d'include de l'invocation voyagent pour les front-ends
/// complets ; sans préprocesseur, celui-ci ne les consulte pas.
#[derive(Debug)]
pub struct MinicFrontend {
    ctx: SharedContext,
    warnings: Vec<Diagnostic>,
}

impl MinicFrontend {
    /// Construit le front-end au-dessus du contexte de la session.
    pub fn new(ctx: SharedContext) -> Self {
        Self { ctx, warnings: Vec::new() }
    }

    /// Contexte partagé (celui des globales de session).
    pub fn context(&self) -> &SharedContext {
        &self.ctx
    }

    /// Warnings de la dernière compilation réussie (vidés à la lecture).
    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        mem::take(&mut self.warnings)
    }
}

impl Frontend for MinicFrontend {
    fn compile(&mut self, invocation: &Invocation, source: &str) -> CompileResult<CompiledModule> {
        let lines = LineMap::new(source);
        let input = invocation.input_name.as_str();

        let toks = match Lexer::new(source).tokenize() {
            Ok(t) => t,
            Err(e) => {
                let (line, col) = lines.line_col(e.span.start);
                return Err(CompileError {
                    diagnostics: vec![Diagnostic::error(
                        format!("{input}:{line}:{col}: {e}"),
                        Some(e.span),
                    )],
                });
            }
        };

        let mut parser = Parser::new(toks);
        let items = match parser.parse_unit() {
            Ok(items) => items,
            Err(p) => {
                let (line, col) = lines.line_col(p.span.start);
                return Err(CompileError {
                    diagnostics: vec![Diagnostic::error(
                        format!("{input}:{line}:{col}: {}", p.message),
                        Some(p.span),
                    )],
                });
            }
        };

        let mut checker = Checker::new(&self.ctx, &lines, input);
        checker.check_unit(&items, invocation.lang);
        let diags = checker.diags;
        if diags.iter().any(|d| d.severity == Severity::Error) {
            return Err(CompileError { diagnostics: diags });
        }
        self.warnings = diags;

        Ok(lower_unit(&self.ctx, input, items))
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use ccint_core::DeclKind;
    use pretty_assertions::assert_eq;

    fn compile_ok(ctx: &SharedContext, src: &str) -> CompiledModule {
        MinicFrontend::new(ctx.clone())
            .compile(&Invocation::default(), src)
            .expect("compile")
    }

    fn first_error(ctx: &SharedContext, src: &str) -> String {
        let err = MinicFrontend::new(ctx.clone())
            .compile(&Invocation::default(), src)
            .err()
            .expect("a compile error");
        err.first().expect("a diagnostic").message.clone()
    }

    /// Exécute les initialiseurs puis la première fonction de l'unité.
    fn run_unit(ctx: &SharedContext, src: &str) -> RunResult<i64> {
        let module = compile_ok(ctx, src);
        let (_, decls, inits) = module.into_parts();
        for mut init in inits {
            init.invoke().expect("initializer");
        }
        let mut code = decls
            .into_iter()
            .find_map(|d| d.code)
            .expect("an executable function");
        code.invoke()
    }

    /// Exécute seulement les initialiseurs (unités sans fonction).
    fn run_inits(ctx: &SharedContext, src: &str) {
        let module = compile_ok(ctx, src);
        let (_, _, inits) = module.into_parts();
        for mut init in inits {
            init.invoke().expect("initializer");
        }
    }

    #[test]
    fn empty_unit_compiles() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let module = compile_ok(&ctx, "");
        assert!(module.decls().is_empty());
        assert_eq!(module.init_len(), 0);
    }

    #[test]
    fn global_initializer_runs_only_when_invoked() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let module = compile_ok(&ctx, "int x = 5;");
        assert!(!ctx.has_global("x"), "compilation must not touch the context");
        assert_eq!(module.decls().len(), 1);
        assert_eq!(module.decls()[0].kind, DeclKind::Global);

        let (_, _, inits) = module.into_parts();
        for mut init in inits {
            init.invoke().expect("initializer");
        }
        assert_eq!(ctx.get_global("x"), Some(Value::Int(5)));
    }

    #[test]
    fn globals_initialize_in_declaration_order() {
        let (ctx, _out) = SharedContext::with_captured_output();
        run_inits(&ctx, "int a = 2;\nint b = a * 3;");
        assert_eq!(ctx.get_global("b"), Some(Value::Int(6)));
    }

    #[test]
    fn rejected_unit_leaves_the_context_untouched() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "int ok = 1;\nint bad = nope;");
        assert!(msg.contains("undeclared"), "{msg}");
        assert_eq!(ctx.globals_len(), 0);
    }

    #[test]
    fn wrapped_entry_prints_through_the_context() {
        let (ctx, out) = SharedContext::with_captured_output();
        let n = run_unit(&ctx, "void ccint_main0() {\nprintf(\"1+1=%d\\n\", 1 + 1);\n}")
            .expect("run");
        assert_eq!(out.get(), "1+1=2\n");
        assert_eq!(n, 0, "void entries fall through to 0");
    }

    #[test]
    fn printf_mixes_conversions_and_returns_length() {
        let (ctx, out) = SharedContext::with_captured_output();
        let n = run_unit(
            &ctx,
            "int main0() { return printf(\"%s=%d%%\\n\", \"x\", 42); }",
        )
        .expect("run");
        assert_eq!(out.get(), "x=42%\n");
        assert_eq!(n, 6);
    }

    #[test]
    fn puts_appends_a_newline() {
        let (ctx, out) = SharedContext::with_captured_output();
        let n = run_unit(&ctx, "int f() { return puts(\"hi\"); }").expect("run");
        assert_eq!(out.get(), "hi\n");
        assert_eq!(n, 3);
    }

    #[test]
    fn precedence_and_unary_follow_c() {
        let (ctx, _out) = SharedContext::with_captured_output();
        assert_eq!(run_unit(&ctx, "int f() { return 2 + 3 * 4 - -6; }").expect("run"), 20);
        assert_eq!(run_unit(&ctx, "int f() { return (2 + 3) * -2; }").expect("run"), -10);
        assert_eq!(run_unit(&ctx, "int f() { return 17 % 5; }").expect("run"), 2);
    }

    #[test]
    fn char_literals_evaluate_as_int() {
        let (ctx, _out) = SharedContext::with_captured_output();
        assert_eq!(run_unit(&ctx, "int f() { return 'A'; }").expect("run"), 65);
    }

    #[test]
    fn assignment_updates_session_globals() {
        let (ctx, _out) = SharedContext::with_captured_output();
        run_inits(&ctx, "int x = 1;");
        run_unit(&ctx, "void touch() { x = x + 41; }").expect("run");
        assert_eq!(ctx.get_global("x"), Some(Value::Int(42)));
    }

    #[test]
    fn functions_call_each_other_within_the_unit() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let n = run_unit(&ctx, "int ccint_main0() { return twice(); }\nint twice() { return 21 * 2; }");
        assert_eq!(n.expect("run"), 42);
    }

    #[test]
    fn locals_are_invisible_outside_their_body() {
        let (ctx, _out) = SharedContext::with_captured_output();
        run_unit(&ctx, "void f() { int t = 9; t = t + 1; }").expect("run");
        assert!(!ctx.has_global("t"));
    }

    #[test]
    fn division_and_remainder_by_zero_are_reported() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let err = run_unit(&ctx, "int f() { return 1 / 0; }").unwrap_err();
        assert!(matches!(err, RunError::DivideByZero), "{err}");
        let err = run_unit(&ctx, "int f() { return 1 % 0; }").unwrap_err();
        assert!(matches!(err, RunError::DivideByZero), "{err}");
    }

    #[test]
    fn printf_argument_mismatch_is_reported() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let err = run_unit(&ctx, "void f() { printf(\"%d\", \"hi\"); }").unwrap_err();
        assert!(matches!(err, RunError::Type { expected: "int", .. }), "{err}");
    }

    #[test]
    fn undeclared_identifier_is_rejected_with_position() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "int y = nope;");
        assert!(msg.contains("<input>:1:9"), "{msg}");
        assert!(msg.contains("undeclared identifier `nope`"), "{msg}");
    }

    #[test]
    fn assignment_target_must_exist() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "void f() { y = 1; }");
        assert!(msg.contains("assignment to undeclared identifier `y`"), "{msg}");
    }

    #[test]
    fn unknown_function_calls_are_rejected() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "void f() { frob(); }");
        assert!(msg.contains("unknown function `frob`"), "{msg}");
    }

    #[test]
    fn function_names_are_not_values() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "int twice() { return 2; }\nint g = twice;");
        assert!(msg.contains("used as a value"), "{msg}");
    }

    #[test]
    fn control_flow_keywords_are_out_of_subset() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "void f() { while (1) ; }");
        assert!(msg.contains("`while` is outside the supported subset"), "{msg}");
    }

    #[test]
    fn return_with_value_needs_an_int_function() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "void f() { return 3; }");
        assert!(msg.contains("function returning void"), "{msg}");
    }

    #[test]
    fn using_requires_cxx() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let module = compile_ok(&ctx, "using namespace std;");
        assert!(module.decls().is_empty());

        let mut front = MinicFrontend::new(ctx.clone());
        let inv = Invocation { lang: Lang::C, ..Invocation::default() };
        let err = front.compile(&inv, "using namespace std;").err().expect("an error");
        let msg = &err.first().expect("a diagnostic").message;
        assert!(msg.contains("C++"), "{msg}");
    }

    #[test]
    fn redefinition_within_a_unit_is_rejected() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "int x;\nint x;");
        assert!(msg.contains("redefinition of `x`"), "{msg}");
        assert!(msg.contains("<input>:2:5"), "{msg}");
    }

    #[test]
    fn builtins_cannot_be_redefined() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "int printf = 3;");
        assert!(msg.contains("builtin"), "{msg}");
    }

    #[test]
    fn local_shadowing_warns_without_blocking() {
        let (ctx, _out) = SharedContext::with_captured_output();
        run_inits(&ctx, "int x = 1;");

        let mut front = MinicFrontend::new(ctx.clone());
        front
            .compile(&Invocation::default(), "void f() { int x = 9; }")
            .expect("shadowing compiles");
        let warnings = front.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("shadows a session global"));
        assert!(front.take_warnings().is_empty(), "warnings drain on read");
    }

    #[test]
    fn parse_errors_carry_line_and_column() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "int = 5;");
        assert!(msg.contains("<input>:1:5"), "{msg}");
        assert!(msg.contains("expected a name after `int`"), "{msg}");
    }

    #[test]
    fn lex_errors_become_diagnostics() {
        let (ctx, _out) = SharedContext::with_captured_output();
        let msg = first_error(&ctx, "int x = 09;");
        assert!(msg.contains("invalid number literal"), "{msg}");
        assert!(msg.contains("<input>:1:9"), "{msg}");
    }
}
