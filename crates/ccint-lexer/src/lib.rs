//! ccint-lexer — balayage lexical brut famille C pour ccint
//!
//! Faits saillants :
//! - `Lexer` + `LexerOptions` : commentaires `//`, `/* */`, ident/keywords C,
//!   nombres (décimal, octal à zéro de tête, hex, binaire, suffixes `uUlL`),
//!   **chaînes** et **char literals** avec échappements C, opérateurs C
//! - **directives préprocesseur** (`#…` en tête de ligne) reconnues mais non
//!   interprétées : sautées comme des blancs, continuation `\`-newline comprise
//! - `wrap_point` : localisation du point d'enrobage d'un snippet — fonction
//!   **totale**, toute erreur lexicale dégrade en `NoWrap`
//! - Spans byte précis + `LineMap` pour `(ligne, colonne)`
//!
//! Exemple éclair :
//! ```
//! use ccint_lexer::{wrap_point, WrapDecision};
//!
//! assert_eq!(wrap_point("1+1;"), WrapDecision::InsertAt(0));
//! assert_eq!(wrap_point("#include <cstdio>\n"), WrapDecision::NoWrap);
//! assert_eq!(wrap_point("using namespace std;\nf();"), WrapDecision::InsertAt(20));
//! ```

#![deny(missing_docs)]

use std::fmt;

use ccint_core::{Pos, Span, Spanned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Options & LineMap ─────────────────────────── */

/// Options du lexer.
#[derive(Debug, Clone, Copy)]
pub struct LexerOptions {
    /// Sauter les directives préprocesseur (`#…` en tête de ligne) comme
    /// des blancs, sans les interpréter.
    pub skip_directives: bool,
    /// Honorer la continuation `\`-newline à l'intérieur d'une directive.
    pub directive_continuations: bool,
}

impl Default for LexerOptions {
    fn default() -> Self {
        Self { skip_directives: true, directive_continuations: true }
    }
}

/// Table des lignes pour (byte offset) → (ligne, colonne).
#[derive(Debug, Clone)]
pub struct LineMap {
    /// Offsets des débuts de lignes (toujours contient 0).
    pub line_starts: Vec<u32>,
}

impl LineMap {
    /// Construit la table à partir d'un `&str`.
    pub fn new(src: &str) -> Self {
        let mut ls = Vec::with_capacity(64);
        ls.push(0);
        for (i, b) in src.as_bytes().iter().enumerate() {
            if *b == b'\n' {
                ls.push((i as u32) + 1);
            }
        }
        Self { line_starts: ls }
    }

    /// Convertit un `Pos` en (ligne, colonne), 1-based.
    pub fn line_col(&self, pos: Pos) -> (u32, u32) {
        let off = pos.0;
        let idx = match self.line_starts.binary_search(&off) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[idx];
        let col = off.saturating_sub(line_start) + 1;
        ((idx as u32) + 1, col)
    }

    /// Convertit un `Span` en ((l1,c1), (l2,c2)).
    pub fn span_lines(&self, sp: Span) -> ((u32, u32), (u32, u32)) {
        (self.line_col(sp.start), self.line_col(sp.end))
    }
}

/* ─────────────────────────── Tokens ─────────────────────────── */

/// Mots-clés C reconnus (le reste du vocabulaire C arrive en `Ident`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `using`
    Using,
    /// `namespace`
    Namespace,
    /// `int`
    Int,
    /// `void`
    Void,
    /// `char`
    Char,
    /// `const`
    Const,
    /// `static`
    Static,
    /// `extern`
    Extern,
    /// `if`
    If,
    /// `else`
    Else,
    /// `while`
    While,
    /// `for`
    For,
    /// `return`
    Return,
    /// `struct`
    Struct,
    /// `enum`
    Enum,
    /// `sizeof`
    Sizeof,
}

/// Genre de jeton lexical.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    /// Fin de flux.
    Eof,
    /// Identifiant (mots-clés reclassés dans `Kw`).
    Ident(&'a str),
    /// Mot-clé.
    Kw(Keyword),
    /// Littéral entier (i64, suffixes `uUlL` consommés).
    Int(i64),
    /// Littéral flottant (f64, suffixe consommé).
    Float(f64),
    /// Littéral char (un seul scalaire).
    Char(char),
    /// Littéral chaîne (échappements décodés).
    Str(String),
    /// Symbole `(`
    LParen,
    /// Symbole `)`
    RParen,
    /// Symbole `{`
    LBrace,
    /// Symbole `}`
    RBrace,
    /// Symbole `[`
    LBracket,
    /// Symbole `]`
    RBracket,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `;`
    Semi,
    /// `:`
    Colon,
    /// `::`
    PathSep,
    /// `->`
    Arrow,
    /// `?`
    Question,
    /// `+`
    Plus,
    /// `++`
    PlusPlus,
    /// `+=`
    PlusEq,
    /// `-`
    Minus,
    /// `--`
    MinusMinus,
    /// `-=`
    MinusEq,
    /// `*`
    Star,
    /// `*=`
    StarEq,
    /// `/`
    Slash,
    /// `/=`
    SlashEq,
    /// `%`
    Percent,
    /// `%=`
    PercentEq,
    /// `=`
    Eq,
    /// `==`
    EqEq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `<<`
    Shl,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `>>`
    Shr,
    /// `&&`
    AndAnd,
    /// `&`
    Amp,
    /// `||`
    OrOr,
    /// `|`
    Pipe,
    /// `^`
    Caret,
    /// `~`
    Tilde,
    /// `!`
    Bang,
    /// `#` hors tête de ligne (jamais une directive ici).
    Hash,
    /// Scalaire non classifié (le front-end diagnostiquera).
    Unknown(char),
}

/// Jeton avec span.
pub type Token<'a> = Spanned<TokenKind<'a>>;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Genre d'erreur lexicale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexErrorKind {
    /// Commentaire bloc non terminé.
    UnterminatedBlockComment,
    /// Chaîne non terminée (EOF ou fin de ligne avant `"`).
    UnterminatedString,
    /// Littéral char non terminé ou vide.
    InvalidCharLiteral,
    /// Séquence d'échappement invalide.
    InvalidEscape,
    /// Littéral numérique invalide (ex: chiffre octal hors base).
    InvalidNumber,
    /// Dépassement entier i64.
    IntOverflow,
}

/// Erreur lexicale avec localisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// Localisation.
    pub span: Span,
    /// Genre d'erreur.
    pub kind: LexErrorKind,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use LexErrorKind::*;
        match &self.kind {
            UnterminatedBlockComment => write!(f, "unterminated block comment"),
            UnterminatedString => write!(f, "unterminated string literal"),
            InvalidCharLiteral => write!(f, "invalid char literal"),
            InvalidEscape => write!(f, "invalid escape sequence"),
            InvalidNumber => write!(f, "invalid number literal"),
            IntOverflow => write!(f, "integer literal overflows i64"),
        }
    }
}

impl std::error::Error for LexError {}

/* ─────────────────────────── Lexer ─────────────────────────── */

/// Analyseur lexical (itératif) sur le snippet courant.
pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    /// Position courante en bytes.
    off: usize,
    /// Options.
    opts: LexerOptions,
    /// Table des lignes (exposée pour diagnostics).
    pub lines: LineMap,
}

impl<'a> Lexer<'a> {
    /// Crée un lexer avec options par défaut.
    pub fn new(src: &'a str) -> Self {
        Self::with_options(src, LexerOptions::default())
    }

    /// Crée un lexer avec `LexerOptions`.
    pub fn with_options(src: &'a str, opts: LexerOptions) -> Self {
        Self { src, bytes: src.as_bytes(), off: 0, opts, lines: LineMap::new(src) }
    }

    /// Prochain jeton (émet toujours `Eof` en fin de flux).
    pub fn next(&mut self) -> Result<Option<Token<'a>>, LexError> {
        self.skip_ws_and_comments()?;
        if self.is_eof() {
            let span = self.span_here(0);
            return Ok(Some(Spanned { value: TokenKind::Eof, span }));
        }
        let start = self.off;
        let c = match self.bump_char() {
            Some(c) => c,
            None => {
                let span = self.span_here(0);
                return Ok(Some(Spanned { value: TokenKind::Eof, span }));
            }
        };

        let kind = match c {
            ch if is_ident_start(ch) => {
                self.consume_while(|b| is_ident_continue(b as char));
                let s = &self.src[start..self.off];
                match keyword_of(s) {
                    Some(kw) => TokenKind::Kw(kw),
                    None => TokenKind::Ident(s),
                }
            }
            ch if ch.is_ascii_digit() => self.lex_number(start, c)?,
            '"' => TokenKind::Str(self.lex_string(start)?),
            '\'' => TokenKind::Char(self.lex_char(start)?),

            ':' => if self.eat(':') { TokenKind::PathSep } else { TokenKind::Colon },
            '-' => {
                if self.eat('>') { TokenKind::Arrow }
                else if self.eat('-') { TokenKind::MinusMinus }
                else if self.eat('=') { TokenKind::MinusEq }
                else { TokenKind::Minus }
            }
            '+' => {
                if self.eat('+') { TokenKind::PlusPlus }
                else if self.eat('=') { TokenKind::PlusEq }
                else { TokenKind::Plus }
            }
            '=' => if self.eat('=') { TokenKind::EqEq } else { TokenKind::Eq },
            '&' => if self.eat('&') { TokenKind::AndAnd } else { TokenKind::Amp },
            '|' => if self.eat('|') { TokenKind::OrOr } else { TokenKind::Pipe },
            '!' => if self.eat('=') { TokenKind::Ne } else { TokenKind::Bang },
            '<' => {
                if self.eat('<') { TokenKind::Shl }
                else if self.eat('=') { TokenKind::Le }
                else { TokenKind::Lt }
            }
            '>' => {
                if self.eat('>') { TokenKind::Shr }
                else if self.eat('=') { TokenKind::Ge }
                else { TokenKind::Gt }
            }
            '*' => if self.eat('=') { TokenKind::StarEq } else { TokenKind::Star },
            '/' => if self.eat('=') { TokenKind::SlashEq } else { TokenKind::Slash },
            '%' => if self.eat('=') { TokenKind::PercentEq } else { TokenKind::Percent },
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,
            '?' => TokenKind::Question,
            '#' => TokenKind::Hash,

            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            '.' => TokenKind::Dot,

            other => {
                let ch = if other.is_ascii() {
                    other
                } else {
                    // scalaire UTF-8 multi-octets : décode en entier
                    let ch = self.src[start..].chars().next().unwrap_or('\u{FFFD}');
                    self.off = start + ch.len_utf8();
                    ch
                };
                TokenKind::Unknown(ch)
            }
        };

        Ok(Some(Spanned { value: kind, span: self.span_from(start) }))
    }

    /// Tokenise tout le snippet (ajoute `Eof` final).
    pub fn tokenize(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut out = Vec::new();
        loop {
            match self.next()? {
                Some(t) => {
                    let is_eof = matches!(t.value, TokenKind::Eof);
                    out.push(t);
                    if is_eof { break; }
                }
                None => break,
            }
        }
        Ok(out)
    }

    /* ────────── Primitives internes ────────── */

    #[inline] fn is_eof(&self) -> bool { self.off >= self.bytes.len() }
    #[inline] fn peek(&self) -> Option<u8> { self.bytes.get(self.off).copied() }
    #[inline] fn peek_char(&self) -> Option<char> { self.peek().map(|b| b as char) }
    #[inline] fn peek2(&self) -> Option<u8> { self.bytes.get(self.off + 1).copied() }
    #[inline] fn bump(&mut self) -> Option<u8> { let b = self.peek(); if b.is_some() { self.off += 1; } b }
    #[inline] fn bump_char(&mut self) -> Option<char> { self.bump().map(|b| b as char) }
    #[inline] fn eat(&mut self, ch: char) -> bool { if self.peek_char() == Some(ch) { self.off += 1; true } else { false } }

    fn consume_while(&mut self, mut p: impl FnMut(u8) -> bool) {
        while let Some(b) = self.peek() {
            if p(b) { self.off += 1; } else { break; }
        }
    }

    /// Vrai si seul du blanc précède `off` sur sa ligne. Un `#` n'ouvre
    /// une directive qu'en tête de ligne (logique).
    fn at_line_start(&self) -> bool {
        let mut i = self.off;
        while i > 0 {
            match self.bytes[i - 1] {
                b'\n' => return true,
                b' ' | b'\t' | b'\r' => i -= 1,
                _ => return false,
            }
        }
        true
    }

    /// Saute une directive jusqu'à sa fin de ligne, continuation
    /// `\`-newline comprise. Le `#` d'ouverture est encore sous le curseur.
    fn skip_directive(&mut self) {
        debug_assert_eq!(self.peek(), Some(b'#'));
        while let Some(b) = self.bump() {
            if b == b'\\' && self.opts.directive_continuations {
                if self.peek() == Some(b'\n') {
                    self.off += 1;
                    continue;
                }
                if self.peek() == Some(b'\r') && self.peek2() == Some(b'\n') {
                    self.off += 2;
                    continue;
                }
            }
            if b == b'\n' {
                break;
            }
        }
    }

    fn skip_ws_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while let Some(c) = self.peek_char() {
                if c.is_whitespace() { self.off += 1; } else { break; }
            }
            if self.peek_char() == Some('/') && self.peek2() == Some(b'/') {
                self.off += 2;
                while let Some(c) = self.peek_char() {
                    self.off += 1;
                    if c == '\n' { break; }
                }
                continue;
            }
            if self.peek_char() == Some('/') && self.peek2() == Some(b'*') {
                let start = self.off;
                self.off += 2;
                // les commentaires bloc C ne s'imbriquent pas
                loop {
                    if self.is_eof() {
                        return Err(self.err_from(start, LexErrorKind::UnterminatedBlockComment));
                    }
                    if self.peek_char() == Some('*') && self.peek2() == Some(b'/') {
                        self.off += 2;
                        break;
                    }
                    self.off += 1;
                }
                continue;
            }
            if self.opts.skip_directives && self.peek_char() == Some('#') && self.at_line_start() {
                self.skip_directive();
                continue;
            }
            break;
        }
        Ok(())
    }

    /* ────────── Littéraux ────────── */

    fn lex_string(&mut self, start_quote: usize) -> Result<String, LexError> {
        let mut out = String::new();
        loop {
            let c = self
                .bump_char()
                .ok_or_else(|| self.err_from(start_quote, LexErrorKind::UnterminatedString))?;
            match c {
                '"' => break,
                '\n' => return Err(self.err_from(start_quote, LexErrorKind::UnterminatedString)),
                '\\' => out.push(self.read_escape()?),
                other if other.is_ascii() => out.push(other),
                _ => {
                    // scalaire UTF-8 multi-octets : recopie intégrale
                    let at = self.off - 1;
                    let ch = self.src[at..].chars().next().unwrap_or('\u{FFFD}');
                    self.off = at + ch.len_utf8();
                    out.push(ch);
                }
            }
        }
        Ok(out)
    }

    fn lex_char(&mut self, start_quote: usize) -> Result<char, LexError> {
        let ch = match self
            .bump_char()
            .ok_or_else(|| self.err_from(start_quote, LexErrorKind::InvalidCharLiteral))?
        {
            '\'' => return Err(self.err_from(start_quote, LexErrorKind::InvalidCharLiteral)),
            '\\' => self.read_escape()?,
            c if c.is_ascii() => c,
            _ => {
                let at = self.off - 1;
                let ch = self.src[at..].chars().next().unwrap_or('\u{FFFD}');
                self.off = at + ch.len_utf8();
                ch
            }
        };
        if !self.eat('\'') {
            return Err(self.err_from(start_quote, LexErrorKind::InvalidCharLiteral));
        }
        Ok(ch)
    }

    /// Échappement C : le `\` est déjà consommé.
    fn read_escape(&mut self) -> Result<char, LexError> {
        let e = self.bump_char().ok_or_else(|| self.err_here(LexErrorKind::InvalidEscape))?;
        Ok(match e {
            '\'' => '\'',
            '"' => '"',
            '?' => '?',
            '\\' => '\\',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0C',
            'v' => '\x0B',
            'x' => {
                let h1 = self.bump_char().ok_or_else(|| self.err_here(LexErrorKind::InvalidEscape))?;
                let h2 = self.bump_char().ok_or_else(|| self.err_here(LexErrorKind::InvalidEscape))?;
                let v = (hex_val(h1).ok_or_else(|| self.err_here(LexErrorKind::InvalidEscape))? << 4)
                    | hex_val(h2).ok_or_else(|| self.err_here(LexErrorKind::InvalidEscape))?;
                v as char
            }
            _ => return Err(self.err_here(LexErrorKind::InvalidEscape)),
        })
    }

    fn lex_number(&mut self, start: usize, first: char) -> Result<TokenKind<'a>, LexError> {
        if first == '0' && matches!(self.peek_char(), Some('x' | 'X')) {
            self.off += 1;
            let digits = self.off;
            self.consume_while(|b| (b as char).is_ascii_hexdigit());
            if self.off == digits {
                return Err(self.err_from(start, LexErrorKind::InvalidNumber));
            }
            let v = i64::from_str_radix(&self.src[digits..self.off], 16)
                .map_err(|_| self.err_from(start, LexErrorKind::IntOverflow))?;
            self.eat_int_suffix();
            return Ok(TokenKind::Int(v));
        }
        if first == '0' && matches!(self.peek_char(), Some('b' | 'B')) {
            self.off += 1;
            let digits = self.off;
            self.consume_while(|b| matches!(b, b'0' | b'1'));
            if self.off == digits {
                return Err(self.err_from(start, LexErrorKind::InvalidNumber));
            }
            let v = i64::from_str_radix(&self.src[digits..self.off], 2)
                .map_err(|_| self.err_from(start, LexErrorKind::IntOverflow))?;
            self.eat_int_suffix();
            return Ok(TokenKind::Int(v));
        }

        // Décimal, octal à zéro de tête, ou flottant
        self.consume_while(|b| (b as char).is_ascii_digit());
        let mut is_float = false;
        if self.peek_char() == Some('.')
            && self.peek2().map(|d| (d as char).is_ascii_digit()).unwrap_or(false)
        {
            is_float = true;
            self.off += 1;
            self.consume_while(|b| (b as char).is_ascii_digit());
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            // exposant seulement si des chiffres suivent (`1e` = Int + Ident)
            let save = self.off;
            self.off += 1;
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.off += 1;
            }
            if self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                is_float = true;
                self.consume_while(|b| (b as char).is_ascii_digit());
            } else {
                self.off = save;
            }
        }

        let raw = &self.src[start..self.off];
        if is_float {
            let v = raw
                .parse::<f64>()
                .map_err(|_| self.err_from(start, LexErrorKind::InvalidNumber))?;
            self.eat_float_suffix();
            Ok(TokenKind::Float(v))
        } else if raw.len() > 1 && raw.as_bytes()[0] == b'0' {
            // octal C : `0777` vaut 511 ; `09` est invalide
            let v = i64::from_str_radix(&raw[1..], 8)
                .map_err(|_| self.err_from(start, LexErrorKind::InvalidNumber))?;
            self.eat_int_suffix();
            Ok(TokenKind::Int(v))
        } else {
            let v = raw
                .parse::<i64>()
                .map_err(|_| self.err_from(start, LexErrorKind::IntOverflow))?;
            self.eat_int_suffix();
            Ok(TokenKind::Int(v))
        }
    }

    #[inline]
    fn eat_int_suffix(&mut self) {
        self.consume_while(|b| matches!(b, b'u' | b'U' | b'l' | b'L'));
    }

    #[inline]
    fn eat_float_suffix(&mut self) {
        if matches!(self.peek(), Some(b'f' | b'F' | b'l' | b'L')) {
            self.off += 1;
        }
    }

    /* ────────── Spans / erreurs ────────── */

    #[inline] fn span_here(&self, width: usize) -> Span {
        Span { start: Pos(self.off as u32), end: Pos((self.off + width) as u32) }
    }
    #[inline] fn span_from(&self, start: usize) -> Span {
        Span { start: Pos(start as u32), end: Pos(self.off as u32) }
    }
    #[inline] fn err_here(&self, kind: LexErrorKind) -> LexError { LexError { span: self.span_here(1), kind } }
    #[inline] fn err_from(&self, start: usize, kind: LexErrorKind) -> LexError { LexError { span: self.span_from(start), kind } }
}

/* ─────────────────────────── Point d'enrobage ─────────────────────────── */

/// Décision d'enrobage pour un snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WrapDecision {
    /// Laisser le snippet tel quel.
    NoWrap,
    /// Insérer l'ouverture de la fonction synthétique à cet offset byte
    /// (le reste du texte devient le corps).
    InsertAt(usize),
}

impl WrapDecision {
    /// Offset d'insertion, si enrobage.
    pub fn offset(self) -> Option<usize> {
        match self {
            WrapDecision::NoWrap => None,
            WrapDecision::InsertAt(o) => Some(o),
        }
    }
}

/// Localise le point d'enrobage d'un snippet.
///
/// Fonction totale : toute erreur lexicale pendant le balayage dégrade
/// en `NoWrap` (le texte part verbatim au front-end, qui diagnostique
/// mieux qu'une heuristique). Règles, dans l'ordre :
///
/// 1. les directives préprocesseur de tête sont sautées ;
/// 2. flux épuisé (snippet vide ou directives pures) : `NoWrap` ;
/// 3. premier jeton `using` : insertion juste après le `;` qui clôt la
///    déclaration — fin de flux avant le `;` : `NoWrap` ;
/// 4. sinon : insertion à l'offset du premier jeton.
///
/// L'heuristique ne distingue pas une déclaration top-level d'une
/// instruction au-delà du cas `using` ; c'est assumé.
pub fn wrap_point(src: &str) -> WrapDecision {
    scan_wrap_point(src).unwrap_or(WrapDecision::NoWrap)
}

fn scan_wrap_point(src: &str) -> Result<WrapDecision, LexError> {
    let mut lx = Lexer::new(src);
    let first = match lx.next()? {
        Some(t) => t,
        None => return Ok(WrapDecision::NoWrap),
    };
    match first.value {
        TokenKind::Eof => Ok(WrapDecision::NoWrap),
        TokenKind::Kw(Keyword::Using) => loop {
            match lx.next()? {
                Some(t) if matches!(t.value, TokenKind::Semi) => {
                    return Ok(WrapDecision::InsertAt(t.span.end.0 as usize));
                }
                Some(t) if matches!(t.value, TokenKind::Eof) => {
                    return Ok(WrapDecision::NoWrap);
                }
                Some(_) => {}
                None => return Ok(WrapDecision::NoWrap),
            }
        },
        _ => Ok(WrapDecision::InsertAt(first.span.start.0 as usize)),
    }
}

/* ─────────────────────────── Helpers ─────────────────────────── */

#[inline]
fn is_ident_start(c: char) -> bool { c == '_' || c.is_ascii_alphabetic() }

#[inline]
fn is_ident_continue(c: char) -> bool { c == '_' || c.is_ascii_alphanumeric() }

#[inline]
fn keyword_of(s: &str) -> Option<Keyword> {
    use Keyword::*;
    Some(match s {
        "using" => Using,
        "namespace" => Namespace,
        "int" => Int,
        "void" => Void,
        "char" => Char,
        "const" => Const,
        "static" => Static,
        "extern" => Extern,
        "if" => If,
        "else" => Else,
        "while" => While,
        "for" => For,
        "return" => Return,
        "struct" => Struct,
        "enum" => Enum,
        "sizeof" => Sizeof,
        _ => return None,
    })
}

#[inline]
fn hex_val(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some((c as u8) - b'0'),
        'a'..='f' => Some((c as u8) - b'a' + 10),
        'A'..='F' => Some((c as u8) - b'A' + 10),
        _ => None,
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn toks(src: &str) -> Vec<TokenKind<'_>> {
        let mut lx = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let t = lx.next().unwrap().unwrap();
            let end = matches!(t.value, TokenKind::Eof);
            out.push(t.value);
            if end { break; }
        }
        out
    }

    #[test]
    fn idents_keywords() {
        use TokenKind::*;
        let v = toks("using namespace int void char return while foo _bar x9");
        assert!(matches!(v[0], Kw(Keyword::Using)));
        assert!(matches!(v[1], Kw(Keyword::Namespace)));
        assert!(matches!(v[2], Kw(Keyword::Int)));
        assert!(matches!(v[3], Kw(Keyword::Void)));
        assert!(matches!(v[4], Kw(Keyword::Char)));
        assert!(matches!(v[5], Kw(Keyword::Return)));
        assert!(matches!(v[6], Kw(Keyword::While)));
        assert!(matches!(v[7], Ident("foo")));
        assert!(matches!(v[8], Ident("_bar")));
        assert!(matches!(v[9], Ident("x9")));
    }

    #[test]
    fn numbers_c_style() {
        use TokenKind::*;
        let v = toks("0 42 0xFF 0x7f 0777 0b101 123u 45L 7ull 12.5 1e3 2.5e-2 3.0f");
        assert_eq!(v[0], Int(0));
        assert_eq!(v[1], Int(42));
        assert_eq!(v[2], Int(255));
        assert_eq!(v[3], Int(127));
        assert_eq!(v[4], Int(511));
        assert_eq!(v[5], Int(5));
        assert_eq!(v[6], Int(123));
        assert_eq!(v[7], Int(45));
        assert_eq!(v[8], Int(7));
        if let Float(f) = v[9] { assert!((f - 12.5).abs() < 1e-9) } else { panic!() }
        if let Float(f) = v[10] { assert!((f - 1000.0).abs() < 1e-9) } else { panic!() }
        if let Float(f) = v[11] { assert!((f - 0.025).abs() < 1e-9) } else { panic!() }
        if let Float(f) = v[12] { assert!((f - 3.0).abs() < 1e-9) } else { panic!() }
    }

    #[test]
    fn bad_octal_is_an_error() {
        let mut lx = Lexer::new("09");
        let err = lx.next().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidNumber);
    }

    #[test]
    fn strings_escapes_chars() {
        use TokenKind::*;
        let v = toks(r#""hi" "a\nb" "\x41" "\"q\"" 'a' '\n' '\x41' '\'' "é""#);
        assert_eq!(v[0], Str("hi".into()));
        assert_eq!(v[1], Str("a\nb".into()));
        assert_eq!(v[2], Str("A".into()));
        assert_eq!(v[3], Str("\"q\"".into()));
        assert_eq!(v[4], Char('a'));
        assert_eq!(v[5], Char('\n'));
        assert_eq!(v[6], Char('A'));
        assert_eq!(v[7], Char('\''));
        assert_eq!(v[8], Str("é".into()));
    }

    #[test]
    fn newline_ends_string_with_error() {
        let mut lx = Lexer::new("\"abc\ndef\"");
        let err = lx.next().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
    }

    #[test]
    fn comments_ws() {
        use TokenKind::*;
        let v = toks("/* bloc */ + // ligne\n 1");
        assert!(matches!(v[0], Plus));
        assert_eq!(v[1], Int(1));
    }

    #[test]
    fn directives_skipped() {
        use TokenKind::*;
        let v = toks("#include <stdio.h>\nint");
        assert!(matches!(v[0], Kw(Keyword::Int)));
        assert!(matches!(v[1], Eof));

        // continuation `\`-newline : la directive couvre deux lignes
        let v = toks("#define TWO \\\n  2\nx");
        assert!(matches!(v[0], Ident("x")));

        // blancs avant le `#` : toujours une directive
        let v = toks("   #pragma once\ny");
        assert!(matches!(v[0], Ident("y")));

        // `#` hors tête de ligne : simple jeton
        let v = toks("a # b");
        assert!(matches!(v[0], Ident("a")));
        assert!(matches!(v[1], Hash));
        assert!(matches!(v[2], Ident("b")));

        // option coupée : le `#` de tête redevient un simple jeton
        let opts = LexerOptions { skip_directives: false, directive_continuations: false };
        let mut lx = Lexer::with_options("#x", opts);
        assert!(matches!(lx.next().unwrap().unwrap().value, Hash));
    }

    #[test]
    fn ops_punct() {
        use TokenKind::*;
        let v = toks(":: -> == != <= >= << >> && || ++ -- += -= *= /= %= ! + - * / % ( ) { } [ ] , . ; : < > = & | ^ ~ ?");
        let expect = [
            PathSep, Arrow, EqEq, Ne, Le, Ge, Shl, Shr, AndAnd, OrOr, PlusPlus, MinusMinus,
            PlusEq, MinusEq, StarEq, SlashEq, PercentEq, Bang, Plus, Minus, Star, Slash, Percent,
            LParen, RParen, LBrace, RBrace, LBracket, RBracket, Comma, Dot, Semi, Colon, Lt, Gt,
            Eq, Amp, Pipe, Caret, Tilde, Question,
        ];
        for (i, e) in expect.iter().enumerate() {
            assert_eq!(&v[i], e, "jeton {i}");
        }
    }

    #[test]
    fn unknown_tokens_pass_through() {
        use TokenKind::*;
        let v = toks("@ $");
        assert_eq!(v[0], Unknown('@'));
        assert_eq!(v[1], Unknown('$'));
    }

    #[test]
    fn linemap_basic() {
        let src = "a\nbb\nccc";
        let lm = LineMap::new(src);
        assert_eq!(lm.line_col(Pos(0)), (1, 1));
        assert_eq!(lm.line_col(Pos(2)), (2, 1));
        assert_eq!(lm.line_col(Pos(4)), (3, 1));
        assert_eq!(lm.line_col(Pos(6)), (3, 3));
    }

    /* ────────── wrap_point ────────── */

    #[test]
    fn wrap_empty_and_blank() {
        assert_eq!(wrap_point(""), WrapDecision::NoWrap);
        assert_eq!(wrap_point("   \n\t"), WrapDecision::NoWrap);
        assert_eq!(wrap_point("// rien\n/* que des commentaires */"), WrapDecision::NoWrap);
    }

    #[test]
    fn wrap_pp_only() {
        assert_eq!(wrap_point("#include <cstdio>\n"), WrapDecision::NoWrap);
        assert_eq!(wrap_point("#include <a>\n#define B 1\n"), WrapDecision::NoWrap);
    }

    #[test]
    fn wrap_statement_at_zero() {
        assert_eq!(wrap_point("1+1;"), WrapDecision::InsertAt(0));
    }

    #[test]
    fn wrap_skips_leading_ws() {
        assert_eq!(wrap_point("  1+1;"), WrapDecision::InsertAt(2));
    }

    #[test]
    fn wrap_after_using_decl() {
        let src = "using namespace std;\nstd::cout<<1;";
        // juste après le `;` (offset 19), donc 20
        assert_eq!(wrap_point(src), WrapDecision::InsertAt(20));
    }

    #[test]
    fn wrap_using_without_semi_degrades() {
        assert_eq!(wrap_point("using namespace std"), WrapDecision::NoWrap);
    }

    #[test]
    fn wrap_after_directive() {
        let src = "#include <cstdio>\nprintf(\"hi\");";
        assert_eq!(wrap_point(src), WrapDecision::InsertAt(18));
    }

    #[test]
    fn wrap_lex_error_degrades() {
        assert_eq!(wrap_point("\"unterminated"), WrapDecision::NoWrap);
        assert_eq!(wrap_point("/* jamais fermé"), WrapDecision::NoWrap);
    }

    proptest! {
        #[test]
        fn wrap_point_is_total(src in "\\PC*") {
            // jamais de panique, toujours une décision
            let _ = wrap_point(&src);
        }

        #[test]
        fn directives_only_never_wrap(body in "[a-z<>. ]{0,40}") {
            let src = format!("#include {body}\n#define X 1\n");
            prop_assert_eq!(wrap_point(&src), WrapDecision::NoWrap);
        }

        #[test]
        fn plain_statements_wrap_at_first_token(pad in "[ \t\n]{0,8}") {
            let src = format!("{pad}f();");
            prop_assert_eq!(wrap_point(&src), WrapDecision::InsertAt(pad.len()));
        }
    }
}
