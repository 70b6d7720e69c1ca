//! ccint-core — primitives partagées du noyau ccint
//!
//! Fournit :
//! - `Pos`, `Span`, `Spanned<T>` : localisation (offsets byte) dans le snippet courant
//! - `Value` : valeur dynamique du contexte partagé (Int/Str)
//! - `SharedContext` : contexte de compilation partagé entre snippets,
//!   compté par référence, sortie capturable en tests
//! - `CompiledModule` / `Decl` / `CodeObject` : le module produit par le
//!   front-end et consommé par le moteur d'exécution
//! - Erreurs `RunError` + alias `RunResult<T>`
//!
//! Features :
//! - `serde` : derive (dé)sérialisation sur les types de données
//!
//! Exemple éclair :
//! ```
//! use ccint_core::prelude::*;
//! let ctx = SharedContext::new();
//! ctx.declare_global("x");
//! ctx.set_global("x", Value::Int(5));
//! assert_eq!(ctx.get_global("x"), Some(Value::Int(5)));
//! ```

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat pour l'exécution d'objets code.
pub type RunResult<T> = core::result::Result<T, RunError>;

/* ─────────────────────────── Spans / Positions ─────────────────────────── */

/// Position (offset byte) depuis le début du snippet courant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pos(pub u32);

impl Pos {
    /// Position nulle.
    pub const ZERO: Self = Pos(0);
    /// Addition saturée.
    pub fn saturating_add(self, v: u32) -> Self { Pos(self.0.saturating_add(v)) }
}

/// Plage (demi-ouverte) `[start, end)` dans le snippet courant.
///
/// Une session compile exactement un tampon à la fois : pas
/// d'identifiant de source, un span est une simple plage d'octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Début inclus.
    pub start: Pos,
    /// Fin exclue.
    pub end: Pos,
}

impl Span {
    /// Crée un span.
    pub const fn new(start: Pos, end: Pos) -> Self { Self { start, end } }
    /// Span vide à une position donnée.
    pub const fn point(at: Pos) -> Self { Self { start: at, end: at } }
    /// Longueur en bytes.
    pub fn len(&self) -> u32 { self.end.0.saturating_sub(self.start.0) }
    /// Vrai si le span est vide.
    pub fn is_empty(&self) -> bool { self.start.0 >= self.end.0 }
}

/// Wrapper utilitaire « valeur + span ».
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spanned<T> {
    /// La valeur.
    pub value: T,
    /// La localisation.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Construit un `Spanned<T>`.
    pub fn new(value: T, span: Span) -> Self { Self { value, span } }
    /// Applique une fonction à la valeur et conserve le span.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> { Spanned { value: f(self.value), span: self.span } }
}

/* ─────────────────────────── Valeurs ─────────────────────────── */

/// Valeur dynamique du contexte partagé.
///
/// Volontairement minimal : le sous-ensemble C de référence manipule
/// des entiers et des littéraux chaîne. Étends plus tard si besoin.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    /// Entier 64 bits signé (le `int` des snippets, élargi).
    Int(i64),
    /// Chaîne UTF-8 possédée.
    Str(String),
}

impl Value {
    /// Nom court du type, pour les messages d'erreur.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Str(s) => {
                // Coupe sur une frontière de scalaire, jamais au milieu.
                if s.chars().count() > 64 {
                    let head: String = s.chars().take(64).collect();
                    write!(f, "Str({head}…)")
                } else {
                    write!(f, "Str({s})")
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/* Conversions conviviales */
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::Str(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::Str(v.to_owned()) } }

impl TryFrom<Value> for i64 {
    type Error = RunError;
    fn try_from(v: Value) -> RunResult<Self> {
        match v {
            Value::Int(i) => Ok(i),
            other => Err(RunError::Type { expected: "int", got: other.type_name() }),
        }
    }
}
impl TryFrom<Value> for String {
    type Error = RunError;
    fn try_from(v: Value) -> RunResult<Self> {
        match v {
            Value::Str(s) => Ok(s),
            other => Err(RunError::Type { expected: "string", got: other.type_name() }),
        }
    }
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreur d'exécution d'un objet code.
#[derive(Debug)]
pub enum RunError {
    /// Division ou modulo par zéro.
    DivideByZero,
    /// Variable globale absente du contexte partagé.
    UndefinedGlobal(
        /// Nom de la variable.
        String,
    ),
    /// Mauvais type pour une opération.
    Type {
        /// Type attendu.
        expected: &'static str,
        /// Type reçu.
        got: &'static str,
    },
    /// Directive de format invalide ou arguments incohérents.
    Format(String),
    /// I/O sur la sortie du contexte.
    Io(io::Error),
    /// Message libre.
    Msg(String),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::DivideByZero => write!(f, "division by zero"),
            RunError::UndefinedGlobal(name) => write!(f, "undefined global: {name}"),
            RunError::Type { expected, got } => write!(f, "type mismatch: expected {expected}, got {got}"),
            RunError::Format(msg) => write!(f, "format: {msg}"),
            RunError::Io(e) => write!(f, "io: {e}"),
            RunError::Msg(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RunError {
    fn from(e: io::Error) -> Self { RunError::Io(e) }
}

/* ─────────────────────────── Contexte partagé ─────────────────────────── */

/// Contexte de compilation partagé entre les snippets d'une session.
///
/// Compté par référence : `Clone` rend une nouvelle poignée sur le même
/// état. Verrouillage interne, donc sûr à référencer depuis plusieurs
/// threads même si le noyau n'y accède jamais en concurrence.
#[derive(Clone)]
pub struct SharedContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    globals: RwLock<HashMap<String, Value>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl Default for SharedContext {
    fn default() -> Self { Self::new() }
}

impl SharedContext {
    /// Crée un contexte vide écrivant sur le stdout réel.
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }

    /// Permet d'injecter un writer custom (ex: buffer, fichier…).
    pub fn with_output<W: Write + Send + 'static>(w: W) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                globals: RwLock::new(HashMap::new()),
                output: Mutex::new(Box::new(w)),
            }),
        }
    }

    /// Variante utile pour tests : sortie capturée dans une `String`.
    pub fn with_captured_output() -> (Self, Captured) {
        let cap = Captured::default();
        (Self::with_output(cap.clone()), cap)
    }

    /// Déclare une globale (zéro-initialisée). Renvoie `true` si elle
    /// n'existait pas encore ; déclarer deux fois est un no-op.
    pub fn declare_global(&self, name: &str) -> bool {
        let mut g = self.inner.globals.write();
        if g.contains_key(name) {
            false
        } else {
            g.insert(name.to_owned(), Value::Int(0));
            true
        }
    }

    /// Vrai si la globale est connue du contexte.
    pub fn has_global(&self, name: &str) -> bool {
        self.inner.globals.read().contains_key(name)
    }

    /// Écrit (insère ou remplace) une globale.
    pub fn set_global(&self, name: &str, value: Value) {
        self.inner.globals.write().insert(name.to_owned(), value);
    }

    /// Lit une globale (copie).
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.inner.globals.read().get(name).cloned()
    }

    /// Nombre de globales connues.
    pub fn globals_len(&self) -> usize {
        self.inner.globals.read().len()
    }

    /// Écrit un texte brut sur la sortie du contexte.
    pub fn write_str(&self, s: &str) -> io::Result<()> {
        self.inner.output.lock().write_all(s.as_bytes())
    }

    /// Écrit une ligne terminée par `\n`.
    pub fn writeln_str(&self, s: &str) -> io::Result<()> {
        let mut out = self.inner.output.lock();
        out.write_all(s.as_bytes())?;
        out.write_all(b"\n")
    }

    /// Nombre de poignées vivantes sur ce contexte.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContext")
            .field("globals", &self.globals_len())
            .field("handles", &self.handle_count())
            .finish()
    }
}

/* ─────────────────────────── Objets code ─────────────────────────── */

/// Corps exécutable hôte produit par le front-end.
///
/// L'appel ne prend aucun argument et rend l'entier de retour C élargi.
pub struct CodeObject(Box<dyn FnMut() -> RunResult<i64> + Send>);

impl CodeObject {
    /// Emballe une closure en objet code.
    pub fn new(f: impl FnMut() -> RunResult<i64> + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Invoque le corps.
    pub fn invoke(&mut self) -> RunResult<i64> {
        (self.0)()
    }
}

impl fmt::Debug for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodeObject(..)")
    }
}

/* ─────────────────────────── Modules compilés ─────────────────────────── */

/// Nature d'une déclaration top-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeclKind {
    /// Définition de fonction.
    Function,
    /// Variable globale.
    Global,
}

/// Déclaration top-level exposée par un module compilé.
#[derive(Debug)]
pub struct Decl {
    /// Identifiant source.
    pub ident: String,
    /// Nom de liaison (symbole).
    pub link_name: String,
    /// Nature de la déclaration.
    pub kind: DeclKind,
    /// Corps exécutable, si la déclaration en définit un.
    pub code: Option<CodeObject>,
}

impl Decl {
    /// Déclaration de fonction avec corps.
    pub fn function(ident: impl Into<String>, code: CodeObject) -> Self {
        let ident = ident.into();
        Self { link_name: ident.clone(), ident, kind: DeclKind::Function, code: Some(code) }
    }

    /// Déclaration de globale (le corps éventuel vit dans les
    /// initialiseurs du module, pas ici).
    pub fn global(ident: impl Into<String>) -> Self {
        let ident = ident.into();
        Self { link_name: ident.clone(), ident, kind: DeclKind::Global, code: None }
    }

    /// Remplace le nom de liaison (si le front-end décore les symboles).
    pub fn with_link_name(mut self, link_name: impl Into<String>) -> Self {
        self.link_name = link_name.into();
        self
    }
}

/// Module compilé, produit par le front-end, consommé par le moteur.
///
/// Opaque hors de ses deux capacités : une identité (clé de map côté
/// moteur) et l'énumération de ses déclarations top-level.
#[derive(Debug)]
pub struct CompiledModule {
    name: String,
    decls: Vec<Decl>,
    init: Vec<CodeObject>,
}

impl CompiledModule {
    /// Crée un module vide.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), decls: Vec::new(), init: Vec::new() }
    }

    /// Identité du module.
    pub fn name(&self) -> &str { &self.name }

    /// Remplace l'identité. Le producteur du module la rend unique par
    /// session avant transfert au moteur (clé de map côté trackers).
    pub fn set_name(&mut self, name: impl Into<String>) { self.name = name.into(); }

    /// Déclarations top-level, dans l'ordre source.
    pub fn decls(&self) -> &[Decl] { &self.decls }

    /// Ajoute une déclaration.
    pub fn push_decl(&mut self, d: Decl) { self.decls.push(d); }

    /// Ajoute un initialiseur global (exécuté par le moteur, dans
    /// l'ordre d'ajout, une seule fois par module).
    pub fn push_init(&mut self, c: CodeObject) { self.init.push(c); }

    /// Nombre d'initialiseurs en attente.
    pub fn init_len(&self) -> usize { self.init.len() }

    /// Démembre le module (consommation par le moteur).
    pub fn into_parts(self) -> (String, Vec<Decl>, Vec<CodeObject>) {
        (self.name, self.decls, self.init)
    }
}

/* ─────────────────────────── Capture de sortie ─────────────────────────── */

/// Writer qui capture la sortie dans une `String` (tests, REPL).
#[derive(Default, Clone)]
pub struct Captured(Arc<Mutex<String>>);

impl Captured {
    /// Récupère le contenu (copie).
    pub fn get(&self) -> String { self.0.lock().clone() }
    /// Réinitialise le tampon.
    pub fn clear(&self) { self.0.lock().clear(); }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        self.0.lock().push_str(&s);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

/* ─────────────────────────── Prélude ─────────────────────────── */

/// Prélude pratique pour importer les types clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{
        Captured, CodeObject, CompiledModule, Decl, DeclKind, Pos, RunError, RunResult,
        SharedContext, Span, Spanned, Value,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn spans_basics() {
        let sp = Span::new(Pos(3), Pos(7));
        assert_eq!(sp.len(), 4);
        assert!(!sp.is_empty());
        assert!(Span::point(Pos(9)).is_empty());
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::from(3i32), Value::Int(3));
        assert_eq!(Value::from("hi"), Value::Str("hi".into()));
        let n: i64 = Value::Int(8).try_into().unwrap();
        assert_eq!(n, 8);
        let err = <Value as TryInto<i64>>::try_into(Value::Str("x".into())).unwrap_err();
        assert!(matches!(err, RunError::Type { expected: "int", .. }));
    }

    #[test]
    fn context_globals() {
        let ctx = SharedContext::new();
        assert!(ctx.declare_global("x"));
        assert!(!ctx.declare_global("x"));
        assert_eq!(ctx.get_global("x"), Some(Value::Int(0)));
        ctx.set_global("x", Value::Int(5));
        assert_eq!(ctx.get_global("x"), Some(Value::Int(5)));
        assert!(ctx.get_global("y").is_none());
    }

    #[test]
    fn context_handles_share_state() {
        let ctx = SharedContext::new();
        let other = ctx.clone();
        other.set_global("shared", Value::Int(1));
        assert_eq!(ctx.get_global("shared"), Some(Value::Int(1)));
        assert!(ctx.handle_count() >= 2);
    }

    #[test]
    fn captured_output() {
        let (ctx, cap) = SharedContext::with_captured_output();
        ctx.write_str("hello").unwrap();
        ctx.writeln_str(" world").unwrap();
        assert_eq!(cap.get(), "hello world\n");
        cap.clear();
        assert_eq!(cap.get(), "");
    }

    #[test]
    fn code_objects_run() {
        let mut hits = 0;
        let mut obj = CodeObject::new(move || {
            hits += 1;
            Ok(hits)
        });
        assert_eq!(obj.invoke().unwrap(), 1);
        assert_eq!(obj.invoke().unwrap(), 2);
    }

    #[test]
    fn module_parts() {
        let mut m = CompiledModule::new("snippet0");
        m.push_decl(Decl::function("ccint_main0", CodeObject::new(|| Ok(0))));
        m.push_decl(Decl::global("x"));
        m.push_init(CodeObject::new(|| Ok(0)));
        assert_eq!(m.name(), "snippet0");
        assert_eq!(m.decls().len(), 2);
        assert_eq!(m.init_len(), 1);

        let (name, decls, init) = m.into_parts();
        assert_eq!(name, "snippet0");
        assert_eq!(decls[1].ident, "x");
        assert_eq!(init.len(), 1);
    }
}
