//! ccint-frontend — couture front-end de ccint
//!
//! - Le trait `Frontend` : tout compilateur collaborateur tient derrière
//!   cette couture (diagnostics remontés verbatim, appels indépendants)
//! - `Invocation` : description d'une invocation (nom d'entrée, dialecte,
//!   chemins d'include)
//! - `Severity`/`Diagnostic`/`CompileError` : diagnostics avec spans
//! - Synthèse du texte enrobé (`wrap_source`) autour du point choisi par
//!   le locator, entrées synthétiques numérotées `ccint_mainN`
//! - `SnippetCompiler` : enrobage → front-end → scan de l'entrée, un
//!   module par snippet, identité unique par session

#![deny(missing_docs)]

use std::fmt;
use std::path::PathBuf;

use ccint_core::{CompiledModule, DeclKind, Span};
use ccint_lexer::{wrap_point, WrapDecision};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ───────────────────────────── Entrée synthétique ─────────────────────────────

/// Préfixe réservé des fonctions d'entrée synthétiques.
///
/// Le scan d'entrée reconnaît toute fonction dont l'identifiant commence
/// par ce préfixe (exact ou suffixé) ; l'enrobage génère `ccint_mainN`
/// avec `N` le numéro du snippet dans la session, pour que des modules
/// ajoutés successivement ne collisionnent jamais sur ce symbole.
pub const ENTRY_PREFIX: &str = "ccint_main";

// ───────────────────────────── Invocation ─────────────────────────────

/// Dialecte demandé au front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Lang {
    /// C.
    C,
    /// C++ (défaut).
    #[default]
    Cxx,
}

/// Description d'une invocation du front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Invocation {
    /// Nom (pseudo-)fichier de l'entrée, pour les diagnostics.
    pub input_name: String,
    /// Dialecte.
    pub lang: Lang,
    /// Chemins de recherche d'includes, dans l'ordre.
    pub include_dirs: Vec<PathBuf>,
}

impl Default for Invocation {
    fn default() -> Self {
        Self { input_name: "<input>".into(), lang: Lang::default(), include_dirs: Vec::new() }
    }
}

// ───────────────────────────── Diagnostics ─────────────────────────────

/// Gravité d'un diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Severity {
    /// Info.
    Info,
    /// Alerte.
    Warning,
    /// Erreur bloquante.
    Error,
}

/// Un diagnostic (gravité, message, span optionnel).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diagnostic {
    /// Gravité.
    pub severity: Severity,
    /// Message humain.
    pub message: String,
    /// Localisation dans le texte effectivement compilé.
    pub span: Option<Span>,
}

impl Diagnostic {
    /// Construit une erreur.
    pub fn error(msg: impl Into<String>, span: Option<Span>) -> Self {
        Self { severity: Severity::Error, message: msg.into(), span }
    }
    /// Construit un warning.
    pub fn warn(msg: impl Into<String>, span: Option<Span>) -> Self {
        Self { severity: Severity::Warning, message: msg.into(), span }
    }
}

/// Erreur globale de compilation : les diagnostics du front-end, verbatim.
#[derive(Debug, Clone)]
pub struct CompileError {
    /// Diagnostics accumulés.
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    /// Erreur à diagnostic unique.
    pub fn message(msg: impl Into<String>) -> Self {
        Self { diagnostics: vec![Diagnostic::error(msg, None)] }
    }

    /// Première erreur (ou premier diagnostic, à défaut).
    pub fn first(&self) -> Option<&Diagnostic> {
        self.diagnostics
            .iter()
            .find(|d| d.severity == Severity::Error)
            .or_else(|| self.diagnostics.first())
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first() {
            None => write!(f, "compilation failed"),
            Some(d) => {
                let rest = self.diagnostics.len().saturating_sub(1);
                if rest == 0 {
                    write!(f, "{}", d.message)
                } else {
                    write!(f, "{} ({rest} more diagnostic(s))", d.message)
                }
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Alias résultat du front-end.
pub type CompileResult<T> = core::result::Result<T, CompileError>;

// ───────────────────────────── Trait Frontend ─────────────────────────────

/// Le compilateur collaborateur, derrière une couture étroite.
///
/// Contrat : compile `source` (déjà enrobé ou non) en **un** module ;
/// les diagnostics remontent verbatim dans `CompileError` ; aucun état
/// compilé n'est réutilisé entre deux appels.
pub trait Frontend {
    /// Compile un texte en module unique.
    fn compile(&mut self, invocation: &Invocation, source: &str) -> CompileResult<CompiledModule>;
}

// ───────────────────────────── Enrobage ─────────────────────────────

/// Texte (peut-être) enrobé, plus l'identifiant d'entrée généré.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedSource {
    /// Texte final envoyé au front-end.
    pub text: String,
    /// Identifiant de l'entrée synthétique, si un enrobage a eu lieu.
    pub entry_ident: Option<String>,
}

/// Synthétise le texte enrobé d'un snippet.
///
/// `InsertAt(o)` insère `void ccint_mainN() {\n` à l'offset `o` et ferme
/// le corps par `\n}` en fin de texte ; `NoWrap` rend le texte verbatim.
/// Un offset hors limites (ou hors frontière UTF-8) dégrade en verbatim.
pub fn wrap_source(src: &str, decision: WrapDecision, seq: u64) -> WrappedSource {
    let at = match decision {
        WrapDecision::NoWrap => {
            return WrappedSource { text: src.to_owned(), entry_ident: None };
        }
        WrapDecision::InsertAt(at) => at,
    };
    let (head, tail) = match (src.get(..at), src.get(at..)) {
        (Some(h), Some(t)) => (h, t),
        _ => return WrappedSource { text: src.to_owned(), entry_ident: None },
    };
    let ident = format!("{ENTRY_PREFIX}{seq}");
    let mut text = String::with_capacity(src.len() + ident.len() + 16);
    text.push_str(head);
    text.push_str("void ");
    text.push_str(&ident);
    text.push_str("() {\n");
    text.push_str(tail);
    text.push_str("\n}");
    WrappedSource { text, entry_ident: Some(ident) }
}

// ───────────────────────────── Scan de l'entrée ─────────────────────────────

/// Cherche l'entrée synthétique d'un module : la première **fonction**
/// dont l'identifiant commence par [`ENTRY_PREFIX`] (exact ou suffixé).
/// Rend son nom de liaison ; `None` : rien à exécuter dans ce module.
pub fn find_entry_symbol(module: &CompiledModule) -> Option<String> {
    module.decls().iter().find_map(|d| {
        (d.kind == DeclKind::Function && d.ident.starts_with(ENTRY_PREFIX))
            .then(|| d.link_name.clone())
    })
}

// ───────────────────────────── SnippetCompiler ─────────────────────────────

/// Résultat d'un `parse` : le module et, si trouvée, l'entrée à invoquer.
#[derive(Debug)]
pub struct ParsedSnippet {
    /// Module compilé, prêt à être transféré au moteur.
    pub module: CompiledModule,
    /// Nom de liaison de l'entrée synthétique (absent : rien à exécuter).
    pub entry: Option<String>,
}

/// Adaptateur « un snippet → un module compilé ».
///
/// Enchaîne : locator + enrobage (si demandé), délégation au front-end,
/// scan de l'entrée. L'identité du module est estampillée
/// `{input_name}#{N}` : une session n'ajoute jamais deux modules sous la
/// même clé. Le numéro n'avance que sur succès.
pub struct SnippetCompiler {
    front: Box<dyn Frontend>,
    seq: u64,
}

impl SnippetCompiler {
    /// Construit l'adaptateur autour d'un front-end.
    pub fn new(front: Box<dyn Frontend>) -> Self {
        Self { front, seq: 0 }
    }

    /// Numéro du prochain snippet (noms d'entrée et identités de module).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Enrobe (si `do_wrap`), compile, scanne l'entrée.
    pub fn parse(
        &mut self,
        invocation: &Invocation,
        source: &str,
        do_wrap: bool,
    ) -> CompileResult<ParsedSnippet> {
        let wrapped;
        let text: &str = if do_wrap {
            wrapped = wrap_source(source, wrap_point(source), self.seq);
            &wrapped.text
        } else {
            source
        };
        let mut module = self.front.compile(invocation, text)?;
        module.set_name(format!("{}#{}", invocation.input_name, self.seq));
        let entry = find_entry_symbol(&module);
        self.seq += 1;
        Ok(ParsedSnippet { module, entry })
    }
}

impl fmt::Debug for SnippetCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnippetCompiler").field("seq", &self.seq).finish_non_exhaustive()
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ccint_core::{CodeObject, Decl};
    use pretty_assertions::assert_eq;

    #[test]
    fn wrap_statement_shape() {
        let w = wrap_source("1+1;", WrapDecision::InsertAt(0), 0);
        assert_eq!(w.text, "void ccint_main0() {\n1+1;\n}");
        assert_eq!(w.entry_ident.as_deref(), Some("ccint_main0"));
    }

    #[test]
    fn wrap_keeps_using_outside() {
        let src = "using namespace std;\nf();";
        let w = wrap_source(src, WrapDecision::InsertAt(20), 3);
        assert_eq!(w.text, "using namespace std;void ccint_main3() {\n\nf();\n}");
        assert_eq!(w.entry_ident.as_deref(), Some("ccint_main3"));
    }

    #[test]
    fn wrap_nowrap_is_verbatim() {
        let w = wrap_source("int x = 5;", WrapDecision::NoWrap, 7);
        assert_eq!(w.text, "int x = 5;");
        assert_eq!(w.entry_ident, None);
    }

    #[test]
    fn wrap_bad_offset_degrades_to_verbatim() {
        let w = wrap_source("ab", WrapDecision::InsertAt(99), 0);
        assert_eq!(w.text, "ab");
        assert_eq!(w.entry_ident, None);
    }

    #[test]
    fn entry_scan_matches_prefix() {
        let mut m = CompiledModule::new("m");
        m.push_decl(Decl::global("ccint_main"));
        m.push_decl(Decl::function("helper", CodeObject::new(|| Ok(0))));
        m.push_decl(Decl::function("ccint_main4", CodeObject::new(|| Ok(0))));
        // la globale homonyme ne compte pas, seule une fonction est une entrée
        assert_eq!(find_entry_symbol(&m).as_deref(), Some("ccint_main4"));
    }

    #[test]
    fn entry_scan_exact_match() {
        let mut m = CompiledModule::new("m");
        m.push_decl(Decl::function("ccint_main", CodeObject::new(|| Ok(0))));
        assert_eq!(find_entry_symbol(&m).as_deref(), Some("ccint_main"));
    }

    #[test]
    fn entry_scan_none() {
        let mut m = CompiledModule::new("m");
        m.push_decl(Decl::function("main", CodeObject::new(|| Ok(0))));
        assert_eq!(find_entry_symbol(&m), None);
    }

    /// Front-end factice : un module par appel, entrée si le texte
    /// contient le préfixe réservé.
    struct FakeFront {
        fail: bool,
    }

    impl Frontend for FakeFront {
        fn compile(&mut self, inv: &Invocation, source: &str) -> CompileResult<CompiledModule> {
            if self.fail {
                return Err(CompileError::message("boom"));
            }
            let mut m = CompiledModule::new(inv.input_name.clone());
            if let Some(at) = source.find(ENTRY_PREFIX) {
                let end = source[at..]
                    .find('(')
                    .map(|i| at + i)
                    .unwrap_or(source.len());
                m.push_decl(Decl::function(source[at..end].to_string(), CodeObject::new(|| Ok(0))));
            }
            Ok(m)
        }
    }

    #[test]
    fn snippet_compiler_wraps_and_numbers() {
        let mut sc = SnippetCompiler::new(Box::new(FakeFront { fail: false }));
        let inv = Invocation::default();

        let s0 = sc.parse(&inv, "1+1;", true).unwrap();
        assert_eq!(s0.module.name(), "<input>#0");
        assert_eq!(s0.entry.as_deref(), Some("ccint_main0"));

        let s1 = sc.parse(&inv, "2+2;", true).unwrap();
        assert_eq!(s1.module.name(), "<input>#1");
        assert_eq!(s1.entry.as_deref(), Some("ccint_main1"));
    }

    #[test]
    fn snippet_compiler_no_wrap_no_entry() {
        let mut sc = SnippetCompiler::new(Box::new(FakeFront { fail: false }));
        let inv = Invocation::default();
        let s = sc.parse(&inv, "int x = 5;", false).unwrap();
        assert_eq!(s.entry, None);
        assert_eq!(s.module.name(), "<input>#0");
    }

    #[test]
    fn failed_parse_does_not_advance_seq() {
        let mut sc = SnippetCompiler::new(Box::new(FakeFront { fail: true }));
        let inv = Invocation::default();
        assert!(sc.parse(&inv, "1;", true).is_err());
        assert_eq!(sc.seq(), 0);
    }

    #[test]
    fn compile_error_display() {
        let e = CompileError::message("unexpected token");
        assert_eq!(e.to_string(), "unexpected token");

        let e = CompileError {
            diagnostics: vec![
                Diagnostic::warn("shadowed", None),
                Diagnostic::error("bad call", None),
            ],
        };
        assert_eq!(e.to_string(), "bad call (1 more diagnostic(s))");
    }
}
