//! ccint-session — orchestrateur de session ccint
//!
//! Colle « compiler » à « exécuter » au-dessus des crates de plus bas
//! niveau :
//!
//! - `SessionConfig` : enrobage, nom d'entrée, dialecte, chemins
//!   d'includes, files de bibliothèques ; possédé par la session, aucun
//!   état global
//! - `Interpreter` : `parse` (locator + front-end, snippet mis en
//!   attente) puis `execute` (moteur construit paresseusement à la
//!   première demande, files appliquées exactement une fois, puis
//!   ajout du module, initialiseurs, résolution et appel de l'entrée)
//! - transition d'état à sens unique `Uninitialized` → `Ready` ; les
//!   bibliothèques mises en file après coup sont refusées
//!
//! Un échec de compilation ou de liaison est terminal pour le snippet
//! concerné et ne corrompt pas la session : le module fautif n'est
//! simplement jamais ajouté.

#![deny(missing_docs)]

use std::path::{Path, PathBuf};

use ccint_engine::{EngineError, ExecutionEngine, LibraryKind, TargetDesc};
use ccint_frontend::{CompileError, Frontend, Invocation, Lang, ParsedSnippet, SnippetCompiler};
use thiserror::Error;

pub use ccint_engine::SymbolAddress;

// ───────────────────────────── Erreurs ─────────────────────────────

/// Alias résultat de la session.
pub type SessionResult<T> = core::result::Result<T, SessionError>;

/// Erreur de session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Diagnostics du front-end, verbatim.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// Erreur remontée par le moteur d'exécution.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Consultation d'adresse avant la première exécution.
    #[error("no execution engine: nothing has been executed in this session")]
    NoExecutionEngine,
    /// Le snippet compilé ne définit aucune entrée synthétique.
    #[error("nothing to run: the snippet defines no synthetic entry")]
    NoEntry,
    /// `execute` sans `parse` réussi au préalable.
    #[error("nothing parsed: parse a snippet before executing")]
    NothingParsed,
    /// File de bibliothèques touchée après la transition `Ready`.
    #[error("cannot queue `{}` once the execution engine is active", .0.display())]
    EngineActive(PathBuf),
}

// ───────────────────────────── Configuration ─────────────────────────────

/// Configuration d'une session, possédée par l'orchestrateur.
///
/// Les files de bibliothèques sont consommées une seule fois, à la
/// construction du moteur ; le reste peut évoluer entre deux snippets.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Nom (pseudo-)fichier rapporté dans les diagnostics.
    pub input_name: String,
    /// Dialecte demandé au front-end.
    pub lang: Lang,
    /// Enrobe les snippets dans une entrée synthétique.
    pub wrap_input: bool,
    /// Chemins de recherche d'includes, dans l'ordre, sans doublon.
    pub include_dirs: Vec<PathBuf>,
    /// Archives statiques à enregistrer à la construction du moteur.
    pub static_libs: Vec<PathBuf>,
    /// Bibliothèques dynamiques à mapper à la construction du moteur.
    pub dynamic_libs: Vec<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_name: "<input>".into(),
            lang: Lang::default(),
            wrap_input: false,
            include_dirs: Vec::new(),
            static_libs: Vec::new(),
            dynamic_libs: Vec::new(),
        }
    }
}

// ───────────────────────────── État ─────────────────────────────

/// État de la session ; la transition est à sens unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Aucun moteur : les bibliothèques se mettent encore en file.
    Uninitialized,
    /// Moteur construit, files appliquées.
    Ready,
}

// ───────────────────────────── Interpreter ─────────────────────────────

/// La session : un front-end, un moteur paresseux, un snippet en
/// attente entre `parse` et `execute`.
#[derive(Debug)]
pub struct Interpreter {
    config: SessionConfig,
    compiler: SnippetCompiler,
    engine: Option<ExecutionEngine>,
    pending: Option<ParsedSnippet>,
    last_entry: Option<String>,
}

impl Interpreter {
    /// Construit une session avec la configuration par défaut.
    pub fn new(front: Box<dyn Frontend>) -> Self {
        Self::with_config(front, SessionConfig::default())
    }

    /// Construit une session avec une configuration explicite.
    pub fn with_config(front: Box<dyn Frontend>, config: SessionConfig) -> Self {
        Self {
            config,
            compiler: SnippetCompiler::new(front),
            engine: None,
            pending: None,
            last_entry: None,
        }
    }

    /// État courant.
    pub fn state(&self) -> SessionState {
        if self.engine.is_some() { SessionState::Ready } else { SessionState::Uninitialized }
    }

    /// Configuration courante (lecture).
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Moteur d'exécution, une fois la session `Ready`.
    pub fn engine(&self) -> Option<&ExecutionEngine> {
        self.engine.as_ref()
    }

    /// Chemins d'includes effectifs, dans l'ordre d'ajout.
    pub fn include_paths(&self) -> &[PathBuf] {
        &self.config.include_dirs
    }

    /* ── réglages ── */

    /// Active ou coupe l'enrobage des snippets.
    pub fn set_wrap_input(&mut self, wrap: bool) {
        self.config.wrap_input = wrap;
    }

    /// Nom (pseudo-)fichier rapporté par les diagnostics.
    pub fn set_input_name(&mut self, name: impl Into<String>) {
        self.config.input_name = name.into();
    }

    /// Change le dialecte demandé au front-end.
    pub fn set_lang(&mut self, lang: Lang) {
        self.config.lang = lang;
    }

    /// Ajoute un chemin d'includes ; un doublon est un no-op.
    pub fn add_include_path(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.config.include_dirs.contains(&dir) {
            self.config.include_dirs.push(dir);
        }
    }

    /// Met une archive statique en file. Refusé une fois le moteur
    /// construit.
    pub fn add_static_lib(&mut self, path: impl Into<PathBuf>) -> SessionResult<()> {
        let path = path.into();
        if self.engine.is_some() {
            return Err(SessionError::EngineActive(path));
        }
        log::debug!("static library `{}` queued", path.display());
        self.config.static_libs.push(path);
        Ok(())
    }

    /// Met une bibliothèque dynamique en file. Refusé une fois le
    /// moteur construit.
    pub fn add_dynamic_lib(&mut self, path: impl Into<PathBuf>) -> SessionResult<()> {
        let path = path.into();
        if self.engine.is_some() {
            return Err(SessionError::EngineActive(path));
        }
        log::debug!("dynamic library `{}` queued", path.display());
        self.config.dynamic_libs.push(path);
        Ok(())
    }

    /// Classe une bibliothèque par sa signature binaire et la met dans
    /// la bonne file. L'extension du fichier ne compte pas.
    pub fn add_library(&mut self, path: impl AsRef<Path>) -> SessionResult<()> {
        let path = path.as_ref();
        match LibraryKind::detect(path) {
            LibraryKind::Static => self.add_static_lib(path),
            LibraryKind::Dynamic => self.add_dynamic_lib(path),
        }
    }

    /* ── parse / execute ── */

    /// Compile un snippet (enrobé si demandé) et le met en attente
    /// d'exécution. Un échec laisse l'éventuel snippet déjà en attente
    /// inchangé ; aucune interaction avec le moteur n'a lieu.
    pub fn parse(&mut self, source: &str) -> SessionResult<()> {
        let invocation = Invocation {
            input_name: self.config.input_name.clone(),
            lang: self.config.lang,
            include_dirs: self.config.include_dirs.clone(),
        };
        let snippet = self.compiler.parse(&invocation, source, self.config.wrap_input)?;
        log::debug!(
            "snippet parsed as `{}` (entry: {})",
            snippet.module.name(),
            snippet.entry.as_deref().unwrap_or("none")
        );
        self.pending = Some(snippet);
        Ok(())
    }

    /// Exécute le snippet en attente : moteur construit au premier
    /// appel (files appliquées une seule fois, statiques avant
    /// dynamiques), puis ajout du module, initialiseurs globaux,
    /// résolution de l'entrée et appel sans argument.
    ///
    /// Le module est ajouté et initialisé même quand le snippet n'a pas
    /// d'entrée : ses globales rejoignent la session avant que
    /// [`SessionError::NoEntry`] ne remonte.
    pub fn execute(&mut self) -> SessionResult<()> {
        if self.pending.is_none() {
            return Err(SessionError::NothingParsed);
        }
        self.ensure_engine()?;
        let Some(snippet) = self.pending.take() else {
            return Err(SessionError::NothingParsed);
        };
        let Some(engine) = self.engine.as_mut() else {
            return Err(SessionError::NoExecutionEngine);
        };

        engine.add_module(snippet.module)?;
        engine.run_global_initializers()?;

        let Some(entry) = snippet.entry else {
            return Err(SessionError::NoEntry);
        };
        let addr = engine.resolve_symbol(&entry)?;
        engine.call_entry(addr)?;
        self.last_entry = Some(entry);
        Ok(())
    }

    /// `parse` puis, seulement en cas de succès, `execute`.
    pub fn parse_and_execute(&mut self, source: &str) -> SessionResult<()> {
        self.parse(source)?;
        self.execute()
    }

    /// Adresse de la dernière entrée synthétique exécutée.
    pub fn entry_address(&self) -> SessionResult<SymbolAddress> {
        let Some(engine) = self.engine.as_ref() else {
            return Err(SessionError::NoExecutionEngine);
        };
        let Some(entry) = self.last_entry.as_deref() else {
            return Err(SessionError::NoEntry);
        };
        Ok(engine.resolve_symbol(entry)?)
    }

    /// Construit le moteur à la première demande d'exécution et
    /// applique les files dans l'ordre, statiques puis dynamiques. Ne
    /// bascule `Ready` qu'en cas de succès complet : une bibliothèque
    /// fautive laisse la session `Uninitialized` et l'erreur remonte.
    fn ensure_engine(&mut self) -> SessionResult<()> {
        if self.engine.is_some() {
            return Ok(());
        }
        let mut engine = ExecutionEngine::new(TargetDesc::host());
        for path in &self.config.static_libs {
            engine.load_static_library(path)?;
        }
        for path in &self.config.dynamic_libs {
            engine.load_dynamic_library(path)?;
        }
        log::info!(
            "session ready ({} static, {} dynamic libraries applied)",
            self.config.static_libs.len(),
            self.config.dynamic_libs.len()
        );
        self.engine = Some(engine);
        Ok(())
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ccint_core::{SharedContext, Value};
    use ccint_minic::MinicFrontend;
    use pretty_assertions::assert_eq;

    fn session() -> (Interpreter, SharedContext, ccint_core::Captured) {
        let (ctx, cap) = SharedContext::with_captured_output();
        let interp = Interpreter::new(Box::new(MinicFrontend::new(ctx.clone())));
        (interp, ctx, cap)
    }

    #[test]
    fn execute_without_parse_is_rejected() {
        let (mut interp, _ctx, _cap) = session();
        let err = interp.execute().unwrap_err();
        assert!(matches!(err, SessionError::NothingParsed), "{err}");
        // Pas de moteur construit pour rien.
        assert_eq!(interp.state(), SessionState::Uninitialized);
    }

    #[test]
    fn entry_address_needs_an_engine() {
        let (interp, _ctx, _cap) = session();
        let err = interp.entry_address().unwrap_err();
        assert!(matches!(err, SessionError::NoExecutionEngine), "{err}");
    }

    #[test]
    fn include_paths_deduplicate_in_order() {
        let (mut interp, _ctx, _cap) = session();
        interp.add_include_path(".");
        interp.add_include_path("/usr/include");
        interp.add_include_path(".");
        assert_eq!(
            interp.include_paths(),
            [PathBuf::from("."), PathBuf::from("/usr/include")]
        );
    }

    #[test]
    fn state_flips_once_on_first_execution() {
        let (mut interp, _ctx, _cap) = session();
        interp.set_wrap_input(true);
        assert_eq!(interp.state(), SessionState::Uninitialized);

        interp.parse_and_execute("1 + 1;").expect("run");
        assert_eq!(interp.state(), SessionState::Ready);

        interp.parse_and_execute("2 + 2;").expect("run again");
        assert_eq!(interp.state(), SessionState::Ready);
    }

    #[test]
    fn libraries_are_refused_once_ready() {
        let (mut interp, _ctx, _cap) = session();
        interp.set_wrap_input(true);
        interp.parse_and_execute("0;").expect("run");

        let err = interp.add_static_lib("/tmp/late.a").unwrap_err();
        assert!(matches!(err, SessionError::EngineActive(_)), "{err}");
        assert!(err.to_string().contains("late.a"), "{err}");
        let err = interp.add_dynamic_lib("/tmp/late.so").unwrap_err();
        assert!(matches!(err, SessionError::EngineActive(_)), "{err}");
    }

    #[test]
    fn queued_archives_apply_once_at_engine_construction() {
        // Une archive réduite à sa signature est valide : index vide.
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("libempty.a");
        std::fs::write(&path, b"!<arch>\n").expect("write fixture");

        let (mut interp, _ctx, _cap) = session();
        interp.add_library(&path).expect("queue as static");
        assert_eq!(interp.config().static_libs.len(), 1);
        assert_eq!(interp.config().dynamic_libs.len(), 0);

        interp.set_wrap_input(true);
        interp.parse_and_execute("1;").expect("run");
        interp.parse_and_execute("2;").expect("run again");
        let engine = interp.engine().expect("ready");
        assert_eq!(engine.loaded_archives(), 1, "applied exactly once");
    }

    #[test]
    fn failed_library_application_leaves_the_session_uninitialized() {
        let (mut interp, _ctx, _cap) = session();
        interp.add_dynamic_lib("/nonexistent/libnope.so").expect("queue");
        interp.set_wrap_input(true);
        interp.parse("1;").expect("parse");

        let err = interp.execute().unwrap_err();
        assert!(matches!(err, SessionError::Engine(EngineError::LibraryLoad { .. })), "{err}");
        assert_eq!(interp.state(), SessionState::Uninitialized);
    }

    #[test]
    fn failed_parse_keeps_the_session_usable() {
        let (mut interp, _ctx, cap) = session();
        interp.set_wrap_input(true);

        let err = interp.parse_and_execute("int = ;").unwrap_err();
        assert!(matches!(err, SessionError::Compile(_)), "{err}");
        assert_eq!(interp.state(), SessionState::Uninitialized);

        interp.parse_and_execute("printf(\"ok\\n\");").expect("run after failure");
        assert_eq!(cap.get(), "ok\n");
    }

    #[test]
    fn declaration_without_entry_still_joins_the_session() {
        let (mut interp, ctx, _cap) = session();
        // Enrobage coupé : la déclaration reste top-level.
        interp.parse("int x = 5;").expect("parse");
        let err = interp.execute().unwrap_err();
        assert!(matches!(err, SessionError::NoEntry), "{err}");
        assert_eq!(ctx.get_global("x"), Some(Value::Int(5)));

        // Le snippet suivant voit `x` via le contexte partagé.
        interp.set_wrap_input(true);
        interp.parse_and_execute("x;").expect("run");
    }

    #[test]
    fn two_snippet_flow_prints_through_the_context() {
        let (mut interp, _ctx, cap) = session();
        interp.parse_and_execute("int x = 5;").unwrap_err();
        interp.set_wrap_input(true);
        interp.parse_and_execute("printf(\"x=%d\\n\", x);").expect("run");
        assert_eq!(cap.get(), "x=5\n");
    }

    #[test]
    fn duplicate_top_level_definitions_surface_as_link_errors() {
        let (mut interp, _ctx, _cap) = session();
        interp.parse("int y = 1;").expect("parse");
        let _ = interp.execute(); // NoEntry, mais `y` est défini
        interp.parse("int y = 2;").expect("parse again");

        let err = interp.execute().unwrap_err();
        assert!(matches!(err, SessionError::Engine(EngineError::Link(_))), "{err}");
    }

    #[test]
    fn entry_address_resolves_after_a_run() {
        let (mut interp, _ctx, _cap) = session();
        interp.set_wrap_input(true);
        interp.parse_and_execute("7;").expect("run");
        let addr = interp.entry_address().expect("address");
        assert!(matches!(addr, SymbolAddress::Code { .. }));
    }

    #[test]
    fn wrap_toggle_changes_the_snippet_shape() {
        let (mut interp, ctx, _cap) = session();
        interp.set_wrap_input(true);
        // Enrobée, la déclaration devient un local : rien ne reste.
        interp.parse_and_execute("int z = 9;").expect("run");
        assert!(!ctx.has_global("z"));

        interp.set_wrap_input(false);
        interp.parse("int z = 9;").expect("parse");
        let _ = interp.execute();
        assert_eq!(ctx.get_global("z"), Some(Value::Int(9)));
    }
}
