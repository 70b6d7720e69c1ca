//! ccint-engine — moteur d'exécution incrémental de ccint
//!
//! Reçoit les modules compilés un par un et les garde révocables :
//!
//! - un Resource Tracker par module, clé = identité du module ; retirer
//!   un module invalide ses adresses déjà résolues au lieu de pendre
//! - au-plus-une-définition : un module dont un symbole est déjà défini
//!   par un module vivant est refusé en bloc
//! - initialiseurs globaux exécutés dans l'ordre d'insertion des
//!   modules, une seule fois chacun
//! - résolution de symboles étagée : modules vivants, puis le processus
//!   hôte et les bibliothèques dynamiques chargées, puis l'index des
//!   archives statiques
//! - archives `ar` mappées en mémoire, index System V (`/`) et BSD
//!   (`__.SYMDEF`) compris ; recharger le même chemin l'enregistre une
//!   seconde fois, sans erreur
//! - bibliothèques dynamiques ouvertes pour la durée du processus,
//!   jamais déchargées
//!
//! Seul crate de l'atelier à contenir de l'`unsafe` : dlopen, mmap et
//! l'appel d'une entrée native résolue.

#![deny(missing_docs)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::io::Read;
use std::mem;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ccint_core::{CodeObject, CompiledModule, Decl, DeclKind, RunError};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Alias résultat du moteur.
pub type EngineResult<T> = core::result::Result<T, EngineError>;

/// Erreur du moteur d'exécution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Module refusé (identité ou définition en double) ou adresse
    /// impossible à lier à du code exécutable.
    #[error("link: {0}")]
    Link(String),
    /// Symbole introuvable, ou adresse périmée après retrait du module.
    #[error("symbol: {0}")]
    Symbol(String),
    /// Chargement d'archive ou de bibliothèque dynamique échoué.
    #[error("failed to load `{}`: {message}", .path.display())]
    LibraryLoad {
        /// Chemin tel que demandé.
        path: PathBuf,
        /// Message du chargeur ou de l'analyseur.
        message: String,
    },
    /// Erreur d'exécution remontée par un objet code.
    #[error("run: {0}")]
    Run(#[from] RunError),
}

/* ─────────────────────────── Cible hôte ─────────────────────────── */

/// Description de la cible qui paramètre le moteur.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TargetDesc {
    /// Triple approché `arch-os`, reconstruit depuis l'environnement.
    pub triple: String,
    /// Famille d'OS (`unix`, `windows`, ou vide).
    pub family: String,
}

impl TargetDesc {
    /// Cible du processus courant.
    pub fn host() -> Self {
        Self {
            triple: format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
            family: std::env::consts::FAMILY.to_owned(),
        }
    }
}

/* ─────────────────────────── Adresses ─────────────────────────── */

/// Adresse rendue par la résolution de symbole.
///
/// Les adresses `Code`/`Data` portent la génération du tracker qui les
/// a émises : après retrait du module, l'appel échoue proprement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolAddress {
    /// Corps exécutable hébergé par un module vivant.
    Code {
        /// Génération du tracker émetteur.
        gen: u64,
        /// Index du corps dans le tracker.
        slot: u32,
    },
    /// Donnée (globale) d'un module vivant ; non appelable.
    Data {
        /// Génération du tracker émetteur.
        gen: u64,
    },
    /// Symbole natif résident (processus hôte ou dylib chargée).
    Native(
        /// Adresse brute rendue par le chargeur.
        *const c_void,
    ),
    /// Membre d'une archive statique enregistrée ; non appelable.
    Archive {
        /// Index de l'archive, dans l'ordre d'enregistrement.
        library: u32,
        /// Offset du membre dans le fichier d'archive.
        member: u32,
    },
}

/// Signature C attendue d'une entrée native : `int entry(void)`.
type NativeEntry = unsafe extern "C" fn() -> c_int;

/* ─────────────────────────── Trackers ─────────────────────────── */

#[derive(Debug)]
enum Slot {
    /// Corps exécutable (index dans `fns`).
    Func(usize),
    /// Globale : résolvable, pas appelable.
    Data,
}

/// Tout ce qu'un module a apporté ; jeté d'un bloc au retrait.
#[derive(Debug)]
struct ModuleTracker {
    gen: u64,
    symbols: HashMap<String, Slot>,
    fns: Vec<CodeObject>,
    initializers: Vec<CodeObject>,
    initialized: bool,
}

/* ─────────────────────────── Bibliothèques ─────────────────────────── */

/// Nature d'une bibliothèque, décidée par la signature binaire ;
/// l'extension du fichier ne compte jamais.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LibraryKind {
    /// Archive `ar` (ou n'importe quoi d'autre, fichiers illisibles
    /// compris ; l'erreur réelle sort au chargement).
    Static,
    /// Objet partagé : ELF `ET_DYN`, Mach-O dylib/stub/VM fixe dans
    /// les deux boutismes, ou exécutable PE `MZ`.
    Dynamic,
}

impl LibraryKind {
    /// Classe un fichier d'après ses premiers octets.
    pub fn detect(path: &Path) -> Self {
        let mut head = [0u8; 64];
        let n = match fs::File::open(path).and_then(|mut f| f.read(&mut head)) {
            Ok(n) => n,
            Err(_) => return Self::Static,
        };
        Self::from_bytes(&head[..n])
    }

    /// La même décision, sur un tampon déjà lu.
    pub fn from_bytes(head: &[u8]) -> Self {
        if is_elf_shared(head) || is_macho_dylib(head) || head.starts_with(b"MZ") {
            Self::Dynamic
        } else {
            Self::Static
        }
    }
}

/// ELF dont `e_type` vaut `ET_DYN`, lu dans le boutisme annoncé par
/// `EI_DATA`.
fn is_elf_shared(head: &[u8]) -> bool {
    const ELFDATA2LSB: u8 = 1;
    const ELFDATA2MSB: u8 = 2;
    const ET_DYN: u16 = 3;
    if head.len() < 18 || &head[..4] != b"\x7fELF" {
        return false;
    }
    let e_type = &head[16..18];
    match head[5] {
        ELFDATA2LSB => LittleEndian::read_u16(e_type) == ET_DYN,
        ELFDATA2MSB => BigEndian::read_u16(e_type) == ET_DYN,
        _ => false,
    }
}

/// Mach-O de type dylib, stub de dylib ou bibliothèque VM fixe, 32 ou
/// 64 bits, dans les deux boutismes.
fn is_macho_dylib(head: &[u8]) -> bool {
    const MH_MAGIC: u32 = 0xFEED_FACE;
    const MH_MAGIC_64: u32 = 0xFEED_FACF;
    const MH_CIGAM: u32 = 0xCEFA_EDFE;
    const MH_CIGAM_64: u32 = 0xCFFA_EDFE;
    const MH_FVMLIB: u32 = 0x3;
    const MH_DYLIB: u32 = 0x6;
    const MH_DYLIB_STUB: u32 = 0x9;
    if head.len() < 16 {
        return false;
    }
    let filetype = match LittleEndian::read_u32(&head[..4]) {
        MH_MAGIC | MH_MAGIC_64 => LittleEndian::read_u32(&head[12..16]),
        MH_CIGAM | MH_CIGAM_64 => BigEndian::read_u32(&head[12..16]),
        _ => return false,
    };
    matches!(filetype, MH_FVMLIB | MH_DYLIB | MH_DYLIB_STUB)
}

/// Archive statique enregistrée : un index, pas du code chargé.
#[derive(Debug)]
struct StaticArchive {
    path: PathBuf,
    /// Nom de symbole → offset du membre dans le fichier.
    index: HashMap<String, u32>,
}

/// Bibliothèque dynamique, mappée pour la durée du processus.
#[derive(Debug)]
struct DynamicLibrary {
    path: PathBuf,
    lib: libloading::Library,
}

impl DynamicLibrary {
    fn open(path: &Path) -> EngineResult<Self> {
        #[cfg(unix)]
        let lib = {
            use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
            // RTLD_GLOBAL : les symboles rejoignent la portée du
            // processus, comme pour le chargeur du binaire.
            unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }
                .map_err(|e| EngineError::LibraryLoad {
                    path: path.to_owned(),
                    message: e.to_string(),
                })?
                .into()
        };
        #[cfg(not(unix))]
        let lib = unsafe { libloading::Library::new(path) }.map_err(|e| {
            EngineError::LibraryLoad { path: path.to_owned(), message: e.to_string() }
        })?;
        Ok(Self { path: path.to_owned(), lib })
    }

    fn lookup(&self, name: &str) -> Option<*const c_void> {
        let found =
            unsafe { self.lib.get::<*const c_void>(name.as_bytes()) }.ok().map(|sym| *sym);
        if found.is_some() {
            log::trace!("`{name}` resolved from {}", self.path.display());
        }
        found
    }
}

/// Poignée sur le processus hôte (symboles déjà résidents).
#[derive(Debug)]
struct ProcessHandle(libloading::Library);

impl ProcessHandle {
    fn open() -> Option<Self> {
        #[cfg(unix)]
        {
            Some(Self(libloading::os::unix::Library::this().into()))
        }
        #[cfg(windows)]
        {
            libloading::os::windows::Library::this().ok().map(|l| Self(l.into()))
        }
        #[cfg(not(any(unix, windows)))]
        {
            None
        }
    }

    fn lookup(&self, name: &str) -> Option<*const c_void> {
        unsafe { self.0.get::<*const c_void>(name.as_bytes()) }.ok().map(|sym| *sym)
    }
}

/* ─────────────────────────── Index d'archives ─────────────────────────── */

const ARCHIVE_MAGIC: &[u8; 8] = b"!<arch>\n";

/// Extrait l'index de symboles d'une archive `ar`.
///
/// L'index, s'il existe, est porté par les tout premiers membres :
/// `/` (System V, u32 gros-boutiste) ou `__.SYMDEF[ SORTED]` (BSD,
/// u32 petit-boutiste, nom parfois étendu `#1/N`). Une archive sans
/// index s'enregistre avec zéro symbole.
fn parse_archive_index(data: &[u8]) -> Result<HashMap<String, u32>, String> {
    if data.len() < ARCHIVE_MAGIC.len() || &data[..ARCHIVE_MAGIC.len()] != ARCHIVE_MAGIC {
        return Err("not an ar archive (bad magic)".to_owned());
    }
    let mut index = HashMap::new();
    let mut off = ARCHIVE_MAGIC.len();
    while off + 60 <= data.len() {
        let head = &data[off..off + 60];
        let mut name: &[u8] = trim_member_name(&head[..16]);
        let size = parse_ascii_usize(&head[48..58])?;
        let body_end = (off + 60)
            .checked_add(size)
            .ok_or_else(|| "member size overflows".to_owned())?;
        let mut body = data
            .get(off + 60..body_end)
            .ok_or_else(|| "truncated archive member".to_owned())?;

        // Nom étendu BSD : `#1/N`, les N premiers octets du corps.
        if let Some(rest) = name.strip_prefix(b"#1/") {
            let n = parse_ascii_usize(rest)?;
            let raw = body.get(..n).ok_or_else(|| "truncated extended name".to_owned())?;
            name = trim_member_name(raw);
            body = &body[n..];
        }

        if name == b"/" {
            parse_sysv_index(body, &mut index)?;
            return Ok(index);
        }
        if name.starts_with(b"__.SYMDEF") {
            parse_bsd_index(body, &mut index)?;
            return Ok(index);
        }
        if name == b"//" {
            // Table GNU des noms longs ; l'index, s'il existe, précède.
            off = body_end + (size & 1);
            continue;
        }
        // Premier membre ordinaire (ou index 64 bits) : pas d'index ici.
        break;
    }
    Ok(index)
}

/// Nom de membre sans remplissage (espaces, NUL) ni `/` terminal GNU,
/// en préservant les noms spéciaux `/` et `//`.
fn trim_member_name(raw: &[u8]) -> &[u8] {
    let mut name = raw;
    while let Some((b' ' | 0, rest)) = name.split_last().map(|(l, r)| (*l, r)) {
        name = rest;
    }
    if name.len() > 2 && name.ends_with(b"/") {
        name = &name[..name.len() - 1];
    }
    name
}

fn parse_ascii_usize(b: &[u8]) -> Result<usize, String> {
    let s = std::str::from_utf8(b).map_err(|_| "non-ASCII header field".to_owned())?.trim();
    if s.is_empty() {
        return Ok(0);
    }
    s.parse::<usize>().map_err(|_| format!("bad numeric header field `{s}`"))
}

/// Index System V : u32 BE compte, offsets u32 BE, noms NUL-terminés.
fn parse_sysv_index(body: &[u8], index: &mut HashMap<String, u32>) -> Result<(), String> {
    if body.len() < 4 {
        return Err("symbol index too short".to_owned());
    }
    let count = BigEndian::read_u32(&body[..4]) as usize;
    let offsets_end = count
        .checked_mul(4)
        .and_then(|n| n.checked_add(4))
        .ok_or_else(|| "symbol count overflows".to_owned())?;
    let offsets = body.get(4..offsets_end).ok_or_else(|| "symbol index truncated".to_owned())?;
    let mut names = &body[offsets_end..];
    for i in 0..count {
        let member = BigEndian::read_u32(&offsets[i * 4..i * 4 + 4]);
        let nul = names
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| "unterminated symbol name".to_owned())?;
        index.insert(String::from_utf8_lossy(&names[..nul]).into_owned(), member);
        names = &names[nul + 1..];
    }
    Ok(())
}

/// Index BSD : u32 LE taille du tableau de paires (offset de chaîne,
/// offset du membre), puis u32 LE taille de la table de chaînes.
fn parse_bsd_index(body: &[u8], index: &mut HashMap<String, u32>) -> Result<(), String> {
    if body.len() < 4 {
        return Err("symbol index too short".to_owned());
    }
    let ranlib_len = LittleEndian::read_u32(&body[..4]) as usize;
    let strtab_off =
        ranlib_len.checked_add(4).ok_or_else(|| "symbol index truncated".to_owned())?;
    let pairs = body.get(4..strtab_off).ok_or_else(|| "symbol index truncated".to_owned())?;
    let strtab_len = LittleEndian::read_u32(
        body.get(strtab_off..strtab_off + 4)
            .ok_or_else(|| "missing string table".to_owned())?,
    ) as usize;
    let strtab_end = (strtab_off + 4)
        .checked_add(strtab_len)
        .ok_or_else(|| "string table truncated".to_owned())?;
    let strtab = body
        .get(strtab_off + 4..strtab_end)
        .ok_or_else(|| "string table truncated".to_owned())?;
    for chunk in pairs.chunks_exact(8) {
        let str_off = LittleEndian::read_u32(&chunk[..4]) as usize;
        let member = LittleEndian::read_u32(&chunk[4..8]);
        let tail = strtab.get(str_off..).ok_or_else(|| "string offset out of range".to_owned())?;
        let nul = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        index.insert(String::from_utf8_lossy(&tail[..nul]).into_owned(), member);
    }
    Ok(())
}

/* ─────────────────────────── Moteur ─────────────────────────── */

/// Moteur d'exécution : une instance par session, construite paresseuse
/// côté orchestrateur.
#[derive(Debug)]
pub struct ExecutionEngine {
    target: TargetDesc,
    /// Trackers vivants, par identité de module.
    modules: HashMap<String, ModuleTracker>,
    /// Identités vivantes, dans l'ordre d'insertion.
    order: Vec<String>,
    /// Compteur de générations ; chaque ajout en consomme une.
    generation: u64,
    archives: Vec<StaticArchive>,
    dynamic: Vec<DynamicLibrary>,
    process: Option<ProcessHandle>,
}

impl ExecutionEngine {
    /// Crée un moteur pour la cible donnée.
    pub fn new(target: TargetDesc) -> Self {
        log::debug!("execution engine up for {} ({})", target.triple, target.family);
        Self {
            target,
            modules: HashMap::new(),
            order: Vec::new(),
            generation: 0,
            archives: Vec::new(),
            dynamic: Vec::new(),
            process: ProcessHandle::open(),
        }
    }

    /// Cible qui paramètre ce moteur.
    pub fn target(&self) -> &TargetDesc {
        &self.target
    }

    /// Nombre de modules vivants.
    pub fn live_modules(&self) -> usize {
        self.modules.len()
    }

    /// Nombre d'archives enregistrées (les doublons comptent).
    pub fn loaded_archives(&self) -> usize {
        self.archives.len()
    }

    /// Nombre de bibliothèques dynamiques chargées.
    pub fn loaded_dynamic(&self) -> usize {
        self.dynamic.len()
    }

    /// Transfère un module sous un tracker neuf.
    ///
    /// Refusé en bloc si l'identité est déjà vivante, si un de ses noms
    /// de liaison est déjà défini par un module vivant, ou s'il définit
    /// deux fois le même nom.
    pub fn add_module(&mut self, module: CompiledModule) -> EngineResult<()> {
        let (name, decls, initializers) = module.into_parts();
        if self.modules.contains_key(&name) {
            return Err(EngineError::Link(format!("module identity `{name}` is already live")));
        }
        for d in &decls {
            if self.modules.values().any(|t| t.symbols.contains_key(&d.link_name)) {
                return Err(EngineError::Link(format!(
                    "symbol `{}` is already defined by a live module",
                    d.link_name
                )));
            }
        }

        self.generation += 1;
        let mut tracker = ModuleTracker {
            gen: self.generation,
            symbols: HashMap::new(),
            fns: Vec::new(),
            initializers,
            initialized: false,
        };
        for d in decls {
            let Decl { link_name, kind, code, .. } = d;
            let slot = match (kind, code) {
                (DeclKind::Function, Some(body)) => {
                    tracker.fns.push(body);
                    Slot::Func(tracker.fns.len() - 1)
                }
                _ => Slot::Data,
            };
            if tracker.symbols.insert(link_name.clone(), slot).is_some() {
                return Err(EngineError::Link(format!(
                    "symbol `{link_name}` is defined twice in module `{name}`"
                )));
            }
        }

        log::debug!(
            "module `{name}` added (gen {}, {} symbols, {} initializers)",
            tracker.gen,
            tracker.symbols.len(),
            tracker.initializers.len()
        );
        self.order.push(name.clone());
        self.modules.insert(name, tracker);
        Ok(())
    }

    /// Retire un module et tout ce qu'il avait apporté.
    ///
    /// Succès silencieux si l'identité n'est pas (ou plus) vivante. Les
    /// adresses déjà résolues depuis ce module deviennent périmées.
    pub fn remove_module(&mut self, name: &str) -> EngineResult<()> {
        if let Some(t) = self.modules.remove(name) {
            self.order.retain(|n| n != name);
            log::debug!("module `{name}` removed (gen {})", t.gen);
        }
        Ok(())
    }

    /// Exécute les initialiseurs des modules pas encore initialisés,
    /// dans l'ordre d'insertion des modules. Un module fautif est
    /// marqué initialisé avant l'exécution : ses initialiseurs ne
    /// rejouent pas.
    pub fn run_global_initializers(&mut self) -> EngineResult<()> {
        for name in &self.order {
            if let Some(t) = self.modules.get_mut(name) {
                if t.initialized {
                    continue;
                }
                t.initialized = true;
                for mut init in t.initializers.drain(..) {
                    init.invoke()?;
                }
            }
        }
        Ok(())
    }

    /// Résout un nom de liaison.
    ///
    /// Priorité : modules vivants (ordre d'insertion), puis le
    /// processus hôte et les dylibs chargées (ordre de chargement),
    /// puis l'index des archives statiques.
    pub fn resolve_symbol(&self, name: &str) -> EngineResult<SymbolAddress> {
        for id in &self.order {
            if let Some(t) = self.modules.get(id) {
                if let Some(slot) = t.symbols.get(name) {
                    return Ok(match slot {
                        Slot::Func(i) => SymbolAddress::Code { gen: t.gen, slot: *i as u32 },
                        Slot::Data => SymbolAddress::Data { gen: t.gen },
                    });
                }
            }
        }
        if let Some(addr) = self.resolve_native(name) {
            return Ok(SymbolAddress::Native(addr));
        }
        for (li, ar) in self.archives.iter().enumerate() {
            if let Some(member) = ar.index.get(name) {
                return Ok(SymbolAddress::Archive { library: li as u32, member: *member });
            }
        }
        Err(EngineError::Symbol(format!(
            "`{name}` not found in live modules, process, or archives"
        )))
    }

    fn resolve_native(&self, name: &str) -> Option<*const c_void> {
        if let Some(p) = &self.process {
            if let Some(addr) = p.lookup(name) {
                return Some(addr);
            }
        }
        self.dynamic.iter().find_map(|lib| lib.lookup(name))
    }

    /// Enregistre l'index d'une archive statique comme source de
    /// résolution de dernier recours. Recharger le même chemin
    /// l'enregistre une seconde fois.
    pub fn load_static_library(&mut self, path: &Path) -> EngineResult<()> {
        let file = fs::File::open(path).map_err(|e| EngineError::LibraryLoad {
            path: path.to_owned(),
            message: e.to_string(),
        })?;
        let map = unsafe { memmap2::MmapOptions::new().map(&file) }.map_err(|e| {
            EngineError::LibraryLoad { path: path.to_owned(), message: e.to_string() }
        })?;
        let index = parse_archive_index(&map)
            .map_err(|message| EngineError::LibraryLoad { path: path.to_owned(), message })?;
        log::debug!("archive `{}` registered ({} symbols)", path.display(), index.len());
        self.archives.push(StaticArchive { path: path.to_owned(), index });
        Ok(())
    }

    /// Mappe une bibliothèque dynamique pour le reste de la vie du
    /// processus ; pas de déchargement sélectif.
    pub fn load_dynamic_library(&mut self, path: &Path) -> EngineResult<()> {
        let lib = DynamicLibrary::open(path)?;
        log::debug!("dynamic library `{}` mapped for the process lifetime", path.display());
        self.dynamic.push(lib);
        Ok(())
    }

    /// Invoque une entrée résolue, sans argument, valeur de retour
    /// ignorée.
    pub fn call_entry(&mut self, addr: SymbolAddress) -> EngineResult<()> {
        match addr {
            SymbolAddress::Code { gen, slot } => {
                let Some(t) = self.modules.values_mut().find(|t| t.gen == gen) else {
                    return Err(EngineError::Symbol(
                        "stale address: the defining module was removed".to_owned(),
                    ));
                };
                let Some(body) = t.fns.get_mut(slot as usize) else {
                    return Err(EngineError::Symbol(format!(
                        "stale address: no body in slot {slot}"
                    )));
                };
                body.invoke()?;
                Ok(())
            }
            SymbolAddress::Data { .. } => {
                Err(EngineError::Link("address designates data, not a callable body".to_owned()))
            }
            SymbolAddress::Native(ptr) => {
                if ptr.is_null() {
                    return Err(EngineError::Symbol("null native address".to_owned()));
                }
                // Contrat C `int (*)(void)` ; tout écart relève de
                // l'appelant, comme pour n'importe quel dlsym.
                let f: NativeEntry = unsafe { mem::transmute(ptr) };
                let _ = unsafe { f() };
                Ok(())
            }
            SymbolAddress::Archive { library, member } => {
                let path = self
                    .archives
                    .get(library as usize)
                    .map_or_else(|| PathBuf::from("?"), |a| a.path.clone());
                Err(EngineError::Link(format!(
                    "cannot call member at offset {member} of `{}`: archives are an index, \
                     not loadable code",
                    path.display()
                )))
            }
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
