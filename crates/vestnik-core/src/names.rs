//! Process-wide name interner
//!
//! Identifiers are interned once and referred to by dense integer ids for
//! the rest of the process lifetime. Two tables are kept per id: the
//! original-case spelling (for display) and the case-folded spelling (for
//! case-insensitive resolution, Cyrillic included). Id 0 is reserved for
//! "no name" (anonymous functions, indirect calls).

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::{Arc, LazyLock};

/// Dense integer identity of an interned name.
///
/// Ids start at 1 and never change once assigned; 0 is the anonymous
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId(pub u32);

/// The "no name" sentinel.
pub const ANON: NameId = NameId(0);

impl NameId {
    /// Whether this is the anonymous sentinel.
    #[inline]
    pub fn is_anon(self) -> bool {
        self.0 == 0
    }
}

struct Tables {
    by_name: FxHashMap<Arc<str>, NameId>,
    originals: Vec<Arc<str>>,
    lowers: Vec<Arc<str>>,
}

/// Bidirectional identifier table.
///
/// All operations are serialized; interning the same spelling twice returns
/// the same id.
pub struct Interner {
    tables: RwLock<Tables>,
}

impl Interner {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                by_name: FxHashMap::default(),
                originals: Vec::new(),
                lowers: Vec::new(),
            }),
        }
    }

    /// Intern `s` and return its id. Idempotent.
    pub fn intern(&self, s: &str) -> NameId {
        if let Some(&id) = self.tables.read().by_name.get(s) {
            return id;
        }
        let mut t = self.tables.write();
        if let Some(&id) = t.by_name.get(s) {
            return id;
        }
        let original: Arc<str> = Arc::from(s);
        let lower: Arc<str> = Arc::from(s.to_lowercase().as_str());
        t.originals.push(original.clone());
        t.lowers.push(lower);
        let id = NameId(t.originals.len() as u32);
        t.by_name.insert(original, id);
        id
    }

    /// Original-case spelling of `id`. Empty string for the anonymous id.
    pub fn get(&self, id: NameId) -> Arc<str> {
        if id.is_anon() {
            return Arc::from("");
        }
        let t = self.tables.read();
        t.originals
            .get(id.0 as usize - 1)
            .cloned()
            .unwrap_or_else(|| Arc::from(""))
    }

    /// Case-folded spelling of `id`. Empty string for the anonymous id.
    pub fn get_lower(&self, id: NameId) -> Arc<str> {
        if id.is_anon() {
            return Arc::from("");
        }
        let t = self.tables.read();
        t.lowers
            .get(id.0 as usize - 1)
            .cloned()
            .unwrap_or_else(|| Arc::from(""))
    }

    /// Id of the case-folded spelling of `id`.
    ///
    /// Scopes, builtins and method tables key by these, which is what makes
    /// identifier resolution case-insensitive.
    pub fn lower_id(&self, id: NameId) -> NameId {
        if id.is_anon() {
            return ANON;
        }
        let lower = self.get_lower(id);
        self.intern(&lower)
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

static NAMES: LazyLock<Interner> = LazyLock::new(Interner::new);

/// Intern `s` in the process-wide table.
pub fn intern(s: &str) -> NameId {
    NAMES.intern(s)
}

/// Original-case spelling of a process-wide id.
pub fn name_of(id: NameId) -> Arc<str> {
    NAMES.get(id)
}

/// Case-folded spelling of a process-wide id.
pub fn name_of_lower(id: NameId) -> Arc<str> {
    NAMES.get_lower(id)
}

/// Case-folded id of a process-wide id.
pub fn lower_id(id: NameId) -> NameId {
    NAMES.lower_id(id)
}
