use std::io::BufRead as _;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, warn};

/// Longest accepted line in a mapping file. Longer lines are skipped with a
/// warning instead of failing the whole load.
pub const MAX_LINE: usize = 1024;

/// Value side of an [`IdMap`] entry.
///
/// One map instance holds entries of one purpose only: the topic map holds
/// aliases, the button-state map holds toggle bitmasks. The variants share a
/// type because both maps are keyed the same way, by the raw device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// User-chosen name published instead of the raw device id. May contain
    /// `/` characters.
    Alias(String),
    /// Per-input toggle bits for button-mode shellies, bit N for input N.
    Toggle(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the id map file at {1:?}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("could not read the id map file at {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
}

/// Map from raw shelly device ids to either an alias or a toggle state.
///
/// Entries keep their insertion order, so lookups that scan (alias prefix
/// matching, the startup dump) follow the mapping file line order.
#[derive(Debug, Default)]
pub struct IdMap {
    entries: IndexMap<String, Payload>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads alias mappings from a text file, one `<src> <dst>` pair per
    /// line. `#` comments and blank lines are ignored. Lines that are too
    /// long or lack a destination token are logged and skipped; only an
    /// unreadable file fails the load.
    pub fn load_aliases(path: &Path) -> Result<Self, Error> {
        let file = std::fs::File::open(path).map_err(|e| Error::Open(e, path.to_path_buf()))?;
        let reader = std::io::BufReader::new(file);
        let mut map = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::Read(e, path.to_path_buf()))?;
            let lineno = idx + 1;
            if line.len() > MAX_LINE {
                warn!(lineno, length = line.len(), "id map line is too long, skipping");
                continue;
            }
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(src) = tokens.next() else {
                continue;
            };
            let Some(dst) = tokens.next() else {
                warn!(lineno, src, "id map line has no destination, skipping");
                continue;
            };
            if tokens.next().is_some() {
                debug!(lineno, "trailing tokens after the destination are ignored");
            }
            map.insert_alias(src, dst);
        }
        Ok(map)
    }

    /// Adds an alias entry. A `src` seen before keeps its first mapping.
    pub fn insert_alias(&mut self, src: &str, dst: &str) {
        if self.entries.contains_key(src) {
            warn!(src, dst, "duplicate id map entry, keeping the first one");
            return;
        }
        self.entries.insert(src.to_owned(), Payload::Alias(dst.to_owned()));
    }

    /// Exact-match alias lookup. Callers fall back to `src` itself as the
    /// published name when this returns `None`.
    pub fn find_alias(&self, src: &str) -> Option<&str> {
        match self.entries.get(src) {
            Some(Payload::Alias(dst)) => Some(dst),
            Some(Payload::Toggle(_)) | None => None,
        }
    }

    /// Toggle state for `src`, created at 0 on first use.
    pub fn toggle_state_mut(&mut self, src: &str) -> &mut u32 {
        let payload = self
            .entries
            .entry(src.to_owned())
            .or_insert(Payload::Toggle(0));
        if let Payload::Alias(_) = payload {
            // An alias cannot track button state. Should not happen with the
            // per-purpose maps the bridge keeps.
            *payload = Payload::Toggle(0);
        }
        match payload {
            Payload::Toggle(state) => state,
            Payload::Alias(_) => unreachable!("normalized to a toggle entry above"),
        }
    }

    /// Finds the entry whose alias is a path prefix of `topic`, in insertion
    /// order. Returns the raw id, the alias, and the topic remainder after
    /// the alias and its trailing `/`.
    pub fn match_alias_prefix<'s, 't>(
        &'s self,
        topic: &'t str,
    ) -> Option<(&'s str, &'s str, &'t str)> {
        for (src, payload) in &self.entries {
            let Payload::Alias(alias) = payload else {
                continue;
            };
            let Some(rest) = topic.strip_prefix(alias.as_str()) else {
                continue;
            };
            // Match whole path segments only, so alias `heat` does not claim
            // topics of a device aliased `heater`.
            let Some(rest) = rest.strip_prefix('/') else {
                continue;
            };
            return Some((src, alias, rest));
        }
        None
    }

    /// Alias entries in insertion order.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(src, payload)| match payload {
            Payload::Alias(dst) => Some((src.as_str(), dst.as_str())),
            Payload::Toggle(_) => None,
        })
    }

    pub fn delete(&mut self, src: &str) -> bool {
        self.entries.shift_remove(src).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
