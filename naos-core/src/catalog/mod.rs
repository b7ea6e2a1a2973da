//! The command catalog: a fixed, compile-time mapping from logical operation
//! names to host program invocations. This is the sole interface the daemon
//! uses to reach privileged host programs — no shell interpolation anywhere,
//! so the class of quoting bugs that has historically plagued NAS admin
//! tools has no surface to occur on.

mod entries;

pub use entries::catalog;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::CatalogError;

/// An executor concurrency class. Calls in the same class are serialized
/// (write classes) or permitted to run in parallel (read classes); see
/// [`crate::executor::Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConcurrencyClass {
    ZfsWrite,
    ZfsRead,
    ContainerWrite,
    ContainerRead,
    ShareWrite,
    ShareRead,
    Probe,
    None,
}

impl ConcurrencyClass {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ConcurrencyClass::ZfsWrite | ConcurrencyClass::ContainerWrite | ConcurrencyClass::ShareWrite
        )
    }
}

/// One argument slot in a catalog entry's schema.
#[derive(Debug, Clone)]
pub enum ArgSlot {
    /// A boolean switch; the concrete argument carries no value.
    Flag,
    /// One of a fixed set of literal values.
    Enum(&'static [&'static str]),
    /// Matches `^[a-z][a-z0-9_-]{0,63}$` unless `pattern` overrides it.
    Identifier { pattern: Option<&'static str> },
    /// A filesystem path that must resolve (symlinks followed) under `root`.
    PathUnderRoot { root: &'static str },
    /// An integer bounded to `[min, max]`.
    IntegerRange { min: i64, max: i64 },
    /// Passed through uninterpreted by shell, but still a single argv slot
    /// (never concatenated), for values the other slot kinds can't express
    /// (e.g. raw ZFS property strings of the form `key=value`).
    OpaquePassthrough,
}

/// A single, immutable entry in the command catalog.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub program: &'static str,
    pub args_schema: &'static [ArgSlot],
    pub timeout: Duration,
    pub concurrency_class: ConcurrencyClass,
    pub json_output: bool,
}

/// A concrete argument value supplied for one schema slot.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ArgValue {
    Flag(bool),
    Text(String),
    Integer(i64),
}

impl ArgValue {
    fn as_text(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]{0,63}$").unwrap())
}

/// Characters that make an argument unsafe regardless of slot kind. These
/// never appear in a legitimately constructed argument; their presence means
/// something upstream tried to smuggle shell syntax through, even though we
/// never invoke a shell.
const DANGEROUS_SUBSTRINGS: &[&str] = &[";", "|", "&", "`", "$(", "\n", "\r"];

fn contains_dangerous(s: &str) -> bool {
    DANGEROUS_SUBSTRINGS.iter().any(|needle| s.contains(needle))
}

/// Resolves `candidate` under `root`, following symlinks, and verifies the
/// resolved path is still prefixed by `root`. Rejects anything that would
/// escape the root, including via a symlink planted inside it.
fn verify_path_under_root(root: &str, candidate: &str) -> Result<PathBuf, String> {
    let root_path = Path::new(root);
    let joined = root_path.join(candidate.trim_start_matches('/'));

    let canonical_root = root_path
        .canonicalize()
        .map_err(|e| format!("root `{root}` does not exist: {e}"))?;

    // The candidate path itself may not exist yet (e.g. a dataset mount
    // point about to be created); canonicalize what does exist and then
    // check the remaining suffix textually.
    let mut existing = joined.clone();
    let mut suffix = PathBuf::new();
    loop {
        match existing.canonicalize() {
            Ok(resolved) => {
                let full = resolved.join(&suffix);
                if !full.starts_with(&canonical_root) {
                    return Err(format!("path `{candidate}` escapes root `{root}`"));
                }
                return Ok(full);
            }
            Err(_) => {
                let Some(parent) = existing.parent().map(Path::to_path_buf) else {
                    return Err(format!("path `{candidate}` does not resolve under `{root}`"));
                };
                let Some(file_name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Err(format!("path `{candidate}` does not resolve under `{root}`"));
                };
                suffix = Path::new(&file_name).join(&suffix);
                existing = parent;
            }
        }
    }
}

fn validate_slot(slot: &ArgSlot, value: &ArgValue, slot_index: usize) -> Result<(), String> {
    match (slot, value) {
        (ArgSlot::Flag, ArgValue::Flag(_)) => Ok(()),
        (ArgSlot::Enum(allowed), ArgValue::Text(v)) => {
            if contains_dangerous(v) {
                return Err(format!("slot {slot_index}: value contains forbidden characters"));
            }
            if allowed.contains(&v.as_str()) {
                Ok(())
            } else {
                Err(format!("slot {slot_index}: `{v}` is not one of {allowed:?}"))
            }
        }
        (ArgSlot::Identifier { pattern }, ArgValue::Text(v)) => {
            if contains_dangerous(v) {
                return Err(format!("slot {slot_index}: value contains forbidden characters"));
            }
            let matches = match pattern {
                Some(p) => Regex::new(p).map(|re| re.is_match(v)).unwrap_or(false),
                None => identifier_regex().is_match(v),
            };
            if matches {
                Ok(())
            } else {
                Err(format!("slot {slot_index}: `{v}` is not a valid identifier"))
            }
        }
        (ArgSlot::PathUnderRoot { root }, ArgValue::Text(v)) => {
            if contains_dangerous(v) {
                return Err(format!("slot {slot_index}: value contains forbidden characters"));
            }
            verify_path_under_root(root, v).map(|_| ()).map_err(|e| format!("slot {slot_index}: {e}"))
        }
        (ArgSlot::IntegerRange { min, max }, ArgValue::Integer(v)) => {
            if v >= min && v <= max {
                Ok(())
            } else {
                Err(format!("slot {slot_index}: {v} is out of range [{min}, {max}]"))
            }
        }
        (ArgSlot::OpaquePassthrough, ArgValue::Text(v)) => {
            if contains_dangerous(v) {
                Err(format!("slot {slot_index}: value contains forbidden characters"))
            } else {
                Ok(())
            }
        }
        _ => Err(format!("slot {slot_index}: value does not match declared slot type")),
    }
}

/// The catalog: an immutable registry of every host program the daemon is
/// permitted to execute, plus the validators that gate calls into it.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    entries: &'static [CatalogEntry],
}

impl Catalog {
    /// The production catalog, built once at process start from the static
    /// table in [`entries::catalog`].
    pub fn production() -> Self {
        Self { entries: catalog() }
    }

    /// Build a catalog over an arbitrary entry slice, for tests that need a
    /// smaller surface.
    pub fn from_entries(entries: &'static [CatalogEntry]) -> Self {
        Self { entries }
    }

    pub fn resolve(&self, name: &str) -> Result<&'static CatalogEntry, CatalogError> {
        self.entries
            .iter()
            .find(|e| e.id == name)
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    /// Validates `args` (one value per declared slot, same order) against
    /// `entry`'s schema. Returns the list of violations; an empty list means
    /// the request is safe to execute.
    pub fn validate(&self, entry: &CatalogEntry, args: &[ArgValue]) -> Vec<String> {
        let mut violations = Vec::new();

        if args.len() != entry.args_schema.len() {
            violations.push(format!(
                "expected {} arguments, got {}",
                entry.args_schema.len(),
                args.len()
            ));
            return violations;
        }

        for (i, (slot, value)) in entry.args_schema.iter().zip(args.iter()).enumerate() {
            if let Err(v) = validate_slot(slot, value, i) {
                violations.push(v);
            }
        }
        violations
    }

    /// Renders validated args to the literal `argv` the executor will spawn
    /// with — no shell, no string concatenation. Assumes `validate` has
    /// already returned no violations.
    pub fn render_argv(entry: &CatalogEntry, args: &[ArgValue]) -> Vec<String> {
        entry
            .args_schema
            .iter()
            .zip(args.iter())
            .filter_map(|(slot, value)| match (slot, value) {
                (ArgSlot::Flag, ArgValue::Flag(true)) => Some(String::new()),
                (ArgSlot::Flag, ArgValue::Flag(false)) => None,
                (_, ArgValue::Text(v)) => Some(v.clone()),
                (_, ArgValue::Integer(v)) => Some(v.to_string()),
                _ => value.as_text().map(|s| s.to_string()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_CATALOG: &[CatalogEntry] = &[
        CatalogEntry {
            id: "create-dataset",
            program: "/usr/sbin/zfs",
            args_schema: &[ArgSlot::PathUnderRoot { root: "/tank" }],
            timeout: Duration::from_secs(5),
            concurrency_class: ConcurrencyClass::ZfsWrite,
            json_output: false,
        },
        CatalogEntry {
            id: "list-pools",
            program: "/usr/sbin/zpool",
            args_schema: &[],
            timeout: Duration::from_secs(5),
            concurrency_class: ConcurrencyClass::ZfsRead,
            json_output: true,
        },
    ];

    #[test]
    fn resolve_unknown_is_not_found() {
        let cat = Catalog::from_entries(TEST_CATALOG);
        assert!(matches!(cat.resolve("nope"), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn identifier_rejects_shell_metacharacters() {
        let slot = ArgSlot::Identifier { pattern: None };
        for bad in [";rm -rf /", "a|b", "a&b", "a`b`", "a$(b)", "a\nb"] {
            let v = ArgValue::Text(bad.to_string());
            assert!(validate_slot(&slot, &v, 0).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn identifier_accepts_well_formed_name() {
        let slot = ArgSlot::Identifier { pattern: None };
        let v = ArgValue::Text("tank-data_01".to_string());
        assert!(validate_slot(&slot, &v, 0).is_ok());
    }

    #[test]
    fn enum_rejects_out_of_set_value() {
        let slot = ArgSlot::Enum(&["online", "offline"]);
        let v = ArgValue::Text("definitely-not-a-state".to_string());
        assert!(validate_slot(&slot, &v, 0).is_err());
    }

    #[test]
    fn integer_range_is_enforced() {
        let slot = ArgSlot::IntegerRange { min: 0, max: 10 };
        assert!(validate_slot(&slot, &ArgValue::Integer(5), 0).is_ok());
        assert!(validate_slot(&slot, &ArgValue::Integer(11), 0).is_err());
    }
}
