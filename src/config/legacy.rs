//! Migration of deprecated config sections into `[core-daemon]`.
//!
//! Older installs wrote their settings under `[cored.py]` or `[cored]`. Those
//! entries are copied into the canonical section, with the old program name
//! in the pidfile/logfile basename replaced by the new one.

use std::path::Path;

use super::CANONICAL_SECTION;

/// A deprecated section name and the program name embedded in its paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacySection {
    pub section: &'static str,
    pub program: &'static str,
}

/// Legacy sections in the order they are applied.
pub const LEGACY_SECTIONS: &[LegacySection] = &[
    LegacySection {
        section: "cored.py",
        program: "coredpy",
    },
    LegacySection {
        section: "cored",
        program: "cored",
    },
];

/// Keys whose basenames carry the program name.
const PATH_KEYS: &[&str] = &["pidfile", "logfile"];

/// Map a legacy section's entries onto canonical entries.
pub fn migrate<'a>(
    legacy: &LegacySection,
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<(String, String)> {
    entries
        .into_iter()
        .map(|(key, value)| {
            let value = if PATH_KEYS.contains(&key) {
                rename_basename(value, legacy.program)
            } else {
                value.to_string()
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Replace `program` with the canonical name in the basename of `path`,
/// leaving the directory untouched.
fn rename_basename(path: &str, program: &str) -> String {
    let p = Path::new(path);
    let Some(name) = p.file_name().and_then(|n| n.to_str()) else {
        return path.to_string();
    };
    let renamed = name.replace(program, CANONICAL_SECTION);
    match p.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(renamed).to_string_lossy().into_owned(),
        _ => renamed,
    }
}
