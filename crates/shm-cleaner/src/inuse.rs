//! Discovery of first-level entities currently held open by any process.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::entity::first_level_path;
use crate::error::{CleanupError, Result};

/// Default location of the open-file enumeration utility.
pub const DEFAULT_LSOF: &str = "/usr/bin/lsof";

/// Source of the in-use set for one cycle.
pub trait InUseResolver {
    /// Fail if this process cannot see every other process's open files.
    fn check_privileges(&self) -> Result<()>;

    /// First-level paths under the root that are open right now.
    fn resolve(&self) -> Result<BTreeSet<PathBuf>>;
}

/// Resolves the in-use set by running `lsof -lnP +D <root>`.
#[derive(Debug, Clone)]
pub struct LsofResolver {
    program: PathBuf,
    root: PathBuf,
}

impl LsofResolver {
    /// Run `program` against `root`.
    pub fn new(program: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            root: root.into(),
        }
    }

    fn run(&self) -> Result<Output> {
        Command::new(&self.program)
            .arg("-lnP")
            .arg("+D")
            .arg(&self.root)
            .output()
            .map_err(|source| CleanupError::ToolSpawn {
                program: self.program.clone(),
                source,
            })
    }
}

impl InUseResolver for LsofResolver {
    fn check_privileges(&self) -> Result<()> {
        // SAFETY: geteuid has no preconditions and cannot fail.
        if unsafe { libc::geteuid() } != 0 {
            return Err(CleanupError::PrivilegeRequired(self.root.clone()));
        }
        Ok(())
    }

    fn resolve(&self) -> Result<BTreeSet<PathBuf>> {
        let output = self.run()?;

        // lsof +D exits 1 whenever some scanned file is not open.
        match output.status.code() {
            Some(0) | Some(1) => {}
            _ => {
                return Err(CleanupError::ToolFailed {
                    program: self.program.clone(),
                    status: output.status.to_string(),
                })
            }
        }

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::debug!(program = %self.program.display(), "{}", line);
        }

        let listing = parse_lsof_output(&self.root, &String::from_utf8_lossy(&output.stdout));
        for line in &listing.anomalies {
            tracing::warn!(line = line.as_str(), "Unrecognized open-file listing line");
        }
        Ok(in_use_paths(listing))
    }
}

/// One NAME column entry, reduced to first-level paths under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedName {
    /// Every reading of the name: escapes decoded or literal, with and
    /// without each trailing note.
    pub readings: BTreeSet<PathBuf>,
    /// lsof marked the file `(deleted)`.
    pub deleted: bool,
}

/// Parsed stdout of the enumeration utility.
#[derive(Debug, Default)]
pub struct LsofListing {
    pub names: Vec<ListedName>,
    /// Lines that named nothing under the root.
    pub anomalies: Vec<String>,
}

impl LsofListing {
    /// Union of all readings of all names.
    pub fn paths(&self) -> BTreeSet<PathBuf> {
        self.names
            .iter()
            .flat_map(|name| name.readings.iter().cloned())
            .collect()
    }
}

/// Reduce each listed file to its first-level path under `root`.
///
/// The header line and lines naming the root itself are skipped silently.
pub fn parse_lsof_output(root: &Path, stdout: &str) -> LsofListing {
    let root_str = root.to_string_lossy();
    let prefix = format!("{}/", root_str.trim_end_matches('/'));
    let mut listing = LsofListing::default();

    for (index, raw) in stdout.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || (index == 0 && line.starts_with("COMMAND")) {
            continue;
        }

        let Some(start) = line.find(&prefix) else {
            if line.ends_with(&*root_str) {
                continue;
            }
            listing.anomalies.push(line.to_string());
            continue;
        };

        let (stages, deleted) = strip_notes(&line[start..]);
        let readings: BTreeSet<PathBuf> = stages
            .iter()
            .flat_map(|stage| [decode_lsof_name(stage), stage.as_bytes().to_vec()])
            .filter_map(|bytes| first_level_path(root, Path::new(OsStr::from_bytes(&bytes))))
            .collect();

        if readings.is_empty() {
            listing.anomalies.push(line.to_string());
        } else {
            listing.names.push(ListedName { readings, deleted });
        }
    }

    listing
}

/// Reduce parsed names to the in-use set, preferring readings present on disk.
///
/// A name none of whose readings exists is kept whole, unless lsof marked it
/// deleted: an unlinked file has no entity left to protect.
pub fn in_use_paths(listing: LsofListing) -> BTreeSet<PathBuf> {
    let mut in_use = BTreeSet::new();
    for name in listing.names {
        let present: Vec<PathBuf> = name
            .readings
            .iter()
            .filter(|path| path.symlink_metadata().is_ok())
            .cloned()
            .collect();

        if !present.is_empty() {
            in_use.extend(present);
        } else if name.deleted {
            tracing::debug!(readings = ?name.readings, "Open file already unlinked");
        } else {
            in_use.extend(name.readings);
        }
    }
    in_use
}

/// Peel trailing ` (...)` notes off a NAME column.
///
/// Returns the name after each peel, longest first, and whether one of the
/// notes was `deleted`.
fn strip_notes(name: &str) -> (Vec<&str>, bool) {
    let mut stages = vec![name];
    let mut deleted = false;
    let mut rest = name;
    while let Some(body) = rest.strip_suffix(')') {
        let Some(open) = body.rfind(" (") else {
            break;
        };
        deleted |= &body[open + 2..] == "deleted";
        rest = &body[..open];
        stages.push(rest);
    }
    (stages, deleted)
}

/// Undo lsof's escaping of non-printable bytes: `\b \f \n \r \t`, `^X`
/// control notation and `\xNN`.
fn decode_lsof_name(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let (byte, width) = match (bytes[i], bytes.get(i + 1).copied()) {
            (b'\\', Some(b'b')) => (0x08, 2),
            (b'\\', Some(b'f')) => (0x0c, 2),
            (b'\\', Some(b'n')) => (b'\n', 2),
            (b'\\', Some(b'r')) => (b'\r', 2),
            (b'\\', Some(b't')) => (b'\t', 2),
            (b'\\', Some(b'x')) => match bytes.get(i + 2..i + 4).and_then(hex_byte) {
                Some(byte) => (byte, 4),
                None => (b'\\', 1),
            },
            (b'^', Some(c @ b'@'..=b'_')) => (c - b'@', 2),
            (b'^', Some(b'?')) => (0x7f, 2),
            (b, _) => (b, 1),
        };
        out.push(byte);
        i += width;
    }
    out
}

fn hex_byte(digits: &[u8]) -> Option<u8> {
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    u8::from_str_radix(std::str::from_utf8(digits).ok()?, 16).ok()
}
