//! Output file naming.
//!
//! `base_name` is pure. `NameArbiter::reserve_unique` turns a base name into
//! a path nobody else holds: the probe and the create happen together under
//! a process-wide mutex plus an advisory lock on `.locks/filename.lock`, and
//! each candidate is created with `create_new`, so a returned path is owned
//! by exactly one caller even across processes sharing the directory.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::NamingError;
use crate::parser::ParsedMessage;

/// Give up after this many candidates.
pub const MAX_PROBES: usize = 10_000;

const LOCK_DIR: &str = ".locks";
const LOCK_FILE: &str = "filename.lock";

/// `"<YYYYMMDD> - <label>[ - <total>][ - GST <tax>]"`, with `/` and `:`
/// replaced by `-`.
pub fn base_name(message: &ParsedMessage, label: &str) -> String {
    let mut name = format!("{} - {label}", message.naming_date());
    if let Some(total) = &message.fields.total {
        name.push_str(&format!(" - {total}"));
    }
    if let Some(tax) = &message.fields.tax {
        name.push_str(&format!(" - GST {tax}"));
    }
    name.replace(['/', ':'], "-")
}

/// `base.pdf`, `base (1).pdf`, `base (2).pdf`, ...
pub fn candidate_name(base: &str, counter: usize) -> String {
    if counter == 0 {
        format!("{base}.pdf")
    } else {
        format!("{base} ({counter}).pdf")
    }
}

/// An output path created (empty) on behalf of one caller.
#[derive(Debug)]
pub struct Reservation {
    path: PathBuf,
    file: File,
}

impl Reservation {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fill the reserved file. On failure the empty file is removed.
    pub fn write(mut self, bytes: &[u8]) -> Result<PathBuf, NamingError> {
        let written = self
            .file
            .write_all(bytes)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = written {
            drop(self.file);
            if let Err(cleanup) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %cleanup, "Failed to remove partial output");
            }
            return Err(e.into());
        }
        Ok(self.path)
    }
}

/// Resolves base names to unique paths inside one output directory.
#[derive(Debug)]
pub struct NameArbiter {
    dir: PathBuf,
    guard: Mutex<()>,
    max_probes: usize,
}

impl NameArbiter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            guard: Mutex::new(()),
            max_probes: MAX_PROBES,
        }
    }

    pub fn with_max_probes(mut self, max_probes: usize) -> Self {
        self.max_probes = max_probes;
        self
    }

    /// Path of the advisory lock shared with other processes.
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_DIR).join(LOCK_FILE)
    }

    pub fn reserve_unique(&self, base: &str) -> Result<Reservation, NamingError> {
        // A poisoned guard only means another reservation panicked; the
        // filesystem is still the source of truth.
        let _in_process = self
            .guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let lock = self.open_lock()?;
        lock.lock_exclusive()?;
        let reserved = self.probe(base);
        if let Err(e) = FileExt::unlock(&lock) {
            warn!(error = %e, "Failed to release naming lock");
        }
        reserved
    }

    /// Created on first use, never removed.
    fn open_lock(&self) -> Result<File, NamingError> {
        let path = self.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?)
    }

    fn probe(&self, base: &str) -> Result<Reservation, NamingError> {
        for counter in 0..self.max_probes {
            let path = self.dir.join(candidate_name(base, counter));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!(path = %path.display(), "Reserved output name");
                    return Ok(Reservation { path, file });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(NamingError::Exhausted {
            base: base.to_string(),
            probes: self.max_probes,
        })
    }
}
