//! Derives the filesystem locations shared by the engine components.
//!
//! Log rotation, the session store and the template renderer each need to
//! agree on where their files live. [`Layout`] centralises that mapping so the
//! naming rules (`<script>.log`, `<script>.bk.log`, `<session>.dat`) are
//! written down once.

use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Canonical paths for artefacts written and read by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    log_dir: PathBuf,
    store_dir: PathBuf,
    template_dir: PathBuf,
}

impl Layout {
    /// Derives the layout from the shared configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_dir: config.log_dir().as_std_path().to_path_buf(),
            store_dir: config.store_dir().as_std_path().to_path_buf(),
            template_dir: config.template_dir().as_std_path().to_path_buf(),
        }
    }

    /// Creates the log and store directories when they are missing.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::Directory`] if a directory cannot be created.
    pub fn prepare_directories(&self) -> Result<(), LayoutError> {
        for dir in [&self.log_dir, &self.store_dir] {
            fs::create_dir_all(dir).map_err(|source| LayoutError::Directory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Directory holding per-script log files.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_path()
    }

    /// Directory holding session stores.
    #[must_use]
    pub fn store_dir(&self) -> &Path {
        self.store_dir.as_path()
    }

    /// Root directory for templates.
    #[must_use]
    pub fn template_dir(&self) -> &Path {
        self.template_dir.as_path()
    }

    /// Active log file for a script. The key must already be validated.
    #[must_use]
    pub fn log_file(&self, script: &str) -> PathBuf {
        self.log_dir.join(format!("{script}.log"))
    }

    /// Single-generation backup produced by rotation.
    #[must_use]
    pub fn backup_log_file(&self, script: &str) -> PathBuf {
        self.log_dir.join(format!("{script}.bk.log"))
    }

    /// Backing file of a session store. The id must already be validated.
    #[must_use]
    pub fn store_file(&self, session: &str) -> PathBuf {
        self.store_dir.join(format!("{session}.dat"))
    }

    /// Advisory lock file guarding a session store.
    #[must_use]
    pub fn store_lock_file(&self, session: &str) -> PathBuf {
        self.store_dir.join(format!("{session}.lock"))
    }

    /// Resolves a template reference below the template root.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::UnsafeTemplate`] when the reference is empty,
    /// absolute, or climbs out of the template root.
    pub fn template_path(&self, reference: &str) -> Result<PathBuf, LayoutError> {
        let relative = Path::new(reference);
        let is_plain = !reference.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(LayoutError::UnsafeTemplate {
                reference: reference.to_owned(),
            });
        }
        Ok(self.template_dir.join(relative))
    }
}

/// Errors raised while deriving or preparing the engine layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Creating a directory failed.
    #[error("failed to prepare directory '{path}': {source}")]
    Directory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A template reference escaped the template root.
    #[error("template reference '{reference}' must be a relative path inside the template root")]
    UnsafeTemplate {
        /// Offending reference.
        reference: String,
    },
}
