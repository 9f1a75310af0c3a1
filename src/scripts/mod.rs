//! Script library
//!
//! User-authored scripts live as `.m` files in one durable directory,
//! addressed by bare name. Creation validates the name against the
//! interpreter's identifier rules so a stored script is always runnable
//! by name.

use crate::models::SectionInfo;
use crate::sections;
use crate::utils::errors::{EngineError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// The interpreter caps identifiers at 63 characters (`namelengthmax`)
const MAX_NAME_LENGTH: usize = 63;

pub struct ScriptLibrary {
    dir: PathBuf,
}

impl ScriptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn script_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.m"))
    }

    /// Write a new script (or replace an existing one) and return its path
    pub fn create(&self, name: &str, code: &str) -> Result<PathBuf> {
        if !is_valid_script_name(name) {
            return Err(EngineError::InvalidScriptName(name.to_string()));
        }

        let path = self.script_path(name);
        std::fs::write(&path, code)?;
        info!("Created MATLAB script: {}", path.display());
        Ok(path)
    }

    /// Read a script's content by name
    pub fn read(&self, name: &str) -> Result<String> {
        let path = self.script_path(name);
        if !path.exists() {
            return Err(EngineError::ScriptNotFound(path));
        }
        Ok(std::fs::read_to_string(path)?)
    }

    /// Section layout of a stored script
    pub fn sections(&self, name: &str) -> Result<Vec<SectionInfo>> {
        Ok(sections::locate(&self.read(name)?))
    }

    /// Names of all stored scripts, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("m") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Identifier rules: leading letter, then letters, digits, underscores
fn is_valid_script_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return false;
    }
    let mut chars = name.chars();
    chars
        .next()
        .map(|first| first.is_ascii_alphabetic())
        .unwrap_or(false)
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
