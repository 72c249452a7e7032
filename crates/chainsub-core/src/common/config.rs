//! Read-only view over the physical job configuration (`spectrumsdt.config`).
//!
//! Only the `key = value` line shape is understood; everything after `!` or
//! `#` is a comment. Keys are case-insensitive.

use crate::domain::{ChainError, ChainResult, Stage, Symmetry};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const JOB_CONFIG_FILE_NAME: &str = "spectrumsdt.config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfiguration {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JobConfiguration {
    pub fn load(path: impl AsRef<Path>) -> ChainResult<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| {
            ChainError::config(
                "CONFIG.READ",
                format!(
                    "failed to read job configuration '{}': {}",
                    path.display(),
                    source
                ),
            )
        })?;
        Self::from_source(path, &source)
    }

    pub fn from_source(path: impl Into<PathBuf>, source: &str) -> ChainResult<Self> {
        let path = path.into();
        let mut entries = BTreeMap::new();
        for (line_index, raw_line) in source.lines().enumerate() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ChainError::config(
                    "CONFIG.SYNTAX",
                    format!(
                        "expected 'key = value' at {}:{}, found '{}'",
                        path.display(),
                        line_index + 1,
                        line
                    ),
                ));
            };
            entries.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn stage(&self) -> ChainResult<Stage> {
        let value = match self.raw("mode") {
            Some(value) => Some(value),
            None => self.raw("stage"),
        };
        let value = value.ok_or_else(|| self.missing("mode"))?;
        self.reject_placeholder("mode", value)?;
        value.parse()
    }

    pub fn total_angular_momentum(&self) -> ChainResult<u32> {
        self.parse_required("j")
    }

    /// Inclusive K range; a single value `K = 3` yields `(3, 3)`.
    pub fn k_range(&self) -> ChainResult<(u32, u32)> {
        let value = self.required("k")?;
        let parts: Vec<&str> = value
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .collect();
        let parsed = parts
            .iter()
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| self.malformed("k", value))?;
        match parsed.as_slice() {
            [k] => Ok((*k, *k)),
            [start, end] if start <= end => Ok((*start, *end)),
            _ => Err(self.malformed("k", value)),
        }
    }

    pub fn symmetry(&self) -> ChainResult<Symmetry> {
        let code: u32 = self.parse_required("symmetry")?;
        if code > 1 {
            return Err(self.malformed("symmetry", &code.to_string()));
        }
        Ok(Symmetry::from_code(code))
    }

    pub fn parity(&self) -> ChainResult<Option<u32>> {
        self.parse_optional("parity")
    }

    pub fn fix_basis(&self) -> ChainResult<bool> {
        Ok(self.parse_optional::<u32>("fix_basis_jk")?.unwrap_or(0) == 1)
    }

    pub fn basis_k(&self) -> ChainResult<u32> {
        self.parse_required("basis_k")
    }

    pub fn root_path(&self) -> ChainResult<PathBuf> {
        self.path_value("root_path")
    }

    pub fn basis_root_path(&self) -> ChainResult<PathBuf> {
        self.path_value("basis_root_path")
    }

    pub fn grid_path(&self) -> ChainResult<PathBuf> {
        self.path_value("grid_path")
    }

    /// Number of vectors the eigensolver retains (`ncv`).
    pub fn retained_vectors(&self) -> ChainResult<u32> {
        let ncv: u32 = self.parse_required("ncv")?;
        if ncv == 0 {
            return Err(self.malformed("ncv", "0"));
        }
        Ok(ncv)
    }

    pub fn number_of_states(&self) -> ChainResult<u32> {
        self.parse_required("num_states")
    }

    fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn required(&self, key: &str) -> ChainResult<&str> {
        let value = self.raw(key).ok_or_else(|| self.missing(key))?;
        self.reject_placeholder(key, value)?;
        Ok(value)
    }

    fn parse_required<T: FromStr>(&self, key: &str) -> ChainResult<T> {
        let value = self.required(key)?;
        value.parse().map_err(|_| self.malformed(key, value))
    }

    fn parse_optional<T: FromStr>(&self, key: &str) -> ChainResult<Option<T>> {
        match self.raw(key) {
            None => Ok(None),
            Some(value) => {
                self.reject_placeholder(key, value)?;
                value.parse().map(Some).map_err(|_| self.malformed(key, value))
            }
        }
    }

    fn path_value(&self, key: &str) -> ChainResult<PathBuf> {
        let value = self.required(key)?;
        let path = PathBuf::from(value.trim_matches('"'));
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.directory().join(path))
        }
    }

    fn reject_placeholder(&self, key: &str, value: &str) -> ChainResult<()> {
        if value.starts_with('{') && value.ends_with('}') {
            return Err(ChainError::config(
                "CONFIG.UNRESOLVED_PLACEHOLDER",
                format!(
                    "key '{}' in '{}' still holds placeholder '{}'",
                    key,
                    self.path.display(),
                    value
                ),
            ));
        }
        Ok(())
    }

    fn missing(&self, key: &str) -> ChainError {
        ChainError::config(
            "CONFIG.MISSING_KEY",
            format!(
                "job configuration '{}' does not define '{}'",
                self.path.display(),
                key
            ),
        )
    }

    fn malformed(&self, key: &str, value: &str) -> ChainError {
        ChainError::config(
            "CONFIG.INVALID_VALUE",
            format!(
                "invalid value '{}' for '{}' in '{}'",
                value,
                key,
                self.path.display()
            ),
        )
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(['!', '#']) {
        Some(index) => &line[..index],
        None => line,
    }
}

/// Replaces every `{name}` in the configuration file with `value`.
///
/// Returns `false` without touching the file when no placeholder is left,
/// so repeated calls are no-ops.
pub fn resolve_placeholder(path: &Path, name: &str, value: &str) -> ChainResult<bool> {
    let source = fs::read_to_string(path).map_err(|source| {
        ChainError::config(
            "CONFIG.READ",
            format!(
                "failed to read job configuration '{}': {}",
                path.display(),
                source
            ),
        )
    })?;

    let placeholder = format!("{{{}}}", name);
    if !source.contains(&placeholder) {
        return Ok(false);
    }

    fs::write(path, source.replace(&placeholder, value)).map_err(|source| {
        ChainError::io_system(
            "IO.CONFIG_WRITE",
            format!(
                "failed to write job configuration '{}': {}",
                path.display(),
                source
            ),
        )
    })?;
    Ok(true)
}
