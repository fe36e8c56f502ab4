//! Migration Registry - discovers migration files on disk
//!
//! Filenames follow `<version>[-_]<name>[-<dialect-tag>].sql`. Files are
//! returned in ascending numeric version order, ties broken by filename.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::checksum::checksum;
use super::definitions::{DialectTag, MigrationFile};
use super::error::{MigrationError, MigrationResult};
use crate::backends::SqlDialect;

const MIGRATION_SUFFIX: &str = ".sql";

const CONVERSION_MARKERS: [&str; 2] = ["sqlite-to-postgres", "postgres-to-sqlite"];

static FILE_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<version>[0-9]+)(?:[-_](?P<rest>.*))?\.sql$").expect("migration filename pattern is valid")
});

/// The parts of a migration filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileName {
    pub version: i64,
    pub name: String,
    pub dialect_tag: DialectTag,
}

/// Split a filename into version, name and dialect tag
pub fn parse_file_name(file_name: &str) -> MigrationResult<ParsedFileName> {
    if !file_name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(MigrationError::parse(file_name, "filename has no leading version number"));
    }

    let captures = FILE_NAME_PATTERN.captures(file_name).ok_or_else(|| {
        MigrationError::parse(file_name, "version must be followed by '-', '_' or '.sql'")
    })?;

    let digits = &captures["version"];
    let version: i64 = digits
        .parse()
        .map_err(|_| MigrationError::parse(file_name, format!("version {} is out of range", digits)))?;
    if version == 0 {
        return Err(MigrationError::parse(file_name, "version must be a positive integer"));
    }

    let rest = captures.name("rest").map_or("", |m| m.as_str());
    let (name, dialect_tag) = split_dialect_tag(rest);

    Ok(ParsedFileName {
        version,
        name: name.to_string(),
        dialect_tag,
    })
}

fn split_dialect_tag(rest: &str) -> (&str, DialectTag) {
    let (name, last) = match rest.rsplit_once('-') {
        Some((name, last)) => (name, last),
        None => ("", rest),
    };

    let tag = match last.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => DialectTag::NetworkedOnly,
        "sqlite" => DialectTag::EmbeddedOnly,
        _ => return (rest, DialectTag::Generic),
    };
    (name, tag)
}

fn is_conversion_script(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    CONVERSION_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Reads the migrations directory for one dialect
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    migrations_dir: PathBuf,
    dialect: SqlDialect,
}

impl MigrationRegistry {
    pub fn new(migrations_dir: impl Into<PathBuf>, dialect: SqlDialect) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            dialect,
        }
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Every migration that applies to this dialect, ordered by version
    pub fn discover(&self) -> MigrationResult<Vec<MigrationFile>> {
        if !self.migrations_dir.exists() {
            warn!(
                "Migrations directory {} does not exist; nothing to apply",
                self.migrations_dir.display()
            );
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.migrations_dir).map_err(|source| MigrationError::Io {
            path: self.migrations_dir.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::Io {
                path: self.migrations_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                debug!("Skipping non UTF-8 filename {}", path.display());
                continue;
            };
            if !file_name.ends_with(MIGRATION_SUFFIX) {
                continue;
            }
            if is_conversion_script(&file_name) {
                debug!("Skipping conversion script {}", file_name);
                continue;
            }

            let parsed = parse_file_name(&file_name)?;
            if !parsed.dialect_tag.applies_to(self.dialect) {
                debug!("Skipping {} (not for {})", file_name, self.dialect);
                continue;
            }

            files.push(self.load(path, file_name, parsed)?);
        }

        files.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.file_name.cmp(&b.file_name)));

        if let Some(pair) = files.windows(2).find(|pair| pair[0].version == pair[1].version) {
            return Err(MigrationError::parse(
                pair[1].file_name.clone(),
                format!("version {} is also used by {}", pair[1].version, pair[0].file_name),
            ));
        }

        debug!(
            "Discovered {} migration(s) in {}",
            files.len(),
            self.migrations_dir.display()
        );
        Ok(files)
    }

    fn load(&self, path: PathBuf, file_name: String, parsed: ParsedFileName) -> MigrationResult<MigrationFile> {
        let bytes = fs::read(&path).map_err(|source| MigrationError::Io {
            path: path.clone(),
            source,
        })?;
        let checksum = checksum(&bytes);
        let body = String::from_utf8(bytes)
            .map_err(|_| MigrationError::parse(file_name.clone(), "file is not valid UTF-8"))?;

        Ok(MigrationFile {
            version: parsed.version,
            name: parsed.name,
            file_name,
            path,
            dialect_tag: parsed.dialect_tag,
            body,
            checksum,
        })
    }
}
