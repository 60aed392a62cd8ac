//! Migration files on disk
//!
//! Files live in the migration directory and are named
//! `<version>_<comment>.json`. Anything else in the directory is ignored.
//!
//! Writers stage new files under a `.staged` name while their transaction
//! runs and publish them only after it commits, so a failed snapshot or
//! checkpoint leaves the directory as it was.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::schema::{MigrationScript, SchemaDef, SchemaSnapshot};
use crate::version::Version;

/// A migration file found in the migration directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationEntry {
    pub version: Version,
    pub comment: String,
    pub path: PathBuf,
}

impl MigrationEntry {
    pub fn load(&self) -> Result<MigrationFile> {
        MigrationFile::load(&self.path)
    }
}

/// Contents of a migration file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MigrationFile {
    /// Full schema: the first snapshot, or a checkpoint
    Initial { version: Version, schema: SchemaDef },
    Incremental(MigrationScript),
}

#[derive(Deserialize)]
struct InitialFile {
    version: Version,
    schema: SchemaDef,
}

impl MigrationFile {
    pub fn from_value(value: &Value, source: &str) -> Result<Self> {
        if value.get("schema").is_some() {
            let file: InitialFile = serde_json::from_value(value.clone())
                .map_err(|e| MigrateError::malformed(source, e.to_string()))?;
            return Ok(MigrationFile::Initial {
                version: file.version,
                schema: file.schema,
            });
        }
        MigrationScript::from_value(value, source).map(MigrationFile::Incremental)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_value(&value, &source)
    }

    /// Write a new file; existing migration files are never overwritten
    pub fn write_new(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Files written during a transaction, moved into place after it commits
#[derive(Debug, Default)]
pub(crate) struct StagedFiles {
    writes: Vec<(PathBuf, PathBuf)>,
    removals: Vec<PathBuf>,
}

impl StagedFiles {
    /// Where `target` is written until it is published
    pub(crate) fn staging_path(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(OsString::new);
        name.push(".staged");
        target.with_file_name(name)
    }

    /// Stage a new migration file; an existing file is only replaced when it
    /// is also staged for removal
    pub(crate) fn stage_migration(&mut self, file: &MigrationFile, target: PathBuf) -> Result<()> {
        if target.exists() && !self.removals.contains(&target) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            )
            .into());
        }
        let staged = Self::staging_path(&target);
        if staged.is_file() {
            fs::remove_file(&staged)?;
        }
        file.write_new(&staged)?;
        self.writes.push((staged, target));
        Ok(())
    }

    pub(crate) fn stage_snapshot(&mut self, snapshot: &SchemaSnapshot, target: PathBuf) -> Result<()> {
        let staged = Self::staging_path(&target);
        snapshot.save(&staged)?;
        self.writes.push((staged, target));
        Ok(())
    }

    /// Delete `path` once the staged files are in place
    pub(crate) fn remove(&mut self, path: PathBuf) {
        self.removals.push(path);
    }

    /// Move staged files into place, then delete the files marked for removal
    pub(crate) fn publish(self) -> Result<()> {
        for (staged, target) in &self.writes {
            fs::rename(staged, target)?;
        }
        for path in &self.removals {
            if self.writes.iter().any(|(_, target)| target == path) {
                continue;
            }
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Delete everything staged so far
    pub(crate) fn discard(self) {
        for (staged, _) in &self.writes {
            if let Err(err) = fs::remove_file(staged) {
                warn!(path = %staged.display(), error = %err, "unable to remove staged file");
            }
        }
    }
}

/// File name slug: every character outside `[A-Za-z0-9]` becomes `_`
pub fn slug(comment: &str) -> String {
    let slug: String = comment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if slug.is_empty() {
        "snapshot".to_string()
    } else {
        slug
    }
}

pub fn file_name(version: Version, comment: &str) -> String {
    format!("{}_{}.json", version, slug(comment))
}

/// Split `<digits>_<word>.json` into its padded version and comment
fn parse_file_name(name: &str) -> Option<(Version, String)> {
    let stem = name.strip_suffix(".json")?;
    let (digits, comment) = stem.split_once('_')?;
    let word = !comment.is_empty()
        && comment
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_');
    if !word {
        return None;
    }
    let version = Version::parse_padded(digits).ok()?;
    Some((version, comment.to_string()))
}

/// All migration files, ascending by version
pub fn scan(dir: &Path) -> Result<Vec<MigrationEntry>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/*.json",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let mut entries = Vec::new();
    for path in glob::glob(&pattern)? {
        let path = path?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match parse_file_name(name) {
            Some((version, comment)) => entries.push(MigrationEntry {
                version,
                comment,
                path,
            }),
            None => debug!(file = %name, "ignoring file in migration directory"),
        }
    }

    entries.sort_by_key(|e| e.version);
    if let Some(pair) = entries.windows(2).find(|p| p[0].version == p[1].version) {
        return Err(MigrateError::DuplicateVersion {
            version: pair[1].version,
            path: pair[1].path.clone(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Add users table!"), "Add_users_table_");
        assert_eq!(slug("Initial Snapshot"), "Initial_Snapshot");
        assert_eq!(slug(""), "snapshot");
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("20240101000000_Initial_Snapshot.json"),
            Some((Version::new(20240101000000), "Initial_Snapshot".to_string()))
        );
        assert_eq!(
            parse_file_name("2024_short.json"),
            Some((Version::new(20240000000000), "short".to_string()))
        );
        assert_eq!(parse_file_name("notes.json"), None);
        assert_eq!(parse_file_name("2024_x.txt"), None);
        assert_eq!(parse_file_name("2024_.json"), None);
        assert_eq!(parse_file_name("2024_a-b.json"), None);
        assert_eq!(parse_file_name("202401010000001_late.json"), None);
    }

    #[test]
    fn test_scan_sorts_and_ignores() {
        let dir = tempdir().unwrap();
        for name in [
            "20240301000000_third.json",
            "20240101000000_first.json",
            "20240201000000_second.json",
            "README.md",
            "draft.json",
        ] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }

        let entries = scan(dir.path()).unwrap();
        let versions: Vec<i64> = entries.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![20240101000000, 20240201000000, 20240301000000]);
        assert_eq!(entries[0].comment, "first");
    }

    #[test]
    fn test_scan_missing_directory() {
        let dir = tempdir().unwrap();
        assert!(scan(&dir.path().join("migrate")).unwrap().is_empty());
    }

    #[test]
    fn test_scan_rejects_duplicate_versions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("20240101000000_a.json"), "{}").unwrap();
        fs::write(dir.path().join("20240101000000_b.json"), "{}").unwrap();
        assert!(matches!(
            scan(dir.path()),
            Err(MigrateError::DuplicateVersion { .. })
        ));
    }

    #[test]
    fn test_file_kinds() {
        let initial = json!({ "version": "20240101000000", "schema": { "tables": {} } });
        assert!(matches!(
            MigrationFile::from_value(&initial, "a").unwrap(),
            MigrationFile::Initial { .. }
        ));

        let script = json!({ "up": { "remove": { "table": ["main.users"] } }, "down": {} });
        match MigrationFile::from_value(&script, "b").unwrap() {
            MigrationFile::Incremental(script) => assert!(script.down.is_some()),
            other => panic!("unexpected file: {:?}", other),
        }
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_staged_files_publish() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("20240101000000_old.json");
        fs::write(&old, "{}").unwrap();
        let target = dir.path().join(file_name(Version::new(20240102000000), "Checkpoint"));
        let file = MigrationFile::Initial {
            version: Version::new(20240102000000),
            schema: SchemaDef::default(),
        };

        let mut staged = StagedFiles::default();
        staged.remove(old.clone());
        staged.stage_migration(&file, target.clone()).unwrap();
        assert_eq!(
            names(dir.path()),
            vec![
                "20240101000000_old.json",
                "20240102000000_Checkpoint.json.staged"
            ]
        );
        assert_eq!(scan(dir.path()).unwrap().len(), 1);

        staged.publish().unwrap();
        assert_eq!(names(dir.path()), vec!["20240102000000_Checkpoint.json"]);
        assert_eq!(MigrationFile::load(&target).unwrap(), file);
    }

    #[test]
    fn test_staged_files_discard() {
        let dir = tempdir().unwrap();
        let target = dir.path().join(file_name(Version::new(20240101000000), "x"));
        let file = MigrationFile::Incremental(MigrationScript::default());

        let mut staged = StagedFiles::default();
        staged.stage_migration(&file, target.clone()).unwrap();
        staged.discard();
        assert!(names(dir.path()).is_empty());

        fs::write(&target, "{}").unwrap();
        let mut staged = StagedFiles::default();
        assert!(staged.stage_migration(&file, target).is_err());
    }

    #[test]
    fn test_write_new_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("migrate").join(file_name(Version::new(1), "x"));
        let file = MigrationFile::Initial {
            version: Version::new(1),
            schema: SchemaDef::default(),
        };
        file.write_new(&path).unwrap();
        assert_eq!(MigrationFile::load(&path).unwrap(), file);
        assert!(file.write_new(&path).is_err());
    }
}
