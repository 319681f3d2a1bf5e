//! The versioned migration directory and its integrity manifest.
//!
//! A directory holds one `.sql` file per migration, named
//! `<version>_<description>.sql`, plus `atlas.sum`: a manifest with one
//! content hash per file and a directory-level hash sealing the whole set.
//! Any edit to a file invalidates the manifest until `migrate hash` re-seals
//! it.

use crate::directives::{delimiter_directive, scan_directives, tx_mode_directive, Directive, TxMode};
use crate::statements::{split_sql_statements, Stmt};
use crate::{ConnectorError, ConnectorResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const SUM_FILE_NAME: &str = "atlas.sum";

/// `h1:<base64(sha256(bytes))>`, the hash form used throughout the manifest.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("h1:{}", BASE64.encode(Sha256::digest(bytes)))
}

/// Formats an instant as a migration version stamp.
pub fn version_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// A parsed migration file.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationFile {
    pub file_name: String,
    pub version: String,
    pub description: String,
    pub contents: String,
    pub directives: Vec<Directive>,
}

impl MigrationFile {
    /// Parses a directory entry. Returns `None` for files that are not
    /// migration files (including the sum file).
    pub fn parse(file_name: &str, contents: String) -> Option<MigrationFile> {
        let stem = file_name.strip_suffix(".sql")?;
        let (version, description) = match stem.split_once('_') {
            Some((version, description)) => (version, description),
            None => (stem, ""),
        };
        if version.is_empty() {
            return None;
        }

        let directives = scan_directives(&contents);

        Some(MigrationFile {
            file_name: file_name.to_owned(),
            version: version.to_owned(),
            description: description.to_owned(),
            contents,
            directives,
        })
    }

    pub fn checksum(&self) -> String {
        hash_bytes(self.contents.as_bytes())
    }

    /// The statements of this file, honoring a `atlas:delimiter` directive.
    pub fn statements(&self) -> ConnectorResult<Vec<Stmt>> {
        let delimiter = delimiter_directive(&self.directives);
        split_sql_statements(&self.contents, delimiter.as_deref())
    }

    /// The file-level transaction mode, if the file declares one.
    pub fn tx_mode(&self) -> ConnectorResult<Option<TxMode>> {
        tx_mode_directive(&self.directives)
    }
}

/// The integrity manifest. `dir_hash` seals the entry list; each entry seals
/// one file's bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct HashFile {
    pub dir_hash: String,
    pub files: Vec<(String, String)>,
}

impl HashFile {
    pub fn from_entries(files: Vec<(String, String)>) -> HashFile {
        let dir_hash = directory_hash(&files);
        HashFile { dir_hash, files }
    }

    pub fn parse(text: &str) -> ConnectorResult<HashFile> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let dir_hash = lines
            .next()
            .filter(|l| l.starts_with("h1:"))
            .ok_or_else(|| ConnectorError::ChecksumMismatch {
                file: SUM_FILE_NAME.to_owned(),
            })?
            .to_owned();

        let mut files = Vec::new();
        for line in lines {
            let (name, hash) = line.rsplit_once(' ').ok_or_else(|| ConnectorError::ChecksumMismatch {
                file: SUM_FILE_NAME.to_owned(),
            })?;
            files.push((name.trim().to_owned(), hash.to_owned()));
        }

        Ok(HashFile { dir_hash, files })
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(64 * (self.files.len() + 1));
        out.push_str(&self.dir_hash);
        out.push('\n');
        for (name, hash) in &self.files {
            out.push_str(name);
            out.push(' ');
            out.push_str(hash);
            out.push('\n');
        }
        out
    }
}

fn directory_hash(files: &[(String, String)]) -> String {
    let mut lines: Vec<String> = files.iter().map(|(name, hash)| format!("{name} {hash}")).collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("h1:{}", BASE64.encode(hasher.finalize()))
}

/// A migration directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDir {
    path: PathBuf,
}

impl LocalDir {
    /// Opens an existing directory.
    pub fn open(path: impl Into<PathBuf>) -> ConnectorResult<LocalDir> {
        let path = path.into();
        if !path.is_dir() {
            return Err(ConnectorError::configuration(format!(
                "migration directory {} does not exist",
                path.display()
            )));
        }
        Ok(LocalDir { path })
    }

    /// Opens the directory, creating it (and parents) when missing.
    pub fn create(path: impl Into<PathBuf>) -> ConnectorResult<LocalDir> {
        let path = path.into();
        fs::create_dir_all(&path).map_err(|err| ConnectorError::io(format!("creating {}", path.display()), err))?;
        Ok(LocalDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All migration files, ascending by version.
    pub fn files(&self) -> ConnectorResult<Vec<MigrationFile>> {
        let entries = fs::read_dir(&self.path)
            .map_err(|err| ConnectorError::io(format!("reading {}", self.path.display()), err))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| ConnectorError::io("reading migration directory entry", err))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            if !name.ends_with(".sql") {
                continue;
            }
            let contents = fs::read_to_string(entry.path())
                .map_err(|err| ConnectorError::io(format!("reading {name}"), err))?;
            if let Some(file) = MigrationFile::parse(name, contents) {
                files.push(file);
            }
        }

        files.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.file_name.cmp(&b.file_name)));

        for pair in files.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(ConnectorError::configuration(format!(
                    "duplicate migration version {}: {} and {}",
                    pair[0].version, pair[0].file_name, pair[1].file_name
                )));
            }
        }

        Ok(files)
    }

    pub fn write_file(&self, file_name: &str, contents: &str) -> ConnectorResult<()> {
        let path = self.path.join(file_name);
        fs::write(&path, contents).map_err(|err| ConnectorError::io(format!("writing {}", path.display()), err))
    }

    /// Recomputes the manifest from the files on disk.
    pub fn checksum(&self) -> ConnectorResult<HashFile> {
        let entries = self
            .files()?
            .into_iter()
            .map(|file| {
                let hash = file.checksum();
                (file.file_name, hash)
            })
            .collect();
        Ok(HashFile::from_entries(entries))
    }

    /// Reads `atlas.sum`. Missing file is `ChecksumNotFound`.
    pub fn read_sum_file(&self) -> ConnectorResult<HashFile> {
        let path = self.path.join(SUM_FILE_NAME);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConnectorError::ChecksumNotFound);
            }
            Err(err) => return Err(ConnectorError::io(format!("reading {}", path.display()), err)),
        };
        HashFile::parse(&text)
    }

    /// Replaces `atlas.sum` atomically (write-to-temp, then rename).
    pub fn write_sum_file(&self, hash_file: &HashFile) -> ConnectorResult<()> {
        tracing::debug!(dir = %self.path.display(), entries = hash_file.files.len(), "writing sum file");
        let tmp = self.path.join(format!("{SUM_FILE_NAME}.tmp"));
        let target = self.path.join(SUM_FILE_NAME);
        fs::write(&tmp, hash_file.render())
            .map_err(|err| ConnectorError::io(format!("writing {}", tmp.display()), err))?;
        fs::rename(&tmp, &target).map_err(|err| ConnectorError::io(format!("renaming to {}", target.display()), err))
    }

    /// Recomputes the manifest and writes it out. Every directory mutation
    /// must end with this.
    pub fn sync_sum(&self) -> ConnectorResult<()> {
        self.write_sum_file(&self.checksum()?)
    }

    /// Verifies the directory against `atlas.sum`.
    pub fn validate(&self) -> ConnectorResult<()> {
        let stored = self.read_sum_file()?;
        let actual = self.checksum()?;

        for (name, actual_hash) in &actual.files {
            match stored.files.iter().find(|(stored_name, _)| stored_name == name) {
                Some((_, stored_hash)) if stored_hash == actual_hash => {}
                _ => return Err(ConnectorError::ChecksumMismatch { file: name.clone() }),
            }
        }

        for (name, _) in &stored.files {
            if !actual.files.iter().any(|(actual_name, _)| actual_name == name) {
                return Err(ConnectorError::ChecksumMismatch { file: name.clone() });
            }
        }

        if stored.dir_hash != actual.dir_hash {
            return Err(ConnectorError::ChecksumMismatch {
                file: SUM_FILE_NAME.to_owned(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dir_with(files: &[(&str, &str)]) -> (tempfile::TempDir, LocalDir) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = LocalDir::open(tmp.path()).unwrap();
        for (name, contents) in files {
            dir.write_file(name, contents).unwrap();
        }
        dir.sync_sum().unwrap();
        (tmp, dir)
    }

    #[test]
    fn files_are_ordered_by_version() {
        let (_tmp, dir) = dir_with(&[
            ("20220318104615_second.sql", "SELECT 2;"),
            ("20220318104614_initial.sql", "SELECT 1;"),
        ]);

        let files = dir.files().unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, &["20220318104614_initial.sql", "20220318104615_second.sql"]);
        assert_eq!(files[0].version, "20220318104614");
        assert_eq!(files[0].description, "initial");
    }

    #[test]
    fn validate_accepts_a_sealed_directory() {
        let (_tmp, dir) = dir_with(&[("20220318104614_initial.sql", "CREATE TABLE tbl (`col` int NOT NULL);")]);
        dir.validate().unwrap();
    }

    #[test]
    fn byte_level_edits_break_validation() {
        let (tmp, dir) = dir_with(&[("20220318104614_initial.sql", "SELECT 1;")]);

        let path = tmp.path().join("20220318104614_initial.sql");
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push(' ');
        fs::write(&path, contents).unwrap();

        match dir.validate() {
            Err(ConnectorError::ChecksumMismatch { file }) => {
                assert_eq!(file, "20220318104614_initial.sql");
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }

        dir.sync_sum().unwrap();
        dir.validate().unwrap();
    }

    #[test]
    fn missing_sum_file_is_its_own_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = LocalDir::open(tmp.path()).unwrap();
        dir.write_file("1_init.sql", "SELECT 1;").unwrap();

        assert!(matches!(dir.validate(), Err(ConnectorError::ChecksumNotFound)));
    }

    #[test]
    fn sum_file_round_trips() {
        let (_tmp, dir) = dir_with(&[("1_a.sql", "SELECT 1;"), ("2_b.sql", "SELECT 2;")]);
        let stored = dir.read_sum_file().unwrap();
        let reparsed = HashFile::parse(&stored.render()).unwrap();
        assert_eq!(stored, reparsed);
        assert!(stored.render().starts_with("h1:"));
    }
}
