//! Zip extraction for downloaded tools and packed toolsets

use crate::errors::{BuildError, Result};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Unpack an in-memory zip archive into `dest`
///
/// `source` names the archive in error messages.
pub fn extract_zip_bytes(bytes: &[u8], dest: &Path, source: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| BuildError::Archive {
        path: source.to_path_buf(),
        message: e.to_string(),
    })?;
    fs::create_dir_all(dest).map_err(|e| BuildError::io(dest, e))?;
    archive.extract(dest).map_err(|e| BuildError::Archive {
        path: source.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!(
        "Extracted {} entries from {} into {}",
        archive.len(),
        source.display(),
        dest.display()
    );
    Ok(())
}

/// Unpack a zip archive on disk into `dest`
pub fn extract_zip_file(path: &Path, dest: &Path) -> Result<()> {
    let bytes = fs::read(path).map_err(|e| BuildError::io(path, e))?;
    extract_zip_bytes(&bytes, dest, path)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;

    /// Build a zip archive holding the given files
    pub fn zip_with(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options: zip::write::FileOptions<()> = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for (name, contents) in files {
                zip.start_file(*name, options).unwrap();
                zip.write_all(contents).unwrap();
            }
            zip.finish().unwrap();
        }
        buffer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::zip_with;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_nested_entries() {
        let temp = TempDir::new().unwrap();
        let bytes = zip_with(&[("procdump.exe", b"exe"), ("tools/readme.txt", b"hi")]);

        extract_zip_bytes(&bytes, temp.path(), Path::new("Procdump.zip")).unwrap();

        assert_eq!(fs::read(temp.path().join("procdump.exe")).unwrap(), b"exe");
        assert!(temp.path().join("tools/readme.txt").is_file());
    }

    #[test]
    fn test_invalid_archive() {
        let temp = TempDir::new().unwrap();
        let result = extract_zip_bytes(b"not a zip", temp.path(), Path::new("bad.zip"));
        assert!(matches!(result, Err(BuildError::Archive { .. })));
    }

    #[test]
    fn test_extract_file_missing() {
        let temp = TempDir::new().unwrap();
        let result = extract_zip_file(&temp.path().join("none.nupkg"), temp.path());
        assert!(matches!(result, Err(BuildError::Io { .. })));
    }
}
