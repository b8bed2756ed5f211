//! Directory listing ordered by modification time.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tumor_core::Result;

/// Entry names of `dir`, oldest modification first.
///
/// Returns `Ok(None)` for an empty directory. A missing or unreadable
/// directory propagates the filesystem error. Entries with equal
/// timestamps keep name order.
pub fn list_by_mtime(dir: impl AsRef<Path>) -> Result<Option<Vec<String>>> {
    let mut entries: Vec<(SystemTime, String)> = Vec::new();

    for entry in fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        let modified = entry.metadata()?.modified()?;
        entries.push((modified, entry.file_name().to_string_lossy().into_owned()));
    }

    if entries.is_empty() {
        return Ok(None);
    }

    entries.sort();
    Ok(Some(entries.into_iter().map(|(_, name)| name).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;
    use tumor_core::Error;

    #[test]
    fn test_empty_directory_is_none() -> Result<()> {
        let dir = TempDir::new()?;
        assert_eq!(list_by_mtime(dir.path())?, None);
        Ok(())
    }

    #[test]
    fn test_missing_directory_is_error() {
        let result = list_by_mtime("/nonexistent/patches");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_orders_by_modification_time() -> Result<()> {
        let dir = TempDir::new()?;
        let base = SystemTime::now() - Duration::from_secs(3600);

        for (name, offset) in [("a.png", 30), ("b.png", 10), ("c.png", 20)] {
            let file = File::create(dir.path().join(name))?;
            file.set_modified(base + Duration::from_secs(offset))?;
        }

        let names = list_by_mtime(dir.path())?.unwrap();
        assert_eq!(names, vec!["b.png", "c.png", "a.png"]);
        Ok(())
    }
}
