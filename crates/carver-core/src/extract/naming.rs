//! Output naming helpers.

use std::path::{Component, Path, PathBuf};

/// Returns the first unused path of the form `base.ext`, `base-0.ext`, `base-1.ext`, ...
///
/// An empty extension produces names without a trailing dot. Dangling
/// symlinks count as taken.
pub fn unique_file_name(base: impl AsRef<Path>, extension: &str) -> PathBuf {
    let base = base.as_ref();
    let candidate = with_extension(base, None, extension);
    if !exists(&candidate) {
        return candidate;
    }

    let mut suffix = 0u64;
    loop {
        let candidate = with_extension(base, Some(suffix), extension);
        if !exists(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

fn with_extension(base: &Path, suffix: Option<u64>, extension: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    if let Some(suffix) = suffix {
        name.push(format!("-{}", suffix));
    }
    if !extension.is_empty() {
        name.push(".");
        name.push(extension);
    }
    PathBuf::from(name)
}

fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Number of path components of `path` below `anchor`, or `None` if it is not under it
pub fn depth_below(anchor: &Path, path: &Path) -> Option<usize> {
    let relative = path.strip_prefix(anchor).ok()?;
    Some(
        relative
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .count(),
    )
}

/// Final path component as a string, or the whole path if it has none
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::File;

    #[test]
    fn test_unique_file_name_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("100");

        let first = unique_file_name(&base, "bin");
        assert_eq!(first, dir.path().join("100.bin"));
        File::create(&first).unwrap();

        let second = unique_file_name(&base, "bin");
        assert_eq!(second, dir.path().join("100-0.bin"));
        File::create(&second).unwrap();

        assert_eq!(unique_file_name(&base, "bin"), dir.path().join("100-1.bin"));
    }

    #[test]
    fn test_unique_file_name_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("_fw.bin");
        std::fs::create_dir(&base).unwrap();
        assert_eq!(unique_file_name(&base, ""), dir.path().join("_fw.bin-0"));
    }

    #[test]
    fn test_depth_below() {
        let anchor = Path::new("/out/_fw.bin.extracted");
        assert_eq!(depth_below(anchor, anchor), Some(0));
        assert_eq!(depth_below(anchor, &anchor.join("a")), Some(1));
        assert_eq!(depth_below(anchor, &anchor.join("a/b/c")), Some(3));
        assert_eq!(depth_below(anchor, Path::new("/elsewhere/a")), None);
    }
}
