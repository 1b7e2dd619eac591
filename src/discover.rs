//! File discovery
//!
//! Recursive walk with include/exclude glob filtering and extension-based
//! language detection. The engine itself only needs (path, content) pairs;
//! this is the collaborator that produces them.

use anyhow::{Context, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// An input unit of work for the engine
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub language: String,
}

/// Collect files under `root` matching the include patterns and not the
/// exclude patterns. A `root` that is itself a file bypasses include
/// filtering.
pub fn discover(
    root: &Path,
    include: &[String],
    exclude: &[String],
) -> Result<Vec<DiscoveredFile>> {
    let include: Vec<Pattern> = include
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();
    let exclude: Vec<Pattern> = exclude
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();

    if root.is_file() {
        return Ok(vec![read_file(root)?]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        // Filter on the path relative to the root so a dot-prefixed root
        // directory does not hide its own contents
        let rel = path.strip_prefix(root).unwrap_or(path);
        if !should_analyze(rel, &include, &exclude) {
            continue;
        }
        match read_file(path) {
            Ok(file) => files.push(file),
            Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn read_file(path: &Path) -> Result<DiscoveredFile> {
    let content = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(DiscoveredFile {
        path: path.to_path_buf(),
        language: detect_language(path).to_string(),
        content,
    })
}

fn should_analyze(path: &Path, include: &[Pattern], exclude: &[Pattern]) -> bool {
    // Hidden directories and files are always out
    if path
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
    {
        return false;
    }
    for pattern in exclude {
        let matched = path
            .components()
            .any(|c| pattern.matches(&c.as_os_str().to_string_lossy()))
            || pattern.matches_path(path);
        if matched {
            return false;
        }
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    include.is_empty() || include.iter().any(|p| p.matches(&name) || p.matches_path(path))
}

/// Programming language from file extension
pub fn detect_language(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "java" => "java",
        "cpp" | "cc" | "cxx" => "cpp",
        "c" | "h" => "c",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(Path::new("a/b/main.py")), "python");
        assert_eq!(detect_language(Path::new("lib.rs")), "rust");
        assert_eq!(detect_language(Path::new("x.CC")), "cpp");
        assert_eq!(detect_language(Path::new("README")), "unknown");
    }

    #[test]
    fn test_discover_respects_patterns() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("src/app.py"), "print('hi')").unwrap();
        fs::write(dir.path().join("src/notes.txt"), "notes").unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();

        let files = discover(
            dir.path(),
            &strings(&["*.py", "*.js"]),
            &strings(&["node_modules"]),
        )
        .unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("src/app.py"));
        assert_eq!(files[0].language, "python");
    }

    #[test]
    fn test_discover_single_file_bypasses_include() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.lua");
        fs::write(&path, "return 1").unwrap();

        let files = discover(&path, &strings(&["*.py"]), &[]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, b"return 1");
    }

    #[test]
    fn test_hidden_paths_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config.py"), "x").unwrap();
        fs::write(dir.path().join("visible.py"), "y").unwrap();

        let files = discover(dir.path(), &strings(&["*.py"]), &[]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("visible.py"));
    }
}
