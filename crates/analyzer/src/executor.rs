use crate::error::{AnalyzerError, Result};
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};

const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;
const MAX_GREP_MATCHES: usize = 1000;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GrepMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

/// Permission-checked primitive operations confined to one root directory.
///
/// Every incoming path is joined onto the root and canonicalised; anything
/// resolving outside (traversal components, absolute paths, symlinked
/// escapes) is rejected before the file is touched.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, proving containment.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            return Err(AnalyzerError::PathEscape(candidate.to_path_buf()));
        }
        if candidate
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(AnalyzerError::PathEscape(candidate.to_path_buf()));
        }
        let joined = self.root.join(candidate);
        let canonical = joined
            .canonicalize()
            .map_err(|_| AnalyzerError::NotFound(relative.to_string()))?;
        if !canonical.starts_with(&self.root) {
            return Err(AnalyzerError::PathEscape(joined));
        }
        Ok(canonical)
    }

    pub fn read_file(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        let size = std::fs::metadata(&path)?.len();
        if size > MAX_FILE_BYTES {
            return Err(AnalyzerError::FileTooLarge { path, size });
        }
        Ok(std::fs::read_to_string(&path)?)
    }

    /// Workspace-relative paths matching a glob, gitignore-aware, sorted.
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = compile_glob(pattern)?;
        let mut paths = Vec::new();
        for entry in ignore::Walk::new(&self.root).flatten() {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if matcher.is_match(relative) {
                paths.push(relative.to_string_lossy().to_string());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Immediate children of a directory, directories suffixed with `/`.
    pub fn list_dir(&self, relative: &str) -> Result<Vec<String>> {
        let dir = if relative.is_empty() {
            self.root.clone()
        } else {
            self.resolve(relative)?
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Regex search across workspace files, optionally restricted by an
    /// `include` glob. Output is bounded; callers see at most
    /// `MAX_GREP_MATCHES` rows.
    pub fn grep(&self, pattern: &str, include: Option<&str>) -> Result<Vec<GrepMatch>> {
        let regex = Regex::new(pattern)?;
        let include = include.map(compile_glob).transpose()?;

        let mut matches = Vec::new();
        'files: for entry in ignore::Walk::new(&self.root).flatten() {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if let Some(matcher) = &include {
                if !matcher.is_match(relative) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue; // binary or unreadable
            };
            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(GrepMatch {
                        path: relative.to_string_lossy().to_string(),
                        line: idx + 1,
                        text: line.trim_end().to_string(),
                    });
                    if matches.len() >= MAX_GREP_MATCHES {
                        log::warn!("grep output truncated at {MAX_GREP_MATCHES} matches");
                        break 'files;
                    }
                }
            }
        }
        Ok(matches)
    }
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()?
        .compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/main.rs"),
            "fn main() {\n    run();\n}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/lib.rs"),
            "pub fn run() {\n    println!(\"running\");\n}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
        let workspace = Workspace::new(dir.path()).unwrap();
        (dir, workspace)
    }

    #[test]
    fn read_file_within_root() {
        let (_dir, ws) = workspace();
        let content = ws.read_file("src/main.rs").unwrap();
        assert!(content.contains("fn main"));
    }

    #[test]
    fn traversal_and_absolute_paths_are_rejected() {
        let (_dir, ws) = workspace();
        assert!(matches!(
            ws.read_file("../outside.txt"),
            Err(AnalyzerError::PathEscape(_))
        ));
        assert!(matches!(
            ws.read_file("/etc/passwd"),
            Err(AnalyzerError::PathEscape(_))
        ));
    }

    #[test]
    fn glob_matches_relative_paths() {
        let (_dir, ws) = workspace();
        let rs = ws.glob("**/*.rs").unwrap();
        assert_eq!(rs, vec!["src/lib.rs".to_string(), "src/main.rs".to_string()]);
        let md = ws.glob("*.md").unwrap();
        assert_eq!(md, vec!["README.md".to_string()]);
    }

    #[test]
    fn list_dir_marks_directories() {
        let (_dir, ws) = workspace();
        let entries = ws.list_dir("").unwrap();
        assert!(entries.contains(&"src/".to_string()));
        assert!(entries.contains(&"README.md".to_string()));
    }

    #[test]
    fn grep_honours_include_glob() {
        let (_dir, ws) = workspace();
        let hits = ws.grep(r"fn \w+", Some("**/*.rs")).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|m| m.path.ends_with(".rs")));

        let none = ws.grep(r"fn \w+", Some("*.md")).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn grep_reports_one_based_lines() {
        let (_dir, ws) = workspace();
        let hits = ws.grep("run\\(\\)", Some("src/main.rs")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 2);
    }
}
