//! Resource loading from a repository worktree.
//!
//! The loader walks regular files under the configured root, keeps those
//! with a `.yaml`/`.yml` extension, sorts them lexicographically by path,
//! and parses each as a stream of YAML documents. The concatenation of
//! all documents in path order is the batch. Namespaces and paths are
//! normalized as documents are parsed.

use serde::Deserialize;
use thiserror::Error;

use crate::resource::Resource;
use crate::source::{SourceError, WorktreeRepo};

/// Errors from loading resources out of a worktree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoaderError {
    /// Walking or reading the worktree failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A YAML file failed to parse.
    #[error("{path}: {source}")]
    Parse {
        /// Worktree-relative path of the offending file.
        path: String,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
}

/// Loads the resource batch from the repository worktree.
///
/// `root_path` scopes the walk: when non-empty, only files whose cleaned
/// path equals the root or sits beneath it are considered. Empty means
/// the whole worktree.
///
/// # Errors
///
/// Returns [`LoaderError`] if the walk fails or any file does not parse.
pub fn load_resources(
    repo: &dyn WorktreeRepo,
    root_path: &str,
) -> Result<Vec<Resource>, LoaderError> {
    let root = clean_path(root_path);

    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    repo.for_each_file(&mut |entry| {
        if entry.is_dir || entry.symlink_target.is_some() {
            return Ok(());
        }
        let Some(reader) = entry.reader else {
            return Ok(());
        };
        if !has_yaml_extension(entry.path) {
            return Ok(());
        }
        if !root.is_empty() {
            let cleaned = clean_path(entry.path);
            if cleaned != root && !cleaned.starts_with(&format!("{root}/")) {
                return Ok(());
            }
        }
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents)?;
        files.push((entry.path.to_string(), contents));
        Ok(())
    })?;

    files.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut resources = Vec::new();
    for (path, contents) in &files {
        resources.extend(parse_documents(path, contents)?);
    }
    Ok(resources)
}

/// Parses one file as a multi-document YAML stream. Empty documents are
/// skipped; everything else must decode as a [`Resource`].
fn parse_documents(path: &str, contents: &[u8]) -> Result<Vec<Resource>, LoaderError> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(contents) {
        let value = serde_yaml::Value::deserialize(document).map_err(|source| {
            LoaderError::Parse {
                path: path.to_string(),
                source,
            }
        })?;
        if value.is_null() {
            continue;
        }
        let mut resource: Resource =
            serde_yaml::from_value(value).map_err(|source| LoaderError::Parse {
                path: path.to_string(),
                source,
            })?;
        resource.normalize();
        resources.push(resource);
    }
    Ok(resources)
}

/// Whether the file's base name carries a `.yaml` or `.yml` extension,
/// case-insensitively.
fn has_yaml_extension(path: &str) -> bool {
    let base = path
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_ascii_lowercase();
    base.ends_with(".yaml") || base.ends_with(".yml")
}

/// Lexically cleans a `/`-separated relative path: drops empty and `.`
/// segments, resolves `..` against prior segments.
fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                segments.pop();
            },
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::source::{CommitInfo, SourceError, WorktreeEntry, WorktreeVisitor};

    /// Worktree fake: path → (symlink target, contents).
    #[derive(Default)]
    struct FakeRepo {
        files: BTreeMap<String, (Option<String>, Vec<u8>)>,
    }

    impl FakeRepo {
        fn with_file(mut self, path: &str, contents: &str) -> Self {
            self.files
                .insert(path.to_string(), (None, contents.as_bytes().to_vec()));
            self
        }

        fn with_symlink(mut self, path: &str, target: &str) -> Self {
            self.files
                .insert(path.to_string(), (Some(target.to_string()), Vec::new()));
            self
        }
    }

    impl WorktreeRepo for FakeRepo {
        fn head(&self) -> Result<CommitInfo, SourceError> {
            unimplemented!("loader tests never read history")
        }

        fn log_first_parent(&self, _from: &str) -> Result<Vec<CommitInfo>, SourceError> {
            unimplemented!("loader tests never read history")
        }

        fn checkout(&mut self, _hash: &str) -> Result<(), SourceError> {
            Ok(())
        }

        fn for_each_file(&self, visit: &mut WorktreeVisitor<'_>) -> Result<(), SourceError> {
            for (path, (symlink, contents)) in &self.files {
                let mut reader = contents.as_slice();
                let entry = WorktreeEntry {
                    path,
                    symlink_target: symlink.as_deref(),
                    reader: if symlink.is_some() {
                        None
                    } else {
                        Some(&mut reader)
                    },
                    is_dir: false,
                };
                visit(entry)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_loads_documents_in_path_order() {
        let repo = FakeRepo::default()
            .with_file("b.yaml", "path: kv1/b\ndata: {}")
            .with_file(
                "a.yml",
                "path: kv1/a1\ndata: {}\n---\npath: kv1/a2\ndata: {}",
            );

        let resources = load_resources(&repo, "").unwrap();
        let paths: Vec<&str> = resources.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["kv1/a1", "kv1/a2", "kv1/b"]);
    }

    #[test]
    fn test_skips_non_yaml_and_symlinks() {
        let repo = FakeRepo::default()
            .with_file("README.md", "not yaml")
            .with_file("script.sh", "path: nope")
            .with_symlink("link.yaml", "a.yaml")
            .with_file("real.YAML", "path: kv1/real\ndata: {}");

        let resources = load_resources(&repo, "").unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].path, "kv1/real");
    }

    #[test]
    fn test_root_path_scopes_the_walk() {
        let repo = FakeRepo::default()
            .with_file("vault/a.yaml", "path: kv1/in\ndata: {}")
            .with_file("vault-other/b.yaml", "path: kv1/out\ndata: {}")
            .with_file("c.yaml", "path: kv1/top\ndata: {}");

        let resources = load_resources(&repo, "vault").unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].path, "kv1/in");
    }

    #[test]
    fn test_root_path_may_name_a_single_file() {
        let repo = FakeRepo::default()
            .with_file("vault/a.yaml", "path: kv1/a\ndata: {}")
            .with_file("vault/b.yaml", "path: kv1/b\ndata: {}");

        let resources = load_resources(&repo, "vault/a.yaml").unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].path, "kv1/a");
    }

    #[test]
    fn test_empty_documents_are_skipped() {
        let repo = FakeRepo::default().with_file("a.yaml", "---\n---\npath: kv1/a\ndata: {}\n");
        let resources = load_resources(&repo, "").unwrap();
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn test_parse_errors_name_the_file() {
        let repo = FakeRepo::default().with_file("bad.yaml", "path: [unclosed");
        let err = load_resources(&repo, "").unwrap_err();
        assert!(err.to_string().starts_with("bad.yaml:"), "{err}");
    }

    #[test]
    fn test_namespace_and_path_are_normalized_on_load() {
        let repo =
            FakeRepo::default().with_file("a.yaml", "path: /kv1/a/\nnamespace: team\ndata: {}");
        let resources = load_resources(&repo, "").unwrap();
        assert_eq!(resources[0].path, "kv1/a");
        assert_eq!(resources[0].namespace, "team/");
    }
}
