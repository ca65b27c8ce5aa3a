//! Fix application: write a suggestion's edits under the working directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::types::Edit;

/// Apply `edits` in order and return the distinct files touched.
///
/// Every edit is resolved against staged contents first; nothing is written
/// unless all of them succeed.
pub fn apply_edits(workdir: &Path, edits: &[Edit]) -> Result<Vec<PathBuf>> {
    let mut staged: Vec<(PathBuf, PathBuf, String)> = Vec::new();
    for edit in edits {
        let relative = edit.file();
        let path = contained_path(workdir, relative)?;
        let slot = match staged.iter().position(|(rel, _, _)| rel == relative) {
            Some(slot) => slot,
            None => {
                let current = match edit {
                    Edit::Write { .. } => String::new(),
                    Edit::Replace { .. } => read_existing(&path, true)?,
                    Edit::Append { .. } => read_existing(&path, false)?,
                };
                staged.push((relative.clone(), path.clone(), current));
                staged.len() - 1
            }
        };
        let contents = &mut staged[slot].2;
        match edit {
            Edit::Replace { find, replace, .. } => {
                *contents = replace_first(&path, contents, find, replace)?;
            }
            Edit::Write { contents: new, .. } => *contents = new.clone(),
            Edit::Append { contents: extra, .. } => contents.push_str(extra),
        }
    }

    let mut touched = Vec::with_capacity(staged.len());
    for (relative, path, contents) in staged {
        ensure_parent(&path)?;
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        debug!(file = %relative.display(), "edit applied");
        touched.push(relative);
    }
    Ok(touched)
}

/// Current contents of `path`; a missing file reads as empty unless `required`.
fn read_existing(path: &Path, required: bool) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == ErrorKind::NotFound && !required => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

fn replace_first(path: &Path, contents: &str, find: &str, replace: &str) -> Result<String> {
    if find.is_empty() {
        return Err(anyhow!("replace edit for {} has empty search text", path.display()));
    }
    let Some(at) = contents.find(find) else {
        return Err(anyhow!("search text not found in {}", path.display()));
    };
    let mut updated = String::with_capacity(contents.len() + replace.len());
    updated.push_str(&contents[..at]);
    updated.push_str(replace);
    updated.push_str(&contents[at + find.len()..]);
    Ok(updated)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(())
}

/// Join `relative` onto `workdir`, rejecting absolute paths and `..`.
fn contained_path(workdir: &Path, relative: &Path) -> Result<PathBuf> {
    if relative.as_os_str().is_empty() {
        return Err(anyhow!("edit target path is empty"));
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(anyhow!(
                    "edit target {} must be relative to the working directory",
                    relative.display()
                ));
            }
        }
    }
    Ok(workdir.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_write_and_append() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("a.txt"), "foo foo").expect("seed");

        let touched = apply_edits(
            root,
            &[
                Edit::Replace {
                    file: PathBuf::from("a.txt"),
                    find: "foo".to_string(),
                    replace: "bar".to_string(),
                },
                Edit::Write {
                    file: PathBuf::from("nested/b.txt"),
                    contents: "new".to_string(),
                },
                Edit::Append {
                    file: PathBuf::from("a.txt"),
                    contents: "!".to_string(),
                },
            ],
        )
        .expect("apply");

        assert_eq!(fs::read_to_string(root.join("a.txt")).expect("read"), "bar foo!");
        assert_eq!(fs::read_to_string(root.join("nested/b.txt")).expect("read"), "new");
        assert_eq!(touched, vec![PathBuf::from("a.txt"), PathBuf::from("nested/b.txt")]);
    }

    #[test]
    fn missing_search_text_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), "abc").expect("seed");
        let err = apply_edits(
            temp.path(),
            &[Edit::Replace {
                file: PathBuf::from("a.txt"),
                find: "zzz".to_string(),
                replace: "y".to_string(),
            }],
        )
        .expect_err("should fail");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn failing_edit_leaves_earlier_edits_unwritten() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("c.txt"), "keep").expect("seed");

        let err = apply_edits(
            root,
            &[
                Edit::Write {
                    file: PathBuf::from("a.txt"),
                    contents: "new".to_string(),
                },
                Edit::Append {
                    file: PathBuf::from("c.txt"),
                    contents: " more".to_string(),
                },
                Edit::Replace {
                    file: PathBuf::from("b.txt"),
                    find: "x".to_string(),
                    replace: "y".to_string(),
                },
            ],
        )
        .expect_err("missing replace target should fail");

        assert!(err.to_string().contains("b.txt"));
        assert!(!root.join("a.txt").exists());
        assert_eq!(fs::read_to_string(root.join("c.txt")).expect("read"), "keep");
    }

    #[test]
    fn edits_to_one_file_compose_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        let touched = apply_edits(
            root,
            &[
                Edit::Write {
                    file: PathBuf::from("new.txt"),
                    contents: "alpha".to_string(),
                },
                Edit::Replace {
                    file: PathBuf::from("new.txt"),
                    find: "alpha".to_string(),
                    replace: "beta".to_string(),
                },
            ],
        )
        .expect("apply");

        assert_eq!(fs::read_to_string(root.join("new.txt")).expect("read"), "beta");
        assert_eq!(touched, vec![PathBuf::from("new.txt")]);
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        for file in ["../outside.txt", "/etc/passwd"] {
            let err = apply_edits(
                temp.path(),
                &[Edit::Write {
                    file: PathBuf::from(file),
                    contents: String::new(),
                }],
            )
            .expect_err("should reject");
            assert!(err.to_string().contains("must be relative"));
        }
    }
}
