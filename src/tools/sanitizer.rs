//! 路径净化：把用户给出的路径限制在允许的根目录内
//!
//! 先规范化根目录，再逐段解析目标路径：已存在的前缀用 canonicalize 展开符号链接，
//! 不存在的尾部按词法处理 `.` 与 `..`。解析结果必须等于根目录或位于其下，
//! 否则返回 SecurityError（如 ../../etc/passwd、指向根外的符号链接、绝对路径）。

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SecurityError {
    #[error("path '{}' escapes base directory '{}'", .target, .base)]
    PathEscape { target: String, base: String },

    #[error("invalid base directory '{}': {}", .base, .reason)]
    InvalidBase { base: String, reason: String },

    #[error("cannot resolve path '{}': {}", .target, .reason)]
    Unresolvable { target: String, reason: String },
}

/// 校验 target（相对 base 或绝对路径）解析后仍在 base 内，返回解析后的绝对路径
pub fn validate_safe_path(
    base: impl AsRef<Path>,
    target: impl AsRef<Path>,
) -> Result<PathBuf, SecurityError> {
    let base = base.as_ref();
    let target = target.as_ref();
    let base_canon = base.canonicalize().map_err(|e| SecurityError::InvalidBase {
        base: base.display().to_string(),
        reason: e.to_string(),
    })?;

    let resolved = resolve(&base_canon.join(target)).map_err(|e| SecurityError::Unresolvable {
        target: target.display().to_string(),
        reason: e.to_string(),
    })?;

    if resolved.starts_with(&base_canon) {
        Ok(resolved)
    } else {
        tracing::warn!(
            target = %target.display(),
            base = %base_canon.display(),
            "path traversal blocked"
        );
        Err(SecurityError::PathEscape {
            target: target.display().to_string(),
            base: base_canon.display().to_string(),
        })
    }
}

fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let mut resolved = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir => resolved.push(comp.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(part) => {
                resolved.push(part);
                // 已存在则立即展开，保证后续 `..` 作用在真实目录上
                if resolved.symlink_metadata().is_ok() {
                    resolved = resolved.canonicalize()?;
                }
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parent_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = validate_safe_path(dir.path(), "../../etc/passwd").unwrap_err();
        assert!(matches!(err, SecurityError::PathEscape { .. }));
    }

    #[test]
    fn test_relative_traversal_from_cwd_is_rejected() {
        assert!(validate_safe_path(".", "../../etc/passwd").is_err());
    }

    #[test]
    fn test_nonexistent_file_under_base_is_accepted() {
        let dir = TempDir::new().unwrap();
        let p = validate_safe_path(dir.path(), "sub/file.txt").unwrap();
        assert!(p.starts_with(dir.path().canonicalize().unwrap()));
        assert!(p.ends_with("sub/file.txt"));
    }

    #[test]
    fn test_base_itself_is_accepted() {
        let dir = TempDir::new().unwrap();
        let p = validate_safe_path(dir.path(), ".").unwrap();
        assert_eq!(p, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_inner_dotdot_that_stays_inside_is_accepted() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let p = validate_safe_path(dir.path(), "a/../b.txt").unwrap();
        assert_eq!(p, dir.path().canonicalize().unwrap().join("b.txt"));
    }

    #[test]
    fn test_absolute_path_outside_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(validate_safe_path(dir.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn test_sibling_with_common_prefix_is_rejected() {
        let parent = TempDir::new().unwrap();
        let base = parent.path().join("work");
        let sibling = parent.path().join("work2");
        std::fs::create_dir(&base).unwrap();
        std::fs::create_dir(&sibling).unwrap();
        assert!(validate_safe_path(&base, "../work2/x").is_err());
    }

    #[test]
    fn test_missing_base_is_invalid() {
        let dir = TempDir::new().unwrap();
        let err = validate_safe_path(dir.path().join("nope"), "x").unwrap_err();
        assert!(matches!(err, SecurityError::InvalidBase { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escaping_base_is_rejected() {
        let base = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), base.path().join("link")).unwrap();
        assert!(validate_safe_path(base.path(), "link/secret.txt").is_err());
    }
}
