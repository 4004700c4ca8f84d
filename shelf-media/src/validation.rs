//! Input validation for media paths

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Maximum asset size (100 MB)
pub const MAX_OBJECT_SIZE: usize = 100 * 1024 * 1024;

/// Maximum path depth below the media root
pub const MAX_PATH_DEPTH: usize = 10;

/// Media validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Object size {size} exceeds maximum {max}")]
    ObjectTooLarge { size: usize, max: usize },

    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Path too deep: {depth} levels (max: {max})")]
    PathTooDeep { depth: usize, max: usize },

    #[error("Invalid path component: {0}")]
    InvalidPathComponent(String),

    #[error("Empty path")]
    EmptyPath,
}

/// Validate asset size
pub fn validate_object_size(size: usize, max: usize) -> Result<(), ValidationError> {
    if size > max {
        return Err(ValidationError::ObjectTooLarge { size, max });
    }
    Ok(())
}

/// Validate a single path segment such as a group, id or kind
pub fn validate_segment(segment: &str) -> Result<(), ValidationError> {
    if segment.is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if segment == "." || segment == ".." || segment.contains("..") {
        return Err(ValidationError::PathTraversal(segment.to_string()));
    }
    if segment.contains('/') || segment.contains('\\') {
        return Err(ValidationError::PathTraversal(format!(
            "Separator in path segment: {}",
            segment
        )));
    }
    if segment.contains('\0') {
        return Err(ValidationError::InvalidPathComponent(
            "Null bytes not allowed in path".to_string(),
        ));
    }
    Ok(())
}

/// Validate a caller-supplied relative path and return its normalized form.
///
/// `.` components are dropped. Anything that could leave the root (`..`,
/// absolute paths, Windows prefixes, backslash separators) is rejected rather
/// than clamped.
pub fn validate_relative_path(raw: &str) -> Result<PathBuf, ValidationError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if raw.contains('\\') {
        return Err(ValidationError::PathTraversal(
            "Backslash separators not allowed".to_string(),
        ));
    }

    let mut normalized = PathBuf::new();
    let mut depth = 0;

    for component in Path::new(raw).components() {
        match component {
            Component::Normal(name) => {
                depth += 1;
                if depth > MAX_PATH_DEPTH {
                    return Err(ValidationError::PathTooDeep {
                        depth,
                        max: MAX_PATH_DEPTH,
                    });
                }

                let name_str = name.to_string_lossy();

                // Hidden names collide with in-flight temp files
                if name_str.starts_with('.') {
                    return Err(ValidationError::InvalidPathComponent(format!(
                        "Hidden files not allowed: {}",
                        name_str
                    )));
                }
                if name_str.contains('\0') {
                    return Err(ValidationError::InvalidPathComponent(
                        "Null bytes not allowed in path".to_string(),
                    ));
                }
                normalized.push(name);
            }
            Component::ParentDir => {
                return Err(ValidationError::PathTraversal(
                    "Parent directory references not allowed".to_string(),
                ));
            }
            Component::RootDir => {
                return Err(ValidationError::PathTraversal(
                    "Absolute paths not allowed".to_string(),
                ));
            }
            Component::CurDir => {}
            Component::Prefix(_) => {
                return Err(ValidationError::PathTraversal(
                    "Windows path prefixes not allowed".to_string(),
                ));
            }
        }
    }

    if depth == 0 {
        return Err(ValidationError::EmptyPath);
    }

    Ok(normalized)
}

/// Join a validated relative path under `root`, checking the result stays inside it
pub fn resolve_within_root(root: &Path, raw: &str) -> Result<PathBuf, ValidationError> {
    let relative = validate_relative_path(raw)?;
    let resolved = root.join(&relative);

    if !resolved.starts_with(root) {
        return Err(ValidationError::PathTraversal(format!(
            "Path escapes root directory: {}",
            raw
        )));
    }

    Ok(resolved)
}
