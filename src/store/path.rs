use crate::error::{Error, Result};

pub const MAX_NAME_LENGTH: usize = 255;

/// Validates a single file or folder name and returns it trimmed.
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(Error::bad_request("invalid_name", "Name cannot be empty"));
    }

    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::bad_request(
            "invalid_name",
            "Name cannot exceed 255 characters",
        ));
    }

    if name == "." || name == ".." {
        return Err(Error::bad_request("invalid_name", "Name is reserved"));
    }

    const INVALID_CHARS: &[char] = &['/', '\0', '\n', '\r'];
    if name.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(Error::bad_request(
            "invalid_name",
            "Name contains invalid characters",
        ));
    }

    Ok(name.to_string())
}

/// Splits a `/`-delimited path into its components. `/` yields no components.
pub fn split_path(path: &str) -> Result<Vec<String>> {
    let path = path.trim();

    if !path.starts_with('/') {
        return Err(Error::bad_request(
            "invalid_path",
            format!("Path '{path}' must start with '/'"),
        ));
    }

    path.split('/')
        .filter(|s| !s.is_empty())
        .map(validate_name)
        .collect()
}

/// Splits a path into its parent path and leaf name.
/// Returns `None` for `/`, which has no parent.
pub fn split_leaf(path: &str) -> Result<Option<(String, String)>> {
    let mut components = split_path(path)?;
    let Some(leaf) = components.pop() else {
        return Ok(None);
    };
    Ok(Some((format!("/{}", components.join("/")), leaf)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  report.pdf ").unwrap(), "report.pdf");
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("line\nbreak").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name(&"x".repeat(255)).is_ok());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_split_path() {
        assert!(split_path("/").unwrap().is_empty());
        assert_eq!(split_path("/W1").unwrap(), vec!["W1"]);
        assert_eq!(
            split_path("/W1//docs/plans/").unwrap(),
            vec!["W1", "docs", "plans"]
        );
        assert!(split_path("W1").is_err());
    }

    #[test]
    fn test_split_leaf() {
        assert_eq!(split_leaf("/").unwrap(), None);
        assert_eq!(
            split_leaf("/W1").unwrap(),
            Some(("/".to_string(), "W1".to_string()))
        );
        assert_eq!(
            split_leaf("/W1/docs/a.txt").unwrap(),
            Some(("/W1/docs".to_string(), "a.txt".to_string()))
        );
    }
}
