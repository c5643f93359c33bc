use crate::error::{Error, Result};

const MAX_USERNAME_LEN: usize = 64;
const MAX_EMAIL_LEN: usize = 254;

fn is_valid_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

pub fn validate_username(name: &str) -> Result<()> {
    let invalid = |message: String| Error::bad_request("invalid_username", message);
    if name.is_empty() {
        return Err(invalid("username cannot be empty".to_string()));
    }
    if name.len() > MAX_USERNAME_LEN {
        return Err(invalid(format!(
            "username cannot exceed {MAX_USERNAME_LEN} characters"
        )));
    }
    if !name.chars().all(is_valid_username_char) {
        return Err(invalid(
            "username can only contain alphanumeric characters, hyphens, underscores, and periods"
                .to_string(),
        ));
    }
    if name.starts_with(['-', '_', '.']) {
        return Err(invalid(
            "username cannot start with a hyphen, underscore or period".to_string(),
        ));
    }
    Ok(())
}

/// Shape check only: one `@` with something on both sides.
pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let valid = email.len() <= MAX_EMAIL_LEN
        && !email.chars().any(char::is_whitespace)
        && matches!(email.split_once('@'), Some((local, domain))
            if !local.is_empty() && domain.contains('.') && !domain.contains('@')
                && !domain.starts_with('.') && !domain.ends_with('.'));
    if !valid {
        return Err(Error::bad_request(
            "invalid_email",
            format!("'{email}' is not a valid email address"),
        ));
    }
    Ok(())
}

pub fn require_ids(ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Err(Error::bad_request("invalid_request", "at least one id is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("alice.smith-2").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("_alice").is_err());
        assert!(validate_username("alice smith").is_err());
        assert!(validate_username(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("alice@localhost").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("alice@@example.com").is_err());
        assert!(validate_email("ali ce@example.com").is_err());
    }

    #[test]
    fn test_require_ids() {
        assert!(require_ids(&[]).is_err());
        assert!(require_ids(&["a".to_string()]).is_ok());
    }
}
