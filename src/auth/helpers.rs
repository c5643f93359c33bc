use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Username and password from a `Basic` authorization header.
pub fn extract_basic_credentials(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (username, password) = credentials.split_once(':')?;
    if username.is_empty() {
        return None;
    }

    Some((username.to_string(), password.to_string()))
}

/// Token from a `Bearer` authorization header.
pub fn extract_bearer_token(header: &str) -> Option<String> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Constant-time comparison for shared secrets such as the service API key.
pub fn secrets_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_basic_credentials() {
        let header = format!("Basic {}", STANDARD.encode("alice:pa:ss"));
        assert_eq!(
            extract_basic_credentials(&header),
            Some(("alice".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(extract_basic_credentials("Bearer abc"), None);
        assert_eq!(extract_basic_credentials("Basic !!!"), None);
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer volt_x").as_deref(), Some("volt_x"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("key", "key"));
        assert!(!secrets_match("key", "kex"));
        assert!(!secrets_match("key", "keys"));
    }
}
