//! Recipient list encoding.
//!
//! Lists are stored as a JSON array. Reading back also accepts plain
//! comma or semicolon separated text, which is what operators type when
//! re-sending by hand.

use pressdesk_core::error::Result;

/// Encode a recipient list for storage.
pub fn encode_recipients(recipients: &[String]) -> Result<String> {
    Ok(serde_json::to_string(recipients)?)
}

/// Parse a stored or hand-typed recipient list. Blank entries are dropped.
pub fn parse_recipients(raw: &str) -> Result<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let list: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw)?
    } else {
        raw.split([',', ';']).map(str::to_string).collect()
    };
    Ok(list
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_array() {
        let parsed = parse_recipients(r#"["a@x.com", " b@y.org "]"#).unwrap();
        assert_eq!(parsed, vec!["a@x.com", "b@y.org"]);
    }

    #[test]
    fn test_delimited_text() {
        let parsed = parse_recipients("a@x.com, b@y.org;c@z.net,,").unwrap();
        assert_eq!(parsed, vec!["a@x.com", "b@y.org", "c@z.net"]);
    }

    #[test]
    fn test_empty() {
        assert!(parse_recipients("   ").unwrap().is_empty());
        assert!(parse_recipients("[]").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_string_json() {
        assert!(parse_recipients("[1, 2]").is_err());
        assert!(parse_recipients("['a@x.com']").is_err());
    }

    #[test]
    fn test_encode_is_json() {
        let encoded = encode_recipients(&["a@x.com".into(), "b@y.org".into()]).unwrap();
        assert_eq!(encoded, r#"["a@x.com","b@y.org"]"#);
    }
}
