use serde::{Deserialize, Serialize};

/// Partial record harvested from a listing card
///
/// Only `identifier` and `detail_url` are guaranteed; the remaining fields
/// are whatever the card exposed and default to empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub identifier: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub organization: String,

    #[serde(default)]
    pub phone: String,

    #[serde(default)]
    pub description: String,

    /// Selection badge shown on the card (e.g. "Rising Stars")
    #[serde(default)]
    pub badge: String,

    pub detail_url: String,
}

impl ListingRecord {
    pub fn new(identifier: impl Into<String>, detail_url: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: String::new(),
            organization: String::new(),
            phone: String::new(),
            description: String::new(),
            badge: String::new(),
            detail_url: detail_url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{"identifier":"abc","detail_url":"https://p.example.com/abc.html"}"#;
        let record: ListingRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record, ListingRecord::new("abc", "https://p.example.com/abc.html"));
    }
}
