use serde::{Deserialize, Serialize};

use crate::reply::ParsedReply;

/// One output row per processed item.
///
/// Failure rows carry `error_kind` and have every other field zeroed; the
/// two constructors are the only way the crate builds a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub item_id: String,
    pub is_safe: bool,
    pub safety_confidence: u64,
    pub safety_reason: String,
    pub audience_category: String,
    pub audience_confidence: u64,
    pub audience_reason: String,
    /// Seconds spent waiting on the assistant.
    pub run_time: f64,
    pub error_kind: Option<String>,
}

impl ClassificationRecord {
    pub fn success(item_id: impl Into<String>, parsed: ParsedReply, run_time: f64) -> Self {
        Self {
            item_id: item_id.into(),
            is_safe: parsed.is_safe,
            safety_confidence: parsed.safety_confidence,
            safety_reason: parsed.safety_reason,
            audience_category: parsed.audience_category,
            audience_confidence: parsed.audience_confidence,
            audience_reason: parsed.audience_reason,
            run_time,
            error_kind: None,
        }
    }

    pub fn failure(item_id: impl Into<String>, error_kind: &str) -> Self {
        Self {
            item_id: item_id.into(),
            is_safe: false,
            safety_confidence: 0,
            safety_reason: String::new(),
            audience_category: "0".to_string(),
            audience_confidence: 0,
            audience_reason: String::new(),
            run_time: 0.0,
            error_kind: Some(error_kind.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error_kind.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::ClassificationRecord;
    use crate::reply::parse_reply;

    #[test]
    fn success_record_copies_parsed_fields() {
        let parsed = parse_reply("Y 95 looks fine 1 99 general audience").unwrap();
        let record = ClassificationRecord::success("cats/tabby.jpg", parsed, 6.5);
        assert_eq!(record.item_id, "cats/tabby.jpg");
        assert!(record.is_safe);
        assert_eq!(record.safety_confidence, 95);
        assert_eq!(record.audience_reason, "general audience");
        assert_eq!(record.run_time, 6.5);
        assert!(!record.is_failure());
    }

    #[test]
    fn failure_record_is_zeroed() {
        let record = ClassificationRecord::failure("dogs/pug.png", "Timeout");
        assert!(!record.is_safe);
        assert_eq!(record.safety_confidence, 0);
        assert_eq!(record.audience_category, "0");
        assert_eq!(record.audience_confidence, 0);
        assert!(record.safety_reason.is_empty());
        assert!(record.audience_reason.is_empty());
        assert_eq!(record.run_time, 0.0);
        assert_eq!(record.error_kind.as_deref(), Some("Timeout"));
        assert!(record.is_failure());
    }
}
