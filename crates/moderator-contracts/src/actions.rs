use crate::reply::ParsedReply;

/// Replies below this safety confidence raise an alert even when flagged safe.
pub const SAFETY_CONFIDENCE_FLOOR: u64 = 80;

/// Audience tiers that warrant telling the account owner, matched on the
/// token text exactly.
pub const ELEVATED_AUDIENCE_CATEGORIES: [&str; 2] = ["3", "4"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorAction {
    /// Content safety review.
    Alert,
    /// Safe content aimed at an elevated audience tier.
    NotifyOwner { summary: String },
}

impl OperatorAction {
    /// Console code understood by the review tooling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Alert => "ALERT_CS",
            Self::NotifyOwner { .. } => "NOTIFY_ACCOUNT_OWNER",
        }
    }
}

/// Actions owed for a parsed reply, alert first.
pub fn derive_actions(parsed: &ParsedReply) -> Vec<OperatorAction> {
    let mut actions = Vec::new();
    if !parsed.is_safe || parsed.safety_confidence < SAFETY_CONFIDENCE_FLOOR {
        actions.push(OperatorAction::Alert);
    }
    let elevated = ELEVATED_AUDIENCE_CATEGORIES.contains(&parsed.audience_category.as_str());
    if parsed.is_safe && elevated {
        actions.push(OperatorAction::NotifyOwner {
            summary: parsed.audience_reason.replace(['\n', '\r'], " "),
        });
    }
    actions
}

/// Trailing path component, used as the human-readable item label.
pub fn item_label(item: &str) -> &str {
    item.rsplit('/').next().unwrap_or(item)
}
