use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub processed: u64,
    pub skipped: u64,
    pub skipped_items: Vec<String>,
    pub alerts: u64,
    pub notifications: u64,
    pub outputs: Vec<String>,
}

impl RunSummary {
    /// Console report printed when the run ends.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Processed files: {}", self.processed),
            format!("Number of skipped files: {}", self.skipped),
            format!("Skipped files: [{}]", self.skipped_items.join(", ")),
            format!("Alerts raised: {}", self.alerts),
            format!("Owner notifications: {}", self.notifications),
        ];
        if !self.outputs.is_empty() {
            lines.push(format!("Local results saved: {}", self.outputs.join(" and ")));
        }
        lines.join("\n")
    }
}
