use std::collections::HashMap;

use geoexports_core::ExportId;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// How an export job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportOutcome {
    Succeeded { location: String, row_count: usize },
    Failed { reason: String },
}

impl ExportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// The single message sent to a requester when their export job ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportNotification {
    pub recipient: String,
    pub export_id: ExportId,
    pub label: String,
    pub format: String,
    pub outcome: ExportOutcome,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

impl ExportNotification {
    pub const SUCCESS_TEMPLATE: &'static str = "export_success";
    pub const FAILURE_TEMPLATE: &'static str = "export_failure";

    pub fn new(
        recipient: impl Into<String>,
        export_id: ExportId,
        label: impl Into<String>,
        format: impl Into<String>,
        outcome: ExportOutcome,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            export_id,
            label: label.into(),
            format: format.into(),
            outcome,
            finished_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn template_id(&self) -> &'static str {
        if self.outcome.is_success() {
            Self::SUCCESS_TEMPLATE
        } else {
            Self::FAILURE_TEMPLATE
        }
    }

    /// Placeholder values for the message templates.
    pub fn template_data(&self) -> HashMap<String, Value> {
        let mut data = HashMap::from([
            ("export_id".to_string(), json!(self.export_id)),
            ("label".to_string(), json!(self.label)),
            ("format".to_string(), json!(self.format)),
            (
                "finished_at".to_string(),
                json!(self.finished_at.format(&Rfc3339).unwrap_or_default()),
            ),
        ]);
        match &self.outcome {
            ExportOutcome::Succeeded { location, row_count } => {
                data.insert("location".to_string(), json!(location));
                data.insert("row_count".to_string(), json!(row_count));
            }
            ExportOutcome::Failed { reason } => {
                data.insert("reason".to_string(), json!(reason));
            }
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_selection_and_data() {
        let ok = ExportNotification::new(
            "a@b.org",
            3,
            "Sites",
            "csv",
            ExportOutcome::Succeeded {
                location: "http://x/f.csv".into(),
                row_count: 12,
            },
        );
        assert_eq!(ok.template_id(), "export_success");
        let data = ok.template_data();
        assert_eq!(data["location"], "http://x/f.csv");
        assert_eq!(data["row_count"], 12);
        assert!(!data.contains_key("reason"));

        let failed = ExportNotification::new(
            "a@b.org",
            3,
            "Sites",
            "csv",
            ExportOutcome::Failed { reason: "empty dataset".into() },
        );
        assert_eq!(failed.template_id(), "export_failure");
        assert_eq!(failed.template_data()["reason"], "empty dataset");
    }
}
