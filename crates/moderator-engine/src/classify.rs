use moderator_contracts::{
    derive_actions, item_label, parse_reply, ClassificationRecord, FailureKind, OperatorAction,
    ParseError, ParsedReply, ResultTable,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::assistant::{Assistant, InvokeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub url: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Why an item produced a failure row instead of a classification.
#[derive(Debug, Error)]
pub enum ItemFailure {
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ItemFailure {
    /// The reply text, when the assistant answered but the answer was unusable.
    pub fn raw_reply(&self) -> Option<&str> {
        match self {
            Self::Invoke(_) => None,
            Self::Parse(err) => Some(err.raw()),
        }
    }
}

impl FailureKind for ItemFailure {
    fn kind(&self) -> &'static str {
        match self {
            Self::Invoke(err) => err.kind(),
            Self::Parse(err) => err.kind(),
        }
    }
}

/// Receives the side effects of a run as they happen.
pub trait RunObserver {
    fn on_action(&mut self, item: &WorkItem, label: &str, action: &OperatorAction);

    fn on_classified(&mut self, _item: &WorkItem, _record: &ClassificationRecord) {}

    fn on_skipped(&mut self, _item: &WorkItem, _failure: &ItemFailure) {}
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub table: ResultTable,
    pub skipped: usize,
    pub skipped_items: Vec<String>,
    pub alerts: usize,
    pub notifications: usize,
}

/// Classify every item in order, one at a time.
///
/// Invocation and parse failures become failure rows and the loop moves on;
/// the returned table always has exactly one row per input item.
pub fn classify_items<A, O, I>(assistant: &A, items: I, observer: &mut O) -> RunOutcome
where
    A: Assistant + ?Sized,
    O: RunObserver + ?Sized,
    I: IntoIterator<Item = WorkItem>,
{
    let mut outcome = RunOutcome::default();
    for item in items {
        match classify_one(assistant, &item) {
            Ok((parsed, run_time)) => {
                let label = item_label(&item.id);
                for action in derive_actions(&parsed) {
                    match action {
                        OperatorAction::Alert => outcome.alerts += 1,
                        OperatorAction::NotifyOwner { .. } => outcome.notifications += 1,
                    }
                    observer.on_action(&item, label, &action);
                }
                let record = ClassificationRecord::success(item.id.clone(), parsed, run_time);
                info!(
                    item = %item.id,
                    is_safe = record.is_safe,
                    safety_confidence = record.safety_confidence,
                    audience_category = %record.audience_category,
                    run_time,
                    "classified item"
                );
                observer.on_classified(&item, &record);
                outcome.table.push(record);
            }
            Err(failure) => {
                warn!(
                    item = %item.id,
                    kind = failure.kind(),
                    error = %failure,
                    raw_reply = failure.raw_reply().unwrap_or_default(),
                    "skipping item"
                );
                observer.on_skipped(&item, &failure);
                outcome
                    .table
                    .push(ClassificationRecord::failure(item.id.clone(), failure.kind()));
                outcome.skipped += 1;
                outcome.skipped_items.push(item.id);
            }
        }
    }
    outcome
}

fn classify_one<A>(assistant: &A, item: &WorkItem) -> Result<(ParsedReply, f64), ItemFailure>
where
    A: Assistant + ?Sized,
{
    let reply = assistant.invoke(&item.url)?;
    let parsed = parse_reply(&reply.text)?;
    Ok((parsed, reply.elapsed.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::assistant::{AssistantReply, RunStatus};

    enum Script {
        Reply(&'static str),
        Ended(RunStatus),
        Timeout,
    }

    #[derive(Default)]
    struct ScriptedAssistant {
        scripts: HashMap<String, Script>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedAssistant {
        fn with(mut self, url: &str, script: Script) -> Self {
            self.scripts.insert(url.to_string(), script);
            self
        }
    }

    impl Assistant for ScriptedAssistant {
        fn invoke(&self, image_url: &str) -> Result<AssistantReply, InvokeError> {
            self.calls.borrow_mut().push(image_url.to_string());
            match self.scripts.get(image_url) {
                Some(Script::Reply(text)) => Ok(AssistantReply {
                    text: (*text).to_string(),
                    elapsed: Duration::from_millis(1500),
                }),
                Some(Script::Ended(status)) => Err(InvokeError::RunEnded {
                    status: status.clone(),
                }),
                Some(Script::Timeout) => Err(InvokeError::Timeout {
                    waited: Duration::from_secs(120),
                }),
                None => Err(InvokeError::EmptyReply),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        actions: Vec<(String, OperatorAction)>,
        classified: Vec<String>,
        skipped: Vec<(String, &'static str)>,
        raw_replies: Vec<Option<String>>,
    }

    impl RunObserver for Recorder {
        fn on_action(&mut self, _item: &WorkItem, label: &str, action: &OperatorAction) {
            self.actions.push((label.to_string(), action.clone()));
        }

        fn on_classified(&mut self, item: &WorkItem, _record: &ClassificationRecord) {
            self.classified.push(item.id.clone());
        }

        fn on_skipped(&mut self, item: &WorkItem, failure: &ItemFailure) {
            self.skipped.push((item.id.clone(), failure.kind()));
            self.raw_replies
                .push(failure.raw_reply().map(str::to_string));
        }
    }

    fn item(id: &str) -> WorkItem {
        WorkItem::new(id, format!("https://bkt.s3.amazonaws.com/{id}"))
    }

    fn url(id: &str) -> String {
        item(id).url
    }

    #[test]
    fn success_rows_carry_fields_and_run_time() {
        let assistant = ScriptedAssistant::default().with(
            &url("ok.jpg"),
            Script::Reply("Y 95 looks fine 1 99 general audience"),
        );
        let mut recorder = Recorder::default();
        let outcome = classify_items(&assistant, vec![item("ok.jpg")], &mut recorder);

        let rows = outcome.table.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_id, "ok.jpg");
        assert!(rows[0].is_safe);
        assert_eq!(rows[0].safety_confidence, 95);
        assert_eq!(rows[0].safety_reason, "looks fine");
        assert_eq!(rows[0].audience_category, "1");
        assert_eq!(rows[0].audience_confidence, 99);
        assert_eq!(rows[0].audience_reason, "general audience");
        assert_eq!(rows[0].run_time, 1.5);
        assert_eq!(rows[0].error_kind, None);
        assert!(recorder.actions.is_empty());
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn unsafe_reply_raises_alert_with_trailing_label() {
        let assistant = ScriptedAssistant::default().with(
            &url("ads/2024/banner.png"),
            Script::Reply("N 10 explicit content 4 70 sensitive topic"),
        );
        let mut recorder = Recorder::default();
        let outcome = classify_items(&assistant, vec![item("ads/2024/banner.png")], &mut recorder);

        assert_eq!(
            recorder.actions,
            vec![("banner.png".to_string(), OperatorAction::Alert)]
        );
        assert_eq!(outcome.alerts, 1);
        assert_eq!(outcome.notifications, 0);
        let row = &outcome.table.rows()[0];
        assert!(!row.is_safe);
        assert_eq!(row.safety_confidence, 10);
    }

    #[test]
    fn elevated_audience_notifies_owner() {
        let assistant = ScriptedAssistant::default().with(
            &url("kids.jpg"),
            Script::Reply("Y 85 fine 3 90 children may see this"),
        );
        let mut recorder = Recorder::default();
        let outcome = classify_items(&assistant, vec![item("kids.jpg")], &mut recorder);

        assert_eq!(
            recorder.actions,
            vec![(
                "kids.jpg".to_string(),
                OperatorAction::NotifyOwner {
                    summary: "children may see this".to_string()
                }
            )]
        );
        assert_eq!(outcome.notifications, 1);
        assert_eq!(outcome.alerts, 0);
    }

    #[test]
    fn parse_failure_becomes_zeroed_row() {
        let assistant = ScriptedAssistant::default()
            .with(&url("frac.jpg"), Script::Reply("Y 82.5 ok 1 90 fine"))
            .with(&url("noflag.jpg"), Script::Reply("85 1 90"));
        let mut recorder = Recorder::default();
        let outcome = classify_items(
            &assistant,
            vec![item("frac.jpg"), item("noflag.jpg")],
            &mut recorder,
        );

        let rows = outcome.table.rows();
        assert_eq!(rows[0].error_kind.as_deref(), Some("NonIntegerOrNegativeValue"));
        assert_eq!(rows[0].safety_confidence, 0);
        assert_eq!(rows[0].audience_category, "0");
        assert_eq!(rows[0].audience_confidence, 0);
        assert_eq!(rows[0].run_time, 0.0);
        assert!(!rows[0].is_safe);
        assert_eq!(rows[1].error_kind.as_deref(), Some("MissingFlag"));
        assert_eq!(outcome.skipped_items, vec!["frac.jpg", "noflag.jpg"]);
        assert!(recorder.actions.is_empty());
        assert_eq!(
            recorder.raw_replies,
            vec![
                Some("Y 82.5 ok 1 90 fine".to_string()),
                Some("85 1 90".to_string())
            ]
        );
    }

    #[test]
    fn invocation_failure_is_recorded_and_run_continues() {
        let assistant = ScriptedAssistant::default()
            .with(&url("a.jpg"), Script::Ended(RunStatus::Failed))
            .with(&url("b.jpg"), Script::Timeout)
            .with(&url("c.jpg"), Script::Reply("Y 90 fine 1 95 everyone"));
        let mut recorder = Recorder::default();
        let outcome = classify_items(
            &assistant,
            vec![item("a.jpg"), item("b.jpg"), item("c.jpg")],
            &mut recorder,
        );

        let kinds: Vec<Option<&str>> = outcome
            .table
            .rows()
            .iter()
            .map(|row| row.error_kind.as_deref())
            .collect();
        assert_eq!(kinds, vec![Some("RunFailed"), Some("Timeout"), None]);
        assert_eq!(
            recorder.skipped,
            vec![
                ("a.jpg".to_string(), "RunFailed"),
                ("b.jpg".to_string(), "Timeout")
            ]
        );
        assert_eq!(recorder.classified, vec!["c.jpg".to_string()]);
        assert_eq!(recorder.raw_replies, vec![None, None]);
    }

    #[test]
    fn one_row_per_item_in_input_order() {
        let ids = ["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg", "6.jpg"];
        let assistant = ScriptedAssistant::default()
            .with(&url("1.jpg"), Script::Reply("Y 95 fine 1 99 everyone"))
            .with(&url("2.jpg"), Script::Reply("garbage"))
            .with(&url("3.jpg"), Script::Ended(RunStatus::Expired))
            .with(&url("4.jpg"), Script::Reply("N 50 bad 2 60 adults"))
            .with(&url("6.jpg"), Script::Reply("Y 1 2 3 4 5 six"));
        let mut recorder = Recorder::default();
        let outcome = classify_items(&assistant, ids.iter().map(|id| item(id)), &mut recorder);

        let row_ids: Vec<&str> = outcome
            .table
            .rows()
            .iter()
            .map(|row| row.item_id.as_str())
            .collect();
        assert_eq!(row_ids, ids);
        assert_eq!(outcome.table.len(), ids.len());
        assert_eq!(outcome.skipped, outcome.table.failure_count());
        assert_eq!(outcome.skipped, outcome.skipped_items.len());
        assert_eq!(
            outcome.skipped_items,
            vec!["2.jpg", "3.jpg", "5.jpg", "6.jpg"]
        );

        let calls = assistant.calls.borrow();
        let expected: Vec<String> = ids.iter().map(|id| url(id)).collect();
        assert_eq!(*calls, expected);
    }

    #[test]
    fn empty_input_yields_empty_outcome() {
        let assistant = ScriptedAssistant::default();
        let mut recorder = Recorder::default();
        let outcome = classify_items(&assistant, Vec::new(), &mut recorder);
        assert!(outcome.table.is_empty());
        assert_eq!(outcome.skipped, 0);
        assert!(outcome.skipped_items.is_empty());
        assert!(assistant.calls.borrow().is_empty());
    }
}
