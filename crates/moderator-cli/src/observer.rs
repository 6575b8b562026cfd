use std::io::{self, Write};

use moderator_contracts::{ClassificationRecord, EventWriter, FailureKind, OperatorAction, RunEvent};
use moderator_engine::{ItemFailure, RunObserver, WorkItem};
use tracing::warn;

/// Prints operator actions to the console and mirrors every outcome into the
/// run's event log.
pub struct ConsoleObserver<W: Write> {
    out: W,
    events: EventWriter,
}

impl ConsoleObserver<io::Stdout> {
    pub fn stdout(events: EventWriter) -> Self {
        Self::new(io::stdout(), events)
    }
}

impl<W: Write> ConsoleObserver<W> {
    pub fn new(out: W, events: EventWriter) -> Self {
        Self { out, events }
    }

    fn print(&mut self, line: &str) {
        if let Err(err) = writeln!(self.out, "{line}") {
            warn!(error = %err, "failed writing console output");
        }
    }
}

impl<W: Write> RunObserver for ConsoleObserver<W> {
    fn on_action(&mut self, item: &WorkItem, label: &str, action: &OperatorAction) {
        self.print(&format!("{label} {}", action.code()));
        match action {
            OperatorAction::Alert => {
                warn!(item = %item.id, "unsafe or low-confidence content");
                emit_or_warn(
                    &self.events,
                    &RunEvent::Alert {
                        item_id: item.id.clone(),
                        label: label.to_string(),
                    },
                );
            }
            OperatorAction::NotifyOwner { summary } => {
                self.print(&format!("One line summary: {summary}"));
                emit_or_warn(
                    &self.events,
                    &RunEvent::NotifyOwner {
                        item_id: item.id.clone(),
                        label: label.to_string(),
                        summary: summary.clone(),
                    },
                );
            }
        }
    }

    fn on_classified(&mut self, item: &WorkItem, record: &ClassificationRecord) {
        emit_or_warn(
            &self.events,
            &RunEvent::ItemClassified {
                item_id: item.id.clone(),
                is_safe: record.is_safe,
                safety_confidence: record.safety_confidence,
                audience_category: record.audience_category.clone(),
                run_time: record.run_time,
            },
        );
    }

    fn on_skipped(&mut self, item: &WorkItem, failure: &ItemFailure) {
        emit_or_warn(
            &self.events,
            &RunEvent::ItemSkipped {
                item_id: item.id.clone(),
                error_kind: failure.kind().to_string(),
                message: failure.to_string(),
                raw_reply: failure.raw_reply().map(str::to_string),
            },
        );
    }
}

/// The event log is an audit aid; losing a line must not stop the run.
pub fn emit_or_warn(events: &EventWriter, event: &RunEvent) {
    if let Err(err) = events.emit(event) {
        warn!(path = %events.path().display(), error = %err, "failed writing run event");
    }
}
