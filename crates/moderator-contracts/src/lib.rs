pub mod actions;
pub mod events;
pub mod failure;
pub mod record;
pub mod reply;
pub mod summary;
pub mod table;

pub use actions::{derive_actions, item_label, OperatorAction};
pub use events::{now_utc_iso, EventWriter, RunEvent};
pub use failure::FailureKind;
pub use record::ClassificationRecord;
pub use reply::{parse_debug_batch, parse_reply, ParseError, ParsedReply};
pub use summary::RunSummary;
pub use table::ResultTable;
