mod parser;

pub use parser::{parse_reply, ParseError, ParsedReply};

use crate::failure::FailureKind;
use crate::record::ClassificationRecord;
use crate::table::ResultTable;

/// Parse a comma separated list of literal replies without calling the
/// assistant. Each reply becomes one row keyed by the reply text itself.
pub fn parse_debug_batch(input: &str) -> ResultTable {
    let mut table = ResultTable::new();
    for raw in input.split(',').map(str::trim) {
        let record = match parse_reply(raw) {
            Ok(parsed) => ClassificationRecord::success(raw, parsed, 0.0),
            Err(err) => ClassificationRecord::failure(raw, err.kind()),
        };
        table.push(record);
    }
    table
}
