use std::io::Write;
use std::path::Path;

use anyhow::Context;

use crate::record::ClassificationRecord;

/// Column order shared by both serializations.
pub const COLUMNS: [&str; 9] = [
    "item_id",
    "is_safe",
    "safety_confidence",
    "safety_reason",
    "audience_category",
    "audience_confidence",
    "audience_reason",
    "run_time",
    "error_kind",
];

/// Append-only, input-ordered result rows for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    rows: Vec<ClassificationRecord>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ClassificationRecord) {
        self.rows.push(record);
    }

    pub fn rows(&self) -> &[ClassificationRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.rows.iter().filter(|row| row.is_failure()).count()
    }

    pub fn write_csv_to<W: Write>(&self, out: W) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        if self.rows.is_empty() {
            writer.write_record(COLUMNS)?;
        }
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_jsonl_to<W: Write>(&self, mut out: W) -> anyhow::Result<()> {
        for row in &self.rows {
            serde_json::to_writer(&mut out, row)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        self.write_csv_to(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        let file = create_file(path)?;
        self.write_csv_to(std::io::BufWriter::new(file))
            .with_context(|| format!("failed writing {}", path.display()))
    }

    pub fn write_jsonl(&self, path: &Path) -> anyhow::Result<()> {
        let file = create_file(path)?;
        self.write_jsonl_to(std::io::BufWriter::new(file))
            .with_context(|| format!("failed writing {}", path.display()))
    }
}

fn create_file(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{ResultTable, COLUMNS};
    use crate::record::ClassificationRecord;
    use crate::reply::parse_reply;

    fn sample_table() -> ResultTable {
        let mut table = ResultTable::new();
        table.push(ClassificationRecord::success(
            "a.jpg",
            parse_reply("Y 95 looks fine, really 1 99 general audience").unwrap(),
            7.25,
        ));
        table.push(ClassificationRecord::failure("b.jpg", "MissingFlag"));
        table.push(ClassificationRecord::success(
            "nested/c.jpg",
            parse_reply("N 10 explicit content 4 70 sensitive topic").unwrap(),
            3.5,
        ));
        table
    }

    #[test]
    fn csv_has_header_and_rows_in_order() -> anyhow::Result<()> {
        let table = sample_table();
        let csv = table.to_csv_string()?;
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(COLUMNS.join(",").as_str()));

        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let rows: Vec<ClassificationRecord> = reader.deserialize().collect::<Result<_, _>>()?;
        assert_eq!(rows, table.rows());
        assert_eq!(rows[0].safety_reason, "looks fine, really");
        assert_eq!(rows[1].error_kind.as_deref(), Some("MissingFlag"));
        Ok(())
    }

    #[test]
    fn empty_table_still_writes_header() -> anyhow::Result<()> {
        let csv = ResultTable::new().to_csv_string()?;
        assert_eq!(csv.trim_end(), COLUMNS.join(","));
        Ok(())
    }

    #[test]
    fn csv_and_jsonl_files_hold_the_same_rows() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let csv_path = temp.path().join("out").join("results.csv");
        let json_path = temp.path().join("out").join("results.json");
        let table = sample_table();
        table.write_csv(&csv_path)?;
        table.write_jsonl(&json_path)?;

        let mut reader = csv::Reader::from_path(&csv_path)?;
        let csv_rows: Vec<ClassificationRecord> =
            reader.deserialize().collect::<Result<_, _>>()?;

        let raw = std::fs::read_to_string(&json_path)?;
        let json_rows: Vec<ClassificationRecord> = raw
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;

        assert_eq!(csv_rows, json_rows);
        assert_eq!(json_rows.len(), 3);

        let first: Value = serde_json::from_str(raw.lines().next().unwrap_or(""))?;
        for column in COLUMNS {
            assert!(first.get(column).is_some(), "missing {column}");
        }
        assert_eq!(first["error_kind"], Value::Null);
        Ok(())
    }

    #[test]
    fn failure_count_matches_failure_rows() {
        assert_eq!(sample_table().failure_count(), 1);
        assert_eq!(sample_table().len(), 3);
    }
}
