/// A per-item failure that can be recorded in a result row.
///
/// `kind` is the stable name written to `error_kind`; it must not change
/// between releases because downstream review filters on it.
pub trait FailureKind: std::error::Error {
    fn kind(&self) -> &'static str;
}
