#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Public struct `TransformMetrics` summarizing one completed transform.
pub struct TransformMetrics {
    pub source_chars: usize,
    pub result_chars: usize,
    /// Result length as a floored percentage of the source; 0 for empty sources.
    pub compression_percent: usize,
    pub elapsed_ms: u64,
}

impl TransformMetrics {
    pub fn new(source: &str, result: &str, elapsed_ms: u64) -> Self {
        let source_chars = source.chars().count();
        let result_chars = result.chars().count();
        let compression_percent = if source_chars == 0 {
            0
        } else {
            result_chars * 100 / source_chars
        };
        Self {
            source_chars,
            result_chars,
            compression_percent,
            elapsed_ms,
        }
    }

    /// Elapsed seconds rounded half-up to one decimal, e.g. `1.2`.
    pub fn elapsed_seconds_one_decimal(&self) -> String {
        let tenths = (self.elapsed_ms + 50) / 100;
        format!("{}.{}", tenths / 10, tenths % 10)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}→{} chars ({}%, {}s)",
            self.source_chars,
            self.result_chars,
            self.compression_percent,
            self.elapsed_seconds_one_decimal()
        )
    }
}
