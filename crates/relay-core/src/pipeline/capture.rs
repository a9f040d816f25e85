use std::collections::BTreeMap;

/// Per-stage text buffer for one streamed run.
///
/// Updates can be partial chunks or full resends and can arrive duplicated.
/// Keeping the longest text seen per stage means the consumer's view of a
/// stage never shrinks.
#[derive(Debug, Default, Clone)]
pub struct RunCapture {
    fragments: BTreeMap<String, String>,
    active_stage: Option<String>,
}

impl RunCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_update(&mut self, stage_id: &str, text: &str) {
        if self.active_stage.as_deref() != Some(stage_id) {
            match &self.active_stage {
                Some(previous) => {
                    tracing::info!("[Pipeline] Stage {} -> {}", previous, stage_id)
                }
                None => tracing::info!("[Pipeline] Stage {} started", stage_id),
            }
            self.active_stage = Some(stage_id.to_string());
        }

        let entry = self.fragments.entry(stage_id.to_string()).or_default();
        if text.len() > entry.len() {
            *entry = text.to_string();
        }
    }

    pub fn active_stage(&self) -> Option<&str> {
        self.active_stage.as_deref()
    }

    pub fn largest(&self, stage_id: &str) -> Option<&str> {
        self.fragments
            .get(stage_id)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    pub fn fragments(&self) -> &BTreeMap<String, String> {
        &self.fragments
    }

    pub fn into_fragments(self) -> BTreeMap<String, String> {
        self.fragments
    }
}
