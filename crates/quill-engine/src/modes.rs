use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const MODES_FILE_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_MODEL: &str = "gpt-5.2";
pub const MAX_TRANSFORM_MODES: usize = 5;
const FALLBACK_MODE_NAME: &str = "Mode";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Public struct `TransformMode` pairing a prompt template with a model.
pub struct TransformMode {
    pub name: String,
    pub prompt_template: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Deserialize)]
struct TransformModesFile {
    schema_version: u32,
    #[serde(default)]
    active_mode: Option<String>,
    #[serde(default)]
    modes: Vec<TransformMode>,
}

/// Normalized, non-empty list of modes with one of them active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformModeSet {
    modes: Vec<TransformMode>,
    active: usize,
}

impl TransformModeSet {
    pub fn built_in(default_model: &str) -> Self {
        Self {
            modes: default_modes(default_model),
            active: 0,
        }
    }

    /// Keeps at most [`MAX_TRANSFORM_MODES`] modes, trims names and models,
    /// and substitutes defaults for blanks. An empty list becomes the first
    /// built-in mode. Unknown `active_mode` names select the first mode.
    pub fn from_modes(
        modes: Vec<TransformMode>,
        active_mode: Option<&str>,
        default_model: &str,
    ) -> Self {
        if modes.len() > MAX_TRANSFORM_MODES {
            tracing::warn!(
                configured = modes.len(),
                kept = MAX_TRANSFORM_MODES,
                "dropping transform modes beyond the limit"
            );
        }
        let mut modes = modes
            .into_iter()
            .take(MAX_TRANSFORM_MODES)
            .map(|mode| normalize_mode(mode, default_model))
            .collect::<Vec<_>>();
        if modes.is_empty() {
            modes.extend(default_modes(default_model).into_iter().take(1));
        }

        let active = active_mode
            .and_then(|name| position_by_name(&modes, name))
            .unwrap_or(0);
        Self { modes, active }
    }

    pub fn modes(&self) -> &[TransformMode] {
        &self.modes
    }

    pub fn active(&self) -> &TransformMode {
        &self.modes[self.active]
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Looks a mode up by name, ignoring case and surrounding whitespace.
    pub fn find(&self, name: &str) -> Option<&TransformMode> {
        position_by_name(&self.modes, name).map(|index| &self.modes[index])
    }
}

/// Reads a JSON modes file.
pub fn load_transform_modes(path: &Path, default_model: &str) -> Result<TransformModeSet> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read transform modes file {}", path.display()))?;
    let parsed = serde_json::from_str::<TransformModesFile>(&raw)
        .with_context(|| format!("failed to parse transform modes file {}", path.display()))?;
    if parsed.schema_version != MODES_FILE_SCHEMA_VERSION {
        bail!(
            "unsupported transform modes schema_version {} in {} (expected {})",
            parsed.schema_version,
            path.display(),
            MODES_FILE_SCHEMA_VERSION
        );
    }

    let mut seen_names = BTreeSet::new();
    for mode in &parsed.modes {
        let name = normalized_name(&mode.name).to_lowercase();
        if !seen_names.insert(name.clone()) {
            bail!("duplicate transform mode '{}' in {}", name, path.display());
        }
    }

    let modes = TransformModeSet::from_modes(
        parsed.modes,
        parsed.active_mode.as_deref(),
        default_model,
    );
    tracing::debug!(
        path = %path.display(),
        modes = modes.modes().len(),
        active = %modes.active().name,
        "loaded transform modes"
    );
    Ok(modes)
}

fn normalize_mode(mode: TransformMode, default_model: &str) -> TransformMode {
    let model = mode.model.trim();
    TransformMode {
        name: normalized_name(&mode.name).to_string(),
        prompt_template: mode.prompt_template,
        model: if model.is_empty() {
            default_model.trim().to_string()
        } else {
            model.to_string()
        },
    }
}

fn normalized_name(name: &str) -> &str {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        FALLBACK_MODE_NAME
    } else {
        trimmed
    }
}

fn position_by_name(modes: &[TransformMode], name: &str) -> Option<usize> {
    let wanted = name.trim();
    modes
        .iter()
        .position(|mode| mode.name.eq_ignore_ascii_case(wanted))
}

fn default_modes(model: &str) -> Vec<TransformMode> {
    [
        (
            "General",
            "Rewrite the input so it reads naturally and is easy to follow.\n\
             Keep every important fact, intent and next action.",
        ),
        (
            "Ultra concise",
            "Summarize the input as briefly as possible.\n\
             Low-importance supporting details may be dropped.",
        ),
        (
            "Shorten",
            "Make the input shorter while keeping its meaning and key information.\n\
             Do not drop important facts.",
        ),
    ]
    .into_iter()
    .map(|(name, prompt_template)| TransformMode {
        name: name.to_string(),
        prompt_template: prompt_template.to_string(),
        model: model.to_string(),
    })
    .collect()
}
