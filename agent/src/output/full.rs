//! Full result builder
//!
//! Builds the complete run tree: profiles, controls, per-test results with
//! code locations, and statistics.

use policy_kit::RunResult;

use super::{envelope, OutputError};

/// Build the full result document
pub fn build_full_result(result: &RunResult) -> Result<serde_json::Value, OutputError> {
    let mut document = envelope(result);
    let profiles = serde_json::to_value(&result.profiles).map_err(|e| OutputError::Build(e.to_string()))?;
    let statistics = serde_json::to_value(&result.statistics).map_err(|e| OutputError::Build(e.to_string()))?;

    if let Some(map) = document.as_object_mut() {
        map.insert("profiles".to_string(), profiles);
        map.insert("statistics".to_string(), statistics);
    }
    Ok(document)
}
