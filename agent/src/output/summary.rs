//! Summary builder
//!
//! Builds minimal output: statistics plus one status per control.

use policy_kit::RunResult;

use super::envelope;

/// Build a summary JSON for the run
pub fn build_summary(result: &RunResult) -> serde_json::Value {
    let controls: Vec<serde_json::Value> = result
        .profiles
        .iter()
        .flat_map(|profile| {
            profile.controls.iter().map(move |control| {
                serde_json::json!({
                    "profile": profile.name,
                    "id": control.id,
                    "status": control.status.to_string(),
                    "impact": control.impact,
                })
            })
        })
        .collect();

    let mut document = envelope(result);
    if let Some(map) = document.as_object_mut() {
        map.insert(
            "statistics".to_string(),
            serde_json::json!({
                "controls": {
                    "total": result.statistics.controls.total,
                    "passed": result.statistics.controls.passed,
                    "failed": result.statistics.controls.failed,
                    "skipped": result.statistics.controls.skipped
                },
                "duration": result.statistics.duration
            }),
        );
        map.insert("controls".to_string(), serde_json::Value::Array(controls));
    }
    document
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::fixtures;

    #[test]
    fn test_summary_counts() {
        let json = build_summary(&fixtures::run_result());
        assert_eq!(json["statistics"]["controls"]["total"], 3);
        assert_eq!(json["statistics"]["controls"]["failed"], 1);
        assert_eq!(json["controls"][2]["status"], "skipped");
        assert!(json.get("profiles").is_none());
    }
}
