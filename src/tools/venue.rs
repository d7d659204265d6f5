use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CHECK_AVAILABILITY_TOOL_NAME, FunctionTool, Tool, parameters_schema};
use crate::error::PlannerError;

/// Venue/date pairs the mock booking system reports as taken.
const BOOKED_VENUES: &[(&str, &str)] = &[
    ("Darwin Showgrounds", "2025-06-14"),
    ("Darwin Waterfront", "2025-06-15"),
];

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CheckAvailabilityArgs {
    /// Name of the venue, for example "Darwin Showgrounds".
    pub venue_name: String,
    /// Event date in YYYY-MM-DD format.
    pub date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityReport {
    pub status: AvailabilityStatus,
}

/// Mock availability lookup. Venue names match case-insensitively and both
/// inputs are trimmed.
pub fn check_availability(venue_name: &str, date: &str) -> AvailabilityReport {
    tracing::info!(venue = %venue_name, date = %date, "check_availability called");

    let venue = venue_name.trim();
    let date = date.trim();
    let booked = BOOKED_VENUES
        .iter()
        .any(|(name, day)| name.eq_ignore_ascii_case(venue) && *day == date);

    AvailabilityReport {
        status: if booked {
            AvailabilityStatus::Unavailable
        } else {
            AvailabilityStatus::Available
        },
    }
}

pub fn check_availability_tool_response(args: &Value) -> Result<Value> {
    let parsed = serde_json::from_value::<CheckAvailabilityArgs>(args.clone()).map_err(|err| {
        PlannerError::InvalidToolArgs {
            tool: CHECK_AVAILABILITY_TOOL_NAME.to_string(),
            reason: err.to_string(),
        }
    })?;
    let report = check_availability(&parsed.venue_name, &parsed.date);
    Ok(serde_json::to_value(report)?)
}

pub fn check_availability_tool() -> Arc<dyn Tool> {
    Arc::new(
        FunctionTool::new(
            CHECK_AVAILABILITY_TOOL_NAME,
            "Checks whether a venue is free on a given date. \
             Args: venue_name (required), date (required, YYYY-MM-DD). \
             Returns {status: available|unavailable}.",
            |args| async move { check_availability_tool_response(&args) },
        )
        .with_parameters(parameters_schema::<CheckAvailabilityArgs>()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn booked_pairs_are_unavailable_regardless_of_case() {
        assert_eq!(
            check_availability("darwin showgrounds", "2025-06-14").status,
            AvailabilityStatus::Unavailable
        );
        assert_eq!(
            check_availability("  DARWIN WATERFRONT ", "2025-06-15").status,
            AvailabilityStatus::Unavailable
        );
    }

    #[test]
    fn other_pairs_are_available_and_stable() {
        let cases = [
            ("Darwin Showgrounds", "2025-06-15"),
            ("Darwin Waterfront", "2025-06-14"),
            ("Mindil Beach", "2025-06-14"),
            ("", ""),
        ];
        for (venue, date) in cases {
            let first = check_availability(venue, date);
            let second = check_availability(venue, date);
            assert_eq!(first.status, AvailabilityStatus::Available, "{venue} on {date}");
            assert_eq!(first, second);
        }
    }

    #[test]
    fn tool_response_serializes_lowercase_status() {
        let out = check_availability_tool_response(&json!({
            "venue_name": "Darwin Showgrounds",
            "date": "2025-06-14"
        }))
        .expect("valid args");
        assert_eq!(out, json!({"status": "unavailable"}));
    }

    #[test]
    fn missing_arguments_are_rejected() {
        let err = check_availability_tool_response(&json!({"venue_name": "x"}))
            .expect_err("date is required");
        assert!(matches!(
            err.downcast_ref::<PlannerError>(),
            Some(PlannerError::InvalidToolArgs { .. })
        ));
    }
}
