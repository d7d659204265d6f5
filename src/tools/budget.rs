use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CREATE_BUDGET_TOOL_NAME, FunctionTool, Tool, parameters_schema};
use crate::error::PlannerError;

pub const DEFAULT_SPREADSHEET_NAME: &str = "Event Budget";
const MOCK_SHEETS_URL_PREFIX: &str = "https://docs.google.com/spreadsheets/d/mock-";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct CreateBudgetArgs {
    /// Line items mapped to their cost, for example {"Venue hire": 25000}.
    #[schemars(with = "BTreeMap<String, f64>")]
    budget_data: Value,
    /// Spreadsheet title. Defaults to "Event Budget".
    #[serde(default)]
    spreadsheet_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetSheet {
    pub status: String,
    pub spreadsheet_url: String,
    pub total: f64,
}

pub fn spreadsheet_url(spreadsheet_name: &str) -> String {
    format!(
        "{MOCK_SHEETS_URL_PREFIX}{}",
        spreadsheet_name.replace(' ', "-").to_lowercase()
    )
}

/// Pretends to create a spreadsheet holding `budget_data`; no sheet is created.
pub fn create_budget_and_fill_sheet(
    budget_data: &BTreeMap<String, f64>,
    spreadsheet_name: Option<&str>,
) -> BudgetSheet {
    let name = spreadsheet_name
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(DEFAULT_SPREADSHEET_NAME);

    tracing::info!(
        spreadsheet = %name,
        items = budget_data.len(),
        "create_budget_and_fill_sheet called"
    );
    for (item, cost) in budget_data {
        tracing::info!(item = %item, cost = *cost, "budget line item");
    }
    let total = budget_data.values().sum::<f64>();
    tracing::info!(total, "budget total");

    BudgetSheet {
        status: "success".to_string(),
        spreadsheet_url: spreadsheet_url(name),
        total,
    }
}

/// Accepts only a JSON object whose values are all numbers.
pub fn parse_budget_data(value: &Value) -> Result<BTreeMap<String, f64>> {
    let object = value.as_object().ok_or_else(|| {
        PlannerError::InvalidBudgetData(
            "budget_data must be an object of item -> cost".to_string(),
        )
    })?;

    let mut items = BTreeMap::new();
    for (item, cost) in object {
        let amount = cost.as_f64().ok_or_else(|| {
            PlannerError::InvalidBudgetData(format!("cost for '{item}' is not a number: {cost}"))
        })?;
        items.insert(item.clone(), amount);
    }
    Ok(items)
}

pub fn create_budget_tool_response(args: &Value) -> Result<Value> {
    let parsed = serde_json::from_value::<CreateBudgetArgs>(args.clone()).map_err(|err| {
        PlannerError::InvalidToolArgs {
            tool: CREATE_BUDGET_TOOL_NAME.to_string(),
            reason: err.to_string(),
        }
    })?;
    let budget_data = parse_budget_data(&parsed.budget_data)?;
    let sheet = create_budget_and_fill_sheet(&budget_data, parsed.spreadsheet_name.as_deref());
    Ok(serde_json::to_value(sheet)?)
}

pub fn create_budget_tool() -> Arc<dyn Tool> {
    Arc::new(
        FunctionTool::new(
            CREATE_BUDGET_TOOL_NAME,
            "Creates a budget spreadsheet and fills it with line items. \
             Args: budget_data (required, object of item -> cost), spreadsheet_name (optional). \
             Returns {status, spreadsheet_url, total}.",
            |args| async move { create_budget_tool_response(&args) },
        )
        .with_parameters(parameters_schema::<CreateBudgetArgs>()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn total_is_sum_of_line_items() {
        let data = BTreeMap::from([
            ("Venue".to_string(), 40_000.0),
            ("Catering".to_string(), 35_000.5),
            ("Marketing".to_string(), 9_999.5),
        ]);
        let sheet = create_budget_and_fill_sheet(&data, None);
        assert_eq!(sheet.status, "success");
        assert_eq!(sheet.total, 85_000.0);
        assert_eq!(
            sheet.spreadsheet_url,
            "https://docs.google.com/spreadsheets/d/mock-event-budget"
        );
    }

    #[test]
    fn url_depends_only_on_name() {
        let a = create_budget_and_fill_sheet(&BTreeMap::new(), Some("Darwin Festival 2025"));
        let b = create_budget_and_fill_sheet(
            &BTreeMap::from([("x".to_string(), 1.0)]),
            Some("Darwin Festival 2025"),
        );
        assert_eq!(a.spreadsheet_url, b.spreadsheet_url);
        assert!(a.spreadsheet_url.ends_with("mock-darwin-festival-2025"));
        assert_eq!(a.total, 0.0);
    }

    #[test]
    fn blank_name_falls_back_to_default() {
        let sheet = create_budget_and_fill_sheet(&BTreeMap::new(), Some("   "));
        assert!(sheet.spreadsheet_url.ends_with("mock-event-budget"));
    }

    #[test]
    fn non_numeric_budget_data_is_rejected() {
        for bad in [
            json!({"budget_data": {"Venue": "lots"}}),
            json!({"budget_data": [1, 2]}),
            json!({"budget_data": null}),
        ] {
            let err = create_budget_tool_response(&bad).expect_err("invalid budget data");
            assert!(
                matches!(
                    err.downcast_ref::<PlannerError>(),
                    Some(PlannerError::InvalidBudgetData(_))
                ),
                "unexpected error for {bad}: {err}"
            );
        }
    }

    #[test]
    fn malformed_spreadsheet_name_is_an_argument_error() {
        let err = create_budget_tool_response(&json!({
            "budget_data": {"Stage": 12000},
            "spreadsheet_name": 7
        }))
        .expect_err("name must be a string");
        assert!(matches!(
            err.downcast_ref::<PlannerError>(),
            Some(PlannerError::InvalidToolArgs { tool, .. }) if tool == CREATE_BUDGET_TOOL_NAME
        ));

        let out = create_budget_tool_response(&json!({
            "budget_data": {"Stage": 12000},
            "spreadsheet_name": null
        }))
        .expect("null name falls back to the default");
        assert!(
            out["spreadsheet_url"]
                .as_str()
                .unwrap_or_default()
                .ends_with("mock-event-budget")
        );

        let err = create_budget_tool_response(&json!({})).expect_err("budget_data is required");
        assert!(matches!(
            err.downcast_ref::<PlannerError>(),
            Some(PlannerError::InvalidToolArgs { .. })
        ));
    }

    #[test]
    fn schema_requires_only_budget_data() {
        let schema = parameters_schema::<CreateBudgetArgs>();
        assert_eq!(schema["required"], json!(["budget_data"]));
        assert_eq!(schema["properties"]["budget_data"]["type"], "object");
    }

    #[test]
    fn tool_response_reports_total_and_url() {
        let out = create_budget_tool_response(&json!({
            "budget_data": {"Stage": 12000, "Security": 8000},
            "spreadsheet_name": "Cultural Festival"
        }))
        .expect("valid budget");
        assert_eq!(out["status"], "success");
        assert_eq!(out["total"], 20000.0);
        assert_eq!(
            out["spreadsheet_url"],
            "https://docs.google.com/spreadsheets/d/mock-cultural-festival"
        );
    }
}
