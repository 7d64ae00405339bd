//! Typed tools the model can call during a turn.
//!
//! Every tool returns `Ok` with a payload the model can read, even for bad
//! arguments or upstream failures. Guidance text in the result is how the
//! model learns to correct its next call.

mod record_details;
mod search_records;
mod visual_chart;

use std::sync::Arc;

pub use record_details::GetRecordDetailsTool;
pub use search_records::SearchRecordsTool;
pub use visual_chart::GenerateVisualChartTool;

use crate::airtable::AirtableClient;
use crate::traits::Tool;

pub fn build_registry(client: Arc<AirtableClient>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SearchRecordsTool::new(client.clone())),
        Arc::new(GetRecordDetailsTool::new(client.clone())),
        Arc::new(GenerateVisualChartTool::new(client)),
    ]
}

pub fn find_tool<'a>(registry: &'a [Arc<dyn Tool>], name: &str) -> Option<&'a Arc<dyn Tool>> {
    registry.iter().find(|t| t.name() == name)
}

/// OpenAI function-call descriptors for the whole registry.
pub fn tool_descriptors(registry: &[Arc<dyn Tool>]) -> Vec<serde_json::Value> {
    registry
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.schema(),
                }
            })
        })
        .collect()
}
