use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::airtable::AirtableClient;
use crate::traits::Tool;

const ALLOWED_TABLES: &[&str] = &["Leads", "Clients", "Projets"];
const ALLOWED_CHART_TYPES: &[&str] = &["pie", "bar"];

/// Distribution aggregation shaped for the chart renderer.
pub struct GenerateVisualChartTool {
    client: Arc<AirtableClient>,
}

impl GenerateVisualChartTool {
    pub fn new(client: Arc<AirtableClient>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct ChartArgs {
    table: Option<String>,
    #[serde(rename = "chartType")]
    chart_type: Option<String>,
    #[serde(rename = "groupBy")]
    group_by: Option<String>,
}

#[async_trait]
impl Tool for GenerateVisualChartTool {
    fn name(&self) -> &str {
        "generateVisualChart"
    }

    fn description(&self) -> &str {
        "Use this tool MUST be used when the user asks for a visual chart, pie chart, bar \
         chart, or a dashboard showing the distribution of data (e.g., 'Montre moi un \
         camembert des statuts')."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": {
                    "type": "string",
                    "enum": ALLOWED_TABLES,
                    "description": "Nom de la table Airtable à analyser (Leads, Clients ou Projets)."
                },
                "chartType": {
                    "type": "string",
                    "enum": ALLOWED_CHART_TYPES,
                    "description": "Type de graphique à générer (camembert ou barres)."
                },
                "groupBy": {
                    "type": "string",
                    "description": "Nom exact du champ sur lequel regrouper (souvent \
                                    'Status', 'Statut' ou 'Secteur')."
                }
            },
            "required": ["table", "chartType", "groupBy"]
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<Value> {
        let args: ChartArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => {
                return Ok(json!(format!(
                    "Erreur: arguments invalides pour generateVisualChart ({}). \
                     Fournis 'table', 'chartType' et 'groupBy'.",
                    e
                )));
            }
        };

        let (table, chart_type, group_by) = match (args.table, args.chart_type, args.group_by) {
            (Some(t), Some(c), Some(g)) if !g.trim().is_empty() => (t, c, g),
            _ => {
                return Ok(json!(
                    "Erreur: 'table', 'chartType' et 'groupBy' sont requis."
                ));
            }
        };

        if !ALLOWED_TABLES.contains(&table.as_str()) {
            return Ok(json!(format!(
                "Erreur: table \"{}\" non supportée pour les graphiques. \
                 Tables possibles: Leads, Clients, Projets.",
                table
            )));
        }
        if !ALLOWED_CHART_TYPES.contains(&chart_type.as_str()) {
            return Ok(json!(format!(
                "Erreur: chartType \"{}\" non supporté. Types possibles: pie, bar.",
                chart_type
            )));
        }

        info!(table = %table, chart_type = %chart_type, group_by = %group_by, "generateVisualChart");
        Ok(self.client.aggregate(&table, &chart_type, &group_by).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AirtableConfig;

    fn tool() -> GenerateVisualChartTool {
        let client = AirtableClient::new(&AirtableConfig {
            api_key: "key".into(),
            base_id: "appTEST".into(),
            api_url: "http://127.0.0.1:1".into(),
        })
        .unwrap();
        GenerateVisualChartTool::new(Arc::new(client))
    }

    #[tokio::test]
    async fn unsupported_table_rejected() {
        let result = tool()
            .call(r#"{"table": "Factures", "chartType": "pie", "groupBy": "Statut"}"#)
            .await
            .unwrap();
        assert!(result.as_str().unwrap().contains("non supportée"));
    }

    #[tokio::test]
    async fn unsupported_chart_type_rejected() {
        let result = tool()
            .call(r#"{"table": "Leads", "chartType": "scatter", "groupBy": "Statut"}"#)
            .await
            .unwrap();
        assert!(result.as_str().unwrap().contains("chartType"));
    }

    #[tokio::test]
    async fn backend_failure_keeps_chart_envelope() {
        let result = tool()
            .call(r#"{"table": "Leads", "chartType": "bar", "groupBy": "Statut"}"#)
            .await
            .unwrap();
        assert_eq!(result["chartType"], "bar");
        assert_eq!(result["data"], json!([]));
        assert!(result["error"].is_string());
    }
}
