use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::airtable::AirtableClient;
use crate::traits::Tool;

/// Formula search over one table.
pub struct SearchRecordsTool {
    client: Arc<AirtableClient>,
}

impl SearchRecordsTool {
    pub fn new(client: Arc<AirtableClient>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    table: Option<String>,
    #[serde(rename = "filterByFormula")]
    filter_by_formula: Option<String>,
}

#[async_trait]
impl Tool for SearchRecordsTool {
    fn name(&self) -> &str {
        "searchRecords"
    }

    fn description(&self) -> &str {
        "Cherche des enregistrements dans une table Airtable en utilisant une formule de \
         filtre. Utilise le schéma fourni pour le nom EXACT de la table (ex: 'Clients' ou \
         'Client') et les noms des champs."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": {
                    "type": "string",
                    "description": "Nom exact de la table Airtable (prendre le 'tableName' \
                                    du schéma fourni, ex: Clients, Leads, Projet)"
                },
                "filterByFormula": {
                    "type": "string",
                    "description": "Formule Airtable. Pour lister TOUS les enregistrements, \
                                    utiliser la formule: 1 (ou TRUE). Sinon ex: \
                                    NOT(ISERROR(SEARCH(\"Acme\", {Nom})))"
                }
            },
            "required": ["table", "filterByFormula"]
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<Value> {
        let args: SearchArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => {
                return Ok(json!(format!(
                    "Erreur: arguments invalides pour searchRecords ({}). \
                     Fournis 'table' et 'filterByFormula'.",
                    e
                )));
            }
        };

        let (table, formula) = match (args.table, args.filter_by_formula) {
            (Some(t), Some(f)) if !t.trim().is_empty() => (t, f),
            _ => {
                return Ok(json!(
                    "Erreur: 'table' et 'filterByFormula' sont requis. \
                     Utilise le nom exact de la table du schéma."
                ));
            }
        };

        info!(table = %table, "searchRecords");
        Ok(self.client.search(&table, &formula).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AirtableConfig;

    fn tool() -> SearchRecordsTool {
        let client = AirtableClient::new(&AirtableConfig {
            api_key: "key".into(),
            base_id: "appTEST".into(),
            api_url: "http://127.0.0.1:1".into(),
        })
        .unwrap();
        SearchRecordsTool::new(Arc::new(client))
    }

    #[tokio::test]
    async fn missing_arguments_yield_guidance() {
        let result = tool().call("{}").await.unwrap();
        assert!(result.as_str().unwrap().contains("requis"));
    }

    #[tokio::test]
    async fn malformed_json_yields_guidance() {
        let result = tool().call("not json").await.unwrap();
        assert!(result.as_str().unwrap().contains("arguments invalides"));
    }

    #[tokio::test]
    async fn empty_formula_rejected_before_network() {
        let result = tool()
            .call(r#"{"table": "Clients", "filterByFormula": ""}"#)
            .await
            .unwrap();
        assert!(result.as_str().unwrap().contains("ne peut pas être vide"));
    }
}
