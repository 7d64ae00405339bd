use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::airtable::AirtableClient;
use crate::traits::Tool;

/// Single-record fetch with its comment thread.
pub struct GetRecordDetailsTool {
    client: Arc<AirtableClient>,
}

impl GetRecordDetailsTool {
    pub fn new(client: Arc<AirtableClient>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct DetailArgs {
    #[serde(rename = "recordId")]
    record_id: Option<String>,
    table: Option<String>,
}

#[async_trait]
impl Tool for GetRecordDetailsTool {
    fn name(&self) -> &str {
        "getRecordDetails"
    }

    fn description(&self) -> &str {
        "Récupère toutes les informations d'un enregistrement précis via son ID: champs du \
         record et commentaires (API GET /comments). À utiliser quand l'utilisateur demande \
         le détail d'un record dont tu as l'ID."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recordId": {
                    "type": "string",
                    "description": "ID Airtable du record (ex: recXXXXXXXXXXXXXX)"
                },
                "table": {
                    "type": "string",
                    "description": "Nom exact de la table Airtable (comme dans le schéma fourni)"
                }
            },
            "required": ["recordId", "table"]
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<Value> {
        let args: DetailArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => {
                return Ok(json!(format!(
                    "Erreur: arguments invalides pour getRecordDetails ({}). \
                     Fournis 'recordId' et 'table'.",
                    e
                )));
            }
        };

        let (record_id, table) = match (args.record_id, args.table) {
            (Some(r), Some(t)) if !r.trim().is_empty() && !t.trim().is_empty() => (r, t),
            _ => {
                return Ok(json!(
                    "Erreur: 'recordId' et 'table' sont requis. L'ID vient d'un résultat \
                     searchRecords précédent (ex: recXXXXXXXXXXXXXX)."
                ));
            }
        };

        info!(table = %table, record_id = %record_id, "getRecordDetails");
        Ok(self.client.get_detail(&table, &record_id).await)
    }
}
