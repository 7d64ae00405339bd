//! Remote tabular client for the Airtable REST API.
//!
//! Every query operation degrades to a descriptive guidance value instead
//! of raising, because results feed directly into model context: the model
//! reads the guidance and corrects its next call.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AirtableConfig;

/// Result cap for formula searches.
const SEARCH_MAX_RECORDS: u32 = 100;
/// Record cap for chart aggregation.
const AGGREGATE_MAX_RECORDS: usize = 500;
/// Bucket label for empty or missing grouping values.
const UNKNOWN_BUCKET: &str = "(Inconnu)";

/// Simplified table/field catalog: table name, and per field the name,
/// type, and enumerated options for choice fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplifiedSchema {
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub table_name: String,
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

pub struct AirtableClient {
    http: Client,
    api_url: String,
    api_key: String,
    base_id: String,
}

impl AirtableClient {
    pub fn new(config: &AirtableConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            base_id: config.base_id.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/{}/{}",
            self.api_url,
            percent_encode(&self.base_id),
            percent_encode(table)
        )
    }

    /// Fetch the raw table catalog from the metadata endpoint and simplify
    /// it. Errors carry the status and body for the cache to surface.
    pub async fn fetch_schema(&self) -> anyhow::Result<SimplifiedSchema> {
        let url = format!(
            "{}/meta/bases/{}/tables",
            self.api_url,
            percent_encode(&self.base_id)
        );

        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Metadata: {}", e))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("Metadata API: {} {}", status.as_u16(), text);
        }

        let raw: Value = serde_json::from_str(&text)?;
        Ok(simplify_schema(&raw))
    }

    /// Formula search, capped at 100 records. Always returns a value the
    /// model can use: a JSON array of `{id, fields}` on success, guidance
    /// text otherwise.
    pub async fn search(&self, table: &str, filter_formula: &str) -> Value {
        let formula = filter_formula.trim();
        if formula.is_empty() {
            // Rejected locally; no remote call.
            return Value::String(
                "Erreur: La formule filterByFormula ne peut pas être vide. \
                 Pour tout lister, utilise 1."
                    .to_string(),
            );
        }

        let query = [
            ("filterByFormula", formula.to_string()),
            ("maxRecords", SEARCH_MAX_RECORDS.to_string()),
        ];

        match self.list_page(table, &query).await {
            Ok((records, _offset)) => {
                if records.is_empty() {
                    return Value::String(format!(
                        "Aucun résultat trouvé dans la table \"{}\" pour cette formule. \
                         Vérifiez le nom de la table (exactement comme dans le schéma) et la \
                         formule. Si 0 résultats, réessaie avec un mot-clé plus court ou partiel.",
                        table
                    ));
                }
                Value::Array(
                    records
                        .iter()
                        .map(|r| json!({ "id": r["id"], "fields": r["fields"] }))
                        .collect(),
                )
            }
            Err(e) => {
                warn!(table, error = %e, "Airtable search failed");
                Value::String(format!(
                    "Erreur Airtable (table \"{}\"): {}. Il peut s'agir d'une erreur de \
                     syntaxe dans filterByFormula ou d'un nom de champ incorrect. Corrige la \
                     formule (respecte les règles: SEARCH(LOWER('x'), LOWER({{Champ}})), \
                     options exactes pour les select) et réessaie.",
                    table, e
                ))
            }
        }
    }

    /// Single-record fetch plus its comment thread. A comments endpoint
    /// denied by the credential tier still yields the record fields, with
    /// a structured marker in place of the comments.
    pub async fn get_detail(&self, table: &str, record_id: &str) -> Value {
        let url = format!("{}/{}", self.table_url(table), percent_encode(record_id));

        let record = match self.get_json(&url).await {
            Ok(v) => v,
            Err(e) => {
                warn!(table, record_id, error = %e, "Airtable record fetch failed");
                return Value::String(
                    "Erreur: Impossible de trouver ce record. \
                     Vérifiez l'ID et le nom de la table."
                        .to_string(),
                );
            }
        };

        let comments = self.fetch_comments(table, record_id).await;

        json!({
            "id": record["id"],
            "fields": record["fields"],
            "comments": comments,
        })
    }

    async fn fetch_comments(&self, table: &str, record_id: &str) -> Value {
        let url = format!(
            "{}/{}/comments",
            self.table_url(table),
            percent_encode(record_id)
        );

        let resp = match self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return json!({ "_commentairesError": format!("Commentaires: {}", e) });
            }
        };

        let status = resp.status().as_u16();
        if status == 401 || status == 403 {
            // Credential-tier mismatch: the Comments API requires a
            // Personal Access Token. Not a whole-call failure.
            return json!({
                "_commentairesError":
                    "Commentaires non disponibles: l'API Comments exige un \
                     Personal Access Token (PAT) dans la configuration Airtable."
            });
        }

        let text = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return json!({ "_commentairesError": format!("Commentaires: {} {}", status, text) });
        }

        serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("comments").cloned())
            .unwrap_or_else(|| json!([]))
    }

    /// Occurrence counts of one field's values across up to 500 records,
    /// shaped for the chart renderer. Failures surface inside the payload.
    pub async fn aggregate(&self, table: &str, chart_type: &str, group_by: &str) -> Value {
        let mut records: Vec<Value> = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query = vec![
                ("fields[]", group_by.to_string()),
                ("maxRecords", AGGREGATE_MAX_RECORDS.to_string()),
            ];
            if let Some(ref o) = offset {
                query.push(("offset", o.clone()));
            }

            match self.list_page(table, &query).await {
                Ok((page, next)) => {
                    records.extend(page);
                    offset = next;
                    if offset.is_none() || records.len() >= AGGREGATE_MAX_RECORDS {
                        break;
                    }
                }
                Err(e) => {
                    warn!(table, group_by, error = %e, "Airtable aggregate failed");
                    return json!({
                        "chartType": chart_type,
                        "data": [],
                        "error": format!(
                            "Erreur lors du calcul du graphique pour la table \"{}\" \
                             groupée par \"{}\": {}",
                            table, group_by, e
                        ),
                    });
                }
            }
        }
        records.truncate(AGGREGATE_MAX_RECORDS);

        let counts = count_labels(
            records
                .iter()
                .map(|r| normalize_group_value(r["fields"].get(group_by))),
        );

        let data: Vec<Value> = counts
            .into_iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();

        json!({ "chartType": chart_type, "data": data })
    }

    /// One page of a filtered record listing. Returns the records plus the
    /// pagination offset, if any.
    async fn list_page(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<(Vec<Value>, Option<String>)> {
        let body = self
            .get_json_with_query(&self.table_url(table), query)
            .await?;

        let records = body["records"].as_array().cloned().unwrap_or_default();
        let offset = body["offset"].as_str().map(|s| s.to_string());
        debug!(table, count = records.len(), "Airtable page fetched");
        Ok((records, offset))
    }

    async fn get_json(&self, url: &str) -> anyhow::Result<Value> {
        self.get_json_with_query(url, &[]).await
    }

    async fn get_json_with_query(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<Value> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("{} {}", status.as_u16(), text);
        }

        Ok(serde_json::from_str(&text)?)
    }
}

/// Reduce the metadata payload to what the prompt needs: table names, field
/// names/types, and option lists for choice fields that have at least one.
fn simplify_schema(raw: &Value) -> SimplifiedSchema {
    let tables = raw["tables"]
        .as_array()
        .map(|tables| {
            tables
                .iter()
                .map(|t| TableSchema {
                    table_name: t["name"].as_str().unwrap_or_default().to_string(),
                    fields: t["fields"]
                        .as_array()
                        .map(|fields| fields.iter().map(simplify_field).collect())
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    SimplifiedSchema { tables }
}

fn simplify_field(field: &Value) -> FieldSchema {
    let field_type = field["type"].as_str().unwrap_or_default().to_string();

    let options = if field_type == "singleSelect" || field_type == "multipleSelect" {
        field["options"]["choices"]
            .as_array()
            .map(|choices| {
                choices
                    .iter()
                    .filter_map(|c| c["name"].as_str().map(|s| s.to_string()))
                    .collect::<Vec<_>>()
            })
            .filter(|names| !names.is_empty())
    } else {
        None
    };

    FieldSchema {
        name: field["name"].as_str().unwrap_or_default().to_string(),
        field_type,
        options,
    }
}

/// Normalize one grouping-field value into labels: a string or number is
/// one label, a choice list contributes one label per entry (choice
/// objects are reduced to their `name`).
fn normalize_group_value(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Object(o) => o
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(other) => vec![other.to_string()],
    }
}

/// Count occurrences per label. A record with no labels at all, and any
/// blank label, lands in the unknown bucket.
fn count_labels(per_record: impl Iterator<Item = Vec<String>>) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for labels in per_record {
        if labels.is_empty() {
            *counts.entry(UNKNOWN_BUCKET.to_string()).or_default() += 1;
            continue;
        }
        for label in labels {
            let trimmed = label.trim();
            let key = if trimmed.is_empty() {
                UNKNOWN_BUCKET
            } else {
                trimmed
            };
            *counts.entry(key.to_string()).or_default() += 1;
        }
    }
    counts
}

/// RFC 3986 percent-encoding for URL path segments.
fn percent_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 2);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
