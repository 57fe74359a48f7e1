use error::TransferError;
use serde::Deserialize;
use value::Value;

pub const DEFAULT_EXPORT_BATCH: usize = 500;
pub const DEFAULT_IMPORT_BATCH: usize = 100_000;

/// Raw request body of either pipeline; everything optional until resolution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferParams {
    pub cosmos_url: Option<String>,
    pub key_vault_name: Option<String>,
    pub cosmos_secret_name: Option<String>,
    pub cosmos_db: Option<String>,
    pub cosmos_container: Option<String>,
    pub adls_account_name: Option<String>,
    pub adls_file_system: Option<String>,
    pub adls_directory: Option<String>,

    // export only
    pub partition_key_path: Option<String>,
    /// A single value, or a JSON array of values (possibly as a string).
    pub partition_key_value: Option<serde_json::Value>,
    pub batch_size: Option<usize>,
    pub separate_files_per_batch: Option<bool>,

    // import only
    pub truncate_sink_before_write: Option<bool>,
}

/// The connection half shared by both pipelines.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub key_vault: String,
    pub secret_name: String,
    pub database: String,
    pub container: String,
    pub adls_account: String,
    pub adls_file_system: String,
    pub adls_directory: String,
}

impl ConnectionConfig {
    /// Directory holding the table family for this container.
    pub fn export_root(&self) -> String {
        format!("{}/{}", self.adls_directory, self.container)
            .trim_matches('/')
            .to_string()
    }

    fn resolve(params: &TransferParams, directory_required: bool) -> Result<Self, TransferError> {
        let mut missing = vec![];
        let mut take = |label: &str, field: &Option<String>| {
            match field {
                Some(v) if !v.is_empty() => v.clone(),
                _ => {
                    missing.push(label.to_string());
                    String::new()
                }
            }
        };

        let config = ConnectionConfig {
            url: take("cosmos_url", &params.cosmos_url),
            key_vault: take("key_vault_name", &params.key_vault_name),
            secret_name: take("cosmos_secret_name", &params.cosmos_secret_name),
            database: take("cosmos_db", &params.cosmos_db),
            container: take("cosmos_container", &params.cosmos_container),
            adls_account: take("adls_account_name", &params.adls_account_name),
            adls_file_system: take("adls_file_system", &params.adls_file_system),
            adls_directory: if directory_required {
                take("adls_directory", &params.adls_directory)
            } else {
                params.adls_directory.clone().unwrap_or_default()
            },
        };

        if missing.is_empty() {
            Ok(config)
        } else {
            Err(TransferError::Config(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub connection: ConnectionConfig,
    /// Partition key path plus the values to export, when constrained.
    pub partition: Option<(String, Vec<Value>)>,
    pub batch_size: usize,
    pub separate_files_per_batch: bool,
}

impl ExportConfig {
    pub fn resolve(params: &TransferParams) -> Result<Self, TransferError> {
        let connection = ConnectionConfig::resolve(params, false)?;

        let partition = match (&params.partition_key_path, &params.partition_key_value) {
            (None, None) => None,
            (Some(path), Some(raw)) => Some((path.clone(), parse_partition_values(raw)?)),
            _ => {
                return Err(TransferError::Config(
                    "partition_key_path and partition_key_value must be supplied together"
                        .to_string(),
                ));
            }
        };

        Ok(ExportConfig {
            connection,
            partition,
            batch_size: params.batch_size.unwrap_or(DEFAULT_EXPORT_BATCH).max(1),
            separate_files_per_batch: params.separate_files_per_batch.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub connection: ConnectionConfig,
    pub truncate: bool,
    pub batch_size: usize,
}

impl ImportConfig {
    pub fn resolve(params: &TransferParams) -> Result<Self, TransferError> {
        let connection = ConnectionConfig::resolve(params, true)?;
        let truncate = params.truncate_sink_before_write.ok_or_else(|| {
            TransferError::Config(
                "missing required parameter: truncate_sink_before_write".to_string(),
            )
        })?;

        Ok(ImportConfig {
            connection,
            truncate,
            batch_size: params.batch_size.unwrap_or(DEFAULT_IMPORT_BATCH).max(1),
        })
    }
}

/// Accepts a bare value, a JSON array, or a string holding a JSON array.
fn parse_partition_values(raw: &serde_json::Value) -> Result<Vec<Value>, TransferError> {
    let values = match raw {
        serde_json::Value::Array(items) => items.iter().map(Value::from).collect(),
        serde_json::Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('[') {
                let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                    TransferError::Config(format!("invalid partition_key_value: {e}"))
                })?;
                match parsed {
                    serde_json::Value::Array(items) => items.iter().map(Value::from).collect(),
                    other => vec![Value::from(&other)],
                }
            } else {
                vec![Value::text(text)]
            }
        }
        other => vec![Value::from(other)],
    };

    if values.is_empty() {
        return Err(TransferError::Config(
            "partition_key_value resolved to no values".to_string(),
        ));
    }
    Ok(values)
}
