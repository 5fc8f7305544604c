//! Dashboard configuration.
//!
//! Loaded once at start-up from a YAML file (default `app/config.yaml`),
//! then layered with environment variables (a `.env` file is honoured) and
//! finally CLI flags.
//!
//! ```yaml
//! inputs:
//!   document_type: [Invoice, Packing List, Bill of Lading]
//!   country_code:
//!     HK: "+852"
//!     SG: "+65"
//!   admin_id: [admin-001]
//! database:
//!   db_name: postoffice
//!   collection: chase_order
//! agent:
//!   endpoint: http://localhost:8080/agent/agent-call
//!   search_timeout_secs: 30
//!   validation_timeout_secs: 180
//!   research_timeout_secs: 180
//!   poll_interval_secs: 2
//! collections:
//!   log: agent_log
//!   events: event_log
//! upload:
//!   max_workers: 4
//! kyc:
//!   nations:
//!     Hong Kong: [HKID, Passport]
//!   possible_doc_type: [HKID, Passport, Business Registration]
//! ```
//!
//! | Variable         | Meaning                                       |
//! |------------------|-----------------------------------------------|
//! | `ORDERDESK_DB`   | SQLite store path (default `.orderdesk/store.db`) |
//! | `AGENT_URL`      | overrides `agent.endpoint`                    |
//! | `BLOB_CONN`      | Azure storage connection string               |
//! | `BLOB_CONTAINER` | blob container for uploads                    |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "app/config.yaml";
pub const DEFAULT_DB_PATH: &str = ".orderdesk/store.db";
pub const DEFAULT_BLOB_DIR: &str = ".orderdesk/blobs";

/// Keys that must be present in the config file.
const REQUIRED_KEYS: &[&str] = &[
    "inputs",
    "inputs.document_type",
    "inputs.country_code",
    "inputs.admin_id",
    "database",
    "database.db_name",
    "database.collection",
];

/// Form inputs offered by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputsConfig {
    /// Recognised document types.
    pub document_type: Vec<String>,
    /// Country name to phone prefix.
    pub country_code: BTreeMap<String, String>,
    /// Identities the dashboard acts as towards the agent; the first is used.
    pub admin_id: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub db_name: String,
    /// Orders collection.
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,
    #[serde(default = "default_validation_timeout")]
    pub research_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_agent_endpoint() -> String {
    "http://localhost:8080/agent/agent-call".to_string()
}
fn default_search_timeout() -> u64 {
    30
}
fn default_validation_timeout() -> u64 {
    180
}
fn default_poll_interval() -> u64 {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_agent_endpoint(),
            search_timeout_secs: default_search_timeout(),
            validation_timeout_secs: default_validation_timeout(),
            research_timeout_secs: default_validation_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl AgentConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn research_timeout(&self) -> Duration {
        Duration::from_secs(self.research_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Names of the secondary collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionsConfig {
    pub log: String,
    pub events: String,
    pub checker: String,
    pub suppliers: String,
    pub products: String,
    pub supplier_searches: String,
    pub product_searches: String,
    /// Records written by KYC extraction.
    pub kyc: String,
    pub research: String,
    pub visualizations: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            log: "agent_log".into(),
            events: "event_log".into(),
            checker: "air8_checker".into(),
            suppliers: "supplier".into(),
            products: "product".into(),
            supplier_searches: "supplier_search_history".into(),
            product_searches: "product_search_history".into(),
            kyc: "air8_kyc".into(),
            research: "air8_company_info_news".into(),
            visualizations: "data_visualization".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_workers: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

/// Document types accepted for KYC extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KycConfig {
    /// Nation to the document types issued there.
    pub nations: BTreeMap<String, Vec<String>>,
    /// Types considered when one file holds several documents.
    pub possible_doc_type: Vec<String>,
}

impl KycConfig {
    pub fn document_types(&self, nation: &str) -> Option<&[String]> {
        self.nations.get(nation).map(Vec::as_slice)
    }
}

/// The YAML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub inputs: InputsConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub kyc: KycConfig,
}

impl DashboardConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse config text. `origin` only labels errors.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let raw: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|source| ConfigError::ParseFailed {
                path: origin.to_path_buf(),
                source,
            })?;

        for key in REQUIRED_KEYS {
            let mut node = Some(&raw);
            for part in key.split('.') {
                node = node.and_then(|n| n.get(part));
            }
            if node.is_none_or(|n| n.is_null()) {
                return Err(ConfigError::MissingKey(key.to_string()));
            }
        }

        let config: DashboardConfig =
            serde_yaml::from_value(raw).map_err(|source| ConfigError::ParseFailed {
                path: origin.to_path_buf(),
                source,
            })?;
        if config.inputs.admin_id.is_empty() {
            return Err(ConfigError::MissingKey("inputs.admin_id".into()));
        }
        Ok(config)
    }

    /// Identity used for agent calls.
    pub fn admin_id(&self) -> &str {
        self.inputs.admin_id.first().map(String::as_str).unwrap_or_default()
    }

    pub fn phone_code(&self, country: &str) -> Option<&str> {
        self.inputs.country_code.get(country).map(String::as_str)
    }

    pub fn is_document_type(&self, name: &str) -> bool {
        self.inputs.document_type.iter().any(|d| d == name)
    }
}

/// Azure blob settings from the environment.
#[derive(Debug, Clone)]
pub struct BlobSettings {
    pub connection_string: String,
    pub container: String,
}

/// Effective settings: config file plus environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub dashboard: DashboardConfig,
    pub db_path: PathBuf,
    /// `None` means the local blob directory is used.
    pub blob: Option<BlobSettings>,
    pub blob_dir: PathBuf,
}

impl Settings {
    /// Load `path` and the process environment (after reading `.env`).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let dashboard = DashboardConfig::load(path)?;
        Self::from_env(dashboard, |key| std::env::var(key).ok())
    }

    /// Layer environment values over a parsed config.
    pub fn from_env<F>(mut dashboard: DashboardConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = env("AGENT_URL").filter(|u| !u.is_empty()) {
            dashboard.agent.endpoint = url;
        }
        let db_path = env("ORDERDESK_DB")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let blob = match env("BLOB_CONN").filter(|c| !c.is_empty()) {
            Some(connection_string) => {
                let container = env("BLOB_CONTAINER")
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| ConfigError::MissingEnv("BLOB_CONTAINER".into()))?;
                Some(BlobSettings {
                    connection_string,
                    container,
                })
            }
            None => None,
        };

        Ok(Self {
            dashboard,
            db_path,
            blob,
            blob_dir: PathBuf::from(DEFAULT_BLOB_DIR),
        })
    }
}

#[cfg(test)]
pub(crate) const SAMPLE: &str = r#"
inputs:
  document_type: [Invoice, Packing List]
  country_code:
    HK: "+852"
    SG: "+65"
  admin_id: [admin-001, admin-002]
database:
  db_name: postoffice
  collection: chase_order
kyc:
  nations:
    Hong Kong: [HKID, Passport]
    Singapore: [NRIC]
  possible_doc_type: [HKID, Passport, NRIC, Business Registration]
"#;

/// Parsed [`SAMPLE`] for tests in other modules.
#[cfg(test)]
pub(crate) fn sample_config() -> DashboardConfig {
    DashboardConfig::parse(SAMPLE, Path::new("config.yaml")).expect("sample config parses")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(text: &str) -> Result<DashboardConfig, ConfigError> {
        DashboardConfig::parse(text, Path::new("config.yaml"))
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.inputs.document_type, vec!["Invoice", "Packing List"]);
        assert_eq!(config.phone_code("HK"), Some("+852"));
        assert_eq!(config.phone_code("XX"), None);
        assert_eq!(config.admin_id(), "admin-001");
        assert_eq!(config.database.collection, "chase_order");
        assert_eq!(config.agent.search_timeout(), Duration::from_secs(30));
        assert_eq!(config.agent.validation_timeout(), Duration::from_secs(180));
        assert_eq!(config.agent.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.collections.log, "agent_log");
        assert_eq!(config.upload.max_workers, 4);
        assert!(config.is_document_type("Invoice"));
        assert_eq!(config.collections.kyc, "air8_kyc");
        assert_eq!(
            config.kyc.document_types("Hong Kong"),
            Some(&["HKID".to_string(), "Passport".to_string()][..])
        );
        assert_eq!(config.kyc.document_types("Mars"), None);
    }

    #[test]
    fn test_missing_key_is_reported_by_name() {
        let text = SAMPLE.replace("  admin_id: [admin-001, admin-002]\n", "");
        match parse(&text) {
            Err(ConfigError::MissingKey(key)) => assert_eq!(key, "inputs.admin_id"),
            other => panic!("expected MissingKey, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_section_is_reported() {
        let text = "inputs:\n  document_type: []\n  country_code: {}\n  admin_id: [a]\n";
        assert!(matches!(parse(text), Err(ConfigError::MissingKey(k)) if k == "database"));
    }

    #[test]
    fn test_empty_admin_list_is_missing() {
        let text = SAMPLE.replace("[admin-001, admin-002]", "[]");
        assert!(matches!(parse(&text), Err(ConfigError::MissingKey(_))));
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        assert!(matches!(parse("inputs: [unclosed"), Err(ConfigError::ParseFailed { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DashboardConfig::load(Path::new("/nonexistent/orderdesk/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFailed { .. }));
    }

    #[test]
    fn test_env_layering() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AGENT_URL", "http://agents.internal/agent-call"),
            ("ORDERDESK_DB", "/tmp/od.db"),
            ("BLOB_CONN", "AccountName=acct;AccountKey=a2V5"),
            ("BLOB_CONTAINER", "uploads"),
        ]);
        let settings =
            Settings::from_env(parse(SAMPLE).unwrap(), |k| env.get(k).map(|v| v.to_string()))
                .unwrap();
        assert_eq!(settings.dashboard.agent.endpoint, "http://agents.internal/agent-call");
        assert_eq!(settings.db_path, PathBuf::from("/tmp/od.db"));
        assert_eq!(settings.blob.unwrap().container, "uploads");
    }

    #[test]
    fn test_blob_conn_requires_container() {
        let err = Settings::from_env(parse(SAMPLE).unwrap(), |k| {
            (k == "BLOB_CONN").then(|| "AccountName=a".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(v) if v == "BLOB_CONTAINER"));
    }

    #[test]
    fn test_env_defaults() {
        let settings = Settings::from_env(parse(SAMPLE).unwrap(), |_| None).unwrap();
        assert_eq!(settings.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert!(settings.blob.is_none());
        assert_eq!(settings.dashboard.agent.endpoint, default_agent_endpoint());
    }
}
