use serde::{Deserialize, Serialize};

/// Candidate configuration file (YAML).
///
/// Example `candidate.yaml`:
/// ```yaml
/// store: http://10.0.0.1:2379
/// leader-key: leader
/// lease-ttl-secs: 10
/// renew-interval-secs: 2
/// call-timeout-ms: 5000
/// rejoin-after-loss: false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateConfigFile {
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default, alias = "leader-key")]
    pub leader_key: Option<String>,
    #[serde(default, alias = "lease-ttl-secs")]
    pub lease_ttl_secs: Option<u64>,
    #[serde(default, alias = "renew-interval-secs")]
    pub renew_interval_secs: Option<u64>,
    #[serde(default, alias = "call-timeout-ms")]
    pub call_timeout_ms: Option<u64>,
    #[serde(default, alias = "rejoin-after-loss")]
    pub rejoin_after_loss: Option<bool>,
}

/// Store server configuration file (YAML).
///
/// Example `store.yaml`:
/// ```yaml
/// port: 2379
/// watch-history: 1024
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "watch-history")]
    pub watch_history: Option<usize>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg: CandidateConfigFile =
            load_config_file("/nonexistent/leaderd/candidate.yaml").unwrap();
        assert!(cfg.store.is_none());
        assert!(cfg.rejoin_after_loss.is_none());
    }

    #[test]
    fn test_kebab_case_aliases() {
        let yaml = "store: http://10.0.0.1:2379\nleader-key: primary\nlease-ttl-secs: 20\nrejoin-after-loss: true\n";
        let cfg: CandidateConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.store.as_deref(), Some("http://10.0.0.1:2379"));
        assert_eq!(cfg.leader_key.as_deref(), Some("primary"));
        assert_eq!(cfg.lease_ttl_secs, Some(20));
        assert_eq!(cfg.rejoin_after_loss, Some(true));

        let store: StoreConfigFile = serde_yaml::from_str("port: 2380\nwatch-history: 64\n").unwrap();
        assert_eq!(store.port, Some(2380));
        assert_eq!(store.watch_history, Some(64));
    }
}
