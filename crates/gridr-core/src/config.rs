//! Resource configuration: which backends exist and what they look like.
//!
//! Configuration is a YAML document listing resources. Each resource has
//! the typed fields every backend shares (capacity limits, transport,
//! frontend host) plus free-form passthrough keys the selected adapter
//! interprets (command paths, spool directory, usernames, ...):
//!
//! ```yaml
//! resources:
//!   - name: cluster-a
//!     type: slurm
//!     transport: local
//!     max_cores: 512
//!     max_cores_per_job: 64
//!     max_memory_per_core: 4GiB
//!     max_walltime: 48h
//!     accounting_delay: 15s
//!     sbatch: sbatch --account=proj42
//! ```
//!
//! Quantities are written as display strings (`4GiB`, `48h`), the same
//! form they serialize back to.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gridr_units::{Duration, Memory};

use crate::error::{LrmsError, LrmsResult};
use crate::job::Arch;
use crate::lrms::LrmsLimits;

fn default_transport() -> String {
    "local".to_string()
}

/// Configuration for one computational resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource name, unique within the configuration.
    pub name: String,
    /// Backend type; selects the adapter via the registry.
    #[serde(rename = "type")]
    pub kind: String,
    /// Host running the scheduler commands. Informational for the local
    /// transport; a network transport would connect to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<String>,
    /// Transport used to reach the frontend.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Total execution slots on the resource.
    pub max_cores: u32,
    /// Largest number of slots a single job may take.
    pub max_cores_per_job: u32,
    /// Largest memory-per-core request the resource accepts.
    pub max_memory_per_core: Memory,
    /// Longest wall-clock time a job may run.
    pub max_walltime: Duration,
    /// Architectures present on the resource. Empty means unconstrained.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<Arch>,
    /// How long to keep a vanished job's last state before declaring it
    /// unobservable. Adapter default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounting_delay: Option<Duration>,
    /// Time-to-live for cached information-system queries. Adapter
    /// default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<Duration>,
    /// Adapter-specific keys, passed through uninterpreted.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResourceConfig {
    /// A minimal single-slot configuration, for programmatic use.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            frontend: None,
            transport: default_transport(),
            max_cores: 1,
            max_cores_per_job: 1,
            max_memory_per_core: Memory::gib(2),
            max_walltime: Duration::hours(8),
            architectures: Vec::new(),
            accounting_delay: None,
            cache_ttl: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the frontend host.
    pub fn with_frontend(mut self, frontend: impl Into<String>) -> Self {
        self.frontend = Some(frontend.into());
        self
    }

    /// Add an adapter-specific passthrough key.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// A passthrough key as a string, when present and a string.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|value| value.as_str())
    }

    /// The declared capacity limits, in the form the matcher consumes.
    pub fn limits(&self) -> LrmsLimits {
        LrmsLimits {
            max_cores: self.max_cores,
            max_cores_per_job: self.max_cores_per_job,
            max_memory_per_core: self.max_memory_per_core,
            max_walltime: self.max_walltime,
            architectures: self.architectures.clone(),
        }
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridrConfig {
    /// Configured resources, in declaration order. Order matters: the
    /// driver submits to the first resource that admits a request.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

impl GridrConfig {
    /// Parse a configuration document from YAML text.
    pub fn from_yaml(text: &str) -> LrmsResult<Self> {
        let config: GridrConfig = serde_yaml_ng::from_str(text)
            .map_err(|e| LrmsError::Configuration(format!("invalid configuration: {e}")))?;
        config.check_names()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> LrmsResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LrmsError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Default location of the configuration file: `~/.gridr/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".gridr").join("config.yaml"))
    }

    /// Look up a resource by name.
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }

    fn check_names(&self) -> LrmsResult<()> {
        for (i, resource) in self.resources.iter().enumerate() {
            if self.resources[..i].iter().any(|r| r.name == resource.name) {
                return Err(LrmsError::Configuration(format!(
                    "duplicate resource name '{}'",
                    resource.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridr_units::{DurationUnit, MemoryUnit};

    const SAMPLE: &str = r#"
resources:
  - name: cluster-a
    type: slurm
    frontend: login1.cluster-a.example.org
    max_cores: 512
    max_cores_per_job: 64
    max_memory_per_core: 4GiB
    max_walltime: 48h
    accounting_delay: 15s
    architectures: [x86_64]
    sbatch: sbatch --account=proj42
    spooldir: /scratch/gridr
  - name: cluster-b
    type: slurm
    max_cores: 16
    max_cores_per_job: 16
    max_memory_per_core: 2000MB
    max_walltime: 4h
"#;

    #[test]
    fn sample_config_parses() {
        let config = GridrConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.resources.len(), 2);

        let a = config.resource("cluster-a").unwrap();
        assert_eq!(a.kind, "slurm");
        assert_eq!(a.transport, "local");
        assert_eq!(a.max_cores, 512);
        assert_eq!(a.max_memory_per_core.amount(MemoryUnit::GiB), 4);
        assert_eq!(a.max_walltime.amount(DurationUnit::Hour), 48);
        assert_eq!(
            a.accounting_delay.map(|d| d.amount(DurationUnit::Second)),
            Some(15)
        );
        assert_eq!(a.architectures, vec![Arch::X86_64]);
        assert_eq!(a.extra_str("sbatch"), Some("sbatch --account=proj42"));
        assert_eq!(a.extra_str("spooldir"), Some("/scratch/gridr"));

        let b = config.resource("cluster-b").unwrap();
        assert!(b.frontend.is_none());
        assert!(b.accounting_delay.is_none());
        assert!(b.extra.is_empty());
    }

    #[test]
    fn limits_mirror_the_typed_fields() {
        let config = GridrConfig::from_yaml(SAMPLE).unwrap();
        let limits = config.resource("cluster-b").unwrap().limits();
        assert_eq!(limits.max_cores_per_job, 16);
        assert_eq!(limits.max_memory_per_core, Memory::mb(2000));
        assert!(limits.architectures.is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let text = r#"
resources:
  - name: twin
    type: slurm
    max_cores: 1
    max_cores_per_job: 1
    max_memory_per_core: 1GiB
    max_walltime: 1h
  - name: twin
    type: slurm
    max_cores: 2
    max_cores_per_job: 2
    max_memory_per_core: 1GiB
    max_walltime: 1h
"#;
        let err = GridrConfig::from_yaml(text).unwrap_err();
        assert!(matches!(err, LrmsError::Configuration(_)));
        assert!(err.to_string().contains("twin"));
    }

    #[test]
    fn missing_capacity_field_is_an_error() {
        let text = r#"
resources:
  - name: incomplete
    type: slurm
    max_cores: 4
"#;
        assert!(GridrConfig::from_yaml(text).is_err());
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let config = GridrConfig::from_yaml(SAMPLE).unwrap();
        let text = serde_yaml_ng::to_string(&config).unwrap();
        let back = GridrConfig::from_yaml(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn programmatic_construction() {
        let resource = ResourceConfig::new("inline", "slurm")
            .with_frontend("head-node")
            .with_extra("squeue", serde_json::Value::String("/usr/bin/squeue".into()));
        assert_eq!(resource.frontend.as_deref(), Some("head-node"));
        assert_eq!(resource.extra_str("squeue"), Some("/usr/bin/squeue"));
        assert_eq!(resource.extra_str("missing"), None);
    }
}
