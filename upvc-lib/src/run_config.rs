use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::upvc_err::{Result, UpvcError};

/// Which kind of platform the run is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Simulator,
    Hardware,
}

impl TargetType {
    pub fn dpus_per_rank(&self) -> usize {
        match self {
            TargetType::Simulator => 8,
            TargetType::Hardware => 64,
        }
    }
}

/// What to do when a unit's published checksum disagrees with its results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    #[default]
    Fatal,
    LogOnly,
}

fn default_result_dir() -> PathBuf {
    PathBuf::from("res")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("upvc_log.txt")
}

/// Settings of one mapping run, usually read from a TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Logical units used by the run, a multiple of the rank size.
    pub nb_dpus_per_run: usize,
    pub target: TargetType,
    /// Image loaded on every rank.
    pub dpu_binary: PathBuf,
    /// Global unit id; only the rank holding it runs, and only this unit gets reads.
    #[serde(default)]
    pub debug_dpu: Option<usize>,
    /// Append per-tasklet counters to the log after each pass.
    #[serde(default)]
    pub stats: bool,
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    #[serde(default)]
    pub checksum_policy: ChecksumPolicy,
}

impl RunConfig {
    pub fn new(nb_dpus_per_run: usize, target: TargetType, dpu_binary: &Path) -> RunConfig {
        RunConfig {
            nb_dpus_per_run,
            target,
            dpu_binary: dpu_binary.to_path_buf(),
            debug_dpu: None,
            stats: false,
            result_dir: default_result_dir(),
            log_path: default_log_path(),
            checksum_policy: ChecksumPolicy::default(),
        }
    }
    pub fn from_toml_str(data: &str) -> Result<RunConfig> {
        let config: RunConfig = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }
    pub fn load(path: &Path) -> Result<RunConfig> {
        RunConfig::from_toml_str(&fs::read_to_string(path)?)
    }
    pub fn validate(&self) -> Result<()> {
        if self.nb_dpus_per_run == 0 {
            return Err(UpvcError::Config("nb_dpus_per_run must be positive".to_string()));
        }
        if self.dpu_binary.as_os_str().is_empty() {
            return Err(UpvcError::Config("no DPU program given".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_from_toml() {
        let config = RunConfig::from_toml_str(
            r#"
            nb_dpus_per_run = 16
            target = "simulator"
            dpu_binary = "build/upvc_dpu"
            "#,
        )
        .unwrap();
        assert_eq!(config, RunConfig::new(16, TargetType::Simulator, Path::new("build/upvc_dpu")));
        assert_eq!(config.result_dir, PathBuf::from("res"));
        assert_eq!(config.checksum_policy, ChecksumPolicy::Fatal);
    }

    #[test]
    fn test_load_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            nb_dpus_per_run = 128
            target = "hardware"
            dpu_binary = "/opt/upvc/dpu"
            debug_dpu = 70
            stats = true
            result_dir = "/tmp/res"
            checksum_policy = "log_only"
            "#
        )
        .unwrap();
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.target.dpus_per_rank(), 64);
        assert_eq!(config.debug_dpu, Some(70));
        assert!(config.stats);
        assert_eq!(config.checksum_policy, ChecksumPolicy::LogOnly);
        assert_eq!(config.log_path, PathBuf::from("upvc_log.txt"));
    }

    #[test]
    fn test_rejects_bad_configs() {
        assert!(matches!(
            RunConfig::from_toml_str("nb_dpus_per_run = 8\ntarget = \"fpga\"\ndpu_binary = \"x\""),
            Err(UpvcError::Toml(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("nb_dpus_per_run = 0\ntarget = \"simulator\"\ndpu_binary = \"x\""),
            Err(UpvcError::Config(_))
        ));
        assert!(RunConfig::from_toml_str("nb_dpus_per_run = 8\ntarget = \"simulator\"\ndpu_binary = \"\"").is_err());
    }
}
