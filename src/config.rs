//! Campaign configuration (§6.2): a single JSON object, loaded once,
//! validated into a typed struct, with relative-path and `${BASE_DIR}`
//! resolution.

use crate::errors::ConfigError;
use crate::feature::{FeatureDecl, FeatureKind};
use crate::interestingness::InterestingnessConfig;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IwhoFilter {
    NoCf,
    WithMeasurements,
    Blacklist { file_path: String },
    Whitelist { file_path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IwhoConfig {
    pub context_specifier: String,
    #[serde(default)]
    pub filters: Vec<IwhoFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsnFeatureManagerConfig {
    pub features: Vec<(String, FeatureKind)>,
}

impl InsnFeatureManagerConfig {
    pub fn to_decls(&self) -> Vec<FeatureDecl> {
        self.features.iter().map(|(name, kind)| FeatureDecl { name: name.clone(), kind: kind.clone() }).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub discovery_batch_size: usize,
    pub discovery_possible_block_lengths: Vec<usize>,
    pub generalization_batch_size: usize,
    pub generalization_strategy: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SamplingConfig {
    #[serde(default)]
    pub wrap_in_loop: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredManagerConfig {
    pub registry_path: String,
    #[serde(default)]
    pub num_processes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationConfig {
    #[serde(default)]
    pub max_discoveries: Option<u64>,
    #[serde(default)]
    pub days: Option<u64>,
    #[serde(default)]
    pub hours: Option<u64>,
    #[serde(default)]
    pub minutes: Option<u64>,
    #[serde(default)]
    pub seconds: Option<u64>,
    #[serde(default)]
    pub max_consecutive_empty_batches: Option<u64>,
}

impl TerminationConfig {
    pub fn max_duration_secs(&self) -> Option<u64> {
        if self.days.is_none() && self.hours.is_none() && self.minutes.is_none() && self.seconds.is_none() {
            return None;
        }
        Some(
            self.days.unwrap_or(0) * 86_400
                + self.hours.unwrap_or(0) * 3_600
                + self.minutes.unwrap_or(0) * 60
                + self.seconds.unwrap_or(0),
        )
    }
}

/// Validated, path-resolved campaign configuration (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub insn_feature_manager: InsnFeatureManagerConfig,
    pub iwho: IwhoConfig,
    pub interestingness_metric: InterestingnessConfig,
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub measurement_db: Option<Value>,
    pub predmanager: PredManagerConfig,
    #[serde(default)]
    pub termination: TerminationConfig,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        TerminationConfig { max_discoveries: None, days: None, hours: None, minutes: None, seconds: None, max_consecutive_empty_batches: None }
    }
}

impl Config {
    /// Load and validate a config file, resolving `.`-relative paths and
    /// `${BASE_DIR}` against the file's enclosing directory (§6.2).
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&text)?;
        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base_dir);
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        for filter in &mut self.iwho.filters {
            match filter {
                IwhoFilter::Blacklist { file_path } | IwhoFilter::Whitelist { file_path } => {
                    *file_path = resolve_path(file_path, base_dir);
                }
                IwhoFilter::NoCf | IwhoFilter::WithMeasurements => {}
            }
        }
        self.predmanager.registry_path = resolve_path(&self.predmanager.registry_path, base_dir);
    }
}

/// Resolve one path per §6.2: `.`-relative paths resolve against
/// `base_dir`; `${BASE_DIR}` expands to it literally.
pub fn resolve_path(raw: &str, base_dir: &Path) -> String {
    let expanded = raw.replace("${BASE_DIR}", &base_dir.to_string_lossy());
    if expanded.starts_with("./") || expanded.starts_with("../") {
        base_dir.join(&expanded).to_string_lossy().into_owned()
    } else {
        expanded
    }
}

/// `TEMPLATE:all_predictor_pairs` preprocessing (§9): expands one config
/// naming a predictor-key pattern list into `C(n, 2)` configs, one per
/// unordered pair, each overriding `predmanager`'s resolved predictor set.
pub fn expand_all_predictor_pairs(predictor_keys: &[String]) -> Vec<(String, String)> {
    predictor_keys
        .iter()
        .cloned()
        .tuple_combinations()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_relative_paths_resolve_against_base_dir() {
        let base = Path::new("/campaigns/case1");
        assert_eq!(resolve_path("./bl.csv", base), "/campaigns/case1/./bl.csv");
    }

    #[test]
    fn base_dir_token_expands_literally() {
        let base = Path::new("/campaigns/case1");
        assert_eq!(resolve_path("${BASE_DIR}/bl.csv", base), "/campaigns/case1/bl.csv");
    }

    #[test]
    fn absolute_paths_are_untouched() {
        let base = Path::new("/campaigns/case1");
        assert_eq!(resolve_path("/etc/bl.csv", base), "/etc/bl.csv");
    }

    #[test]
    fn all_predictor_pairs_is_n_choose_2() {
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let pairs = expand_all_predictor_pairs(&keys);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&("a".to_string(), "b".to_string())));
        assert!(pairs.contains(&("b".to_string(), "c".to_string())));
    }

    #[test]
    fn termination_duration_sums_all_units() {
        let t = TerminationConfig { days: Some(1), hours: Some(1), minutes: Some(1), seconds: Some(1), ..Default::default() };
        assert_eq!(t.max_duration_secs(), Some(86_400 + 3_600 + 60 + 1));
    }

    #[test]
    fn termination_with_no_duration_fields_is_none() {
        let t = TerminationConfig::default();
        assert_eq!(t.max_duration_secs(), None);
    }
}
