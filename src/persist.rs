//! Persisted campaign/generalize directory layout (§6.4). The spec lists
//! this as an interface, not an algorithm; a complete crate still has to
//! write it, modeled on `files.rs`'s save-path conventions.

use crate::block::AbstractBlock;
use crate::concrete::ConcreteBasicBlock;
use crate::config::IwhoFilter;
use crate::discovery::{CampaignReport, Discovery};
use crate::errors::ConfigError;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

fn write_json(path: &Path, value: &Value) -> Result<(), ConfigError> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// One campaign's directory: `campaign_<idx>_<timestamp>/` under `outdir`
/// (§6.4). `timestamp` is supplied by the caller so this module never
/// calls a clock itself.
pub fn campaign_dir(outdir: &Path, idx: usize, timestamp: &str) -> PathBuf {
    outdir.join(format!("campaign_{}_{}", idx, timestamp))
}

/// Write `campaign_config.json`, `discoveries/discovery_<id>.json` and
/// `witnesses/witness_<id>.json` for a completed campaign (§6.4).
pub fn write_campaign(dir: &Path, resolved_config: &Value, report: &CampaignReport) -> Result<(), ConfigError> {
    fs::create_dir_all(dir)?;
    fs::create_dir_all(dir.join("filter_files"))?;
    fs::create_dir_all(dir.join("discoveries"))?;
    fs::create_dir_all(dir.join("witnesses"))?;

    write_json(&dir.join("campaign_config.json"), resolved_config)?;
    fs::write(dir.join("log.txt"), "")?;

    for discovery in report.discoveries.discoveries() {
        write_discovery(dir, discovery)?;
    }
    Ok(())
}

fn write_discovery(campaign_dir: &Path, discovery: &Discovery) -> Result<(), ConfigError> {
    let discovery_path = campaign_dir.join("discoveries").join(format!("discovery_{}.json", discovery.id));
    write_json(&discovery_path, &discovery.ab.to_json())?;

    let witness_path = campaign_dir.join("witnesses").join(format!("witness_{}.json", discovery.id));
    let witness = json!({
        "discovery_id": discovery.id,
        "trace_len": discovery.trace_len,
    });
    write_json(&witness_path, &witness)
}

/// Copy one filter-list file into `filter_files/filter_<NN>_<name>.csv`
/// (§6.4, §8 scenario 5), preserving content byte-for-byte.
pub fn copy_filter_file(campaign_dir: &Path, index: usize, source: &Path) -> Result<PathBuf, ConfigError> {
    let name = source.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "filter".to_string());
    let dest = campaign_dir.join("filter_files").join(format!("filter_{:02}_{}", index, name));
    fs::create_dir_all(campaign_dir.join("filter_files"))?;
    fs::copy(source, &dest)?;
    Ok(dest)
}

/// Rewrite a resolved config's blacklist/whitelist filters in place so each
/// points at its own copy under `filter_files/` (§6.4, §8 scenario 5:
/// "a campaign with a blacklist filter ... writes a resolved config whose
/// filter path points into filter_files/filter_01_bl.csv"). `no_cf` and
/// `with_measurements` carry no file and are left untouched.
pub fn persist_filters(campaign_dir: &Path, filters: &mut [IwhoFilter]) -> Result<(), ConfigError> {
    let mut index = 0usize;
    for filter in filters.iter_mut() {
        match filter {
            IwhoFilter::Blacklist { file_path } | IwhoFilter::Whitelist { file_path } => {
                let dest = copy_filter_file(campaign_dir, index, Path::new(file_path))?;
                *file_path = dest.to_string_lossy().into_owned();
                index += 1;
            }
            IwhoFilter::NoCf | IwhoFilter::WithMeasurements => {}
        }
    }
    Ok(())
}

/// Write a `generalize` run's single output directory: `start_bb.s`,
/// `minimized_bb.s`, `discovery.json`, `witness.json`, `infos.json` (§6.4).
pub fn write_generalize_run(
    dir: &Path,
    start_bb: &ConcreteBasicBlock,
    minimized_bb: &ConcreteBasicBlock,
    discovery: &AbstractBlock,
    trace_len: usize,
    infos: &Value,
    wrap_in_loop: bool,
) -> Result<(), ConfigError> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join("start_bb.s"), start_bb.to_asm_for_sampling(wrap_in_loop))?;
    fs::write(dir.join("minimized_bb.s"), minimized_bb.to_asm_for_sampling(wrap_in_loop))?;
    write_json(&dir.join("discovery.json"), &discovery.to_json())?;
    write_json(&dir.join("witness.json"), &json!({ "trace_len": trace_len }))?;
    write_json(&dir.join("infos.json"), infos)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concrete::ConcreteInstruction;
    use std::collections::BTreeMap;

    fn sample_bb() -> ConcreteBasicBlock {
        ConcreteBasicBlock {
            instructions: vec![ConcreteInstruction {
                scheme_id: "add_r_r".into(),
                operand_assignment: BTreeMap::new(),
                text: "add eax, ebx".into(),
            }],
        }
    }

    #[test]
    fn write_generalize_run_creates_all_five_files() {
        let tmp = std::env::temp_dir().join(format!("anica_test_generalize_{}", std::process::id()));
        let bb = sample_bb();
        let discovery = AbstractBlock { abs_insns: vec![], abs_aliasing: crate::block::AbstractAliasing::top() };
        write_generalize_run(&tmp, &bb, &bb, &discovery, 2, &json!({"seed": 1}), false).unwrap();
        for name in ["start_bb.s", "minimized_bb.s", "discovery.json", "witness.json", "infos.json"] {
            assert!(tmp.join(name).is_file(), "missing {}", name);
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn persist_filters_rewrites_blacklist_path_into_filter_files() {
        let tmp = std::env::temp_dir().join(format!("anica_test_persist_filters_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        let source = tmp.join("bl.csv");
        fs::write(&source, b"mov,add\n").unwrap();

        let campaign_dir = tmp.join("campaign_0_now");
        let mut filters = vec![IwhoFilter::Blacklist { file_path: source.to_string_lossy().into_owned() }];
        persist_filters(&campaign_dir, &mut filters).unwrap();

        let IwhoFilter::Blacklist { file_path } = &filters[0] else { panic!("expected blacklist") };
        assert!(file_path.ends_with("filter_files/filter_00_bl.csv"), "got {}", file_path);
        assert_eq!(fs::read(file_path).unwrap(), b"mov,add\n");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn copy_filter_file_preserves_content_byte_for_byte() {
        let tmp = std::env::temp_dir().join(format!("anica_test_filter_{}", std::process::id()));
        fs::create_dir_all(&tmp).unwrap();
        let source = tmp.join("bl.csv");
        fs::write(&source, b"mov,add\n").unwrap();
        let dest = copy_filter_file(&tmp, 1, &source).unwrap();
        assert_eq!(fs::read(&source).unwrap(), fs::read(&dest).unwrap());
        assert_eq!(dest.file_name().unwrap().to_string_lossy(), "filter_01_bl.csv");
        let _ = fs::remove_dir_all(&tmp);
    }
}
