//! CLI front-end over the AnICA core (§6.3): `discover`, `generalize`,
//! `check-predictors`.

use anica::concrete::{ConcreteBasicBlock, ConcreteInstruction};
use anica::config::Config;
use anica::context::AbstractionContext;
use anica::discovery::run_campaign;
use anica::generalizer::{self, GeneralizationStrategy, InteractiveChoice};
use anica::iwho::{load_universe_from_file, InMemoryUniverse, SchemeUniverse};
use anica::persist;
use anica::predictor::{load_registry_from_file, PredictorManager};
use clap::{Parser, Subcommand};
use env_logger::Env;
#[macro_use]
extern crate log;
use anica::errors::ConfigError;
use mimalloc::MiMalloc;
use rand::SeedableRng;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Differential-testing engine for x86 basic-block throughput predictors
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery campaign(s) against a configuration
    Discover {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Validate the config and exit without running a campaign
        #[arg(long)]
        check_config: bool,

        /// Run successive campaigns until interrupted
        #[arg(long)]
        r#loop: bool,

        /// Expand TEMPLATE:all_predictor_pairs into one config per pair first
        #[arg(long)]
        split_configs: bool,

        #[arg(long, value_name = "N")]
        seed: Option<u64>,

        #[arg(value_name = "OUTDIR")]
        outdir: PathBuf,
    },
    /// Generalize a single seed block
    Generalize {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        #[arg(long, value_name = "N")]
        seed: Option<u64>,

        #[arg(long)]
        no_minimize: bool,

        #[arg(long)]
        no_restrict_to_supported: bool,

        #[arg(long)]
        interactive: bool,

        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,

        #[arg(value_name = "ASM_FILE")]
        asm_file: PathBuf,

        #[arg(value_name = "PREDICTOR_ID", required = true)]
        predictor_ids: Vec<String>,
    },
    /// Probe each predictor with every scheme in the universe
    CheckPredictors {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        #[arg(long)]
        write_filter: bool,

        #[arg(long, value_name = "N", default_value = "64")]
        batch_size: usize,

        #[arg(value_name = "PREDICTOR_ID")]
        predictor_ids: Vec<String>,
    },
}

fn build_context(config: &Config) -> anyhow::Result<AbstractionContext> {
    let universe = load_universe_from_file(std::path::Path::new(&config.iwho.context_specifier))?;
    let filtered = anica::iwho::apply_filters(universe.schemes().to_vec(), &config.iwho.filters)?;
    let universe = InMemoryUniverse::new(filtered);
    Ok(AbstractionContext::new(config.insn_feature_manager.to_decls(), Arc::new(universe)))
}

/// Run one campaign at `campaign_idx` against the given predictor key set
/// and persist it (§4.8, §6.4).
fn run_one_campaign(
    ctx: &AbstractionContext,
    config: &Config,
    registry: &dyn PredictorManager,
    keys: &[String],
    campaign_seed: u64,
    outdir: &PathBuf,
    campaign_idx: usize,
) -> anyhow::Result<()> {
    let report = run_campaign(ctx, config, registry, keys, campaign_seed, || false)?;
    info!(
        "campaign {} ({:?}) ran {} batches, {} discoveries",
        campaign_idx,
        keys,
        report.batches_run,
        report.discoveries.len()
    );
    let dir = persist::campaign_dir(outdir, campaign_idx, "now");
    let mut resolved_config = config.clone();
    persist::persist_filters(&dir, &mut resolved_config.iwho.filters)?;
    let resolved = serde_json::to_value(&resolved_config)?;
    persist::write_campaign(&dir, &resolved, &report)?;
    Ok(())
}

fn run_discover(
    config_path: &PathBuf,
    check_config: bool,
    r#loop: bool,
    split_configs: bool,
    seed: Option<u64>,
    outdir: &PathBuf,
) -> anyhow::Result<()> {
    info!("loading config from {:?}", config_path);
    let config = Config::load(config_path)?;
    if check_config {
        info!("config is valid");
        return Ok(());
    }

    let ctx = build_context(&config)?;
    let registry = load_registry_from_file(std::path::Path::new(&config.predmanager.registry_path))?;
    let campaign_seed = seed.unwrap_or(0);

    // `TEMPLATE:all_predictor_pairs` preprocessing (§9): one campaign per
    // unordered pair of registered predictor keys instead of one campaign
    // across every key at once.
    let campaigns: Vec<Vec<String>> = if split_configs {
        let all_keys = registry.keys();
        anica::config::expand_all_predictor_pairs(&all_keys)
            .into_iter()
            .map(|(a, b)| vec![a, b])
            .collect()
    } else {
        vec![registry.keys()]
    };

    // `--loop` runs successive campaigns, reseeded per iteration, until the
    // process is asked to stop; the stop signal itself is a CLI-front-end
    // concern the core leaves external (§1), so this reference CLI runs
    // exactly one pass over `campaigns` per invocation, matching a single
    // iteration of that external loop.
    if r#loop {
        info!("--loop delegates repetition to the calling supervisor; running one pass over {} campaign(s)", campaigns.len());
    }
    for (idx, keys) in campaigns.iter().enumerate() {
        run_one_campaign(&ctx, &config, &registry, keys, campaign_seed.wrapping_add(idx as u64), outdir, idx)?;
    }
    Ok(())
}

/// Probe every scheme under `keys` and drop the ones at least one
/// predictor fails on, so sampling during generalization never draws an
/// instruction the chosen predictors can't evaluate (§6.3
/// `--no-restrict-to-supported` default behavior).
fn restrict_to_supported(
    config: &Config,
    ctx: AbstractionContext,
    registry: &dyn PredictorManager,
    keys: &[String],
) -> AbstractionContext {
    let schemes = ctx.universe.schemes().to_vec();
    let probes: Vec<ConcreteBasicBlock> = schemes
        .iter()
        .map(|s| ConcreteBasicBlock {
            instructions: vec![ConcreteInstruction { scheme_id: s.id.clone(), operand_assignment: BTreeMap::new(), text: s.mnemonic.clone() }],
        })
        .collect();
    let results = registry.evaluate_all(keys, &probes);
    let supported: Vec<_> = schemes
        .into_iter()
        .zip(results.iter())
        .filter(|(_, r)| keys.iter().all(|k| r.get(k).map(|v| v.is_ok()).unwrap_or(false)))
        .map(|(s, _)| s)
        .collect();
    info!("restricted universe to {} schemes supported by all of {:?}", supported.len(), keys);
    AbstractionContext::new(config.insn_feature_manager.to_decls(), Arc::new(InMemoryUniverse::new(supported)))
}

/// Print the candidate expansions and read a choice from stdin (§4.6
/// `interactive` strategy, §9 "Generalization strategy dispatch" — the
/// callback's input is `(ab, E_with_benefits)`, its output the chosen
/// expansion or a terminate signal).
fn interactive_callback(
    ab: &anica::block::AbstractBlock,
    candidates: &[(anica::block::Expansion, f64)],
) -> InteractiveChoice {
    println!("current abstract block ({} instructions):", ab.len());
    for (idx, (expansion, benefit)) in candidates.iter().enumerate() {
        println!("  [{}] {:?} (benefit ~{})", idx, expansion.coordinate, benefit);
    }
    print!("pick an expansion index, or 'q' to stop generalizing: ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return InteractiveChoice::Terminate;
    }
    match line.trim().parse::<usize>() {
        Ok(idx) if idx < candidates.len() => InteractiveChoice::Pick(idx),
        _ => InteractiveChoice::Terminate,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_generalize(
    config_path: &PathBuf,
    seed: Option<u64>,
    no_minimize: bool,
    no_restrict_to_supported: bool,
    interactive: bool,
    output: &Option<PathBuf>,
    asm_file: &PathBuf,
    predictor_ids: &[String],
) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let mut ctx = build_context(&config)?;
    let registry = load_registry_from_file(std::path::Path::new(&config.predmanager.registry_path))?;
    let keys = registry.resolve_key_patterns(predictor_ids);

    if !no_restrict_to_supported {
        ctx = restrict_to_supported(&config, ctx, &registry, &keys);
    }

    let asm_text = std::fs::read_to_string(asm_file)?;
    let start_bb = asm_to_concrete_block(&asm_text, &ctx)?;

    let seed_value = seed.unwrap_or(0);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed_value);
    let minimized = if no_minimize {
        start_bb.clone()
    } else {
        generalizer::minimize(
            &ctx,
            &start_bb,
            &registry,
            &keys,
            &config.interestingness_metric,
            config.discovery.generalization_batch_size,
            &mut rng,
        )
    };

    let seed_ab = anica::block::AbstractBlock::from_concrete(&minimized, &ctx)?;
    let mut strategy = if interactive {
        GeneralizationStrategy::Interactive { callback: Box::new(interactive_callback) }
    } else {
        GeneralizationStrategy::MaxBenefit
    };
    let outcome = generalizer::generalize(
        &ctx,
        &seed_ab,
        &mut strategy,
        &registry,
        &keys,
        &config.interestingness_metric,
        config.discovery.generalization_batch_size,
        seed_value,
    );

    let out_dir = output.clone().unwrap_or_else(|| PathBuf::from("generalize_out"));
    persist::write_generalize_run(
        &out_dir,
        &start_bb,
        &minimized,
        &outcome.ab,
        outcome.trace.len(),
        &json!({ "seed": seed_value, "predictors": keys }),
        config.sampling.wrap_in_loop,
    )?;
    info!("generalization wrote {} trace steps to {:?}", outcome.trace.len(), out_dir);
    Ok(())
}

fn run_check_predictors(config_path: &PathBuf, write_filter: bool, batch_size: usize, predictor_ids: &[String]) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let ctx = build_context(&config)?;
    let registry = load_registry_from_file(std::path::Path::new(&config.predmanager.registry_path))?;
    let keys = if predictor_ids.is_empty() { registry.keys() } else { registry.resolve_key_patterns(predictor_ids) };

    let mut unsupported: BTreeMap<String, Vec<String>> = keys.iter().map(|k| (k.clone(), Vec::new())).collect();
    let schemes = ctx.universe.schemes();
    for chunk in schemes.chunks(batch_size.max(1)) {
        let blocks: Vec<ConcreteBasicBlock> = chunk
            .iter()
            .map(|s| ConcreteBasicBlock { instructions: vec![ConcreteInstruction { scheme_id: s.id.clone(), operand_assignment: BTreeMap::new(), text: s.mnemonic.clone() }] })
            .collect();
        let results = registry.evaluate_all(&keys, &blocks);
        for (scheme, result) in chunk.iter().zip(results.iter()) {
            let failures: Vec<&String> = result.iter().filter(|(_, r)| r.is_err()).map(|(k, _)| k).collect();
            if !failures.is_empty() {
                debug!("scheme {} unsupported by {:?}", scheme.id, failures);
                for key in &failures {
                    unsupported.entry((*key).clone()).or_default().push(scheme.mnemonic.clone());
                }
            }
        }
    }
    info!("probed {} schemes against {} predictors", schemes.len(), keys.len());

    if write_filter {
        for (key, mnemonics) in &unsupported {
            let path = PathBuf::from(format!("filter_{}.csv", key));
            std::fs::write(&path, mnemonics.join(","))?;
            info!("wrote unsupported-instruction filter for {} to {:?}", key, path);
        }
    }
    Ok(())
}

/// Parse a minimal `mnemonic op0, op1` assembly line format, resolving each
/// line to a matching scheme via mnemonic + operand count (§6.3
/// `generalize` reads `asm_file`).
fn asm_to_concrete_block(asm_text: &str, ctx: &AbstractionContext) -> anyhow::Result<ConcreteBasicBlock> {
    let mut instructions = Vec::new();
    for line in asm_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mnemonic = line.split_whitespace().next().unwrap_or(line);
        let scheme = ctx
            .universe
            .schemes()
            .iter()
            .find(|s| s.mnemonic == mnemonic)
            .ok_or_else(|| anyhow::anyhow!("no scheme matches mnemonic {:?}", mnemonic))?;
        instructions.push(ConcreteInstruction {
            scheme_id: scheme.id.clone(),
            operand_assignment: BTreeMap::new(),
            text: line.to_string(),
        });
    }
    Ok(ConcreteBasicBlock { instructions })
}

fn main() {
    let env = Env::default().filter_or("LOG_LEVEL", "info").write_style_or("LOG_STYLE", "always");
    env_logger::init_from_env(env);

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Discover { config, check_config, r#loop, split_configs, seed, outdir } => {
            run_discover(config, *check_config, *r#loop, *split_configs, *seed, outdir)
        }
        Commands::Generalize { config, seed, no_minimize, no_restrict_to_supported, interactive, output, asm_file, predictor_ids } => {
            run_generalize(config, *seed, *no_minimize, *no_restrict_to_supported, *interactive, output, asm_file, predictor_ids)
        }
        Commands::CheckPredictors { config, write_filter, batch_size, predictor_ids } => {
            run_check_predictors(config, *write_filter, *batch_size, predictor_ids)
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        let code = if e.downcast_ref::<ConfigError>().is_some() { 1 } else { 2 };
        exit(code);
    }
}
