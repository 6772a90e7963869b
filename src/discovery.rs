//! The discovery loop (§4.8) and its subsumption cache (§4.9).

use crate::block::AbstractBlock;
use crate::concrete::ConcreteBasicBlock;
use crate::config::{Config, TerminationConfig};
use crate::context::AbstractionContext;
use crate::errors::{DiscoveryError, SamplingError};
use crate::generalizer::{self, GeneralizationStrategy};
use crate::interestingness;
use crate::predictor::PredictorManager;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// One accepted discovery: the generalized abstract block plus the
/// concrete witnesses collected along the way.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub id: u64,
    pub ab: AbstractBlock,
    pub trace_len: usize,
}

/// Accepted abstract blocks indexed by length, so `subsumed_by_any` only
/// has to scan discoveries that could possibly match (§4.9).
#[derive(Default)]
pub struct SubsumptionCache {
    by_length: BTreeMap<usize, Vec<Discovery>>,
}

impl SubsumptionCache {
    pub fn new() -> Self {
        SubsumptionCache::default()
    }

    /// Concrete-in-abstract check via feature-by-feature point-checks and
    /// direct aliasing comparison (§4.9), avoiding a full γ materialization.
    pub fn subsumed_by_any(&self, bb: &ConcreteBasicBlock, ctx: &AbstractionContext) -> bool {
        let Some(candidates) = self.by_length.get(&bb.len()) else {
            return false;
        };
        let Ok(lifted) = AbstractBlock::from_concrete(bb, ctx) else {
            return false;
        };
        candidates.iter().any(|d| d.ab.subsumes(&lifted))
    }

    pub fn insert(&mut self, discovery: Discovery) {
        self.by_length.entry(discovery.ab.len()).or_default().push(discovery);
    }

    pub fn discoveries(&self) -> impl Iterator<Item = &Discovery> {
        self.by_length.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_length.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct CampaignReport {
    pub discoveries: SubsumptionCache,
    pub batches_run: u64,
}

/// Whether `termination` is satisfied given the campaign's running state.
/// Checked only at batch boundaries (§4.8 "campaigns may terminate only at
/// batch boundaries").
fn termination_reached(
    termination: &TerminationConfig,
    started_at: Instant,
    batches_run: u64,
    consecutive_empty: u64,
    discoveries_so_far: u64,
    stop_requested: bool,
) -> bool {
    if stop_requested {
        return true;
    }
    if let Some(max) = termination.max_discoveries {
        if discoveries_so_far >= max {
            return true;
        }
    }
    if let Some(secs) = termination.max_duration_secs() {
        if started_at.elapsed() >= Duration::from_secs(secs) {
            return true;
        }
    }
    if let Some(max_empty) = termination.max_consecutive_empty_batches {
        if consecutive_empty >= max_empty {
            return true;
        }
    }
    let _ = batches_run;
    false
}

/// Run one campaign to completion (§4.8). `stop` is polled once per batch
/// boundary for cooperative cancellation (§5).
#[allow(clippy::too_many_arguments)]
pub fn run_campaign(
    ctx: &AbstractionContext,
    config: &Config,
    predictor_mgr: &dyn PredictorManager,
    predictor_keys: &[String],
    seed: u64,
    mut stop: impl FnMut() -> bool,
) -> Result<CampaignReport, DiscoveryError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cache = SubsumptionCache::new();
    let started_at = Instant::now();
    let mut batches_run: u64 = 0;
    let mut consecutive_empty: u64 = 0;
    let mut next_id: u64 = 0;

    loop {
        let mut batch = Vec::with_capacity(config.discovery.discovery_batch_size);
        for _ in 0..config.discovery.discovery_batch_size {
            let length = *config
                .discovery
                .discovery_possible_block_lengths
                .choose(&mut rng)
                .ok_or(DiscoveryError::NoSatisfiableTop { length: 0 })?;
            let top = AbstractBlock::make_top(length, ctx);
            let sampler = top.precompute_sampler(ctx);
            match sampler.sample(&mut rng) {
                Ok(bb) => batch.push(bb),
                Err(SamplingError::EmptyConcretization { .. }) => {
                    return Err(DiscoveryError::NoSatisfiableTop { length });
                }
                Err(_) => continue,
            }
        }

        let per_block = predictor_mgr.evaluate_all(predictor_keys, &batch);
        let mut found_new = false;

        for (bb, results) in batch.iter().zip(per_block.iter()) {
            let result = interestingness::score(results, &config.interestingness_metric);
            if !result.interesting {
                continue;
            }
            if cache.subsumed_by_any(bb, ctx) {
                continue;
            }

            let minimized = generalizer::minimize(
                ctx,
                bb,
                predictor_mgr,
                predictor_keys,
                &config.interestingness_metric,
                config.discovery.generalization_batch_size,
                &mut rng,
            );
            let Ok(seed_ab) = AbstractBlock::from_concrete(&minimized, ctx) else {
                continue;
            };

            let (strategy_name, n) = config
                .discovery
                .generalization_strategy
                .first()
                .cloned()
                .unwrap_or(("random".to_string(), 1));
            let mut strategy = match strategy_name.as_str() {
                "max_benefit" => GeneralizationStrategy::MaxBenefit,
                _ => GeneralizationStrategy::Random { n: n.max(1) as u32 },
            };

            let outcome = generalizer::generalize(
                ctx,
                &seed_ab,
                &mut strategy,
                predictor_mgr,
                predictor_keys,
                &config.interestingness_metric,
                config.discovery.generalization_batch_size,
                seed.wrapping_add(next_id),
            );

            cache.insert(Discovery { id: next_id, ab: outcome.ab, trace_len: outcome.trace.len() });
            next_id += 1;
            found_new = true;
        }

        batches_run += 1;
        consecutive_empty = if found_new { 0 } else { consecutive_empty + 1 };

        if termination_reached(
            &config.termination,
            started_at,
            batches_run,
            consecutive_empty,
            next_id,
            stop(),
        ) {
            break;
        }
    }

    Ok(CampaignReport { discoveries: cache, batches_run })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryConfig, InsnFeatureManagerConfig, IwhoConfig, PredManagerConfig};
    use crate::feature::FeatureKind;
    use crate::interestingness::InterestingnessConfig;
    use crate::iwho::test_universe;
    use crate::predictor::MockPredictorManager;
    use std::sync::Arc;

    fn ctx() -> AbstractionContext {
        AbstractionContext::new(
            vec![crate::feature::FeatureDecl { name: "mnemonic".into(), kind: FeatureKind::Singleton }],
            Arc::new(test_universe::small()),
        )
    }

    fn base_config() -> Config {
        Config {
            insn_feature_manager: InsnFeatureManagerConfig { features: vec![("mnemonic".to_string(), FeatureKind::Singleton)] },
            iwho: IwhoConfig { context_specifier: "test".to_string(), filters: vec![] },
            interestingness_metric: InterestingnessConfig { min_interestingness: 0.5, mostly_interesting_ratio: 0.5, invert_interestingness: false },
            discovery: DiscoveryConfig {
                discovery_batch_size: 4,
                discovery_possible_block_lengths: vec![1],
                generalization_batch_size: 2,
                generalization_strategy: vec![("max_benefit".to_string(), 1)],
            },
            sampling: Default::default(),
            measurement_db: None,
            predmanager: PredManagerConfig { registry_path: "registry.json".to_string(), num_processes: None },
            termination: TerminationConfig { max_consecutive_empty_batches: Some(1), ..Default::default() },
        }
    }

    #[test]
    fn interesting_pair_produces_at_least_one_discovery() {
        let ctx = ctx();
        let mut config = base_config();
        config.termination.max_discoveries = Some(1);
        let mut mgr = MockPredictorManager::new();
        mgr.register("p0", |_| Ok(2.0), None);
        mgr.register("p1", |_| Ok(1.0), None);
        let keys = mgr.keys();
        let report = run_campaign(&ctx, &config, &mgr, &keys, 11, || false).unwrap();
        assert!(report.discoveries.len() >= 1);
    }

    #[test]
    fn inverted_search_with_disagreeing_predictors_finds_nothing() {
        let ctx = ctx();
        let mut config = base_config();
        config.interestingness_metric.invert_interestingness = true;
        config.termination.max_consecutive_empty_batches = Some(1);
        let mut mgr = MockPredictorManager::new();
        mgr.register("p0", |_| Ok(2.0), None);
        mgr.register("p1", |_| Ok(1.0), None);
        let keys = mgr.keys();
        let report = run_campaign(&ctx, &config, &mgr, &keys, 11, || false).unwrap();
        assert!(report.discoveries.is_empty());
    }

    #[test]
    fn subsumption_across_two_runs_yields_no_new_discoveries_in_the_second() {
        let ctx = ctx();
        let mut config = base_config();
        config.termination.max_discoveries = Some(3);
        config.termination.max_consecutive_empty_batches = Some(3);
        let mut mgr = MockPredictorManager::new();
        mgr.register("p0", |_| Ok(2.0), None);
        mgr.register("p1", |_| Ok(1.0), None);
        let keys = mgr.keys();
        let first = run_campaign(&ctx, &config, &mgr, &keys, 42, || false).unwrap();
        let second = run_campaign(&ctx, &config, &mgr, &keys, 42, || false).unwrap();
        for d in second.discoveries.discoveries() {
            assert!(first.discoveries.discoveries().any(|existing| existing.ab.subsumes(&d.ab)));
        }
    }
}
