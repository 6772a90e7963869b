//! Expansion search: lifts a seed abstract block to the coarsest block
//! still judged interesting (§4.6), plus pre-generalization minimization
//! (§4.7).

use crate::block::{AbstractBlock, Expansion, ExpansionCoordinate};
use crate::concrete::ConcreteBasicBlock;
use crate::context::AbstractionContext;
use crate::errors::SamplingError;
use crate::interestingness::{self, InterestingnessConfig, PredictorResult};
use crate::predictor::PredictorManager;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// One applied expansion plus the batch that justified acceptance (§3
/// GLOSSARY "Witness trace").
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub coordinate: ExpansionCoordinate,
    pub witnesses: Vec<ConcreteBasicBlock>,
}

/// Closed variant over generalization strategies (§4.6, §9 "Generalization
/// strategy dispatch": a closed variant, not a string lookup).
pub enum GeneralizationStrategy {
    Random { n: u32 },
    MaxBenefit,
    Interactive { callback: Box<dyn FnMut(&AbstractBlock, &[(Expansion, f64)]) -> InteractiveChoice> },
}

pub enum InteractiveChoice {
    Pick(usize),
    Terminate,
}

pub struct GeneralizeOutcome {
    pub ab: AbstractBlock,
    pub trace: Vec<TraceEntry>,
}

/// Evaluate one candidate expansion: draw a batch, evaluate under all
/// predictor keys, score it. Returns `None` when the batch is mostly
/// sampling errors (§4.6 "Sampling-error handling": rejected as infeasible,
/// not as "not interesting").
fn try_expansion(
    ctx: &AbstractionContext,
    candidate: &AbstractBlock,
    predictor_mgr: &dyn PredictorManager,
    predictor_keys: &[String],
    interestingness_cfg: &InterestingnessConfig,
    batch_size: usize,
    rng: &mut StdRng,
) -> Option<(bool, Vec<ConcreteBasicBlock>)> {
    let sampler = candidate.precompute_sampler(ctx);
    let mut blocks = Vec::with_capacity(batch_size);
    let mut sampling_failures = 0usize;
    for _ in 0..batch_size {
        match sampler.sample(rng) {
            Ok(bb) => blocks.push(bb),
            Err(SamplingError::EmptyConcretization { .. }) => return None,
            Err(_) => sampling_failures += 1,
        }
    }
    if blocks.is_empty() || sampling_failures * 2 > batch_size {
        return None;
    }

    let per_block = predictor_mgr.evaluate_all(predictor_keys, &blocks);
    let scores: Vec<interestingness::InterestingnessResult> = per_block
        .iter()
        .map(|results: &BTreeMap<String, PredictorResult>| interestingness::score(results, interestingness_cfg))
        .collect();
    let mostly = interestingness::batch_mostly_interesting(&scores, interestingness_cfg);
    Some((mostly, blocks))
}

/// Cheap feature-index estimate of `|γ(ab') \ γ(ab)|` for `max_benefit`
/// ordering (§4.6): count of schemes newly admitted at the touched position.
fn estimate_benefit(ctx: &AbstractionContext, before: &AbstractBlock, expansion: &Expansion) -> usize {
    match &expansion.coordinate {
        ExpansionCoordinate::Feature { position, .. } => {
            let before_gamma = ctx.feature_manager.gamma_instruction(&before.abs_insns[*position].features).len();
            let after_gamma =
                ctx.feature_manager.gamma_instruction(&expansion.result.abs_insns[*position].features).len();
            after_gamma.saturating_sub(before_gamma)
        }
        ExpansionCoordinate::Aliasing { .. } => 1,
    }
}

/// One generalization attempt from `ab0`, following `strategy`'s candidate
/// ordering (§4.6 loop).
fn generalize_once(
    ctx: &AbstractionContext,
    ab0: &AbstractBlock,
    strategy: &mut GeneralizationStrategy,
    predictor_mgr: &dyn PredictorManager,
    predictor_keys: &[String],
    interestingness_cfg: &InterestingnessConfig,
    batch_size: usize,
    rng: &mut StdRng,
) -> GeneralizeOutcome {
    let mut ab = ab0.clone();
    let mut trace = Vec::new();

    loop {
        let mut expansions = ab.expansions(ctx);
        if expansions.is_empty() {
            break;
        }

        let mut accepted = None;
        match strategy {
            GeneralizationStrategy::Random { .. } => {
                expansions.shuffle(rng);
                for expansion in &expansions {
                    if let Some((true, witnesses)) = try_expansion(
                        ctx,
                        &expansion.result,
                        predictor_mgr,
                        predictor_keys,
                        interestingness_cfg,
                        batch_size,
                        rng,
                    ) {
                        accepted = Some((expansion.clone(), witnesses));
                        break;
                    }
                }
            }
            GeneralizationStrategy::MaxBenefit => {
                let mut scored: Vec<(Expansion, usize)> =
                    expansions.iter().map(|e| (e.clone(), estimate_benefit(ctx, &ab, e))).collect();
                scored.sort_by(|a, b| b.1.cmp(&a.1));
                for (expansion, _benefit) in &scored {
                    if let Some((true, witnesses)) = try_expansion(
                        ctx,
                        &expansion.result,
                        predictor_mgr,
                        predictor_keys,
                        interestingness_cfg,
                        batch_size,
                        rng,
                    ) {
                        accepted = Some((expansion.clone(), witnesses));
                        break;
                    }
                }
            }
            GeneralizationStrategy::Interactive { callback } => {
                let with_benefits: Vec<(Expansion, f64)> =
                    expansions.iter().map(|e| (e.clone(), estimate_benefit(ctx, &ab, e) as f64)).collect();
                match callback(&ab, &with_benefits) {
                    InteractiveChoice::Pick(idx) => {
                        let expansion = expansions[idx].clone();
                        if let Some((mostly, witnesses)) = try_expansion(
                            ctx,
                            &expansion.result,
                            predictor_mgr,
                            predictor_keys,
                            interestingness_cfg,
                            batch_size,
                            rng,
                        ) {
                            if mostly {
                                accepted = Some((expansion, witnesses));
                            }
                        }
                    }
                    InteractiveChoice::Terminate => break,
                }
            }
        }

        match accepted {
            Some((expansion, witnesses)) => {
                trace.push(TraceEntry { coordinate: expansion.coordinate, witnesses });
                ab = expansion.result;
            }
            None => break,
        }
    }

    GeneralizeOutcome { ab, trace }
}

/// Entry point (§4.6): dispatches `random(N)` to N independent attempts,
/// keeping the coarsest result (ties broken by shortest trace); the other
/// strategies run once.
#[allow(clippy::too_many_arguments)]
pub fn generalize(
    ctx: &AbstractionContext,
    ab0: &AbstractBlock,
    strategy: &mut GeneralizationStrategy,
    predictor_mgr: &dyn PredictorManager,
    predictor_keys: &[String],
    interestingness_cfg: &InterestingnessConfig,
    batch_size: usize,
    campaign_seed: u64,
) -> GeneralizeOutcome {
    match strategy {
        GeneralizationStrategy::Random { n } => {
            let attempts = *n;
            let mut best: Option<GeneralizeOutcome> = None;
            for attempt in 0..attempts {
                let mut rng = StdRng::seed_from_u64(campaign_seed.wrapping_add(attempt as u64));
                let mut attempt_strategy = GeneralizationStrategy::Random { n: 1 };
                let outcome = generalize_once(
                    ctx,
                    ab0,
                    &mut attempt_strategy,
                    predictor_mgr,
                    predictor_keys,
                    interestingness_cfg,
                    batch_size,
                    &mut rng,
                );
                best = Some(match best {
                    None => outcome,
                    Some(prev) => {
                        if outcome.ab.subsumes(&prev.ab) && !prev.ab.subsumes(&outcome.ab) {
                            outcome
                        } else if prev.ab.subsumes(&outcome.ab) && !outcome.ab.subsumes(&prev.ab) {
                            prev
                        } else if outcome.trace.len() < prev.trace.len() {
                            outcome
                        } else {
                            prev
                        }
                    }
                });
            }
            best.expect("random(N) requires N >= 1")
        }
        other => {
            let mut rng = StdRng::seed_from_u64(campaign_seed);
            generalize_once(ctx, ab0, other, predictor_mgr, predictor_keys, interestingness_cfg, batch_size, &mut rng)
        }
    }
}

/// Greedy single-instruction-removal minimization (§4.7): tries each
/// position's removal, keeps it if a perturbation batch around the
/// shrunk block stays mostly interesting, stops when no deletion survives.
pub fn minimize(
    ctx: &AbstractionContext,
    bb: &ConcreteBasicBlock,
    predictor_mgr: &dyn PredictorManager,
    predictor_keys: &[String],
    interestingness_cfg: &InterestingnessConfig,
    batch_size: usize,
    rng: &mut StdRng,
) -> ConcreteBasicBlock {
    let mut current = bb.clone();
    loop {
        if current.len() <= 1 {
            break;
        }
        let mut removed_one = false;
        for idx in 0..current.len() {
            let candidate = current.without_index(idx);
            let Ok(lifted) = AbstractBlock::from_concrete(&candidate, ctx) else {
                continue;
            };
            if let Some((true, _)) =
                try_expansion(ctx, &lifted, predictor_mgr, predictor_keys, interestingness_cfg, batch_size, rng)
            {
                current = candidate;
                removed_one = true;
                break;
            }
        }
        if !removed_one {
            break;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeatureDecl, FeatureKind};
    use crate::iwho::test_universe;
    use std::sync::Arc;

    fn ctx() -> AbstractionContext {
        AbstractionContext::new(
            vec![
                FeatureDecl { name: "mnemonic".into(), kind: FeatureKind::Singleton },
                FeatureDecl { name: "category".into(), kind: FeatureKind::Singleton },
            ],
            Arc::new(test_universe::small()),
        )
    }

    fn always_disagreeing_manager() -> crate::predictor::MockPredictorManager {
        let mut mgr = crate::predictor::MockPredictorManager::new();
        mgr.register("p0", |_| Ok(2.0), None);
        mgr.register("p1", |_| Ok(1.0), None);
        mgr
    }

    #[test]
    fn generalizing_an_always_disagreeing_pair_climbs_to_top() {
        let ctx = ctx();
        let seed_bb = ConcreteBasicBlock {
            instructions: vec![crate::concrete::ConcreteInstruction {
                scheme_id: "add_r_r".into(),
                operand_assignment: std::collections::BTreeMap::new(),
                text: "add eax, ebx".into(),
            }],
        };
        let ab0 = AbstractBlock::from_concrete(&seed_bb, &ctx).unwrap();
        let mgr = always_disagreeing_manager();
        let keys = mgr.keys();
        let interestingness_cfg = InterestingnessConfig { min_interestingness: 0.5, mostly_interesting_ratio: 0.5, invert_interestingness: false };
        let mut strategy = GeneralizationStrategy::MaxBenefit;
        let outcome = generalize(&ctx, &ab0, &mut strategy, &mgr, &keys, &interestingness_cfg, 4, 7);
        assert!(outcome.ab.subsumes(&ab0));
    }

    #[test]
    fn inverted_interestingness_never_accepts_any_expansion() {
        let ctx = ctx();
        let seed_bb = ConcreteBasicBlock {
            instructions: vec![crate::concrete::ConcreteInstruction {
                scheme_id: "add_r_r".into(),
                operand_assignment: std::collections::BTreeMap::new(),
                text: "add eax, ebx".into(),
            }],
        };
        let ab0 = AbstractBlock::from_concrete(&seed_bb, &ctx).unwrap();
        let mgr = always_disagreeing_manager();
        let keys = mgr.keys();
        let interestingness_cfg = InterestingnessConfig { min_interestingness: 0.5, mostly_interesting_ratio: 0.5, invert_interestingness: true };
        let mut strategy = GeneralizationStrategy::MaxBenefit;
        let outcome = generalize(&ctx, &ab0, &mut strategy, &mgr, &keys, &interestingness_cfg, 4, 7);
        assert_eq!(outcome.trace.len(), 0);
    }
}
