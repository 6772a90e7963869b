//! Draws concrete basic blocks from γ of an abstract block (§4.3).
//!
//! Sampling is three phases: pick a scheme per position, resolve operand
//! classes under the aliasing relation via union-find plus greedy graph
//! coloring on the must-not graph (§9 "Open questions" — this is the
//! deterministic coloring approach the design notes ask for, rather than
//! the source's ad-hoc retry loop), then materialize assembly text.

use crate::block::{AbstractBlock, OperandRef};
use crate::concrete::{ConcreteBasicBlock, ConcreteInstruction};
use crate::context::AbstractionContext;
use crate::errors::SamplingError;
use crate::iwho::OperandKind;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeMap;

const MAX_SAMPLE_RETRIES: u32 = 8;

/// Fixed register pools standing in for the x86 partial-register
/// aliasing rules IWHO would normally expose (§4.3 step 2(b)). A
/// deliberate simplification: real sub-register aliasing (eax/ax/al) is
/// out of scope for this narrowed-down IWHO stand-in — see DESIGN.md.
fn allowed_registers(kind: &OperandKind) -> Vec<String> {
    match kind {
        OperandKind::Register { class } => match class.as_str() {
            "GPR64" => vec!["rax", "rbx", "rcx", "rdx", "rsi", "rdi", "r8", "r9"],
            _ => vec!["eax", "ebx", "ecx", "edx", "esi", "edi", "r8d", "r9d"],
        }
        .into_iter()
        .map(String::from)
        .collect(),
        OperandKind::Memory { address_registers, .. } => address_registers.clone(),
        OperandKind::Immediate { .. } | OperandKind::Flag { .. } => vec![],
    }
}

/// Simple union-find with path compression, indexed by node position in
/// the `nodes` vector the sampler builds per sample attempt.
struct Dsu {
    parent: Vec<usize>,
}

impl Dsu {
    fn new(n: usize) -> Self {
        Dsu { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

pub struct Sampler<'a> {
    block: AbstractBlock,
    ctx: &'a AbstractionContext,
}

impl<'a> Sampler<'a> {
    pub fn new(block: AbstractBlock, ctx: &'a AbstractionContext) -> Self {
        Sampler { block, ctx }
    }

    pub fn block(&self) -> &AbstractBlock {
        &self.block
    }

    /// Draw one concrete block, retrying on overconstrained-aliasing
    /// failures with fresh randomness up to a fixed bound (§4.3
    /// "Failure semantics"). An empty per-position concretization is not
    /// retried — it is a property of the abstract block, not the draw.
    pub fn sample(&self, rng: &mut StdRng) -> Result<ConcreteBasicBlock, SamplingError> {
        let mut last_err = None;
        for _ in 0..MAX_SAMPLE_RETRIES {
            match self.try_sample(rng) {
                Ok(bb) => return Ok(bb),
                Err(e @ SamplingError::EmptyConcretization { .. }) => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(SamplingError::RetriesExhausted { attempts: MAX_SAMPLE_RETRIES }))
    }

    fn try_sample(&self, rng: &mut StdRng) -> Result<ConcreteBasicBlock, SamplingError> {
        let chosen_schemes = self.select_schemes(rng)?;
        let (nodes, node_index, dsu) = self.build_equivalence_classes(&chosen_schemes);
        let (classes, class_allowed) = self.resolve_classes(&nodes, &chosen_schemes, &dsu)?;
        let assignment = self.color_classes(&nodes, &dsu, &classes, &class_allowed, rng)?;
        Ok(self.materialize(&chosen_schemes, &node_index, &dsu, &assignment, rng))
    }

    /// Phase 1: scheme selection.
    fn select_schemes(&self, rng: &mut StdRng) -> Result<Vec<usize>, SamplingError> {
        let mut chosen = Vec::with_capacity(self.block.len());
        for (pos, insn) in self.block.abs_insns.iter().enumerate() {
            let gamma = self.ctx.feature_manager.gamma_instruction(&insn.features);
            if gamma.is_empty() {
                return Err(SamplingError::EmptyConcretization { position: pos });
            }
            chosen.push(gamma[rng.gen_range(0..gamma.len())]);
        }
        Ok(chosen)
    }

    fn build_equivalence_classes(
        &self,
        chosen_schemes: &[usize],
    ) -> (Vec<OperandRef>, BTreeMap<OperandRef, usize>, Dsu) {
        let mut nodes = Vec::new();
        let mut node_index = BTreeMap::new();
        for (pos, &scheme_idx) in chosen_schemes.iter().enumerate() {
            let scheme = &self.ctx.universe.schemes()[scheme_idx];
            for op in &scheme.operands {
                if let Some(tag) = op.kind.alias_tag() {
                    let r = OperandRef::new(pos, tag, op.name.clone());
                    node_index.insert(r.clone(), nodes.len());
                    nodes.push(r);
                }
            }
        }
        let mut dsu = Dsu::new(nodes.len());
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                if self.block.abs_aliasing.get(&nodes[i], &nodes[j]) == crate::block::AliasVal::Must {
                    dsu.union(i, j);
                }
            }
        }
        (nodes, node_index, dsu)
    }

    /// Phase 2a: per-equivalence-class candidate register pools.
    #[allow(clippy::type_complexity)]
    fn resolve_classes(
        &self,
        nodes: &[OperandRef],
        chosen_schemes: &[usize],
        dsu: &Dsu,
    ) -> Result<(BTreeMap<usize, Vec<usize>>, BTreeMap<usize, Vec<String>>), SamplingError> {
        let mut dsu = Dsu { parent: dsu.parent.clone() };
        let mut classes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..nodes.len() {
            classes.entry(dsu.find(i)).or_default().push(i);
        }
        let mut class_allowed = BTreeMap::new();
        for (&rep, members) in &classes {
            let mut allowed: Option<Vec<String>> = None;
            for &m in members {
                let r = &nodes[m];
                let scheme = &self.ctx.universe.schemes()[chosen_schemes[r.position]];
                let op = scheme.operand(&r.operand_name).expect("operand present on chosen scheme");
                let pool = allowed_registers(&op.kind);
                allowed = Some(match allowed {
                    None => pool,
                    Some(prev) => prev.into_iter().filter(|p| pool.contains(p)).collect(),
                });
            }
            let allowed = allowed.unwrap_or_default();
            if allowed.is_empty() {
                return Err(SamplingError::OverconstrainedAliasing {
                    reason: format!("equivalence class at node {} has no common register", rep),
                });
            }
            class_allowed.insert(rep, allowed);
        }
        Ok((classes, class_allowed))
    }

    /// Phase 2b: greedy coloring of the must-not-alias conflict graph
    /// over equivalence-class representatives.
    fn color_classes(
        &self,
        nodes: &[OperandRef],
        dsu: &Dsu,
        classes: &BTreeMap<usize, Vec<usize>>,
        class_allowed: &BTreeMap<usize, Vec<String>>,
        rng: &mut StdRng,
    ) -> Result<BTreeMap<usize, String>, SamplingError> {
        let mut dsu = Dsu { parent: dsu.parent.clone() };
        let mut conflict: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                if self.block.abs_aliasing.get(&nodes[i], &nodes[j]) == crate::block::AliasVal::MustNot {
                    let (ri, rj) = (dsu.find(i), dsu.find(j));
                    if ri == rj {
                        return Err(SamplingError::OverconstrainedAliasing {
                            reason: "must-alias and must-not-alias constraints conflict".to_string(),
                        });
                    }
                    conflict.entry(ri).or_default().push(rj);
                    conflict.entry(rj).or_default().push(ri);
                }
            }
        }

        let mut reps: Vec<usize> = classes.keys().copied().collect();
        reps.sort_by_key(|r| std::cmp::Reverse(conflict.get(r).map(|v| v.len()).unwrap_or(0)));

        let mut assignment: BTreeMap<usize, String> = BTreeMap::new();
        for rep in reps {
            let allowed = &class_allowed[&rep];
            let used: Vec<&String> = conflict
                .get(&rep)
                .into_iter()
                .flatten()
                .filter_map(|n| assignment.get(n))
                .collect();
            let candidates: Vec<&String> = allowed.iter().filter(|a| !used.contains(a)).collect();
            if candidates.is_empty() {
                return Err(SamplingError::OverconstrainedAliasing {
                    reason: format!("no free register left for equivalence class {}", rep),
                });
            }
            let pick = rng.gen_range(0..candidates.len());
            assignment.insert(rep, candidates[pick].clone());
        }
        Ok(assignment)
    }

    /// Phase 3: materialization.
    fn materialize(
        &self,
        chosen_schemes: &[usize],
        node_index: &BTreeMap<OperandRef, usize>,
        dsu: &Dsu,
        assignment: &BTreeMap<usize, String>,
        rng: &mut StdRng,
    ) -> ConcreteBasicBlock {
        let mut dsu = Dsu { parent: dsu.parent.clone() };
        let mut instructions = Vec::with_capacity(chosen_schemes.len());
        for (pos, &scheme_idx) in chosen_schemes.iter().enumerate() {
            let scheme = &self.ctx.universe.schemes()[scheme_idx];
            let mut operand_assignment = BTreeMap::new();
            let mut rendered = Vec::with_capacity(scheme.operands.len());
            for op in &scheme.operands {
                let text = if let Some(tag) = op.kind.alias_tag() {
                    let r = OperandRef::new(pos, tag, op.name.clone());
                    let node_idx = node_index[&r];
                    let rep = dsu.find(node_idx);
                    let reg = assignment[&rep].clone();
                    operand_assignment.insert(op.name.clone(), reg.clone());
                    match op.kind {
                        OperandKind::Memory { .. } => format!("[{}]", reg),
                        _ => reg,
                    }
                } else {
                    match &op.kind {
                        OperandKind::Immediate { width_bits } => {
                            let max = (1u64 << (*width_bits).min(16)).saturating_sub(1);
                            let imm = rng.gen_range(0..=max);
                            operand_assignment.insert(op.name.clone(), imm.to_string());
                            format!("0x{:x}", imm)
                        }
                        OperandKind::Flag { name } => {
                            operand_assignment.insert(op.name.clone(), name.clone());
                            name.clone()
                        }
                        _ => unreachable!("alias_tag() already handled Register/Memory"),
                    }
                };
                rendered.push(text);
            }
            let text = if rendered.is_empty() {
                scheme.mnemonic.clone()
            } else {
                format!("{} {}", scheme.mnemonic, rendered.join(", "))
            };
            instructions.push(ConcreteInstruction { scheme_id: scheme.id.clone(), operand_assignment, text });
        }
        ConcreteBasicBlock { instructions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{AbstractFeatureValue, FeatureDecl, FeatureKind};
    use crate::iwho::test_universe;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn ctx() -> AbstractionContext {
        AbstractionContext::new(
            vec![FeatureDecl { name: "mnemonic".into(), kind: FeatureKind::Singleton }],
            Arc::new(test_universe::small()),
        )
    }

    #[test]
    fn top_of_lattice_samples_without_violating_constraints() {
        let ctx = ctx();
        let top = AbstractBlock::make_top(3, &ctx);
        let sampler = top.precompute_sampler(&ctx);
        for seed in 0..100u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let bb = sampler.sample(&mut rng).expect("top should always be satisfiable");
            assert_eq!(bb.len(), 3);
        }
    }

    #[test]
    fn determinism_same_seed_same_block() {
        let ctx = ctx();
        let mut block = AbstractBlock::make_top(2, &ctx);
        block.abs_insns[0].features.insert("mnemonic".into(), AbstractFeatureValue::singleton_of("add"));
        let sampler = block.precompute_sampler(&ctx);
        let mut rng1 = StdRng::seed_from_u64(42);
        let mut rng2 = StdRng::seed_from_u64(42);
        let a = sampler.sample(&mut rng1).unwrap();
        let b = sampler.sample(&mut rng2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unsatisfiable_instruction_is_a_sampling_error() {
        let ctx = ctx();
        let mut block = AbstractBlock::make_top(1, &ctx);
        block.abs_insns[0].features.insert("mnemonic".into(), AbstractFeatureValue::singleton_of("nonexistent"));
        let sampler = block.precompute_sampler(&ctx);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(sampler.sample(&mut rng), Err(SamplingError::EmptyConcretization { .. })));
    }
}
