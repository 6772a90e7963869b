//! Abstract instructions, abstract aliasing, and the abstract block that
//! composes them (§3 "Abstract instruction"/"Abstract aliasing"/"Abstract
//! block"; §4.2).

use crate::concrete::ConcreteBasicBlock;
use crate::context::AbstractionContext;
use crate::feature::AbstractFeatureValue;
use crate::iwho::OpKindTag;
use crate::sampler::Sampler;
use anyhow::{anyhow, bail, Context as _, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// One `(instruction-position, operand-index)` reference, restricted in
/// practice to operand kinds that can alias (§3 "Abstract aliasing").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OperandRef {
    pub position: usize,
    pub op_kind: OpKindTag,
    pub operand_name: String,
}

impl OperandRef {
    pub fn new(position: usize, op_kind: OpKindTag, operand_name: impl Into<String>) -> Self {
        OperandRef { position, op_kind, operand_name: operand_name.into() }
    }

    fn to_json(&self) -> Value {
        let tag = match self.op_kind {
            OpKindTag::Reg => "REG",
            OpKindTag::Mem => "MEM",
        };
        json!([self.position, [tag, self.operand_name]])
    }

    fn from_json(v: &Value) -> Result<Self> {
        let arr = v.as_array().ok_or_else(|| anyhow!("operand ref must be an array"))?;
        if arr.len() != 2 {
            bail!("operand ref array must have exactly two elements");
        }
        let position = arr[0].as_u64().ok_or_else(|| anyhow!("operand ref position must be a uint"))? as usize;
        let kind_arr = arr[1].as_array().ok_or_else(|| anyhow!("operand ref kind must be an array"))?;
        if kind_arr.len() != 2 {
            bail!("operand ref kind array must have exactly two elements");
        }
        let tag = kind_arr[0].as_str().ok_or_else(|| anyhow!("OPKIND_TAG must be a string"))?;
        let op_kind = match tag {
            "REG" => OpKindTag::Reg,
            "MEM" => OpKindTag::Mem,
            other => bail!("unknown OPKIND_TAG {:?}", other),
        };
        let operand_name = kind_arr[1].as_str().ok_or_else(|| anyhow!("operand name must be a string"))?.to_string();
        Ok(OperandRef { position, op_kind, operand_name })
    }
}

/// Canonical `(i, j)` ordering for a pair: by position first, lexicographic
/// on operand name as tie-break (§6.1 `<pair>`).
fn canonical_pair(a: OperandRef, b: OperandRef) -> (OperandRef, OperandRef) {
    if (a.position, &a.operand_name) <= (b.position, &b.operand_name) {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasVal {
    Must,
    MustNot,
    Top,
}

impl AliasVal {
    fn to_json(self) -> Value {
        match self {
            AliasVal::Must => json!(true),
            AliasVal::MustNot => json!(false),
            AliasVal::Top => json!("$SV:TOP"),
        }
    }

    fn from_json(v: &Value) -> Result<Self> {
        match v {
            Value::Bool(true) => Ok(AliasVal::Must),
            Value::Bool(false) => Ok(AliasVal::MustNot),
            Value::String(s) if s == "$SV:TOP" => Ok(AliasVal::Top),
            other => bail!("invalid aliasing value {:?}", other),
        }
    }

    /// One step toward ⊤: only `Must`/`MustNot` have a relax step.
    fn relax(self) -> Option<AliasVal> {
        match self {
            AliasVal::Must | AliasVal::MustNot => Some(AliasVal::Top),
            AliasVal::Top => None,
        }
    }

    fn join(self, other: AliasVal) -> AliasVal {
        if self == other {
            self
        } else {
            AliasVal::Top
        }
    }
}

/// Omitted pairs are implicitly ⊤ (§3); only non-top entries are stored.
#[derive(Debug, Clone, Default)]
pub struct AbstractAliasing {
    pub aliasing_dict: BTreeMap<(OperandRef, OperandRef), AliasVal>,
    pub is_bot: bool,
}

impl AbstractAliasing {
    pub fn top() -> Self {
        AbstractAliasing { aliasing_dict: BTreeMap::new(), is_bot: false }
    }

    pub fn get(&self, a: &OperandRef, b: &OperandRef) -> AliasVal {
        let key = if (a.position, &a.operand_name) <= (b.position, &b.operand_name) {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        self.aliasing_dict.get(&key).copied().unwrap_or(AliasVal::Top)
    }

    pub fn set(&mut self, a: OperandRef, b: OperandRef, val: AliasVal) {
        let (lo, hi) = canonical_pair(a, b);
        if val == AliasVal::Top {
            self.aliasing_dict.remove(&(lo, hi));
        } else {
            self.aliasing_dict.insert((lo, hi), val);
        }
    }

    /// Subsumption is pointwise over the union of both keysets; an
    /// implicit ⊤ entry always subsumes and is always subsumed only by ⊤.
    pub fn subsumes(&self, other: &AbstractAliasing) -> bool {
        if other.is_bot {
            return true;
        }
        if self.is_bot {
            return false;
        }
        for (pair, other_val) in &other.aliasing_dict {
            let self_val = self.aliasing_dict.get(pair).copied().unwrap_or(AliasVal::Top);
            let ok = match (self_val, *other_val) {
                (AliasVal::Top, _) => true,
                (a, b) => a == b,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    pub fn join(&self, other: &AbstractAliasing) -> AbstractAliasing {
        if self.is_bot {
            return other.clone();
        }
        if other.is_bot {
            return self.clone();
        }
        let mut out = BTreeMap::new();
        let mut keys: std::collections::BTreeSet<_> =
            self.aliasing_dict.keys().cloned().collect();
        keys.extend(other.aliasing_dict.keys().cloned());
        for key in keys {
            let a = self.aliasing_dict.get(&key).copied().unwrap_or(AliasVal::Top);
            let b = other.aliasing_dict.get(&key).copied().unwrap_or(AliasVal::Top);
            let joined = a.join(b);
            if joined != AliasVal::Top {
                out.insert(key, joined);
            }
        }
        AbstractAliasing { aliasing_dict: out, is_bot: false }
    }

    fn to_json(&self) -> Value {
        let pairs: Vec<Value> = self
            .aliasing_dict
            .iter()
            .map(|((a, b), v)| json!([[a.to_json(), b.to_json()], v.to_json()]))
            .collect();
        json!({ "aliasing_dict": pairs, "is_bot": self.is_bot })
    }

    fn from_json(v: &Value) -> Result<Self> {
        let obj = v.as_object().ok_or_else(|| anyhow!("abs_aliasing must be an object"))?;
        let is_bot = obj.get("is_bot").and_then(|v| v.as_bool()).unwrap_or(false);
        let mut aliasing_dict = BTreeMap::new();
        let entries = obj
            .get("aliasing_dict")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow!("aliasing_dict must be an array"))?;
        for entry in entries {
            let entry = entry.as_array().ok_or_else(|| anyhow!("aliasing_dict entry must be an array"))?;
            if entry.len() != 2 {
                bail!("aliasing_dict entry must have exactly two elements");
            }
            let pair = entry[0].as_array().ok_or_else(|| anyhow!("pair must be an array"))?;
            if pair.len() != 2 {
                bail!("pair must have exactly two elements");
            }
            let a = OperandRef::from_json(&pair[0])?;
            let b = OperandRef::from_json(&pair[1])?;
            let val = AliasVal::from_json(&entry[1])?;
            let (lo, hi) = canonical_pair(a, b);
            aliasing_dict.insert((lo, hi), val);
        }
        Ok(AbstractAliasing { aliasing_dict, is_bot })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AbstractInstruction {
    pub features: BTreeMap<String, AbstractFeatureValue>,
}

impl AbstractInstruction {
    pub fn subsumes(&self, other: &AbstractInstruction) -> bool {
        for (name, self_val) in &self.features {
            let Some(other_val) = other.features.get(name) else {
                return false;
            };
            if !self_val.subsumes(other_val) {
                return false;
            }
        }
        true
    }

    pub fn join(&self, other: &AbstractInstruction) -> AbstractInstruction {
        let mut features = BTreeMap::new();
        for (name, self_val) in &self.features {
            if let Some(other_val) = other.features.get(name) {
                features.insert(name.clone(), self_val.join(other_val));
            }
        }
        AbstractInstruction { features }
    }

    fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, val) in &self.features {
            map.insert(name.clone(), val.to_json());
        }
        Value::Object(map)
    }

    fn from_json(v: &Value) -> Result<Self> {
        let obj = v.as_object().ok_or_else(|| anyhow!("abs_insn must be an object"))?;
        let mut features = BTreeMap::new();
        for (name, val) in obj {
            features.insert(name.clone(), AbstractFeatureValue::from_json(val)?);
        }
        Ok(AbstractInstruction { features })
    }
}

/// One atomic relaxation step, labeled with the coordinate it touched so
/// a generalization trace can explain itself (§4.2 `expansions`).
#[derive(Debug, Clone)]
pub enum ExpansionCoordinate {
    Feature { position: usize, feature: String },
    Aliasing { a: OperandRef, b: OperandRef },
}

#[derive(Debug, Clone)]
pub struct Expansion {
    pub coordinate: ExpansionCoordinate,
    pub result: AbstractBlock,
}

/// An ordered sequence of abstract instructions plus an abstract aliasing
/// relation over their operand positions (§3 "Abstract block").
#[derive(Debug, Clone)]
pub struct AbstractBlock {
    pub abs_insns: Vec<AbstractInstruction>,
    pub abs_aliasing: AbstractAliasing,
}

impl AbstractBlock {
    pub fn len(&self) -> usize {
        self.abs_insns.len()
    }

    pub fn make_top(n: usize, ctx: &AbstractionContext) -> Self {
        let names = ctx.feature_manager.feature_names();
        let mut insn = AbstractInstruction::default();
        for name in names {
            insn.features.insert(name.to_string(), AbstractFeatureValue::top());
        }
        AbstractBlock {
            abs_insns: vec![insn; n],
            abs_aliasing: AbstractAliasing::top(),
        }
    }

    /// Lift a concrete block: each feature value becomes its singleton,
    /// each alias-capable operand pair becomes must/must-not-alias
    /// (§3 "Lifecycle").
    pub fn from_concrete(bb: &ConcreteBasicBlock, ctx: &AbstractionContext) -> Result<Self> {
        let mut abs_insns = Vec::with_capacity(bb.len());
        for insn in &bb.instructions {
            let scheme = ctx
                .universe
                .get(&insn.scheme_id)
                .with_context(|| format!("unknown scheme id {:?}", insn.scheme_id))?;
            let mut features = BTreeMap::new();
            for index in &ctx.feature_manager.indices {
                features.insert(index.decl.name.clone(), crate::feature::lift_feature(scheme, &index.decl));
            }
            abs_insns.push(AbstractInstruction { features });
        }

        let mut refs: Vec<OperandRef> = Vec::new();
        for (pos, insn) in bb.instructions.iter().enumerate() {
            let scheme = ctx.universe.get(&insn.scheme_id).unwrap();
            for op in &scheme.operands {
                if let Some(tag) = op.kind.alias_tag() {
                    refs.push(OperandRef::new(pos, tag, op.name.clone()));
                }
            }
        }

        let mut aliasing = AbstractAliasing::top();
        for i in 0..refs.len() {
            for j in (i + 1)..refs.len() {
                let a = &refs[i];
                let b = &refs[j];
                if a.position == b.position && a.operand_name == b.operand_name {
                    continue; // self-pairs excluded
                }
                let va = bb.instructions[a.position].operand_assignment.get(&a.operand_name);
                let vb = bb.instructions[b.position].operand_assignment.get(&b.operand_name);
                let val = match (va, vb) {
                    (Some(x), Some(y)) if x == y => AliasVal::Must,
                    (Some(_), Some(_)) => AliasVal::MustNot,
                    _ => AliasVal::Top,
                };
                aliasing.set(a.clone(), b.clone(), val);
            }
        }

        let mut block = AbstractBlock { abs_insns, abs_aliasing: aliasing };
        block.refresh_is_bot(ctx);
        Ok(block)
    }

    /// γ(other) ⊆ γ(self) (§4.2 `subsumes`). Requires equal length.
    pub fn subsumes(&self, other: &AbstractBlock) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.abs_insns
            .iter()
            .zip(other.abs_insns.iter())
            .all(|(a, b)| a.subsumes(b))
            && self.abs_aliasing.subsumes(&other.abs_aliasing)
    }

    /// Pointwise join on instructions (equal length required) and
    /// pairwise join on aliasing (§3 "Invariants").
    pub fn join(&self, other: &AbstractBlock) -> Result<AbstractBlock> {
        if self.len() != other.len() {
            bail!("cannot join abstract blocks of different lengths ({} vs {})", self.len(), other.len());
        }
        let abs_insns = self
            .abs_insns
            .iter()
            .zip(other.abs_insns.iter())
            .map(|(a, b)| a.join(b))
            .collect();
        Ok(AbstractBlock {
            abs_insns,
            abs_aliasing: self.abs_aliasing.join(&other.abs_aliasing),
        })
    }

    fn refresh_is_bot(&mut self, ctx: &AbstractionContext) {
        let empty = self
            .abs_insns
            .iter()
            .any(|insn| ctx.feature_manager.gamma_instruction(&insn.features).is_empty());
        self.abs_aliasing.is_bot = self.abs_aliasing.is_bot || empty;
    }

    /// All one-step relaxations: one per feature of one abstract
    /// instruction, plus one per non-⊤ aliasing pair (§4.2 `expansions`).
    pub fn expansions(&self, ctx: &AbstractionContext) -> Vec<Expansion> {
        let mut out = Vec::new();
        for (pos, insn) in self.abs_insns.iter().enumerate() {
            for index in &ctx.feature_manager.indices {
                let Some(value) = insn.features.get(&index.decl.name) else {
                    continue;
                };
                for candidate in value.relax(index.universe()) {
                    let mut next = self.clone();
                    next.abs_insns[pos].features.insert(index.decl.name.clone(), candidate);
                    next.refresh_is_bot(ctx);
                    out.push(Expansion {
                        coordinate: ExpansionCoordinate::Feature { position: pos, feature: index.decl.name.clone() },
                        result: next,
                    });
                }
            }
        }
        for (pair, _val) in &self.abs_aliasing.aliasing_dict {
            let (a, b) = pair.clone();
            let val = self.abs_aliasing.get(&a, &b);
            if let Some(relaxed) = val.relax() {
                let mut next = self.clone();
                next.abs_aliasing.set(a.clone(), b.clone(), relaxed);
                next.refresh_is_bot(ctx);
                out.push(Expansion { coordinate: ExpansionCoordinate::Aliasing { a, b }, result: next });
            }
        }
        out
    }

    pub fn precompute_sampler<'a>(&self, ctx: &'a AbstractionContext) -> Sampler<'a> {
        Sampler::new(self.clone(), ctx)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "abs_insns": self.abs_insns.iter().map(|i| i.to_json()).collect::<Vec<_>>(),
            "abs_aliasing": self.abs_aliasing.to_json(),
        })
    }

    pub fn from_json(v: &Value) -> Result<Self> {
        let obj = v.as_object().ok_or_else(|| anyhow!("abstract block must be an object"))?;
        let insns = obj
            .get("abs_insns")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow!("abs_insns must be an array"))?;
        let abs_insns = insns.iter().map(AbstractInstruction::from_json).collect::<Result<Vec<_>>>()?;
        let abs_aliasing = AbstractAliasing::from_json(
            obj.get("abs_aliasing").ok_or_else(|| anyhow!("missing abs_aliasing"))?,
        )?;
        Ok(AbstractBlock { abs_insns, abs_aliasing })
    }

    /// Canonical serialization, key-sorted (§6.1 round-trip property).
    pub fn to_canonical_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json())?)
    }
}
