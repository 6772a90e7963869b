//! Feature declarations and the lattices each feature kind carries
//! (§3 "Feature", "Abstract feature"; §4.1 Feature Manager).
//!
//! A feature is a named, value-typed property of an instruction scheme.
//! Built-in features (`exact_scheme`, `mnemonic`, `opschemes`,
//! `memory_usage`, `category`, `extension`, `isa-set`) all happen to live
//! over a universe of strings, so the four lattice kinds here are modeled
//! generically over `String` rather than per-feature bespoke types.

use crate::iwho::InstructionScheme;
use anyhow::{anyhow, bail, Result};
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;

/// The four built-in lattice kinds (§3), plus the bound `editdistance`
/// carries with it at declaration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FeatureKind {
    Singleton,
    Subset,
    SubsetOrDefinitelyNot,
    EditDistance { max_dist: u32 },
}

/// One `(feature_name, kind)` declaration, in the order the config lists
/// them — order matters because γ of an abstract instruction is computed
/// by progressive intersection in declaration order (§4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDecl {
    pub name: String,
    pub kind: FeatureKind,
}

/// A point in a feature's lattice (§3 table). Serializes per §6.1.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum AbstractFeatureValue {
    Singleton(Singleton),
    Subset(Subset),
    SubsetOrDefinitelyNot(SubsetOrDefinitelyNot),
    EditDistance(EditDistance),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Singleton {
    Top,
    Value(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subset {
    pub elements: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsetOrDefinitelyNot {
    pub subfeature: BTreeSet<String>,
    pub is_in_subfeature: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditDistance {
    pub top: bool,
    pub base: String,
    pub curr_dist: Option<u32>,
    pub max_dist: u32,
}

/// Shared capability every lattice kind implements (§9 "Source
/// abstract-feature polymorphism"): a tagged union rather than runtime
/// class dispatch, with one inherent-method set per variant below and a
/// dispatching impl on `AbstractFeatureValue` itself.
impl AbstractFeatureValue {
    pub fn top() -> Self {
        AbstractFeatureValue::Singleton(Singleton::Top)
    }

    /// Lift a concrete feature value (§3 "Lifecycle").
    pub fn singleton_of(value: impl Into<String>) -> Self {
        AbstractFeatureValue::Singleton(Singleton::Value(value.into()))
    }

    /// `subsumes(a, b)`: is γ(b) ⊆ γ(a)? Structural for the kinds whose
    /// ordering does not depend on the ambient universe; `Subset` and
    /// `SubsetOrDefinitelyNot` need the universe only to know when a
    /// value *is* ⊤, not to compare two non-top values, so plain set
    /// containment suffices here.
    pub fn subsumes(&self, other: &AbstractFeatureValue) -> bool {
        use AbstractFeatureValue::*;
        match (self, other) {
            (Singleton(Singleton::Top), _) => true,
            (Singleton(a), Singleton(b)) => a == b,
            (Subset(a), Subset(b)) => b.elements.is_subset(&a.elements),
            (SubsetOrDefinitelyNot(a), SubsetOrDefinitelyNot(b)) => {
                subset_or_not_subsumes(a, b)
            }
            (EditDistance(a), EditDistance(b)) => edit_distance_subsumes(a, b),
            _ => false,
        }
    }

    /// Least upper bound (§3 "Join is pointwise").
    pub fn join(&self, other: &AbstractFeatureValue) -> AbstractFeatureValue {
        use AbstractFeatureValue::*;
        match (self, other) {
            (Singleton(Singleton::Top), _) | (_, Singleton(Singleton::Top)) => {
                AbstractFeatureValue::top()
            }
            (Singleton(a), Singleton(b)) => {
                if a == b {
                    Singleton(a.clone())
                } else {
                    AbstractFeatureValue::top()
                }
            }
            (Subset(a), Subset(b)) => Subset(Subset {
                elements: a.elements.union(&b.elements).cloned().collect(),
            }),
            (SubsetOrDefinitelyNot(a), SubsetOrDefinitelyNot(b)) => {
                SubsetOrDefinitelyNot(subset_or_not_join(a, b))
            }
            (EditDistance(a), EditDistance(b)) => EditDistance(edit_distance_join(a, b)),
            _ => AbstractFeatureValue::top(),
        }
    }

    /// All immediate predecessors one step closer to ⊤ (§3 `relax`,
    /// §4.2 `expansions`). The universe is required for `Subset` (which
    /// element to add next) and ignored otherwise.
    pub fn relax(&self, universe: &BTreeSet<String>) -> Vec<AbstractFeatureValue> {
        use AbstractFeatureValue::*;
        match self {
            Singleton(Singleton::Top) => vec![],
            Singleton(Singleton::Value(_)) => vec![AbstractFeatureValue::top()],
            Subset(s) => {
                if &s.elements == universe {
                    vec![]
                } else {
                    universe
                        .difference(&s.elements)
                        .map(|e| {
                            let mut elements = s.elements.clone();
                            elements.insert(e.clone());
                            Subset(self::Subset { elements })
                        })
                        .collect()
                }
            }
            SubsetOrDefinitelyNot(s) => subset_or_not_relax(s, universe),
            EditDistance(e) => edit_distance_relax(e),
        }
    }

    pub fn kind_tag(&self) -> &'static str {
        match self {
            AbstractFeatureValue::Singleton(_) => "singleton",
            AbstractFeatureValue::Subset(_) => "subset",
            AbstractFeatureValue::SubsetOrDefinitelyNot(_) => "subset_or_definitely_not",
            AbstractFeatureValue::EditDistance(_) => "editdistance",
        }
    }

    /// Serialize per §6.1: shape alone distinguishes the kind, so no
    /// explicit tag is written.
    pub fn to_json(&self) -> Value {
        match self {
            AbstractFeatureValue::Singleton(Singleton::Top) => json!("$SV:TOP"),
            AbstractFeatureValue::Singleton(Singleton::Value(v)) => json!(v),
            AbstractFeatureValue::Subset(s) => json!(s.elements.iter().collect::<Vec<_>>()),
            AbstractFeatureValue::SubsetOrDefinitelyNot(s) => json!({
                "subfeature": s.subfeature.iter().collect::<Vec<_>>(),
                "is_in_subfeature": s.is_in_subfeature,
            }),
            AbstractFeatureValue::EditDistance(e) => json!({
                "top": e.top,
                "base": e.base,
                "curr_dist": e.curr_dist,
                "max_dist": e.max_dist,
            }),
        }
    }

    /// Inverse of `to_json`, dispatching on JSON shape.
    pub fn from_json(v: &Value) -> Result<Self> {
        match v {
            Value::String(s) if s == "$SV:TOP" => Ok(AbstractFeatureValue::top()),
            Value::String(s) => Ok(AbstractFeatureValue::singleton_of(s.clone())),
            Value::Array(arr) => {
                let elements = arr
                    .iter()
                    .map(|e| e.as_str().map(|s| s.to_string()).ok_or_else(|| anyhow!("subset element must be a string")))
                    .collect::<Result<BTreeSet<_>>>()?;
                Ok(AbstractFeatureValue::Subset(Subset { elements }))
            }
            Value::Object(map) if map.contains_key("is_in_subfeature") => {
                let subfeature = map
                    .get("subfeature")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| anyhow!("subfeature must be an array"))?
                    .iter()
                    .map(|e| e.as_str().map(|s| s.to_string()).ok_or_else(|| anyhow!("subfeature element must be a string")))
                    .collect::<Result<BTreeSet<_>>>()?;
                let is_in_subfeature = map
                    .get("is_in_subfeature")
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| anyhow!("is_in_subfeature must be a bool"))?;
                Ok(AbstractFeatureValue::SubsetOrDefinitelyNot(SubsetOrDefinitelyNot { subfeature, is_in_subfeature }))
            }
            Value::Object(map) if map.contains_key("top") => {
                let top = map.get("top").and_then(|v| v.as_bool()).unwrap_or(false);
                let base = map
                    .get("base")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("editdistance base must be a string"))?
                    .to_string();
                let curr_dist = map.get("curr_dist").and_then(|v| v.as_u64()).map(|v| v as u32);
                let max_dist = map
                    .get("max_dist")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| anyhow!("editdistance max_dist must be a uint"))? as u32;
                Ok(AbstractFeatureValue::EditDistance(EditDistance { top, base, curr_dist, max_dist }))
            }
            other => bail!("unrecognized abstract feature value shape: {:?}", other),
        }
    }
}

fn subset_or_not_subsumes(a: &SubsetOrDefinitelyNot, b: &SubsetOrDefinitelyNot) -> bool {
    match (a.is_in_subfeature, b.is_in_subfeature) {
        (true, true) => b.subfeature.is_subset(&a.subfeature),
        (false, false) => a.subfeature.is_subset(&b.subfeature),
        // "is in S" and "disjoint from S" are only comparable through the
        // canonical top (is_in=true, subfeature=universe); anything else
        // is incomparable and a cannot subsume b.
        _ => false,
    }
}

fn subset_or_not_join(a: &SubsetOrDefinitelyNot, b: &SubsetOrDefinitelyNot) -> SubsetOrDefinitelyNot {
    match (a.is_in_subfeature, b.is_in_subfeature) {
        (true, true) => SubsetOrDefinitelyNot {
            subfeature: a.subfeature.union(&b.subfeature).cloned().collect(),
            is_in_subfeature: true,
        },
        (false, false) => SubsetOrDefinitelyNot {
            subfeature: a.subfeature.intersection(&b.subfeature).cloned().collect(),
            is_in_subfeature: false,
        },
        _ => SubsetOrDefinitelyNot {
            subfeature: BTreeSet::new(),
            is_in_subfeature: true, // caller normalizes to canonical top when needed
        },
    }
}

/// Relax rules, documented as an Open Question resolution in DESIGN.md:
/// growing `subfeature` while `is_in_subfeature` is true climbs directly
/// toward ⊤ (is_in=true, subfeature=universe); shrinking `subfeature`
/// while `is_in_subfeature` is false climbs toward the same ⊤ from the
/// other side, since "disjoint from ∅" is vacuously true for every value.
fn subset_or_not_relax(
    s: &SubsetOrDefinitelyNot,
    universe: &BTreeSet<String>,
) -> Vec<AbstractFeatureValue> {
    if s.is_in_subfeature {
        if &s.subfeature == universe {
            vec![]
        } else {
            universe
                .difference(&s.subfeature)
                .map(|e| {
                    let mut subfeature = s.subfeature.clone();
                    subfeature.insert(e.clone());
                    AbstractFeatureValue::SubsetOrDefinitelyNot(SubsetOrDefinitelyNot {
                        subfeature,
                        is_in_subfeature: true,
                    })
                })
                .collect()
        }
    } else if s.subfeature.is_empty() {
        vec![AbstractFeatureValue::SubsetOrDefinitelyNot(SubsetOrDefinitelyNot {
            subfeature: universe.clone(),
            is_in_subfeature: true,
        })]
    } else {
        s.subfeature
            .iter()
            .map(|e| {
                let mut subfeature = s.subfeature.clone();
                subfeature.remove(e);
                AbstractFeatureValue::SubsetOrDefinitelyNot(SubsetOrDefinitelyNot {
                    subfeature,
                    is_in_subfeature: false,
                })
            })
            .collect()
    }
}

fn edit_distance_subsumes(a: &EditDistance, b: &EditDistance) -> bool {
    if a.top {
        return true;
    }
    if b.top {
        return false;
    }
    a.base == b.base && b.curr_dist.unwrap_or(0) <= a.curr_dist.unwrap_or(0)
}

fn edit_distance_join(a: &EditDistance, b: &EditDistance) -> EditDistance {
    if a.top || b.top || a.base != b.base {
        return EditDistance { top: true, base: a.base.clone(), curr_dist: None, max_dist: a.max_dist };
    }
    EditDistance {
        top: false,
        base: a.base.clone(),
        curr_dist: Some(a.curr_dist.unwrap_or(0).max(b.curr_dist.unwrap_or(0))),
        max_dist: a.max_dist,
    }
}

fn edit_distance_relax(e: &EditDistance) -> Vec<AbstractFeatureValue> {
    if e.top {
        return vec![];
    }
    let d = e.curr_dist.unwrap_or(0);
    if d < e.max_dist {
        vec![AbstractFeatureValue::EditDistance(EditDistance {
            top: false,
            base: e.base.clone(),
            curr_dist: Some(d + 1),
            max_dist: e.max_dist,
        })]
    } else {
        vec![AbstractFeatureValue::EditDistance(EditDistance {
            top: true,
            base: e.base.clone(),
            curr_dist: None,
            max_dist: e.max_dist,
        })]
    }
}

/// Levenshtein edit distance between two ASCII mnemonic strings. Small
/// inputs only (mnemonics), so the classic O(n*m) table is fine.
pub fn edit_distance(a: &str, b: &str) -> u32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<u32> = (0..=b.len() as u32).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i as u32;
        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[b.len()]
}

impl fmt::Display for AbstractFeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractFeatureValue::Singleton(Singleton::Top) => write!(f, "TOP"),
            AbstractFeatureValue::Singleton(Singleton::Value(v)) => write!(f, "{}", v),
            AbstractFeatureValue::Subset(s) => write!(f, "{:?}", s.elements),
            AbstractFeatureValue::SubsetOrDefinitelyNot(s) => {
                write!(f, "{}{:?}", if s.is_in_subfeature { "" } else { "!" }, s.subfeature)
            }
            AbstractFeatureValue::EditDistance(e) => {
                if e.top {
                    write!(f, "TOP")
                } else {
                    write!(f, "{}~{}", e.base, e.curr_dist.unwrap_or(0))
                }
            }
        }
    }
}

/// What a single instruction scheme exposes for a named feature (§4.1
/// `extract_feature`).
pub fn extract_feature(scheme: &InstructionScheme, name: &str) -> AbstractFeatureValue {
    match name {
        "exact_scheme" => AbstractFeatureValue::singleton_of(scheme.id.clone()),
        "mnemonic" => AbstractFeatureValue::singleton_of(scheme.mnemonic.clone()),
        "category" => AbstractFeatureValue::singleton_of(scheme.category.clone()),
        "extension" => AbstractFeatureValue::singleton_of(scheme.extension.clone()),
        "isa-set" => AbstractFeatureValue::singleton_of(scheme.isa_set.clone()),
        "opschemes" => AbstractFeatureValue::Subset(Subset {
            elements: scheme.opschemes.iter().cloned().collect(),
        }),
        "memory_usage" => {
            let mut tags = BTreeSet::new();
            if let Some(mu) = &scheme.memory_usage {
                if mu.read {
                    tags.insert("R".to_string());
                }
                if mu.write {
                    tags.insert("W".to_string());
                }
            }
            AbstractFeatureValue::SubsetOrDefinitelyNot(SubsetOrDefinitelyNot {
                subfeature: tags,
                is_in_subfeature: true,
            })
        }
        other => panic!("unknown built-in feature {:?}; extensible features must be registered via FeatureManager::register_extractor", other),
    }
}

/// Lift a concrete scheme into its singleton/most-precise abstract value
/// for a given feature declaration (§3 "Lifecycle": each feature value
/// becomes its `singleton`).
pub fn lift_feature(scheme: &InstructionScheme, decl: &FeatureDecl) -> AbstractFeatureValue {
    let precise = extract_feature(scheme, &decl.name);
    match &decl.kind {
        FeatureKind::Singleton | FeatureKind::Subset | FeatureKind::SubsetOrDefinitelyNot => precise,
        FeatureKind::EditDistance { max_dist } => {
            let base = match precise.as_singleton() {
                Some(Singleton::Value(v)) => v.clone(),
                _ => panic!("editdistance feature {:?} must extract a singleton string", decl.name),
            };
            AbstractFeatureValue::EditDistance(EditDistance {
                top: false,
                base,
                curr_dist: Some(0),
                max_dist: *max_dist,
            })
        }
    }
}

/// Per-feature forward index plus the cached ambient universe of values
/// (§4.1). Construction is eager, on `FeatureManager::new`.
pub struct FeatureIndex {
    pub decl: FeatureDecl,
    /// Every scheme's own (precise) feature value, extraction-cached.
    values: Vec<AbstractFeatureValue>,
    /// Ambient universe of atomic elements for `Subset`/`SubsetOrDefinitelyNot`.
    universe: BTreeSet<String>,
}

impl FeatureIndex {
    fn build(decl: FeatureDecl, schemes: &[InstructionScheme]) -> Self {
        let values: Vec<AbstractFeatureValue> = schemes
            .iter()
            .map(|s| extract_feature(s, &decl.name))
            .collect();
        let mut universe = BTreeSet::new();
        for v in &values {
            match v {
                AbstractFeatureValue::Subset(s) => universe.extend(s.elements.iter().cloned()),
                AbstractFeatureValue::SubsetOrDefinitelyNot(s) => {
                    universe.extend(s.subfeature.iter().cloned())
                }
                _ => {}
            }
        }
        FeatureIndex { decl, values, universe }
    }

    pub fn universe(&self) -> &BTreeSet<String> {
        &self.universe
    }

    /// γ(value): indices of schemes matching. Linear scan over the
    /// extraction-cached values rather than a literal per-element
    /// inverted map — see DESIGN.md for why this still satisfies §4.1's
    /// "forward index" responsibility without the `subset`
    /// intersection-over-S shortcut (which computes the wrong direction
    /// of containment for this lattice).
    pub fn gamma(&self, value: &AbstractFeatureValue) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| self.point_in_gamma(value, v))
            .map(|(i, _)| i)
            .collect()
    }

    /// Feature-by-feature point-check: is `scheme_value` ∈ γ(`abs_value`)?
    /// Used directly by the subsumption cache's concrete-in-abstract
    /// check (§4.9) without materializing the full γ set.
    pub fn point_in_gamma(&self, abs_value: &AbstractFeatureValue, scheme_value: &AbstractFeatureValue) -> bool {
        use AbstractFeatureValue::*;
        match (abs_value, scheme_value) {
            (Singleton(Singleton::Top), _) => true,
            (Singleton(Singleton::Value(v)), Singleton(Singleton::Value(sv))) => v == sv,
            (Subset(s), Subset(sv)) => sv.elements.is_subset(&s.elements),
            (SubsetOrDefinitelyNot(s), SubsetOrDefinitelyNot(sv)) => {
                if s.is_in_subfeature {
                    sv.subfeature.is_subset(&s.subfeature)
                } else {
                    sv.subfeature.is_disjoint(&s.subfeature)
                }
            }
            (EditDistance(e), Singleton(Singleton::Value(mnemonic))) => {
                e.top || edit_distance(&e.base, mnemonic) <= e.curr_dist.unwrap_or(0)
            }
            _ => false,
        }
    }

    pub fn scheme_value(&self, scheme_idx: usize) -> &AbstractFeatureValue {
        &self.values[scheme_idx]
    }
}

/// Owns the ordered feature declarations and their per-feature indices
/// (§4.1). Built once per abstraction context and shared by reference
/// from there on (§9 "Index construction").
pub struct FeatureManager {
    pub indices: Vec<FeatureIndex>,
}

impl FeatureManager {
    pub fn new(decls: Vec<FeatureDecl>, schemes: &[InstructionScheme]) -> Self {
        let indices = decls
            .into_iter()
            .map(|decl| FeatureIndex::build(decl, schemes))
            .collect();
        FeatureManager { indices }
    }

    pub fn index_for(&self, name: &str) -> Option<&FeatureIndex> {
        self.indices.iter().find(|i| i.decl.name == name)
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.indices.iter().map(|i| i.decl.name.as_str()).collect()
    }

    /// γ of an abstract instruction: progressive intersection of each
    /// feature's γ, in declaration order (§4.1) — cheaper/more-selective
    /// features belong earlier in the config's feature list.
    pub fn gamma_instruction(&self, features: &std::collections::BTreeMap<String, AbstractFeatureValue>) -> Vec<usize> {
        let mut candidates: Option<std::collections::HashSet<usize>> = None;
        for index in &self.indices {
            let Some(value) = features.get(&index.decl.name) else {
                continue;
            };
            let this: std::collections::HashSet<usize> = index.gamma(value).into_iter().collect();
            candidates = Some(match candidates {
                None => this,
                Some(prev) => prev.intersection(&this).cloned().collect(),
            });
            if candidates.as_ref().map(|c| c.is_empty()).unwrap_or(false) {
                break;
            }
        }
        let mut out: Vec<usize> = candidates.unwrap_or_default().into_iter().collect();
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iwho::test_universe;
    use crate::iwho::SchemeUniverse;

    fn universe_set(elems: &[&str]) -> BTreeSet<String> {
        elems.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn singleton_lattice_laws() {
        let a = AbstractFeatureValue::singleton_of("add");
        let top = AbstractFeatureValue::top();
        assert!(a.subsumes(&a));
        assert!(top.subsumes(&a));
        assert!(!a.subsumes(&AbstractFeatureValue::singleton_of("mov")));
        assert_eq!(a.join(&top).kind_tag(), "singleton");
        assert!(a.join(&top).subsumes(&a));
        let relaxed = a.relax(&BTreeSet::new());
        assert_eq!(relaxed, vec![top.clone()]);
        assert!(top.relax(&BTreeSet::new()).is_empty());
    }

    #[test]
    fn subset_lattice_laws() {
        let universe = universe_set(&["a", "b", "c"]);
        let s1 = AbstractFeatureValue::Subset(Subset { elements: universe_set(&["a"]) });
        let s2 = AbstractFeatureValue::Subset(Subset { elements: universe_set(&["a", "b"]) });
        assert!(s2.subsumes(&s1));
        assert!(!s1.subsumes(&s2));
        let joined = s1.join(&s2);
        assert_eq!(joined, s2);
        let full = AbstractFeatureValue::Subset(Subset { elements: universe.clone() });
        assert!(full.relax(&universe).is_empty());
        assert_eq!(s1.relax(&universe).len(), 2); // can add b or c
    }

    #[test]
    fn edit_distance_ascends_to_top() {
        let base = AbstractFeatureValue::EditDistance(EditDistance {
            top: false,
            base: "add".into(),
            curr_dist: Some(0),
            max_dist: 2,
        });
        let mut cur = base;
        let mut steps = 0;
        loop {
            let next = cur.relax(&BTreeSet::new());
            if next.is_empty() {
                break;
            }
            assert_eq!(next.len(), 1);
            cur = next.into_iter().next().unwrap();
            steps += 1;
            assert!(steps <= 10, "edit distance relax should reach top quickly");
        }
        assert!(matches!(cur, AbstractFeatureValue::EditDistance(EditDistance { top: true, .. })));
    }

    #[test]
    fn feature_manager_gamma_progressive_intersection() {
        let universe = test_universe::small();
        let decls = vec![
            FeatureDecl { name: "mnemonic".into(), kind: FeatureKind::Singleton },
            FeatureDecl { name: "category".into(), kind: FeatureKind::Singleton },
        ];
        let fm = FeatureManager::new(decls, universe.schemes());
        let mut features = std::collections::BTreeMap::new();
        features.insert("mnemonic".to_string(), AbstractFeatureValue::top());
        features.insert("category".to_string(), AbstractFeatureValue::singleton_of("BINARY"));
        let gamma = fm.gamma_instruction(&features);
        // add_r_r, add_m_r, sub_r_r, cmp_r_r are BINARY in the small universe.
        assert_eq!(gamma.len(), 4);
    }

    #[test]
    fn feature_manager_gamma_instruction_with_editdistance_is_nonempty() {
        let universe = test_universe::small();
        let decls = vec![FeatureDecl {
            name: "mnemonic".into(),
            kind: FeatureKind::EditDistance { max_dist: 1 },
        }];
        let fm = FeatureManager::new(decls, universe.schemes());
        let mut features = std::collections::BTreeMap::new();
        features.insert(
            "mnemonic".to_string(),
            AbstractFeatureValue::EditDistance(EditDistance {
                top: false,
                base: "mov".into(),
                curr_dist: Some(0),
                max_dist: 1,
            }),
        );
        // Exact match (mov) should resolve; the other mnemonics in the small
        // universe are all more than 1 edit away from "mov" and should not.
        // Before the `FeatureIndex::build` fix this gamma was always empty.
        let gamma = fm.gamma_instruction(&features);
        assert!(!gamma.is_empty());
        let mnemonics: std::collections::BTreeSet<&str> = gamma
            .iter()
            .map(|&i| universe.schemes()[i].mnemonic.as_str())
            .collect();
        assert!(mnemonics.contains("mov"));
        assert!(!mnemonics.contains("cmp"));
    }

    #[test]
    fn json_round_trips_for_every_kind() {
        let values = vec![
            AbstractFeatureValue::top(),
            AbstractFeatureValue::singleton_of("add"),
            AbstractFeatureValue::Subset(Subset { elements: universe_set(&["a", "b"]) }),
            AbstractFeatureValue::SubsetOrDefinitelyNot(SubsetOrDefinitelyNot {
                subfeature: universe_set(&["R"]),
                is_in_subfeature: true,
            }),
            AbstractFeatureValue::EditDistance(EditDistance { top: false, base: "add".into(), curr_dist: Some(1), max_dist: 3 }),
        ];
        for v in values {
            let json = v.to_json();
            let parsed = AbstractFeatureValue::from_json(&json).unwrap();
            assert_eq!(parsed, v);
        }
    }
}
