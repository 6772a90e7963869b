//! Narrow stand-in for the external instruction-scheme database and
//! assembler/disassembler front-end ("IWHO", §1, §3). The real thing is a
//! black box outside this crate's scope; what lives here is the minimal
//! contract the rest of the core needs plus a small in-memory reference
//! universe used by the CLI's `--check-config` path and by the test suite.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tag written into serialized aliasing pairs (§6.1 `<pair>`). Only
/// register and memory-base/index operands can alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OpKindTag {
    #[serde(rename = "REG")]
    Reg,
    #[serde(rename = "MEM")]
    Mem,
}

/// The operand-kind of a single operand slot on a scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperandKind {
    Register { class: String },
    Memory { address_registers: Vec<String>, width_bits: u32 },
    Immediate { width_bits: u32 },
    Flag { name: String },
}

impl OperandKind {
    /// `None` for operand kinds the aliasing relation does not cover.
    pub fn alias_tag(&self) -> Option<OpKindTag> {
        match self {
            OperandKind::Register { .. } => Some(OpKindTag::Reg),
            OperandKind::Memory { .. } => Some(OpKindTag::Mem),
            OperandKind::Immediate { .. } | OperandKind::Flag { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operand {
    pub name: String,
    pub kind: OperandKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub read: bool,
    pub write: bool,
}

/// An opaque parameterized instruction form: mnemonic, operands, implicit
/// behavior (§3 "Instruction scheme").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionScheme {
    pub id: String,
    pub mnemonic: String,
    pub opschemes: Vec<String>,
    pub operands: Vec<Operand>,
    pub memory_usage: Option<MemoryUsage>,
    pub category: String,
    pub extension: String,
    pub isa_set: String,
    /// Whether this scheme transfers control (jumps, calls, returns).
    /// Consulted only by the `no_cf` universe filter (§6.2).
    #[serde(default)]
    pub has_control_flow: bool,
}

impl InstructionScheme {
    pub fn operand(&self, name: &str) -> Option<&Operand> {
        self.operands.iter().find(|o| o.name == name)
    }
}

/// The contract the feature manager and sampler need from the external
/// instruction-scheme database: enumerate schemes and fetch one by id.
pub trait SchemeUniverse {
    fn schemes(&self) -> &[InstructionScheme];

    fn get(&self, id: &str) -> Option<&InstructionScheme>;
}

/// A small in-memory universe, sufficient to exercise the feature manager,
/// sampler and generalizer end to end without a real IWHO backend.
#[derive(Debug, Default)]
pub struct InMemoryUniverse {
    schemes: Vec<InstructionScheme>,
    by_id: HashMap<String, usize>,
}

impl InMemoryUniverse {
    pub fn new(schemes: Vec<InstructionScheme>) -> Self {
        let by_id = schemes
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.id.clone(), idx))
            .collect();
        InMemoryUniverse { schemes, by_id }
    }
}

impl SchemeUniverse for InMemoryUniverse {
    fn schemes(&self) -> &[InstructionScheme] {
        &self.schemes
    }

    fn get(&self, id: &str) -> Option<&InstructionScheme> {
        self.by_id.get(id).map(|&idx| &self.schemes[idx])
    }
}

/// Load a scheme universe from a JSON file of `InstructionScheme` records.
/// `iwho.context_specifier` names this file (§6.2) — the real IWHO context
/// resolution is external to this crate; this is the narrow stand-in the
/// CLI needs to have *some* concrete universe to sample against.
pub fn load_universe_from_file(path: &std::path::Path) -> Result<InMemoryUniverse, crate::errors::ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let schemes: Vec<InstructionScheme> = serde_json::from_str(&text)?;
    Ok(InMemoryUniverse::new(schemes))
}

/// Restrict an instruction universe per `iwho.filters` (§6.2), applied in
/// list order. `with_measurements` has no concrete effect here: whether a
/// scheme already has measurements lives in the measurement database, which
/// §1 keeps opaque to the core, so this stand-in leaves the universe
/// unchanged for that filter kind rather than fabricating a measurement
/// store.
pub fn apply_filters(
    schemes: Vec<InstructionScheme>,
    filters: &[crate::config::IwhoFilter],
) -> Result<Vec<InstructionScheme>, crate::errors::ConfigError> {
    use crate::config::IwhoFilter;
    let mut schemes = schemes;
    for filter in filters {
        schemes = match filter {
            IwhoFilter::NoCf => schemes.into_iter().filter(|s| !s.has_control_flow).collect(),
            IwhoFilter::WithMeasurements => schemes,
            IwhoFilter::Blacklist { file_path } => {
                let blocked = read_mnemonic_list(std::path::Path::new(file_path))?;
                schemes.into_iter().filter(|s| !blocked.contains(&s.mnemonic)).collect()
            }
            IwhoFilter::Whitelist { file_path } => {
                let allowed = read_mnemonic_list(std::path::Path::new(file_path))?;
                schemes.into_iter().filter(|s| allowed.contains(&s.mnemonic)).collect()
            }
        };
    }
    Ok(schemes)
}

fn read_mnemonic_list(path: &std::path::Path) -> Result<std::collections::BTreeSet<String>, crate::errors::ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect())
}

#[cfg(test)]
pub mod test_universe {
    use super::*;

    /// A handful of x86-ish add/mov schemes used across the test suite,
    /// deliberately small so the lattice-law tests stay fast.
    pub fn small() -> InMemoryUniverse {
        let schemes = vec![
            scheme("add_r_r", "add", "BINARY", true, false),
            scheme("add_m_r", "add", "BINARY", true, true),
            scheme("mov_r_r", "mov", "DATA_TRANSFER", false, false),
            scheme("mov_m_r", "mov", "DATA_TRANSFER", false, true),
            scheme("sub_r_r", "sub", "BINARY", true, false),
            scheme("cmp_r_r", "cmp", "BINARY", true, false),
        ];
        InMemoryUniverse::new(schemes)
    }

    fn scheme(id: &str, mnemonic: &str, category: &str, has_reg1: bool, has_mem: bool) -> InstructionScheme {
        let mut operands = vec![Operand {
            name: "op0".to_string(),
            kind: if has_mem {
                OperandKind::Memory { address_registers: vec!["base".to_string()], width_bits: 32 }
            } else {
                OperandKind::Register { class: "GPR32".to_string() }
            },
        }];
        if has_reg1 {
            operands.push(Operand {
                name: "op1".to_string(),
                kind: OperandKind::Register { class: "GPR32".to_string() },
            });
        }
        let opschemes = operands
            .iter()
            .map(|o| match o.kind.alias_tag() {
                Some(OpKindTag::Reg) => "R:GPR32".to_string(),
                Some(OpKindTag::Mem) => "RW:MEM".to_string(),
                None => "IMM".to_string(),
            })
            .collect();
        InstructionScheme {
            id: id.to_string(),
            mnemonic: mnemonic.to_string(),
            opschemes,
            operands,
            memory_usage: if has_mem {
                Some(MemoryUsage { read: true, write: true })
            } else {
                None
            },
            category: category.to_string(),
            extension: "BASE".to_string(),
            isa_set: "I386".to_string(),
            has_control_flow: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IwhoFilter;

    #[test]
    fn no_cf_filter_drops_control_flow_schemes() {
        let mut schemes = test_universe::small().schemes().to_vec();
        schemes.push(InstructionScheme {
            id: "jmp_rel".into(),
            mnemonic: "jmp".into(),
            opschemes: vec![],
            operands: vec![],
            memory_usage: None,
            category: "CONTROL_FLOW".into(),
            extension: "BASE".into(),
            isa_set: "I386".into(),
            has_control_flow: true,
        });
        let filtered = apply_filters(schemes, &[IwhoFilter::NoCf]).unwrap();
        assert!(filtered.iter().all(|s| !s.has_control_flow));
        assert!(filtered.iter().any(|s| s.mnemonic == "add"));
    }

    #[test]
    fn blacklist_filter_drops_listed_mnemonics() {
        let tmp = std::env::temp_dir().join(format!("anica_test_iwho_bl_{}", std::process::id()));
        std::fs::write(&tmp, "mov,cmp\n").unwrap();
        let schemes = test_universe::small().schemes().to_vec();
        let filtered = apply_filters(
            schemes,
            &[IwhoFilter::Blacklist { file_path: tmp.to_string_lossy().into_owned() }],
        )
        .unwrap();
        assert!(!filtered.iter().any(|s| s.mnemonic == "mov" || s.mnemonic == "cmp"));
        assert!(filtered.iter().any(|s| s.mnemonic == "add"));
        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn whitelist_filter_keeps_only_listed_mnemonics() {
        let tmp = std::env::temp_dir().join(format!("anica_test_iwho_wl_{}", std::process::id()));
        std::fs::write(&tmp, "add\n").unwrap();
        let schemes = test_universe::small().schemes().to_vec();
        let filtered = apply_filters(
            schemes,
            &[IwhoFilter::Whitelist { file_path: tmp.to_string_lossy().into_owned() }],
        )
        .unwrap();
        assert!(filtered.iter().all(|s| s.mnemonic == "add"));
        assert!(!filtered.is_empty());
        let _ = std::fs::remove_file(&tmp);
    }
}
