//! Concrete basic blocks: the output of sampling and the input to
//! predictors and lifting (§3 GLOSSARY "Basic block").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One materialized instruction: which scheme, which concrete operand
/// choice per operand name, and the emitted assembly text (§4.3 phase 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteInstruction {
    pub scheme_id: String,
    /// operand name -> concrete register/memory-base/immediate string
    pub operand_assignment: BTreeMap<String, String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConcreteBasicBlock {
    pub instructions: Vec<ConcreteInstruction>,
}

impl ConcreteBasicBlock {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The textual assembly, one instruction per line, as written to
    /// `start_bb.s`/`minimized_bb.s` (§6.4).
    pub fn to_asm(&self) -> String {
        self.instructions
            .iter()
            .map(|i| i.text.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Same as `to_asm`, but wraps the body in a tight label/jump loop when
    /// `wrap_in_loop` is set (§6.2 `sampling.wrap_in_loop`: "wrap samples in
    /// a loop if the predictor supports it") — throughput predictors that
    /// measure steady-state cycles-per-iteration need several loop trips
    /// rather than one straight-line pass.
    pub fn to_asm_for_sampling(&self, wrap_in_loop: bool) -> String {
        let body = self.to_asm();
        if wrap_in_loop {
            format!("anica_loop:\n{}\njmp anica_loop", body)
        } else {
            body
        }
    }

    pub fn without_index(&self, idx: usize) -> ConcreteBasicBlock {
        let mut instructions = self.instructions.clone();
        instructions.remove(idx);
        ConcreteBasicBlock { instructions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb() -> ConcreteBasicBlock {
        ConcreteBasicBlock {
            instructions: vec![ConcreteInstruction {
                scheme_id: "add_r_r".into(),
                operand_assignment: BTreeMap::new(),
                text: "add eax, ebx".into(),
            }],
        }
    }

    #[test]
    fn unwrapped_sampling_asm_matches_plain_asm() {
        assert_eq!(bb().to_asm_for_sampling(false), bb().to_asm());
    }

    #[test]
    fn wrapped_sampling_asm_adds_a_loop_label_and_jump() {
        let asm = bb().to_asm_for_sampling(true);
        assert!(asm.starts_with("anica_loop:\n"));
        assert!(asm.ends_with("jmp anica_loop"));
        assert!(asm.contains("add eax, ebx"));
    }
}
