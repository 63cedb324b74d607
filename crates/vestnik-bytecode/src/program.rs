//! Linked programs
//!
//! A compiler (or a test) produces a linear `Vec<Instr>` with symbolic
//! labels. Linking resolves every label to an instruction index, pairs each
//! `TRY` with its `CATCH` so the runtime handler knows where to divert to,
//! and validates that every referenced label exists.

use crate::instr::Instr;
use rustc_hash::FxHashMap;
use std::fmt;

/// Source position carried for error messages only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pos {
    /// 1-based source line; 0 when unknown
    pub line: u32,
    /// 1-based source column; 0 when unknown
    pub col: u32,
}

/// Linking failures.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The same label id is defined twice
    #[error("метка L{0} определена дважды")]
    DuplicateLabel(usize),

    /// A jump references a label that is never defined
    #[error("метка L{0} не определена")]
    UndefinedLabel(usize),

    /// A CATCH with no TRY for its register
    #[error("CATCH r{reg} без TRY (инструкция {ip})")]
    UnmatchedCatch {
        /// Register of the catch
        reg: usize,
        /// Instruction index
        ip: usize,
    },

    /// A TRY whose protected region never reaches a CATCH
    #[error("TRY r{reg} без CATCH (инструкция {ip})")]
    UnmatchedTry {
        /// Register of the try
        reg: usize,
        /// Instruction index
        ip: usize,
    },
}

/// An executable instruction sequence.
#[derive(Debug, Clone)]
pub struct Program {
    /// Linked instructions, labels still present as no-ops
    pub code: Vec<Instr>,
    /// Source positions aligned with `code`; empty when not provided
    pub positions: Vec<Pos>,
    labels: Vec<Option<usize>>,
    trys: FxHashMap<usize, usize>,
}

impl Program {
    /// Link an instruction list without source positions.
    pub fn link(code: Vec<Instr>) -> Result<Self, LinkError> {
        Self::link_with_positions(code, Vec::new())
    }

    /// Link an instruction list with per-instruction source positions.
    pub fn link_with_positions(code: Vec<Instr>, positions: Vec<Pos>) -> Result<Self, LinkError> {
        let mut labels: Vec<Option<usize>> = Vec::new();
        for (ip, instr) in code.iter().enumerate() {
            if let Instr::Label { id } = instr {
                if labels.len() <= *id {
                    labels.resize(*id + 1, None);
                }
                if labels[*id].is_some() {
                    return Err(LinkError::DuplicateLabel(*id));
                }
                labels[*id] = Some(ip);
            }
        }

        let defined = |label: usize| labels.get(label).copied().flatten().is_some();
        let mut trys: FxHashMap<usize, usize> = FxHashMap::default();
        let mut try_stack: Vec<(usize, usize)> = Vec::new();

        for (ip, instr) in code.iter().enumerate() {
            match instr {
                Instr::Jmp { label }
                | Instr::JTrue { label, .. }
                | Instr::JFalse { label, .. }
                | Instr::Catch {
                    no_err_label: label,
                    ..
                }
                | Instr::Foreach {
                    break_label: label, ..
                }
                | Instr::Next {
                    end_label: label, ..
                }
                | Instr::ForNum {
                    break_label: label, ..
                }
                | Instr::NextNum {
                    end_label: label, ..
                }
                | Instr::While {
                    break_label: label, ..
                } => {
                    if !defined(*label) {
                        return Err(LinkError::UndefinedLabel(*label));
                    }
                }
                _ => {}
            }
            match instr {
                Instr::Try { reg } => try_stack.push((*reg, ip)),
                Instr::Catch { reg, .. } => match try_stack.pop() {
                    Some((try_reg, try_ip)) if try_reg == *reg => {
                        trys.insert(try_ip, ip);
                    }
                    _ => return Err(LinkError::UnmatchedCatch { reg: *reg, ip }),
                },
                _ => {}
            }
        }
        if let Some((reg, ip)) = try_stack.pop() {
            return Err(LinkError::UnmatchedTry { reg, ip });
        }

        Ok(Program {
            code,
            positions,
            labels,
            trys,
        })
    }

    /// Instruction index of a label.
    #[inline]
    pub fn label_ip(&self, label: usize) -> Option<usize> {
        self.labels.get(label).copied().flatten()
    }

    /// Instruction index of the CATCH paired with the TRY at `try_ip`.
    #[inline]
    pub fn catch_ip(&self, try_ip: usize) -> Option<usize> {
        self.trys.get(&try_ip).copied()
    }

    /// Source position of an instruction, if positions were provided.
    pub fn pos(&self, ip: usize) -> Option<Pos> {
        self.positions.get(ip).copied()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.code {
            writeln!(f, "{}", instr)?;
        }
        Ok(())
    }
}
