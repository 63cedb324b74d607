//! Binary operator tags
//!
//! The operator set the `OPER` instruction dispatches over. Tags carry no
//! typing; each value variant decides which operators it supports.

use std::fmt;

/// Binary operator tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Quo,
    /// `%`
    Rem,
    /// `==`
    Eql,
    /// `!=`
    Neq,
    /// `>`
    Gtr,
    /// `>=`
    Geq,
    /// `<`
    Lss,
    /// `<=`
    Leq,
    /// `|`
    Or,
    /// `||`
    Lor,
    /// `&`
    And,
    /// `&&`
    Land,
    /// `**`
    Pow,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
}

impl Op {
    /// Source-level symbol of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Quo => "/",
            Op::Rem => "%",
            Op::Eql => "==",
            Op::Neq => "!=",
            Op::Gtr => ">",
            Op::Geq => ">=",
            Op::Lss => "<",
            Op::Leq => "<=",
            Op::Or => "|",
            Op::Lor => "||",
            Op::And => "&",
            Op::Land => "&&",
            Op::Pow => "**",
            Op::Shl => "<<",
            Op::Shr => ">>",
        }
    }

    /// Parse an operator from its source symbol.
    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "+" => Op::Add,
            "-" => Op::Sub,
            "*" => Op::Mul,
            "/" => Op::Quo,
            "%" => Op::Rem,
            "==" => Op::Eql,
            "!=" => Op::Neq,
            ">" => Op::Gtr,
            ">=" => Op::Geq,
            "<" => Op::Lss,
            "<=" => Op::Leq,
            "|" => Op::Or,
            "||" => Op::Lor,
            "&" => Op::And,
            "&&" => Op::Land,
            "**" => Op::Pow,
            "<<" => Op::Shl,
            ">>" => Op::Shr,
            _ => return None,
        })
    }

    /// Whether the operator is one of the six comparisons.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Op::Eql | Op::Neq | Op::Gtr | Op::Geq | Op::Lss | Op::Leq
        )
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
