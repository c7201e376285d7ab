use serde::{Deserialize, Serialize};
use std::fmt;

/// A constant-pool entry.
///
/// The pool holds only literal data referenced by index from
/// `Op::PushConst`; booleans and the unit value have dedicated push
/// instructions and never enter the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
}

impl Const {
    /// Pool-identity comparison. Floats compare by bit pattern so that,
    /// unlike IEEE equality, deduplication is an equivalence relation.
    pub fn same(&self, other: &Const) -> bool {
        match (self, other) {
            (Const::Int(a), Const::Int(b)) => a == b,
            (Const::Float(a), Const::Float(b)) => a.to_bits() == b.to_bits(),
            (Const::Str(a), Const::Str(b)) => a == b,
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Const::Int(_) => "Int",
            Const::Float(_) => "Float",
            Const::Str(_) => "Str",
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(n) => write!(f, "{n}"),
            Const::Float(n) => write!(f, "{n}"),
            Const::Str(s) => write!(f, "{s:?}"),
        }
    }
}
