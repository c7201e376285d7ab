use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::opcode::Op;
use crate::value::Const;

/// Magic bytes for .sbc files: "SBLB"
pub const MAGIC: [u8; 4] = [0x53, 0x42, 0x4C, 0x42];
pub const VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Runtime representation tag for parameter and return types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    Int,
    Float,
    Bool,
    Str,
    Unit,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Int => "Int",
            TypeTag::Float => "Float",
            TypeTag::Bool => "Bool",
            TypeTag::Str => "Str",
            TypeTag::Unit => "Unit",
        };
        write!(f, "{name}")
    }
}

/// One compiled routine in the module.
///
/// `max_stack` and `local_slots` are computed by the compiler and trusted
/// by a loader only after [`crate::verify::verify`] has confirmed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub name: String,
    pub params: Vec<TypeTag>,
    pub ret: TypeTag,
    /// Upper bound on the operand-stack depth of any execution path.
    pub max_stack: u16,
    /// Number of local slots (parameters first, then block locals).
    pub local_slots: u16,
    pub code: Vec<Op>,
}

/// A compiled bytecode module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub version: u16,
    pub constants: Vec<Const>,
    pub routines: Vec<Routine>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            version: VERSION,
            constants: Vec::new(),
            routines: Vec::new(),
        }
    }

    /// Add a constant and return its pool index. The pool is deduplicated:
    /// adding an existing value returns the original index, so identical
    /// input always yields an identical pool.
    pub fn add_const(&mut self, value: Const) -> u32 {
        if let Some(idx) = self.constants.iter().position(|c| c.same(&value)) {
            return idx as u32;
        }
        let idx = self.constants.len() as u32;
        self.constants.push(value);
        idx
    }

    /// Add a routine and return its index.
    pub fn add_routine(&mut self, routine: Routine) -> u32 {
        let idx = self.routines.len() as u32;
        self.routines.push(routine);
        idx
    }

    /// Find a routine by name.
    pub fn routine(&self, name: &str) -> Option<&Routine> {
        self.routines.iter().find(|r| r.name == name)
    }

    /// Serialize to JSON (portable text format).
    pub fn to_json(&self) -> Result<String, BytecodeError> {
        serde_json::to_string_pretty(self).map_err(|e| BytecodeError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, BytecodeError> {
        serde_json::from_str(json).map_err(|e| BytecodeError::Serialization(e.to_string()))
    }

    /// Serialize to the binary .sbc format: magic + version + length + JSON payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BytecodeError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        let json =
            serde_json::to_vec(self).map_err(|e| BytecodeError::Serialization(e.to_string()))?;
        let len = json.len() as u32;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&json);
        Ok(buf)
    }

    /// Deserialize from the binary .sbc format.
    pub fn from_bytes(data: &[u8]) -> Result<Self, BytecodeError> {
        if data.len() < 10 {
            return Err(BytecodeError::InvalidBytecode("too short".into()));
        }
        if data[0..4] != MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }
        let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        if data.len() < 10 + len {
            return Err(BytecodeError::InvalidBytecode("truncated payload".into()));
        }
        let module: Module = serde_json::from_slice(&data[10..10 + len])
            .map_err(|e| BytecodeError::Serialization(e.to_string()))?;
        Ok(module)
    }
}
