//! RISC-V Privilege Modes.
//!
//! This module defines the privilege levels supported by the machine.
//! It implements the following:
//! 1. **Mode Classification:** Definitions for User (U), Supervisor (S), and Machine (M) modes.
//! 2. **Serialization:** Conversion between numeric representations and enum variants.
//! 3. **Observability:** Human-readable naming and display formatting for privilege states.

/// RISC-V privilege mode levels.
///
/// RISC-V defines three privilege modes that control access to system
/// resources and instructions. Machine mode is the highest privilege level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivilegeMode {
    /// User mode (U-mode), the lowest privilege level for application code.
    User = 0,

    /// Supervisor mode (S-mode), the intermediate level for OS kernels.
    Supervisor = 1,

    /// Machine mode (M-mode), the highest level for firmware.
    Machine = 3,
}

impl PrivilegeMode {
    /// Converts a numeric privilege value to a mode.
    ///
    /// Invalid encodings (including the reserved Hypervisor value 2) map to
    /// `Machine`, matching the hardware convention of treating unknown
    /// values as most privileged.
    pub fn from_u64(val: u64) -> Self {
        match val & 3 {
            0 => Self::User,
            1 => Self::Supervisor,
            _ => Self::Machine,
        }
    }

    /// Converts a privilege mode to its numeric representation (0, 1, or 3).
    pub fn to_u64(self) -> u64 {
        self as u64
    }

    /// Returns the human-readable name of the privilege mode.
    pub fn name(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Supervisor => "Supervisor",
            Self::Machine => "Machine",
        }
    }
}

impl std::fmt::Display for PrivilegeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
