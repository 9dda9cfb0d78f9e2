use crate::error::ProtocolError;

/// Magic constants stamped inside MF-model wire payloads (spec.md §4.1/§6).
pub const MF_MAGIC_START: u32 = 0x1337;
pub const MF_MAGIC_END: u32 = 0x1338;

/// One opcode per front-matter `operation: u32` on the wire (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    SendLrGradient = 0,
    SendMfGradient = 1,
    GetLrFullModel = 2,
    GetMfFullModel = 3,
    GetLrSparseModel = 4,
    GetMfSparseModel = 5,
    SetTaskStatus = 6,
    GetTaskStatus = 7,
    GetNumConns = 8,
    GetLastTimeError = 9,
    GetAllTimeError = 10,
    GetNumUpdates = 11,
    RegisterTask = 12,
    DeregisterTask = 13,
    SetValue = 14,
    GetValue = 15,
    KillSignal = 16,
}

impl Opcode {
    /// `GET_LAST_TIME_ERROR` and `GET_ALL_TIME_ERROR` appear in the table
    /// but the reference never wired up handlers for them; spec.md treats
    /// them as reserved (Open Questions, §9).
    pub fn is_reserved(self) -> bool {
        matches!(self, Opcode::GetLastTimeError | Opcode::GetAllTimeError)
    }

    pub fn from_u32(value: u32) -> Result<Self, ProtocolError> {
        use Opcode::*;
        Ok(match value {
            0 => SendLrGradient,
            1 => SendMfGradient,
            2 => GetLrFullModel,
            3 => GetMfFullModel,
            4 => GetLrSparseModel,
            5 => GetMfSparseModel,
            6 => SetTaskStatus,
            7 => GetTaskStatus,
            8 => GetNumConns,
            9 => GetLastTimeError,
            10 => GetAllTimeError,
            11 => GetNumUpdates,
            12 => RegisterTask,
            13 => DeregisterTask,
            14 => SetValue,
            15 => GetValue,
            16 => KillSignal,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_opcodes() {
        for raw in 0..=16u32 {
            let op = Opcode::from_u32(raw).unwrap();
            assert_eq!(op as u32, raw);
        }
    }

    #[test]
    fn unknown_opcode_is_protocol_error() {
        assert_eq!(Opcode::from_u32(17), Err(ProtocolError::UnknownOpcode(17)));
    }

    #[test]
    fn reserved_opcodes_flagged() {
        assert!(Opcode::GetLastTimeError.is_reserved());
        assert!(Opcode::GetAllTimeError.is_reserved());
        assert!(!Opcode::GetNumConns.is_reserved());
    }
}
