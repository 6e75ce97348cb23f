/// Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Receive: an event was dispatched.
    Dispatch = 0,
    /// Send/Receive: keepalive, or a request for one when received.
    Heartbeat = 1,
    /// Send: starts a new session.
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    /// Send: resumes a previous session.
    Resume = 6,
    /// Receive: reconnect and resume.
    Reconnect = 7,
    RequestGuildMembers = 8,
    /// Receive: the session is invalid, `d` tells whether it can be resumed.
    InvalidSession = 9,
    /// Receive: first payload after connecting, carries the heartbeat interval.
    Hello = 10,
    HeartbeatAck = 11,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Dispatch),
            1 => Ok(Opcode::Heartbeat),
            2 => Ok(Opcode::Identify),
            3 => Ok(Opcode::PresenceUpdate),
            4 => Ok(Opcode::VoiceStateUpdate),
            6 => Ok(Opcode::Resume),
            7 => Ok(Opcode::Reconnect),
            8 => Ok(Opcode::RequestGuildMembers),
            9 => Ok(Opcode::InvalidSession),
            10 => Ok(Opcode::Hello),
            11 => Ok(Opcode::HeartbeatAck),
            other => Err(other),
        }
    }
}

/// Gateway close code classification.
pub struct CloseCode;

impl CloseCode {
    /// Sent by us when closing a zombied connection we want to resume.
    pub const ZOMBIE: u16 = 4000;
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    pub const INVALID_SEQUENCE: u16 = 4007;
    pub const RATE_LIMITED: u16 = 4008;
    pub const SESSION_TIMED_OUT: u16 = 4009;

    /// Codes after which reconnecting can never succeed.
    pub fn is_fatal(code: u16) -> bool {
        matches!(code, Self::AUTHENTICATION_FAILED | 4010..=4014)
    }

    pub fn can_resume(code: u16) -> bool {
        !Self::is_fatal(code) && !matches!(code, Self::INVALID_SEQUENCE | Self::SESSION_TIMED_OUT)
    }
}
