//! Status words (SW1 SW2) as defined by ISO/IEC 7816-4 ยง 5.6.


use std::fmt;


/// The two status bytes terminating every response APDU.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

/// How a status word should be interpreted when no command-specific meaning applies.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StatusClass {
    /// `90 00`, or `61 xx` (success, more response data available).
    Success,

    /// `63 Cx`: verification failed, `x` tries remaining.
    VerificationFailed { tries_remaining: u8 },

    /// `69 83`: the authentication method is blocked.
    AuthenticationMethodBlocked,

    /// Anything else.
    Failed,
}

impl StatusWord {
    pub const SUCCESS: Self = Self::new(0x90, 0x00);
    pub const SELECTED_FILE_DEACTIVATED: Self = Self::new(0x62, 0x83);
    pub const AUTHENTICATION_METHOD_BLOCKED: Self = Self::new(0x69, 0x83);
    pub const FILE_NOT_FOUND: Self = Self::new(0x6A, 0x82);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self {
            sw1,
            sw2,
        }
    }

    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    pub const fn to_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.classify(), StatusClass::Success)
    }

    /// The retry counter carried by a `63 Cx` status word, if this is one.
    pub const fn retry_counter(&self) -> Option<u8> {
        if self.sw1 == 0x63 && self.sw2 & 0xF0 == 0xC0 {
            Some(self.sw2 & 0x0F)
        } else {
            None
        }
    }

    pub const fn classify(&self) -> StatusClass {
        if let Some(tries_remaining) = self.retry_counter() {
            return StatusClass::VerificationFailed { tries_remaining };
        }
        match *self {
            Self::SUCCESS => StatusClass::Success,
            Self { sw1: 0x61, .. } => StatusClass::Success,
            Self::AUTHENTICATION_METHOD_BLOCKED => StatusClass::AuthenticationMethodBlocked,
            _ => StatusClass::Failed,
        }
    }

    /// A short human-readable description of the status word.
    pub fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "success",
            (0x61, _) => "success, more data available",
            (0x62, 0x81) => "part of returned data may be corrupted",
            (0x62, 0x82) => "end of file reached before reading Le bytes",
            (0x62, 0x83) => "selected file or password deactivated",
            (0x62, _) => "warning, state of non-volatile memory unchanged",
            (0x63, sw2) if sw2 & 0xF0 == 0xC0 => "verification failed",
            (0x63, _) => "warning, state of non-volatile memory changed",
            (0x64, _) => "execution error, state of non-volatile memory unchanged",
            (0x65, 0x81) => "memory failure",
            (0x65, _) => "execution error, state of non-volatile memory changed",
            (0x66, _) => "security-related issue",
            (0x67, 0x00) => "wrong length",
            (0x68, 0x81) => "logical channel not supported",
            (0x68, 0x82) => "secure messaging not supported",
            (0x68, 0x83) => "last command of the chain expected",
            (0x68, 0x84) => "command chaining not supported",
            (0x69, 0x81) => "command incompatible with file structure",
            (0x69, 0x82) => "security status not satisfied",
            (0x69, 0x83) => "authentication method blocked",
            (0x69, 0x84) => "reference data not usable",
            (0x69, 0x85) => "conditions of use not satisfied",
            (0x69, 0x86) => "command not allowed, no current EF",
            (0x69, 0x87) => "expected secure messaging data objects missing",
            (0x69, 0x88) => "incorrect secure messaging data objects",
            (0x69, _) => "command not allowed",
            (0x6A, 0x80) => "incorrect parameters in the command data field",
            (0x6A, 0x81) => "function not supported",
            (0x6A, 0x82) => "file or application not found",
            (0x6A, 0x83) => "record not found",
            (0x6A, 0x84) => "not enough memory space in the file",
            (0x6A, 0x86) => "incorrect parameters P1-P2",
            (0x6A, 0x88) => "referenced data or reference data not found",
            (0x6A, _) => "wrong parameters",
            (0x6B, 0x00) => "wrong parameters P1-P2",
            (0x6C, _) => "wrong Le field",
            (0x6D, 0x00) => "instruction code not supported or invalid",
            (0x6E, 0x00) => "class not supported",
            (0x6F, 0x00) => "no precise diagnosis",
            _ => "unknown status",
        }
    }
}
impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusWord {} sw1: 0x{:02X}, sw2: 0x{:02X} {}", '{', self.sw1, self.sw2, '}')
    }
}
impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X} ({})", self.sw1, self.sw2, self.description())
    }
}
