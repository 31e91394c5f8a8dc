//! The request a reader driver receives to establish a PACE channel.
//!
//! The layout is the `EstablishPACEChannel` input of the PC/SC Part 10 amendment 1:
//!
//! ```plain
//! PinID | lengthCHAT | CHAT | lengthPIN | PIN | lengthCertificateDescription (LE16) | CertificateDescription
//! ```


use std::fmt;

use tracing::debug;

use crate::der_util::{oid_from_der_bytes, try_split_tlv};
use crate::pace::Error;
use crate::pace::oids::{
    TERMINAL_TYPE_AUTHENTICATION_TERMINAL, TERMINAL_TYPE_INSPECTION_SYSTEM,
    TERMINAL_TYPE_SIGNATURE_TERMINAL,
};
use crate::pace::secret::PinId;


const TAG_CHAT: u16 = 0x7F4C;
const TAG_OID: u16 = 0x06;
const TAG_DISCRETIONARY_DATA: u16 = 0x53;


/// A parsed `EstablishPACEChannel` request; all fields borrow from the input buffer.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct ChannelRequest<'a> {
    pub pin_id: PinId,

    /// The Certificate Holder Authorization Template, possibly empty.
    pub chat: &'a [u8],

    /// The secret, if the caller supplied one.
    pub secret: Option<&'a [u8]>,

    pub certificate_description: &'a [u8],
}
impl<'a> ChannelRequest<'a> {
    pub fn parse(input: &'a [u8]) -> Result<Self, Error> {
        fn truncated(field: &str) -> Error {
            Error::InvalidArguments { reason: format!("input ends within {}", field) }
        }

        let (&pin_id_byte, rest) = input.split_first()
            .ok_or_else(|| truncated("PIN ID"))?;
        let pin_id = PinId::try_from(pin_id_byte)
            .map_err(|b| Error::InvalidArguments { reason: format!("unknown PIN ID {}", b) })?;

        let (chat, rest) = split_length_prefixed(rest, 1)
            .ok_or_else(|| truncated("CHAT"))?;
        let (secret, rest) = split_length_prefixed(rest, 1)
            .ok_or_else(|| truncated("secret"))?;
        let (certificate_description, rest) = split_length_prefixed(rest, 2)
            .ok_or_else(|| truncated("certificate description"))?;
        if !rest.is_empty() {
            return Err(Error::InvalidArguments {
                reason: format!("{} trailing bytes after certificate description", rest.len()),
            });
        }

        Ok(Self {
            pin_id,
            chat,
            secret: if secret.is_empty() { None } else { Some(secret) },
            certificate_description,
        })
    }
}
impl<'a> fmt::Debug for ChannelRequest<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRequest")
            .field("pin_id", &self.pin_id)
            .field("chat", &crate::Hex(self.chat))
            .field("secret", &self.secret.map(|_| "<redacted>"))
            .field("certificate_description_len", &self.certificate_description.len())
            .finish()
    }
}


/// Splits off a field preceded by a one-byte or little-endian two-byte length.
fn split_length_prefixed(input: &[u8], length_size: usize) -> Option<(&[u8], &[u8])> {
    if input.len() < length_size {
        return None;
    }
    let (length_bytes, rest) = input.split_at(length_size);
    let length = length_bytes.iter()
        .rev()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    if length > rest.len() {
        return None;
    }
    Some(rest.split_at(length))
}


/// The role of a terminal as stated in its CHAT (BSI TR-03110 Part 3 ยง C.4).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TerminalRole {
    InspectionSystem,
    AuthenticationTerminal,
    SignatureTerminal,
    Other(Vec<u32>),
}
impl fmt::Display for TerminalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InspectionSystem => write!(f, "inspection system"),
            Self::AuthenticationTerminal => write!(f, "authentication terminal"),
            Self::SignatureTerminal => write!(f, "signature terminal"),
            Self::Other(arcs) => {
                write!(f, "unknown terminal type ")?;
                for (i, arc) in arcs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", arc)?;
                }
                Ok(())
            },
        }
    }
}


/// A Certificate Holder Authorization Template.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Chat {
    pub role: TerminalRole,

    /// The relative authorization bit mask; its meaning depends on the role.
    pub access_rights: Vec<u8>,
}
impl Chat {
    /// Parses a CHAT; an empty input means none was given.
    pub fn parse(chat: &[u8]) -> Result<Option<Self>, Error> {
        fn malformed(reason: &str) -> Error {
            Error::InvalidArguments { reason: format!("malformed CHAT: {}", reason) }
        }

        if chat.is_empty() {
            return Ok(None);
        }

        let (outer, rest) = try_split_tlv(chat)
            .ok_or_else(|| malformed("invalid encoding"))?;
        if outer.tag != TAG_CHAT {
            return Err(malformed("wrong tag"));
        }
        if !rest.is_empty() {
            return Err(malformed("trailing data"));
        }

        let (oid, rest) = try_split_tlv(outer.value)
            .ok_or_else(|| malformed("invalid terminal type encoding"))?;
        if oid.tag != TAG_OID {
            return Err(malformed("terminal type missing"));
        }
        let arcs = oid_from_der_bytes(oid.value)
            .ok_or_else(|| malformed("invalid terminal type"))?;

        let (rights, rest) = try_split_tlv(rest)
            .ok_or_else(|| malformed("invalid access rights encoding"))?;
        if rights.tag != TAG_DISCRETIONARY_DATA {
            return Err(malformed("access rights missing"));
        }
        if !rest.is_empty() {
            return Err(malformed("trailing data in template"));
        }

        let role = if arcs[..] == TERMINAL_TYPE_INSPECTION_SYSTEM[..] {
            TerminalRole::InspectionSystem
        } else if arcs[..] == TERMINAL_TYPE_AUTHENTICATION_TERMINAL[..] {
            TerminalRole::AuthenticationTerminal
        } else if arcs[..] == TERMINAL_TYPE_SIGNATURE_TERMINAL[..] {
            TerminalRole::SignatureTerminal
        } else {
            TerminalRole::Other(arcs)
        };
        debug!(%role, "parsed CHAT");

        Ok(Some(Self {
            role,
            access_rights: rights.value.to_vec(),
        }))
    }
}
