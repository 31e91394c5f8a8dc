//! Structures related to application protocol data units (APDUs).


use std::fmt;
use std::io::{self, Write};

use zeroize::Zeroize;

use crate::iso7816::status::StatusWord;


#[derive(Debug)]
pub enum WriteError {
    Io(io::Error),
    EmptyData,
    DataTooLong { maximum: usize, obtained: usize },
}
impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::EmptyData => write!(f, "data is, but must not be, empty"),
            Self::DataTooLong { maximum, obtained } => write!(f, "too much data: obtained {} bytes, expected maximum {} bytes", obtained, maximum),
        }
    }
}
impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::EmptyData => None,
            Self::DataTooLong { .. } => None,
        }
    }
}
impl From<io::Error> for WriteError {
    fn from(value: io::Error) -> Self { Self::Io(value) }
}


#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommandHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}
impl CommandHeader {
    pub const fn to_bytes(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    pub const fn to_be_u32(&self) -> u32 {
        u32::from_be_bytes(self.to_bytes())
    }
}
impl fmt::Debug for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandHeader {} cla: 0x{:02X}, ins: 0x{:02X}, p1: 0x{:02X}, p2: 0x{:02X} {}",
            '{', self.cla, self.ins, self.p1, self.p2, '}',
        )
    }
}


/// The body of a command APDU.
///
/// "Short" variants encode Lc/Le in one byte, "extended" variants in two. A response data length
/// of 0 in a short variant (or 0x0000 in an extended variant) requests the maximum of 256 (or
/// 65536) bytes.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Data {
    NoData,
    RequestDataShort {
        request_data: Vec<u8>,
    },
    RequestDataExtended {
        request_data: Vec<u8>,
    },
    ResponseDataShort {
        response_data_length: u8,
    },
    ResponseDataExtended {
        response_data_length: u16,
    },
    BothDataShort {
        request_data: Vec<u8>,
        response_data_length: u8,
    },
    BothDataExtended {
        request_data: Vec<u8>,
        response_data_length: u16,
    },
}
impl Data {
    /// The longest request data a short command can carry.
    pub const MAX_SHORT_REQUEST_LENGTH: usize = 255;

    /// The longest request data an extended command can carry.
    pub const MAX_EXTENDED_REQUEST_LENGTH: usize = 65535;

    /// The maximum number of bytes the card may respond with, or `None` if no response data is
    /// expected.
    pub fn response_data_length(&self) -> Option<usize> {
        match self {
            Self::NoData => None,
            Self::RequestDataShort { .. } => None,
            Self::RequestDataExtended { .. } => None,
            Self::ResponseDataShort { response_data_length }
                | Self::BothDataShort { response_data_length, .. }
                => Some(if *response_data_length == 0 { 0x100 } else { usize::from(*response_data_length) }),
            Self::ResponseDataExtended { response_data_length }
                | Self::BothDataExtended { response_data_length, .. }
                => Some(if *response_data_length == 0 { 0x1_0000 } else { usize::from(*response_data_length) }),
        }
    }

    pub fn request_data(&self) -> Option<&[u8]> {
        match self {
            Self::NoData => None,
            Self::RequestDataShort { request_data } => Some(request_data.as_slice()),
            Self::RequestDataExtended { request_data } => Some(request_data.as_slice()),
            Self::ResponseDataShort { .. } => None,
            Self::ResponseDataExtended { .. } => None,
            Self::BothDataShort { request_data, .. } => Some(request_data.as_slice()),
            Self::BothDataExtended { request_data, .. } => Some(request_data.as_slice()),
        }
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        fn checked_length(request_data: &[u8], maximum: usize) -> Result<usize, WriteError> {
            match request_data.len() {
                0 => Err(WriteError::EmptyData),
                obtained if obtained > maximum => Err(WriteError::DataTooLong { maximum, obtained }),
                length => Ok(length),
            }
        }

        // "case" refers to the cases in ISO/IEC 7816-3:2006 ยง 12.1.3
        match self {
            Data::NoData => {
                // case 1
                Ok(())
            },
            Data::RequestDataShort { request_data } => {
                // case 3S: [Lc] [Data]
                let length = checked_length(request_data, Self::MAX_SHORT_REQUEST_LENGTH)?;
                writer.write_all(&[length as u8])?;
                writer.write_all(request_data)?;
                Ok(())
            },
            Data::RequestDataExtended { request_data } => {
                // case 3E: [0x00] [LcMSB] [LcLSB] [Data]
                let length = checked_length(request_data, Self::MAX_EXTENDED_REQUEST_LENGTH)?;
                let length_bytes = (length as u16).to_be_bytes();
                writer.write_all(&[0x00, length_bytes[0], length_bytes[1]])?;
                writer.write_all(request_data)?;
                Ok(())
            },
            Data::ResponseDataShort { response_data_length } => {
                // case 2S: [Le]
                writer.write_all(&[*response_data_length])?;
                Ok(())
            },
            Data::ResponseDataExtended { response_data_length } => {
                // case 2E: [0x00] [LeMSB] [LeLSB]
                let length_bytes = response_data_length.to_be_bytes();
                writer.write_all(&[0x00, length_bytes[0], length_bytes[1]])?;
                Ok(())
            },
            Data::BothDataShort { request_data, response_data_length } => {
                // case 4S: [Lc] [Data] [Le]
                let length = checked_length(request_data, Self::MAX_SHORT_REQUEST_LENGTH)?;
                writer.write_all(&[length as u8])?;
                writer.write_all(request_data)?;
                writer.write_all(&[*response_data_length])?;
                Ok(())
            },
            Data::BothDataExtended { request_data, response_data_length } => {
                // case 4E: [0x00] [LcMSB] [LcLSB] [Data] [LeMSB] [LeLSB]
                let length = checked_length(request_data, Self::MAX_EXTENDED_REQUEST_LENGTH)?;
                let request_length_bytes = (length as u16).to_be_bytes();
                writer.write_all(&[0x00, request_length_bytes[0], request_length_bytes[1]])?;
                writer.write_all(request_data)?;
                writer.write_all(&response_data_length.to_be_bytes())?;
                Ok(())
            },
        }
    }
}
impl Drop for Data {
    fn drop(&mut self) {
        // request data carries mapping data, public keys and tokens during PACE
        match self {
            Self::RequestDataShort { request_data }
                | Self::RequestDataExtended { request_data }
                | Self::BothDataShort { request_data, .. }
                | Self::BothDataExtended { request_data, .. }
                => request_data.zeroize(),
            Self::NoData | Self::ResponseDataShort { .. } | Self::ResponseDataExtended { .. } => {},
        }
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Apdu {
    pub header: CommandHeader,
    pub data: Data,
}
impl Apdu {
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&self.header.to_bytes())?;
        self.data.write_bytes(writer)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WriteError> {
        let mut ret = Vec::new();
        self.write_bytes(&mut ret)?;
        Ok(ret)
    }

    /// Checks that the command can be serialized, without keeping a copy of its bytes.
    pub fn check_encodable(&self) -> Result<(), WriteError> {
        self.write_bytes(&mut io::sink())
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Response {
    pub data: Vec<u8>,
    pub trailer: StatusWord,
}
impl Response {
    pub fn new(data: Vec<u8>, sw1: u8, sw2: u8) -> Self {
        Self {
            data,
            trailer: StatusWord::new(sw1, sw2),
        }
    }

    /// Splits a raw response into data and the trailing status word.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let (data, trailer) = bytes.split_at(bytes.len().checked_sub(2)?);
        Some(Self::new(data.to_vec(), trailer[0], trailer[1]))
    }
}
