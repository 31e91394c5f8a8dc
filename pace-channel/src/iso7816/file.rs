//! File selection and reading (ISO/IEC 7816-4 ยง 7.1 and ยง 7.2).


use std::fmt;

use crate::iso7816::apdu::{Apdu, CommandHeader, Data, Response};
use crate::iso7816::card::TransportError;
use crate::iso7816::status::StatusWord;


/// Identifier of EF.CardAccess below the master file.
pub const FID_EF_CARD_ACCESS: u16 = 0x011C;


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MetadataEntry {
    FileLengthWithoutStructural { length: usize },
    FileLengthWithStructural { length: usize },
    FileIdentifier { identifier: u16 },
    ShortEfIdentifier { identifier: Option<u8> },
    Other { tag: u8, data: Vec<u8> },
}


#[derive(Debug)]
pub enum ReadError {
    SelectCommunication(TransportError),
    FileNotFound { file_id: u16 },
    SelectFailed { file_id: u16, status: StatusWord },
    MetadataDecoding { file_id: u16 },
    OffsetTooLarge { offset: usize },
    LengthTooLarge { length: usize },
    OutOfMemory { requested: usize },
    ReadCommunication(TransportError),
    ReadFailed { status: StatusWord },
}
impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::SelectCommunication(e)
                => write!(f, "SELECT communication failed: {}", e),
            Self::FileNotFound { file_id }
                => write!(f, "file {:04X} not found", file_id),
            Self::SelectFailed { file_id, status }
                => write!(f, "SELECT of file {:04X} failed with status {}", file_id, status),
            Self::MetadataDecoding { file_id }
                => write!(f, "metadata decoding of file {:04X} failed", file_id),
            Self::OffsetTooLarge { offset }
                => write!(f, "offset {} cannot be encoded in READ BINARY", offset),
            Self::LengthTooLarge { length }
                => write!(f, "length {} cannot be requested in a single READ BINARY", length),
            Self::OutOfMemory { requested }
                => write!(f, "failed to allocate {} bytes for file contents", requested),
            Self::ReadCommunication(e)
                => write!(f, "READ BINARY communication failed: {}", e),
            Self::ReadFailed { status }
                => write!(f, "READ BINARY operation failed with status {}", status),
        }
    }
}
impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SelectCommunication(e) => Some(e),
            Self::FileNotFound { .. } => None,
            Self::SelectFailed { .. } => None,
            Self::MetadataDecoding { .. } => None,
            Self::OffsetTooLarge { .. } => None,
            Self::LengthTooLarge { .. } => None,
            Self::OutOfMemory { .. } => None,
            Self::ReadCommunication(e) => Some(e),
            Self::ReadFailed { .. } => None,
        }
    }
}


/// A file that has been selected on the card.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FileHandle {
    pub file_id: u16,
    pub metadata: Vec<MetadataEntry>,
}
impl FileHandle {
    /// The size of the file's contents as announced by the card, if any.
    pub fn size(&self) -> Option<usize> {
        self.metadata.iter()
            .filter_map(|me| match me {
                MetadataEntry::FileLengthWithoutStructural { length } => Some(*length),
                _ => None,
            })
            .nth(0)
    }

    /// Interprets the response to a SELECT command built by [`select_apdu`].
    pub fn from_select_response(file_id: u16, response: &Response) -> Result<Self, ReadError> {
        if response.trailer == StatusWord::FILE_NOT_FOUND {
            return Err(ReadError::FileNotFound { file_id });
        }
        // 62 83 is "selected file deactivated"; the file is still selected
        if !response.trailer.is_success() && response.trailer != StatusWord::SELECTED_FILE_DEACTIVATED {
            return Err(ReadError::SelectFailed { file_id, status: response.trailer });
        }
        let metadata = if response.data.is_empty() {
            Vec::new()
        } else {
            decode_metadata_entries(&response.data)
                .ok_or(ReadError::MetadataDecoding { file_id })?
        };
        Ok(Self {
            file_id,
            metadata,
        })
    }
}


fn length_from_bytes(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() || bytes.len() > std::mem::size_of::<usize>() {
        return None;
    }
    Some(bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b)))
}


pub fn decode_metadata_entries(buf: &[u8]) -> Option<Vec<MetadataEntry>> {
    // metadata has to start with 0x62 (FCP), 0x64 (FMD) or 0x6F (FCI)
    let (&template_tag, rest) = buf.split_first()?;
    if template_tag != 0x62 && template_tag != 0x64 && template_tag != 0x6F {
        return None;
    }

    let (&metadata_length, rest) = rest.split_first()?;
    let metadata_length = usize::from(metadata_length);
    if metadata_length > rest.len() {
        // not enough data
        return None;
    }
    let mut remaining_slice = &rest[..metadata_length];

    let mut entries = Vec::new();
    while remaining_slice.len() >= 2 {
        let tag = remaining_slice[0];
        let length = usize::from(remaining_slice[1]);
        remaining_slice = &remaining_slice[2..];
        if length > remaining_slice.len() {
            // not enough data
            return None;
        }
        let data_slice = &remaining_slice[..length];
        remaining_slice = &remaining_slice[length..];

        let entry = match tag {
            0x80 => MetadataEntry::FileLengthWithoutStructural { length: length_from_bytes(data_slice)? },
            0x81 => MetadataEntry::FileLengthWithStructural { length: length_from_bytes(data_slice)? },
            0x83 => {
                if data_slice.len() != 2 {
                    continue;
                }
                MetadataEntry::FileIdentifier {
                    identifier: u16::from_be_bytes([data_slice[0], data_slice[1]]),
                }
            },
            0x88 => {
                if data_slice.len() > 1 {
                    continue;
                }
                MetadataEntry::ShortEfIdentifier { identifier: data_slice.first().copied() }
            },
            other => MetadataEntry::Other { tag: other, data: data_slice.to_vec() },
        };
        entries.push(entry);
    }

    Some(entries)
}


/// SELECT of an elementary file by its path from the master file.
pub fn select_apdu(file_id: u16) -> Apdu {
    Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0xA4, // SELECT
            p1: 0b000_010_00, // select from MF
            p2: 0b0000_01_00, // return FCP template, return first or only occurrence
        },
        data: Data::BothDataShort {
            request_data: file_id.to_be_bytes().to_vec(),
            response_data_length: 0,
        },
    }
}


/// READ BINARY of `length` bytes starting at `offset` in the currently selected EF.
///
/// A `length` of 0 requests as many bytes as the card is willing to return.
pub fn read_binary_apdu(offset: usize, length: usize) -> Result<Apdu, ReadError> {
    // bit 8 of P1 switches to short EF identifier addressing
    if offset > 0x7FFF {
        return Err(ReadError::OffsetTooLarge { offset });
    }
    let response_data_length = if length == 0x1_0000 {
        0x0000
    } else {
        u16::try_from(length)
            .map_err(|_| ReadError::LengthTooLarge { length })?
    };
    let offset_bytes = (offset as u16).to_be_bytes();
    Ok(Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0xB0, // READ BINARY, offset or short EF identifier
            p1: offset_bytes[0],
            p2: offset_bytes[1],
        },
        data: Data::ResponseDataExtended {
            response_data_length,
        },
    })
}
