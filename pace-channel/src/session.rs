//! A card session: the transport to one card together with its send sequence counter.


use std::fmt;

use tracing::{instrument, trace};

use crate::iso7816::apdu::{Apdu, Response};
use crate::iso7816::card::{SmartCard, TransportError};
use crate::iso7816::file::{self, FileHandle, ReadError};


/// The send sequence counter (SSC) shared between terminal and card.
///
/// It is incremented once per command sent to the card. Both sides count independently, and the
/// PACE authentication tokens (and later Secure Messaging cryptograms) depend on the value, so a
/// skipped or duplicated increment makes the channel unusable.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SendSequenceCounter(u16);
impl SendSequenceCounter {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Advances the counter by one command, wrapping around after 0xFFFF.
    fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}
impl fmt::Debug for SendSequenceCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SendSequenceCounter(0x{:04X})", self.0)
    }
}
impl fmt::Display for SendSequenceCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


/// A session with one card.
///
/// Every command goes through [`CardSession::transmit`], which is the only place the send sequence
/// counter is advanced. Independent cards get independent sessions; nothing is shared.
pub struct CardSession<SC: SmartCard> {
    card: SC,
    send_sequence_counter: SendSequenceCounter,
}
impl<SC: SmartCard> CardSession<SC> {
    /// Opens a session whose counter starts at zero.
    pub fn new(card: SC) -> Self {
        Self::with_send_sequence_counter(card, SendSequenceCounter::default())
    }

    /// Opens a session continuing from a known counter value.
    pub fn with_send_sequence_counter(card: SC, send_sequence_counter: SendSequenceCounter) -> Self {
        Self {
            card,
            send_sequence_counter,
        }
    }

    pub fn send_sequence_counter(&self) -> SendSequenceCounter {
        self.send_sequence_counter
    }

    pub fn card(&self) -> &SC {
        &self.card
    }

    pub fn card_mut(&mut self) -> &mut SC {
        &mut self.card
    }

    pub fn into_card(self) -> SC {
        self.card
    }

    /// Sends one command to the card.
    ///
    /// A command that cannot be serialized is rejected before it is handed to the transport and
    /// does not advance the counter. Otherwise, the counter is advanced even if the exchange fails,
    /// since the command may have reached the card.
    pub fn transmit(&mut self, request: &Apdu) -> Result<Response, TransportError> {
        request.check_encodable()?;
        let result = self.card.communicate(request);
        self.send_sequence_counter.increment();
        trace!(
            header = ?request.header,
            ssc = self.send_sequence_counter.value(),
            status = ?result.as_ref().map(|r| r.trailer),
            "command transmitted"
        );
        result
    }

    /// Selects an elementary file below the master file.
    #[instrument(skip(self))]
    pub fn select_file(&mut self, file_id: u16) -> Result<FileHandle, ReadError> {
        let response = self.transmit(&file::select_apdu(file_id))
            .map_err(ReadError::SelectCommunication)?;
        FileHandle::from_select_response(file_id, &response)
    }

    /// Reads up to `length` bytes from the currently selected file, starting at `offset`.
    ///
    /// A `length` of 0 reads as much as the card returns.
    #[instrument(skip(self))]
    pub fn read_binary(&mut self, offset: usize, length: usize) -> Result<Vec<u8>, ReadError> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(length)
            .map_err(|_| ReadError::OutOfMemory { requested: length })?;

        let request = file::read_binary_apdu(offset, length)?;
        let response = self.transmit(&request)
            .map_err(ReadError::ReadCommunication)?;
        if !response.trailer.is_success() {
            return Err(ReadError::ReadFailed { status: response.trailer });
        }
        buffer.extend_from_slice(&response.data);
        Ok(buffer)
    }
}
