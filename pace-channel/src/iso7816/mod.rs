//! The parts of ISO/IEC 7816-4 needed to talk to a card: APDUs, status words and files.


pub mod apdu;
pub mod card;
pub mod file;
pub mod status;
