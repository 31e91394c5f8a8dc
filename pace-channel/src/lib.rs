//! Password Authenticated Connection Establishment (PACE) for ISO/IEC 7816 smart cards.
//!
//! The handshake lives in [`pace`]; [`session::CardSession`] carries the transport to the card
//! together with the send sequence counter the handshake feeds into its authentication tokens.


pub mod der_util;
pub mod iso7816;
pub mod pace;
pub mod session;


use std::fmt;


/// Formats a byte slice as space-separated uppercase hex pairs, for log output.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Hex<'a>(pub &'a [u8]);
impl<'a> fmt::Display for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for b in self.0 {
            if first {
                first = false;
            } else {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}
impl<'a> fmt::Debug for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hex({})", self)
    }
}
