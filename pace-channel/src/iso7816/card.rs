use std::fmt;

#[cfg(feature = "pcsc")]
use tracing::trace;

use crate::iso7816::apdu;


/// A failure to exchange an APDU with the card, as opposed to the card answering with an error
/// status word.
#[derive(Debug)]
pub enum TransportError {
    Write(apdu::WriteError),
    #[cfg(feature = "pcsc")]
    Pcsc(pcsc::Error),
    ShortResponse,
    Other(Box<dyn std::error::Error + Send + Sync>),
}
impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(e) => write!(f, "APDU write error: {}", e),
            #[cfg(feature = "pcsc")]
            Self::Pcsc(e) => write!(f, "PCSC error: {}", e),
            Self::ShortResponse => write!(f, "response too short"),
            Self::Other(e) => write!(f, "transport error: {}", e),
        }
    }
}
impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Write(e) => Some(e),
            #[cfg(feature = "pcsc")]
            Self::Pcsc(e) => Some(e),
            Self::ShortResponse => None,
            Self::Other(e) => Some(e.as_ref()),
        }
    }
}
impl From<apdu::WriteError> for TransportError {
    fn from(value: apdu::WriteError) -> Self { Self::Write(value) }
}
#[cfg(feature = "pcsc")]
impl From<pcsc::Error> for TransportError {
    fn from(value: pcsc::Error) -> Self { Self::Pcsc(value) }
}


/// A smart card compatible with ISO/IEC 7816.
pub trait SmartCard {
    /// Send a request APDU to the smart card and receive a response APDU.
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, TransportError>;
}
impl<SC: SmartCard + ?Sized> SmartCard for Box<SC> {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, TransportError> {
        (**self).communicate(request)
    }
}
impl<SC: SmartCard + ?Sized> SmartCard for &mut SC {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, TransportError> {
        (**self).communicate(request)
    }
}

#[cfg(feature = "pcsc")]
impl SmartCard for pcsc::Card {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, TransportError> {
        let out_buf = request.to_bytes()?;
        trace!(header = ?request.header, "sending {} bytes to card", out_buf.len());
        let mut in_buf = vec![0u8; request.data.response_data_length().unwrap_or(0) + 2];
        let in_slice = self.transmit(&out_buf, &mut in_buf)?;
        trace!(response = %crate::Hex(in_slice), "received from card");
        apdu::Response::from_slice(in_slice)
            .ok_or(TransportError::ShortResponse)
    }
}
