//! Implementation of Password Authenticated Connection Establishment.
//!
//! [`handshake::PaceHandshake`] runs the protocol step by step against a [`CardSession`];
//! [`establish_channel`] is the entry point for a reader driver that receives an
//! `EstablishPACEChannel` request.


pub mod asn1;
pub mod card_access;
pub mod codec;
pub mod crypto;
pub mod handshake;
pub mod input;
pub mod oids;
pub mod secret;


use std::fmt;

use tracing::{debug, instrument, warn};

use crate::iso7816::apdu::Response;
use crate::iso7816::card::{SmartCard, TransportError};
use crate::iso7816::file::ReadError;
use crate::iso7816::status::{StatusClass, StatusWord};
use crate::pace::card_access::{CardAccessError, CardAccessParser};
use crate::pace::crypto::{CryptoError, CryptoProvider, SessionKeys};
use crate::pace::handshake::{HandshakeState, PaceHandshake};
use crate::pace::input::{ChannelRequest, Chat};
use crate::pace::secret::SecretResolver;
use crate::session::CardSession;


/// `GetReadersPACECapabilities` bit: the reader supports PACE.
pub const CAPABILITY_PACE: u8 = 0x40;

/// `GetReadersPACECapabilities` bit: the reader supports the German eID application.
pub const CAPABILITY_EID: u8 = 0x20;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    SetAuthenticationTemplate,
    GeneralAuthenticate,
    ObtainNonce,
    ExchangeMappingData,
    ExchangeEphemeralPublicKeys,
    MutualAuthentication,
}


#[derive(Debug)]
pub enum Error {
    /// The request was malformed or is missing something.
    InvalidArguments { reason: String },

    /// A handshake step was invoked out of order.
    InvalidState { state: HandshakeState, expected: HandshakeState },

    /// `EF.CardAccess` could not be selected or read.
    CardAccessUnavailable(ReadError),

    /// `EF.CardAccess` does not describe a usable PACE configuration.
    InfoParseError(CardAccessError),

    EncodingError { operation: Operation, reason: &'static str },
    MalformedResponse { operation: Operation, reason: &'static str },

    /// The card answered with data where none was expected.
    UnexpectedData { operation: Operation, length: usize },

    /// The card rejected the secret; it may be tried again this many times.
    AuthAttemptFailed { tries_remaining: u8 },

    /// The card rejected the secret and allows no further attempts.
    AuthRetryExhausted,

    /// The secret is blocked or deactivated on the card.
    SecretBlocked,

    CardCommandFailed { operation: Operation, sw1: u8, sw2: u8 },
    Crypto(CryptoError),

    /// The card's authentication token did not verify.
    TokenMismatch,

    OutOfMemory { requested: usize },
    Transport { operation: Operation, error: TransportError },
}
impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::CardAccessUnavailable(_) => ErrorKind::CardAccessUnavailable,
            Self::InfoParseError(_) => ErrorKind::InfoParseError,
            Self::EncodingError { .. } => ErrorKind::EncodingError,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::UnexpectedData { .. } => ErrorKind::UnexpectedData,
            Self::AuthAttemptFailed { .. } => ErrorKind::AuthAttemptFailed,
            Self::AuthRetryExhausted => ErrorKind::AuthRetryExhausted,
            Self::SecretBlocked => ErrorKind::SecretBlocked,
            Self::CardCommandFailed { .. } => ErrorKind::CardCommandFailed,
            Self::Crypto(_) => ErrorKind::Crypto,
            Self::TokenMismatch => ErrorKind::TokenMismatch,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::Transport { .. } => ErrorKind::Transport,
        }
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::InvalidArguments { reason }
                => write!(f, "invalid arguments: {}", reason),
            Self::InvalidState { state, expected }
                => write!(f, "handshake is in state {:?}, expected {:?}", state, expected),
            Self::CardAccessUnavailable(e)
                => write!(f, "EF.CardAccess is unavailable: {}", e),
            Self::InfoParseError(e)
                => write!(f, "{}", e),
            Self::EncodingError { operation, reason }
                => write!(f, "failed to encode command for operation {:?}: {}", operation, reason),
            Self::MalformedResponse { operation, reason }
                => write!(f, "operation {:?} received a malformed response: {}", operation, reason),
            Self::UnexpectedData { operation, length }
                => write!(f, "operation {:?} received {} bytes of unexpected response data", operation, length),
            Self::AuthAttemptFailed { tries_remaining }
                => write!(f, "authentication failed, {} tries remaining", tries_remaining),
            Self::AuthRetryExhausted
                => write!(f, "authentication failed, no tries remaining"),
            Self::SecretBlocked
                => write!(f, "secret is blocked"),
            Self::CardCommandFailed { operation, sw1, sw2 }
                => write!(f, "operation {:?} failed with status {}", operation, StatusWord::new(*sw1, *sw2)),
            Self::Crypto(e)
                => write!(f, "{}", e),
            Self::TokenMismatch
                => write!(f, "mutual authentication failed"),
            Self::OutOfMemory { requested }
                => write!(f, "failed to allocate {} bytes", requested),
            Self::Transport { operation, error }
                => write!(f, "operation {:?} failed to communicate with the card: {}", operation, error),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidArguments { .. } => None,
            Self::InvalidState { .. } => None,
            Self::CardAccessUnavailable(e) => Some(e),
            Self::InfoParseError(e) => Some(e),
            Self::EncodingError { .. } => None,
            Self::MalformedResponse { .. } => None,
            Self::UnexpectedData { .. } => None,
            Self::AuthAttemptFailed { .. } => None,
            Self::AuthRetryExhausted => None,
            Self::SecretBlocked => None,
            Self::CardCommandFailed { .. } => None,
            Self::Crypto(e) => Some(e),
            Self::TokenMismatch => None,
            Self::OutOfMemory { .. } => None,
            Self::Transport { error, .. } => Some(error),
        }
    }
}
impl From<ReadError> for Error {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::OutOfMemory { requested } => Self::OutOfMemory { requested },
            other => Self::CardAccessUnavailable(other),
        }
    }
}
impl From<CardAccessError> for Error {
    fn from(value: CardAccessError) -> Self { Self::InfoParseError(value) }
}
impl From<CryptoError> for Error {
    fn from(value: CryptoError) -> Self { Self::Crypto(value) }
}


/// The kind of an [`Error`], without its payload.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    InvalidArguments,
    InvalidState,
    CardAccessUnavailable,
    InfoParseError,
    EncodingError,
    MalformedResponse,
    UnexpectedData,
    AuthAttemptFailed,
    AuthRetryExhausted,
    SecretBlocked,
    CardCommandFailed,
    Crypto,
    TokenMismatch,
    OutOfMemory,
    Transport,
}
impl ErrorKind {
    /// Whether a new handshake with the same secret has a chance of succeeding.
    ///
    /// The card has rejected (or blocked) the secret in the other cases; retrying would only burn
    /// through the remaining attempts.
    pub const fn is_retryable_with_same_secret(&self) -> bool {
        !matches!(self, Self::SecretBlocked | Self::AuthRetryExhausted | Self::AuthAttemptFailed)
    }
}


/// Maps the status word of a command without command-specific status handling.
pub fn check_status(operation: Operation, status: StatusWord) -> Result<(), Error> {
    match status.classify() {
        StatusClass::Success => Ok(()),
        StatusClass::VerificationFailed { tries_remaining } => Err(retry_counter_error(tries_remaining)),
        StatusClass::AuthenticationMethodBlocked => Err(Error::SecretBlocked),
        StatusClass::Failed => Err(Error::CardCommandFailed { operation, sw1: status.sw1, sw2: status.sw2 }),
    }
}


fn retry_counter_error(tries_remaining: u8) -> Error {
    match tries_remaining {
        0 => {
            warn!("secret rejected, no tries remaining; it must be unblocked");
            Error::AuthRetryExhausted
        },
        1 => {
            warn!("secret rejected, 1 try remaining; it must be resumed");
            Error::AuthAttemptFailed { tries_remaining }
        },
        n => {
            warn!("secret rejected, {} tries remaining", n);
            Error::AuthAttemptFailed { tries_remaining }
        },
    }
}


/// Interprets the card's answer to MSE:SET AT.
///
/// Besides the generic mapping, `62 83` means the selected secret is deactivated. The command must
/// not return data.
pub fn check_set_at_response(response: &Response) -> Result<(), Error> {
    let operation = Operation::SetAuthenticationTemplate;
    if !response.data.is_empty() {
        return Err(Error::UnexpectedData { operation, length: response.data.len() });
    }
    if response.trailer == StatusWord::SELECTED_FILE_DEACTIVATED {
        warn!("secret is deactivated");
        return Err(Error::SecretBlocked);
    }
    check_status(operation, response.trailer)
}


/// The answer to the PC/SC `GetReadersPACECapabilities` request: the length of the capability
/// bitmap, then the bitmap.
pub const fn reader_capabilities() -> [u8; 2] {
    [1, CAPABILITY_PACE | CAPABILITY_EID]
}


/// Establishes a PACE channel as requested by an `EstablishPACEChannel` input buffer.
///
/// The secret is resolved before the card is contacted. On success, the session keys are returned
/// and `session` holds the send sequence counter for the secure messaging that follows.
#[instrument(skip_all)]
pub fn establish_channel<SC, P, C, R>(
    session: &mut CardSession<SC>,
    parser: &P,
    crypto: &C,
    resolver: &R,
    input: &[u8],
) -> Result<SessionKeys, Error>
    where
        SC: SmartCard,
        P: CardAccessParser,
        C: CryptoProvider,
        R: SecretResolver {
    let request = ChannelRequest::parse(input)?;
    if let Some(chat) = Chat::parse(request.chat)? {
        // the card receives the CHAT with Terminal Authentication, which is not part of PACE
        debug!(role = %chat.role, "terminal presented a CHAT");
    }
    let secret = resolver.resolve_secret(request.pin_id, request.secret)?;

    let mut handshake = PaceHandshake::new(session, parser, crypto);
    handshake.run(request.pin_id, &secret)
}
