//! The PACE handshake as a sequence of explicit steps.
//!
//! ```plain
//! Idle -> CardAccessLoaded -> SecretSelected -> NonceExchanged -> MapExchanged -> KeyAgreed
//!      -> TokenExchanged -> Established
//! ```
//!
//! Every step can also end in `Failed`, which (like `Established`) is terminal. The values a step
//! produces are owned by the state they lead to, so everything derived from the secret is dropped
//! (and wiped) as soon as the handshake fails or no longer needs it.


use subtle::ConstantTimeEq;
use tracing::{debug, instrument, trace};
use zeroize::{Zeroize, Zeroizing};

use crate::Hex;
use crate::iso7816::apdu::{Apdu, Response};
use crate::iso7816::card::SmartCard;
use crate::iso7816::file::FID_EF_CARD_ACCESS;
use crate::pace::{check_set_at_response, check_status, Error, ErrorKind, Operation};
use crate::pace::asn1::PaceInfo;
use crate::pace::card_access::{CardAccessParser, StaticDomainParameters};
use crate::pace::codec::{self, Round};
use crate::pace::crypto::{CryptoError, CryptoProvider, SessionKeys};
use crate::pace::secret::{PinId, SecretMaterial};
use crate::session::{CardSession, SendSequenceCounter};


/// The reference of the terminal's access rights sent in MSE:SET AT.
pub const ACCESS_RIGHT_REFERENCE: i64 = 1;


/// Where a handshake stands.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum HandshakeState {
    Idle,
    CardAccessLoaded,
    SecretSelected,
    NonceExchanged,
    MapExchanged,
    KeyAgreed,
    TokenExchanged,
    Established,
    Failed(ErrorKind),
}
impl HandshakeState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Established | Self::Failed(_))
    }
}


/// The state together with the values it owns.
enum Progress<C: CryptoProvider> {
    Idle,
    CardAccessLoaded {
        pace_info: PaceInfo,
        static_params: StaticDomainParameters,
    },
    SecretSelected {
        pace_info: PaceInfo,
        static_params: StaticDomainParameters,
        pin_id: PinId,
    },
    NonceExchanged {
        pace_info: PaceInfo,
        static_params: StaticDomainParameters,
        context: C::Context,
        nonce: Zeroizing<Vec<u8>>,
    },
    MapExchanged {
        pace_info: PaceInfo,
        context: C::Context,
        ephemeral_params: C::EphemeralParams,
    },
    KeyAgreed {
        pace_info: PaceInfo,
        context: C::Context,
        ephemeral_params: C::EphemeralParams,
        peer_public_key: Zeroizing<Vec<u8>>,
        session_keys: SessionKeys,
    },
    TokenExchanged {
        session_keys: SessionKeys,
    },
    Established,
    Failed(ErrorKind),
}
impl<C: CryptoProvider> Progress<C> {
    fn state(&self) -> HandshakeState {
        match self {
            Self::Idle => HandshakeState::Idle,
            Self::CardAccessLoaded { .. } => HandshakeState::CardAccessLoaded,
            Self::SecretSelected { .. } => HandshakeState::SecretSelected,
            Self::NonceExchanged { .. } => HandshakeState::NonceExchanged,
            Self::MapExchanged { .. } => HandshakeState::MapExchanged,
            Self::KeyAgreed { .. } => HandshakeState::KeyAgreed,
            Self::TokenExchanged { .. } => HandshakeState::TokenExchanged,
            Self::Established => HandshakeState::Established,
            Self::Failed(kind) => HandshakeState::Failed(*kind),
        }
    }

    fn pace_info(&self) -> Option<&PaceInfo> {
        match self {
            Self::CardAccessLoaded { pace_info, .. }
                | Self::SecretSelected { pace_info, .. }
                | Self::NonceExchanged { pace_info, .. }
                | Self::MapExchanged { pace_info, .. }
                | Self::KeyAgreed { pace_info, .. }
                => Some(pace_info),
            Self::Idle | Self::TokenExchanged { .. } | Self::Established | Self::Failed(_)
                => None,
        }
    }
}


/// One PACE run against one card.
///
/// The steps must be called in order; [`PaceHandshake::run`] does exactly that. A handshake that
/// failed cannot be resumed; start a new one (in a new session, since the send sequence counters
/// of terminal and card may have diverged).
pub struct PaceHandshake<'a, SC: SmartCard, P: CardAccessParser, C: CryptoProvider> {
    session: &'a mut CardSession<SC>,
    parser: &'a P,
    crypto: &'a C,
    progress: Progress<C>,
}
impl<'a, SC: SmartCard, P: CardAccessParser, C: CryptoProvider> PaceHandshake<'a, SC, P, C> {
    pub fn new(session: &'a mut CardSession<SC>, parser: &'a P, crypto: &'a C) -> Self {
        Self {
            session,
            parser,
            crypto,
            progress: Progress::Idle,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.progress.state()
    }

    /// The PACE protocol announced by the card, once `EF.CardAccess` has been loaded.
    pub fn pace_info(&self) -> Option<&PaceInfo> {
        self.progress.pace_info()
    }

    pub fn send_sequence_counter(&self) -> SendSequenceCounter {
        self.session.send_sequence_counter()
    }

    /// Runs all steps, returning the session keys of the established channel.
    #[instrument(skip(self, secret))]
    pub fn run(&mut self, pin_id: PinId, secret: &SecretMaterial) -> Result<SessionKeys, Error> {
        self.load_card_access()?;
        self.initialize_security(pin_id)?;
        self.exchange_nonce(secret)?;
        self.exchange_mapping()?;
        self.agree_keys()?;
        self.exchange_tokens()?;
        self.complete()
    }

    /// Reads and interprets `EF.CardAccess`.
    #[instrument(skip(self))]
    pub fn load_card_access(&mut self) -> Result<(), Error> {
        let result = match self.take() {
            Progress::Idle => self.read_card_access(),
            other => return Err(self.reject(other, HandshakeState::Idle)),
        };
        self.advance(result)
    }

    /// Selects the protocol and the secret with MSE:SET AT.
    #[instrument(skip(self))]
    pub fn initialize_security(&mut self, pin_id: PinId) -> Result<(), Error> {
        let result = match self.take() {
            Progress::CardAccessLoaded { pace_info, static_params }
                => self.set_authentication_template(pace_info, static_params, pin_id),
            other => return Err(self.reject(other, HandshakeState::CardAccessLoaded)),
        };
        self.advance(result)
    }

    /// Round 1: obtains the encrypted nonce and decrypts it with the secret.
    #[instrument(skip_all)]
    pub fn exchange_nonce(&mut self, secret: &SecretMaterial) -> Result<(), Error> {
        let result = match self.take() {
            Progress::SecretSelected { pace_info, static_params, pin_id }
                => self.obtain_nonce(pace_info, static_params, pin_id, secret),
            other => return Err(self.reject(other, HandshakeState::SecretSelected)),
        };
        self.advance(result)
    }

    /// Round 2: exchanges mapping data and derives the ephemeral domain parameters.
    #[instrument(skip(self))]
    pub fn exchange_mapping(&mut self) -> Result<(), Error> {
        let result = match self.take() {
            Progress::NonceExchanged { pace_info, static_params, context, nonce }
                => self.map_nonce(pace_info, static_params, context, nonce),
            other => return Err(self.reject(other, HandshakeState::NonceExchanged)),
        };
        self.advance(result)
    }

    /// Round 3: exchanges ephemeral public keys and derives the session keys.
    #[instrument(skip(self))]
    pub fn agree_keys(&mut self) -> Result<(), Error> {
        let result = match self.take() {
            Progress::MapExchanged { pace_info, context, ephemeral_params }
                => self.agree(pace_info, context, ephemeral_params),
            other => return Err(self.reject(other, HandshakeState::MapExchanged)),
        };
        self.advance(result)
    }

    /// Round 4: exchanges and verifies the authentication tokens.
    #[instrument(skip(self))]
    pub fn exchange_tokens(&mut self) -> Result<(), Error> {
        let result = match self.take() {
            Progress::KeyAgreed { pace_info, context, ephemeral_params, peer_public_key, session_keys }
                => self.authenticate(pace_info, context, ephemeral_params, peer_public_key, session_keys),
            other => return Err(self.reject(other, HandshakeState::KeyAgreed)),
        };
        self.advance(result)
    }

    /// Hands over the session keys of the established channel.
    pub fn complete(&mut self) -> Result<SessionKeys, Error> {
        match self.take() {
            Progress::TokenExchanged { session_keys } => {
                self.progress = Progress::Established;
                debug!(ssc = %self.session.send_sequence_counter(), "PACE channel established");
                Ok(session_keys)
            },
            other => Err(self.reject(other, HandshakeState::TokenExchanged)),
        }
    }

    fn read_card_access(&mut self) -> Result<Progress<C>, Error> {
        let file = self.session.select_file(FID_EF_CARD_ACCESS)?;
        let card_access = self.session.read_binary(0, file.size().unwrap_or(0))?;
        trace!(content = %Hex(&card_access), "read EF.CardAccess");

        let (pace_info, static_params) = self.parser.parse_card_access(&card_access)?;
        debug!(protocol = %pace_info.protocol, ?static_params, "card offers PACE");
        Ok(Progress::CardAccessLoaded { pace_info, static_params })
    }

    fn set_authentication_template(
        &mut self,
        pace_info: PaceInfo,
        static_params: StaticDomainParameters,
        pin_id: PinId,
    ) -> Result<Progress<C>, Error> {
        let request = codec::set_at_apdu(
            &pace_info.protocol,
            pin_id.reference().into(),
            ACCESS_RIGHT_REFERENCE,
        )?;
        let response = self.transmit(Operation::SetAuthenticationTemplate, &request)?;
        check_set_at_response(&response)?;
        Ok(Progress::SecretSelected { pace_info, static_params, pin_id })
    }

    fn obtain_nonce(
        &mut self,
        pace_info: PaceInfo,
        static_params: StaticDomainParameters,
        pin_id: PinId,
        secret: &SecretMaterial,
    ) -> Result<Progress<C>, Error> {
        if secret.pin_id() != pin_id {
            return Err(Error::InvalidArguments {
                reason: format!("{} was selected but a {} was supplied", pin_id, secret.pin_id()),
            });
        }

        let encrypted_nonce = self.general_authenticate(Round::Nonce, &[])?;
        let mut context = self.crypto.init_context(&pace_info)?;
        let nonce = self.crypto.decrypt_nonce(secret, &encrypted_nonce, &mut context)?;
        Ok(Progress::NonceExchanged { pace_info, static_params, context, nonce })
    }

    fn map_nonce(
        &mut self,
        pace_info: PaceInfo,
        static_params: StaticDomainParameters,
        mut context: C::Context,
        nonce: Zeroizing<Vec<u8>>,
    ) -> Result<Progress<C>, Error> {
        let mapping_data = self.crypto.generate_mapping_data(&static_params, &mut context)?;
        let peer_mapping_data = self.general_authenticate(Round::Mapping, &mapping_data)?;
        let ephemeral_params = self.crypto.compute_ephemeral_params(
            &static_params,
            &mut context,
            &nonce,
            &peer_mapping_data,
        )?;
        Ok(Progress::MapExchanged { pace_info, context, ephemeral_params })
    }

    fn agree(
        &mut self,
        pace_info: PaceInfo,
        mut context: C::Context,
        ephemeral_params: C::EphemeralParams,
    ) -> Result<Progress<C>, Error> {
        let public_key = Zeroizing::new(self.crypto.generate_key_pair(&ephemeral_params, &mut context)?);
        let peer_public_key = self.general_authenticate(Round::KeyAgreement, &public_key)?;
        if bool::from(peer_public_key.as_slice().ct_eq(public_key.as_slice())) {
            return Err(CryptoError::PeerKeyEqualsOwn.into());
        }

        let shared_secret = self.crypto.compute_shared_secret(&ephemeral_params, &mut context, &peer_public_key)?;
        let session_keys = self.crypto.derive_session_keys(&shared_secret, &mut context)?;
        Ok(Progress::KeyAgreed { pace_info, context, ephemeral_params, peer_public_key, session_keys })
    }

    fn authenticate(
        &mut self,
        pace_info: PaceInfo,
        mut context: C::Context,
        ephemeral_params: C::EphemeralParams,
        peer_public_key: Zeroizing<Vec<u8>>,
        session_keys: SessionKeys,
    ) -> Result<Progress<C>, Error> {
        // the card computes its token after receiving ours, i.e. with the counter one further
        let token = Zeroizing::new(self.crypto.compute_token(
            &mut context,
            &ephemeral_params,
            &pace_info,
            &peer_public_key,
            session_keys.mac_key(),
            self.session.send_sequence_counter(),
        )?);
        let peer_token = self.general_authenticate(Round::MutualAuthentication, &token)?;
        let verified = self.crypto.verify_token(
            &mut context,
            &ephemeral_params,
            &pace_info,
            &peer_public_key,
            session_keys.mac_key(),
            &peer_token,
            self.session.send_sequence_counter(),
        )?;
        if !verified {
            return Err(Error::TokenMismatch);
        }
        Ok(Progress::TokenExchanged { session_keys })
    }

    fn transmit(&mut self, operation: Operation, request: &Apdu) -> Result<Response, Error> {
        self.session.transmit(request)
            .map_err(|error| Error::Transport { operation, error })
    }

    fn general_authenticate(&mut self, round: Round, payload: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let request = codec::general_authenticate_apdu(round, payload)?;
        let mut response = self.transmit(round.operation(), &request)?;
        let result = check_status(round.operation(), response.trailer)
            .and_then(|()| codec::decode_general_authenticate_response(round, &response.data));
        response.data.zeroize();
        trace!(
            round = round.number(),
            status = %response.trailer,
            ssc = %self.session.send_sequence_counter(),
            "General Authenticate round completed"
        );
        Ok(result?.into_value())
    }

    /// Moves the current state out; the placeholder is what remains if the step fails unexpectedly.
    fn take(&mut self) -> Progress<C> {
        std::mem::replace(&mut self.progress, Progress::Failed(ErrorKind::InvalidState))
    }

    fn advance(&mut self, result: Result<Progress<C>, Error>) -> Result<(), Error> {
        match result {
            Ok(next) => {
                debug!(state = ?next.state(), "handshake advanced");
                self.progress = next;
                Ok(())
            },
            Err(error) => {
                debug!(%error, "handshake failed");
                self.progress = Progress::Failed(error.kind());
                Err(error)
            },
        }
    }

    /// Handles a step invoked in the wrong state.
    ///
    /// A terminal state is kept as it is; any other state fails the handshake.
    fn reject(&mut self, progress: Progress<C>, expected: HandshakeState) -> Error {
        let state = progress.state();
        if state.is_terminal() {
            self.progress = progress;
        } else {
            self.progress = Progress::Failed(ErrorKind::InvalidState);
        }
        debug!(?state, ?expected, "handshake step invoked out of order");
        Error::InvalidState { state, expected }
    }
}
