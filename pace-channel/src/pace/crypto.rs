//! The cryptographic operations PACE consumes.
//!
//! The handshake engine does not implement the PACE mathematics itself (nonce decryption, generator
//! mapping, ephemeral key agreement, key derivation and token calculation are specified in ICAO Doc
//! 9303 Part 11 and BSI TR-03110 Part 2). It drives an implementation of [`CryptoProvider`]
//! instead, handing it the values exchanged with the card in protocol order.


use std::fmt;

use subtle::{Choice, ConstantTimeEq};
use zeroize::{Zeroizing, ZeroizeOnDrop};
use zeroize_derive::ZeroizeOnDrop;

use crate::pace::asn1::PaceInfo;
use crate::pace::card_access::StaticDomainParameters;
use crate::pace::secret::SecretMaterial;
use crate::session::SendSequenceCounter;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CryptoOperation {
    InitContext,
    DecryptNonce,
    GenerateMappingData,
    ComputeEphemeralParams,
    GenerateKeyPair,
    ComputeSharedSecret,
    DeriveSessionKeys,
    ComputeToken,
    VerifyToken,
}


#[derive(Debug)]
pub enum CryptoError {
    /// The provider failed internally.
    Failed {
        operation: CryptoOperation,
        reason: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The provider does not support the negotiated protocol or domain parameters.
    Unsupported { operation: CryptoOperation },

    /// The card sent a value that is not acceptable as input (e.g. a point not on the curve).
    InvalidPeerValue { operation: CryptoOperation },

    /// The card's ephemeral public key equals the terminal's.
    PeerKeyEqualsOwn,
}
impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { operation, reason: Some(reason) }
                => write!(f, "cryptographic operation {:?} failed: {}", operation, reason),
            Self::Failed { operation, reason: None }
                => write!(f, "cryptographic operation {:?} failed", operation),
            Self::Unsupported { operation }
                => write!(f, "cryptographic operation {:?} does not support the negotiated parameters", operation),
            Self::InvalidPeerValue { operation }
                => write!(f, "cryptographic operation {:?} received an invalid value from the card", operation),
            Self::PeerKeyEqualsOwn
                => write!(f, "terminal and chip ephemeral public keys are equal"),
        }
    }
}
impl std::error::Error for CryptoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed { reason: Some(reason), .. } => Some(reason.as_ref()),
            Self::Failed { reason: None, .. } => None,
            Self::Unsupported { .. } => None,
            Self::InvalidPeerValue { .. } => None,
            Self::PeerKeyEqualsOwn => None,
        }
    }
}


/// The keys protecting the established channel.
///
/// Both are wiped when the value is dropped; comparison runs in constant time.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKeys {
    mac_key: Zeroizing<Vec<u8>>,
    enc_key: Zeroizing<Vec<u8>>,
}
impl SessionKeys {
    pub fn new(mac_key: Zeroizing<Vec<u8>>, enc_key: Zeroizing<Vec<u8>>) -> Self {
        Self {
            mac_key,
            enc_key,
        }
    }

    /// `K_MAC`, the key for message authentication.
    pub fn mac_key(&self) -> &[u8] {
        &self.mac_key
    }

    /// `K_Enc`, the key for encryption.
    pub fn enc_key(&self) -> &[u8] {
        &self.enc_key
    }
}
impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("mac_key", &format_args!("<{} bytes>", self.mac_key.len()))
            .field("enc_key", &format_args!("<{} bytes>", self.enc_key.len()))
            .finish()
    }
}
impl ConstantTimeEq for SessionKeys {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.mac_key.as_slice().ct_eq(other.mac_key.as_slice())
            & self.enc_key.as_slice().ct_eq(other.enc_key.as_slice())
    }
}
impl PartialEq for SessionKeys {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}
impl Eq for SessionKeys {}


/// The PACE step operations.
///
/// Every operation receives the per-run context created by [`CryptoProvider::init_context`]; the
/// provider keeps its private keys there. Contexts and ephemeral domain parameters must wipe any
/// secret-derived material when dropped, which the engine does at the end of every run.
pub trait CryptoProvider {
    /// The per-run state, e.g. the cipher suite and the ephemeral private keys.
    type Context: ZeroizeOnDrop;

    /// Domain parameters derived by the mapping step.
    type EphemeralParams: ZeroizeOnDrop;

    /// Prepares a context for the protocol announced in `EF.CardAccess`.
    fn init_context(&self, protocol_info: &PaceInfo) -> Result<Self::Context, CryptoError>;

    /// Decrypts the nonce `s` sent by the chip using the key derived from the secret.
    fn decrypt_nonce(
        &self,
        secret: &SecretMaterial,
        encrypted_nonce: &[u8],
        ctx: &mut Self::Context,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Generates the terminal's mapping data (e.g. the generic mapping public key).
    fn generate_mapping_data(
        &self,
        static_params: &StaticDomainParameters,
        ctx: &mut Self::Context,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Maps the static domain parameters to the ephemeral ones using the nonce and the chip's
    /// mapping data.
    fn compute_ephemeral_params(
        &self,
        static_params: &StaticDomainParameters,
        ctx: &mut Self::Context,
        nonce: &[u8],
        peer_mapping_data: &[u8],
    ) -> Result<Self::EphemeralParams, CryptoError>;

    /// Generates the terminal's ephemeral key pair, keeping the private key in the context and
    /// returning the encoded public key.
    fn generate_key_pair(
        &self,
        ephemeral_params: &Self::EphemeralParams,
        ctx: &mut Self::Context,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Performs the key agreement with the chip's ephemeral public key.
    fn compute_shared_secret(
        &self,
        ephemeral_params: &Self::EphemeralParams,
        ctx: &mut Self::Context,
        peer_public_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Derives `K_MAC` and `K_Enc` from the shared secret.
    fn derive_session_keys(
        &self,
        shared_secret: &[u8],
        ctx: &mut Self::Context,
    ) -> Result<SessionKeys, CryptoError>;

    /// Calculates the terminal's authentication token over the chip's ephemeral public key.
    fn compute_token(
        &self,
        ctx: &mut Self::Context,
        ephemeral_params: &Self::EphemeralParams,
        protocol_info: &PaceInfo,
        peer_public_key: &[u8],
        mac_key: &[u8],
        send_sequence_counter: SendSequenceCounter,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Checks the chip's authentication token, which covers the terminal's own ephemeral public
    /// key; the provider knows that key from its context.
    fn verify_token(
        &self,
        ctx: &mut Self::Context,
        ephemeral_params: &Self::EphemeralParams,
        protocol_info: &PaceInfo,
        peer_public_key: &[u8],
        mac_key: &[u8],
        peer_token: &[u8],
        send_sequence_counter: SendSequenceCounter,
    ) -> Result<bool, CryptoError>;
}
