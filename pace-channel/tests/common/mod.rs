//! Shared fixtures: a deterministic stand-in for the PACE cryptography and a simulated card that
//! runs the card's side of the protocol with it.
#![allow(dead_code)]


use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::cipher::generic_array::GenericArray;
use cmac::{Cmac, Mac};
use hex_literal::hex;
use pace_channel::der_util::{encode_primitive_length, encode_tlv, oid_to_der_bytes, try_split_tlv};
use pace_channel::iso7816::apdu::{Apdu, Response};
use pace_channel::iso7816::card::{SmartCard, TransportError};
use pace_channel::pace::asn1::PaceInfo;
use pace_channel::pace::card_access::StaticDomainParameters;
use pace_channel::pace::crypto::{CryptoError, CryptoOperation, CryptoProvider, SessionKeys};
use pace_channel::pace::oids::classify_protocol;
use pace_channel::pace::secret::SecretMaterial;
use pace_channel::session::SendSequenceCounter;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;


/// SET { SEQUENCE { id-PACE-ECDH-GM-AES-CBC-CMAC-128, 2, 13 } }
pub const CARD_ACCESS: [u8; 22] = hex!("
    31 14
        30 12
            06 0A 04 00 7F 00 07 02 02 04 02 02
            02 01 02
            02 01 0D
");

/// The DER contents of id-PACE-ECDH-GM-AES-CBC-CMAC-128.
pub const PROTOCOL: [u8; 10] = hex!("04 00 7F 00 07 02 02 04 02 02");

/// SET { SEQUENCE { id-PACE-DH-GM-AES-CBC-CMAC-128, 2, 2 } }: 2048-bit MODP group
pub const CARD_ACCESS_DH_2048: [u8; 22] = hex!("
    31 14
        30 12
            06 0A 04 00 7F 00 07 02 02 04 01 02
            02 01 02
            02 01 02
");

/// The DER contents of id-PACE-DH-GM-AES-CBC-CMAC-128.
pub const PROTOCOL_DH_2048: [u8; 10] = hex!("04 00 7F 00 07 02 02 04 01 02");

pub const TERMINAL_SEED: [u8; 16] = [0x7E; 16];
pub const CARD_SEED: [u8; 16] = [0xCA; 16];
pub const CARD_NONCE: [u8; 16] = hex!("3F00C4D3 9D153F2B 2A214A07 8D899B22");


pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}


/// The stand-in mathematics, shared by [`ToyCrypto`] and [`SimulatedCard`].
///
/// Nonce encryption uses AES-128 and tokens use AES-CMAC as with the real AES cipher suites; the
/// "key agreement" merely hashes both public values, which is symmetric but not secure.
pub mod toy {
    use super::*;

    fn sha1(parts: &[&[u8]]) -> Vec<u8> {
        let mut hasher = Sha1::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().to_vec()
    }

    /// Stretches a hash to `length` bytes.
    fn expand(parts: &[&[u8]], length: usize) -> Vec<u8> {
        let mut output = Vec::with_capacity(length + 20);
        let mut counter: u32 = 0;
        while output.len() < length {
            let counter_bytes = counter.to_be_bytes();
            let mut all_parts = parts.to_vec();
            all_parts.push(&counter_bytes);
            output.extend(sha1(&all_parts));
            counter += 1;
        }
        output.truncate(length);
        output
    }

    /// The length of mapping data and public keys: an uncompressed point on a 256-bit curve, or a
    /// 2048-bit group element.
    pub fn key_length(parameter_id: u32) -> Option<usize> {
        match parameter_id {
            13 => Some(65),
            2 => Some(256),
            _ => None,
        }
    }

    fn ordered<'a>(a: &'a [u8], b: &'a [u8]) -> (&'a [u8], &'a [u8]) {
        if a <= b { (a, b) } else { (b, a) }
    }

    /// `K_π`, as the ICAO key derivation function with counter 3 would compute it.
    pub fn nonce_key(secret: &[u8]) -> Vec<u8> {
        sha1(&[secret, &[0, 0, 0, 3]])[..16].to_vec()
    }

    pub fn encrypt_nonce(secret: &[u8], nonce: &[u8; 16]) -> Vec<u8> {
        let cipher = <Aes128 as KeyInit>::new_from_slice(&nonce_key(secret))
            .expect("key length");
        let mut block = GenericArray::clone_from_slice(nonce);
        cipher.encrypt_block(&mut block);
        block.to_vec()
    }

    pub fn decrypt_nonce(secret: &[u8], encrypted_nonce: &[u8]) -> Option<Vec<u8>> {
        if encrypted_nonce.len() != 16 {
            return None;
        }
        let cipher = <Aes128 as KeyInit>::new_from_slice(&nonce_key(secret))
            .expect("key length");
        let mut block = GenericArray::clone_from_slice(encrypted_nonce);
        cipher.decrypt_block(&mut block);
        Some(block.to_vec())
    }

    pub fn mapping_data(seed: &[u8], key_length: usize) -> Vec<u8> {
        expand(&[b"mapping", seed], key_length)
    }

    pub fn generator(nonce: &[u8], mapping_a: &[u8], mapping_b: &[u8]) -> Vec<u8> {
        let (first, second) = ordered(mapping_a, mapping_b);
        sha1(&[b"generator", nonce, first, second])
    }

    pub fn public_key(generator: &[u8], seed: &[u8], key_length: usize) -> Vec<u8> {
        expand(&[b"public", generator, seed], key_length)
    }

    pub fn shared_secret(generator: &[u8], public_a: &[u8], public_b: &[u8]) -> Vec<u8> {
        let (first, second) = ordered(public_a, public_b);
        sha1(&[b"shared", generator, first, second])
    }

    /// `(K_MAC, K_Enc)`
    pub fn session_keys(shared_secret: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mac = sha1(&[shared_secret, &[0, 0, 0, 2]])[..16].to_vec();
        let enc = sha1(&[shared_secret, &[0, 0, 0, 1]])[..16].to_vec();
        (mac, enc)
    }

    pub fn token(mac_key: &[u8], protocol: &[u8], public_key: &[u8], ssc: u16) -> Vec<u8> {
        let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(mac_key)
            .expect("key length");
        mac.update(protocol);
        mac.update(public_key);
        mac.update(&ssc.to_be_bytes());
        mac.finalize().into_bytes()[..8].to_vec()
    }
}


/// A deterministic [`CryptoProvider`]: the same seed always produces the same keys.
#[derive(Clone, Copy, Debug)]
pub struct ToyCrypto {
    pub seed: [u8; 16],
}
impl Default for ToyCrypto {
    fn default() -> Self {
        Self { seed: TERMINAL_SEED }
    }
}

#[derive(ZeroizeOnDrop)]
pub struct ToyContext {
    protocol: Vec<u8>,
    seed: Vec<u8>,
    key_length: usize,
    mapping_data: Vec<u8>,
    public_key: Vec<u8>,
}

#[derive(ZeroizeOnDrop)]
pub struct ToyEphemeralParams {
    generator: Vec<u8>,
}

impl CryptoProvider for ToyCrypto {
    type Context = ToyContext;
    type EphemeralParams = ToyEphemeralParams;

    fn init_context(&self, protocol_info: &PaceInfo) -> Result<Self::Context, CryptoError> {
        if classify_protocol(&protocol_info.protocol).is_none() {
            return Err(CryptoError::Unsupported { operation: CryptoOperation::InitContext });
        }
        let protocol = oid_to_der_bytes(&protocol_info.protocol)
            .ok_or(CryptoError::Unsupported { operation: CryptoOperation::InitContext })?;
        Ok(ToyContext {
            protocol,
            seed: self.seed.to_vec(),
            key_length: 0,
            mapping_data: Vec::new(),
            public_key: Vec::new(),
        })
    }

    fn decrypt_nonce(
        &self,
        secret: &SecretMaterial,
        encrypted_nonce: &[u8],
        _ctx: &mut Self::Context,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        toy::decrypt_nonce(secret.as_bytes(), encrypted_nonce)
            .map(Zeroizing::new)
            .ok_or(CryptoError::InvalidPeerValue { operation: CryptoOperation::DecryptNonce })
    }

    fn generate_mapping_data(
        &self,
        static_params: &StaticDomainParameters,
        ctx: &mut Self::Context,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let key_length = match static_params {
            StaticDomainParameters::Standardized(parameter_id) => toy::key_length(*parameter_id),
            StaticDomainParameters::Explicit { .. } => None,
        };
        ctx.key_length = key_length
            .ok_or(CryptoError::Unsupported { operation: CryptoOperation::GenerateMappingData })?;
        ctx.mapping_data = toy::mapping_data(&ctx.seed, ctx.key_length);
        Ok(Zeroizing::new(ctx.mapping_data.clone()))
    }

    fn compute_ephemeral_params(
        &self,
        _static_params: &StaticDomainParameters,
        ctx: &mut Self::Context,
        nonce: &[u8],
        peer_mapping_data: &[u8],
    ) -> Result<Self::EphemeralParams, CryptoError> {
        if peer_mapping_data.is_empty() {
            return Err(CryptoError::InvalidPeerValue { operation: CryptoOperation::ComputeEphemeralParams });
        }
        Ok(ToyEphemeralParams {
            generator: toy::generator(nonce, &ctx.mapping_data, peer_mapping_data),
        })
    }

    fn generate_key_pair(
        &self,
        ephemeral_params: &Self::EphemeralParams,
        ctx: &mut Self::Context,
    ) -> Result<Vec<u8>, CryptoError> {
        ctx.public_key = toy::public_key(&ephemeral_params.generator, &ctx.seed, ctx.key_length);
        Ok(ctx.public_key.clone())
    }

    fn compute_shared_secret(
        &self,
        ephemeral_params: &Self::EphemeralParams,
        ctx: &mut Self::Context,
        peer_public_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        Ok(Zeroizing::new(toy::shared_secret(&ephemeral_params.generator, &ctx.public_key, peer_public_key)))
    }

    fn derive_session_keys(
        &self,
        shared_secret: &[u8],
        _ctx: &mut Self::Context,
    ) -> Result<SessionKeys, CryptoError> {
        let (mac, enc) = toy::session_keys(shared_secret);
        Ok(SessionKeys::new(Zeroizing::new(mac), Zeroizing::new(enc)))
    }

    fn compute_token(
        &self,
        ctx: &mut Self::Context,
        _ephemeral_params: &Self::EphemeralParams,
        _protocol_info: &PaceInfo,
        peer_public_key: &[u8],
        mac_key: &[u8],
        send_sequence_counter: SendSequenceCounter,
    ) -> Result<Vec<u8>, CryptoError> {
        Ok(toy::token(mac_key, &ctx.protocol, peer_public_key, send_sequence_counter.value()))
    }

    fn verify_token(
        &self,
        ctx: &mut Self::Context,
        _ephemeral_params: &Self::EphemeralParams,
        _protocol_info: &PaceInfo,
        _peer_public_key: &[u8],
        mac_key: &[u8],
        peer_token: &[u8],
        send_sequence_counter: SendSequenceCounter,
    ) -> Result<bool, CryptoError> {
        let expected = toy::token(mac_key, &ctx.protocol, &ctx.public_key, send_sequence_counter.value());
        Ok(expected.as_slice().ct_eq(peer_token).into())
    }
}


/// What the simulated card should do differently from a well-behaved card.
#[derive(Clone, Debug, Default)]
pub struct Misbehavior {
    /// Status word answering SELECT of EF.CardAccess.
    pub select_status: Option<(u8, u8)>,

    /// Replaces the FCP template answering SELECT.
    pub select_fcp: Option<Vec<u8>>,

    /// Status word and data answering MSE:SET AT.
    pub set_at_response: Option<Response>,

    /// Replaces the answer to the given General Authenticate round (1 to 4).
    pub round_response: Option<(u8, Response)>,

    /// The card derives a different `K_MAC`.
    pub corrupt_mac_key: bool,

    /// The card answers round 3 with the terminal's own public key.
    pub echo_public_key: bool,

    /// The transport fails on the given command (counting from 1).
    pub transport_failure_at: Option<u16>,
}


/// A card running the PACE protocol with [`toy`] mathematics.
///
/// It answers SELECT of EF.CardAccess, READ BINARY, MSE:SET AT and General Authenticate and
/// counts every command it receives, which is what its send sequence counter follows.
pub struct SimulatedCard {
    pub secret: Vec<u8>,
    pub card_access: Vec<u8>,
    pub protocol: Vec<u8>,
    pub key_length: usize,
    pub misbehavior: Misbehavior,

    pub commands_received: u16,
    /// Every command as it went over the wire.
    pub wire_commands: Vec<Vec<u8>>,
    pub set_at_data: Option<Vec<u8>>,
    pub session_keys: Option<SessionKeys>,
    pub terminal_token_valid: Option<bool>,
    pub transcript: Vec<Response>,

    terminal_mapping_data: Vec<u8>,
    generator: Vec<u8>,
    terminal_public_key: Vec<u8>,
    own_public_key: Vec<u8>,
}
impl SimulatedCard {
    pub fn new(secret: &SecretMaterial) -> Self {
        Self::with_misbehavior(secret, Misbehavior::default())
    }

    pub fn with_misbehavior(secret: &SecretMaterial, misbehavior: Misbehavior) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            card_access: CARD_ACCESS.to_vec(),
            protocol: PROTOCOL.to_vec(),
            key_length: 65,
            misbehavior,
            commands_received: 0,
            wire_commands: Vec::new(),
            set_at_data: None,
            session_keys: None,
            terminal_token_valid: None,
            transcript: Vec::new(),
            terminal_mapping_data: Vec::new(),
            generator: Vec::new(),
            terminal_public_key: Vec::new(),
            own_public_key: Vec::new(),
        }
    }

    /// A card offering PACE with Diffie-Hellman over the 2048-bit MODP group.
    pub fn dh_2048(secret: &SecretMaterial) -> Self {
        let mut card = Self::new(secret);
        card.card_access = CARD_ACCESS_DH_2048.to_vec();
        card.protocol = PROTOCOL_DH_2048.to_vec();
        card.key_length = 256;
        card
    }

    fn general_authenticate(&mut self, request_data: &[u8]) -> Response {
        // 7C L [tag L value]
        let Some((template, _)) = try_split_tlv(request_data) else {
            return Response::new(Vec::new(), 0x6A, 0x80);
        };
        if template.tag != 0x7C {
            return Response::new(Vec::new(), 0x6A, 0x80);
        }
        if template.value.is_empty() {
            let encrypted_nonce = toy::encrypt_nonce(&self.secret, &CARD_NONCE);
            return self.respond(1, 0x80, &encrypted_nonce);
        }
        let Some((field, _)) = try_split_tlv(template.value) else {
            return Response::new(Vec::new(), 0x6A, 0x80);
        };

        match field.tag {
            0x81 => {
                self.terminal_mapping_data = field.value.to_vec();
                let own_mapping_data = toy::mapping_data(&CARD_SEED, self.key_length);
                self.generator = toy::generator(&CARD_NONCE, &own_mapping_data, &self.terminal_mapping_data);
                self.respond(2, 0x82, &own_mapping_data)
            },
            0x83 => {
                self.terminal_public_key = field.value.to_vec();
                self.own_public_key = toy::public_key(&self.generator, &CARD_SEED, self.key_length);
                let shared = toy::shared_secret(&self.generator, &self.own_public_key, &self.terminal_public_key);
                let (mut mac, enc) = toy::session_keys(&shared);
                if self.misbehavior.corrupt_mac_key {
                    mac[0] ^= 0x01;
                }
                self.session_keys = Some(SessionKeys::new(Zeroizing::new(mac), Zeroizing::new(enc)));
                let public_key = if self.misbehavior.echo_public_key {
                    self.terminal_public_key.clone()
                } else {
                    self.own_public_key.clone()
                };
                self.respond(3, 0x84, &public_key)
            },
            0x85 => {
                let Some(keys) = self.session_keys.as_ref() else {
                    return Response::new(Vec::new(), 0x69, 0x85);
                };
                // the terminal's token was computed before this command, ours after it
                let expected = toy::token(keys.mac_key(), &self.protocol, &self.own_public_key, self.commands_received - 1);
                self.terminal_token_valid = Some(expected.as_slice() == field.value);
                let own_token = toy::token(keys.mac_key(), &self.protocol, &self.terminal_public_key, self.commands_received);
                self.respond(4, 0x86, &own_token)
            },
            _ => Response::new(Vec::new(), 0x6A, 0x80),
        }
    }

    fn respond(&self, round: u8, tag: u8, value: &[u8]) -> Response {
        if let Some((override_round, response)) = &self.misbehavior.round_response {
            if *override_round == round {
                return response.clone();
            }
        }
        Response::new(dynamic_authentication_data(&[(tag, value)]), 0x90, 0x00)
    }
}
impl SmartCard for SimulatedCard {
    fn communicate(&mut self, request: &Apdu) -> Result<Response, TransportError> {
        self.commands_received += 1;
        if self.misbehavior.transport_failure_at == Some(self.commands_received) {
            return Err(TransportError::Other("card removed".into()));
        }

        let wire = request.to_bytes()?;
        let Some(command) = WireCommand::parse(&wire) else {
            return Err(TransportError::Other("reader sent a malformed command".into()));
        };
        self.wire_commands.push(wire.clone());
        let request_data = command.data;
        let response = match (command.header[0], command.header[1]) {
            (0x00, 0xA4) => {
                if let Some((sw1, sw2)) = self.misbehavior.select_status {
                    Response::new(Vec::new(), sw1, sw2)
                } else if request_data != [0x01, 0x1C] {
                    Response::new(Vec::new(), 0x6A, 0x82)
                } else if let Some(fcp) = &self.misbehavior.select_fcp {
                    Response::new(fcp.clone(), 0x90, 0x00)
                } else {
                    let mut fcp = vec![0x62, 0x04, 0x80, 0x02];
                    fcp.extend((self.card_access.len() as u16).to_be_bytes());
                    Response::new(fcp, 0x90, 0x00)
                }
            },
            (0x00, 0xB0) => {
                let offset = usize::from(u16::from_be_bytes([command.header[2], command.header[3]]));
                let length = command.response_data_length.unwrap_or(0);
                let start = offset.min(self.card_access.len());
                let end = (start + length).min(self.card_access.len());
                Response::new(self.card_access[start..end].to_vec(), 0x90, 0x00)
            },
            (0x00, 0x22) => {
                self.set_at_data = Some(request_data.to_vec());
                match &self.misbehavior.set_at_response {
                    Some(response) => response.clone(),
                    None => Response::new(Vec::new(), 0x90, 0x00),
                }
            },
            (0x10, 0x86) | (0x00, 0x86) => self.general_authenticate(request_data),
            _ => Response::new(Vec::new(), 0x6D, 0x00),
        };
        self.transcript.push(response.clone());
        Ok(response)
    }
}


/// A card that plays back recorded responses without looking at the commands.
pub struct ReplayCard {
    pub responses: std::collections::VecDeque<Response>,
}
impl SmartCard for ReplayCard {
    fn communicate(&mut self, request: &Apdu) -> Result<Response, TransportError> {
        request.to_bytes()?;
        Ok(self.responses.pop_front()
            .unwrap_or_else(|| Response::new(Vec::new(), 0x69, 0x85)))
    }
}


/// Builds `7C L` followed by the given data objects.
pub fn dynamic_authentication_data(fields: &[(u8, &[u8])]) -> Vec<u8> {
    let mut inner = Vec::new();
    for (tag, value) in fields {
        encode_tlv(&mut inner, *tag, value);
    }
    let mut data = vec![0x7C];
    encode_primitive_length(&mut data, inner.len());
    data.extend(inner);
    data
}


/// A command APDU taken apart as a card would (ISO/IEC 7816-3 ยง 12.1.3).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireCommand<'a> {
    pub header: [u8; 4],
    pub data: &'a [u8],
    pub response_data_length: Option<usize>,
    pub extended: bool,
}
impl<'a> WireCommand<'a> {
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        let header: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        let body = &bytes[4..];
        let short_le = |b: u8| if b == 0 { 256 } else { usize::from(b) };
        let extended_le = |b: [u8; 2]| match u16::from_be_bytes(b) { 0 => 65536, n => usize::from(n) };

        let (data, response_data_length, extended): (&[u8], Option<usize>, bool) = match body {
            // case 1
            [] => (&[], None, false),
            // case 2S
            [le] => (&[], Some(short_le(*le)), false),
            // case 2E
            [0x00, le1, le2] => (&[], Some(extended_le([*le1, *le2])), true),
            // case 3E and 4E
            [0x00, lc1, lc2, rest @ ..] => {
                let lc = usize::from(u16::from_be_bytes([*lc1, *lc2]));
                if lc == 0 {
                    return None;
                }
                match rest.len().checked_sub(lc)? {
                    0 => (rest, None, true),
                    2 => (&rest[..lc], Some(extended_le([rest[lc], rest[lc + 1]])), true),
                    _ => return None,
                }
            },
            // case 3S and 4S
            [lc, rest @ ..] => {
                let lc = usize::from(*lc);
                if lc == 0 {
                    return None;
                }
                match rest.len().checked_sub(lc)? {
                    0 => (rest, None, false),
                    1 => (&rest[..lc], Some(short_le(rest[lc])), false),
                    _ => return None,
                }
            },
        };
        Some(Self { header, data, response_data_length, extended })
    }
}
