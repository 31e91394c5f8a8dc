//! The shared secrets PACE can be run with.


use std::fmt;

use digest::generic_array::GenericArray;
use tracing::debug;
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::pace::Error;


/// Which secret the terminal proves knowledge of.
///
/// The discriminants are the password references of BSI TR-03110 Part 3 ยง D.2.1.2, which are sent
/// to the card in MSE:SET AT and are also the first byte of the channel establishment input.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum PinId {
    /// Machine Readable Zone of a travel document.
    Mrz = 1,

    /// Card Access Number.
    Can = 2,

    Pin = 3,

    /// PIN Unblocking Key.
    Puk = 4,
}
impl PinId {
    pub const fn reference(&self) -> u8 {
        *self as u8
    }

    /// The prompt a user would be shown when asked for this secret.
    pub const fn prompt(&self) -> &'static str {
        match self {
            Self::Mrz => "Enter MRZ",
            Self::Can => "Enter CAN",
            Self::Pin => "Enter PIN",
            Self::Puk => "Enter PUK",
        }
    }
}
impl TryFrom<u8> for PinId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Mrz),
            2 => Ok(Self::Can),
            3 => Ok(Self::Pin),
            4 => Ok(Self::Puk),
            other => Err(other),
        }
    }
}
impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mrz => "MRZ",
            Self::Can => "CAN",
            Self::Pin => "PIN",
            Self::Puk => "PUK",
        };
        write!(f, "{}", name)
    }
}


/// The password `π` from which the nonce decryption key is derived.
///
/// Wiped when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretMaterial {
    #[zeroize(skip)]
    pin_id: PinId,
    bytes: Zeroizing<Vec<u8>>,
}
impl SecretMaterial {
    /// Wraps a secret as entered.
    ///
    /// For the MRZ, pass the MRZ key (document number, date of birth and date of expiry, each
    /// followed by its check digit); it is hashed with SHA-1 as ICAO Doc 9303 Part 11 ยง 9.7.3
    /// prescribes. The other secrets are used verbatim.
    pub fn new(pin_id: PinId, secret: &[u8]) -> Self {
        let bytes = match pin_id {
            PinId::Mrz => sha1_wiped(secret),
            PinId::Can | PinId::Pin | PinId::Puk => Zeroizing::new(secret.to_vec()),
        };
        Self {
            pin_id,
            bytes,
        }
    }

    pub fn pin_id(&self) -> PinId {
        self.pin_id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("pin_id", &self.pin_id)
            .field("bytes", &format_args!("<redacted>"))
            .finish()
    }
}


/// SHA-1 over `input` with the padded message and the chaining state in wiped buffers.
///
/// `Sha1` keeps the last partial block of its input in a buffer that is not wiped on drop, which
/// for an MRZ key is the whole key; feeding the compression function directly avoids that.
fn sha1_wiped(input: &[u8]) -> Zeroizing<Vec<u8>> {
    const BLOCK_SIZE: usize = 64;

    // 0x80, zeroes up to 56 mod 64, 64-bit big-endian bit length; never more than 72 extra bytes
    let mut padded = Zeroizing::new(Vec::with_capacity(input.len() + BLOCK_SIZE + 8));
    padded.extend_from_slice(input);
    padded.push(0x80);
    while padded.len() % BLOCK_SIZE != BLOCK_SIZE - 8 {
        padded.push(0x00);
    }
    let bit_length = (input.len() as u64).wrapping_mul(8);
    padded.extend_from_slice(&bit_length.to_be_bytes());

    let mut state = Zeroizing::new([0x6745_2301u32, 0xEFCD_AB89, 0x98BA_DCFE, 0x1032_5476, 0xC3D2_E1F0]);
    for block in padded.chunks_exact(BLOCK_SIZE) {
        sha1::compress(&mut state, std::slice::from_ref(GenericArray::from_slice(block)));
    }

    let mut digest = Zeroizing::new(Vec::with_capacity(20));
    for word in state.iter() {
        digest.extend_from_slice(&word.to_be_bytes());
    }
    digest
}


/// Obtains the secret for a PACE run.
pub trait SecretResolver {
    /// Returns the secret for `pin_id`; `supplied` is what the caller passed along with the request,
    /// if anything.
    fn resolve_secret(&self, pin_id: PinId, supplied: Option<&[u8]>) -> Result<SecretMaterial, Error>;
}


/// Uses the secret supplied with the request and refuses to run without one.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SuppliedSecretResolver;
impl SecretResolver for SuppliedSecretResolver {
    fn resolve_secret(&self, pin_id: PinId, supplied: Option<&[u8]>) -> Result<SecretMaterial, Error> {
        match supplied {
            Some(secret) if !secret.is_empty() => Ok(SecretMaterial::new(pin_id, secret)),
            _ => {
                debug!(%pin_id, "no secret supplied and no way to ask for one");
                Err(Error::InvalidArguments {
                    reason: format!("no {} supplied ({})", pin_id, pin_id.prompt()),
                })
            },
        }
    }
}
