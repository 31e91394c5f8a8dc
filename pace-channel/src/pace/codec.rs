//! Encoding of the PACE commands and decoding of the card's answers.
//!
//! MSE:SET AT selects the protocol and the secret; the four General Authenticate rounds then carry
//! the dynamic authentication data (`7C`) of ICAO Doc 9303 Part 11 ยง 4.4.4.


use zeroize::Zeroizing;

use crate::der_util::{self, encode_primitive_length, encode_tlv, try_decode_primitive_length, try_split_tlv};
use crate::iso7816::apdu::{Apdu, CommandHeader, Data};
use crate::pace::{Error, Operation};


/// The response data length requested in a General Authenticate command with short length fields.
pub const GENERAL_AUTHENTICATE_LE: usize = 256;

/// The response data length requested in a General Authenticate command with extended length
/// fields, which is used when the request data does not fit into a short command.
pub const GENERAL_AUTHENTICATE_EXTENDED_LE: usize = 65536;

const DYNAMIC_AUTHENTICATION_DATA: u8 = 0x7C;


/// One of the four General Authenticate rounds of PACE.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Round {
    /// Obtain the encrypted nonce.
    Nonce = 1,

    /// Exchange mapping data.
    Mapping = 2,

    /// Exchange ephemeral public keys.
    KeyAgreement = 3,

    /// Exchange authentication tokens.
    MutualAuthentication = 4,
}
impl Round {
    pub const fn number(&self) -> u8 {
        *self as u8
    }

    pub const fn operation(&self) -> Operation {
        match self {
            Self::Nonce => Operation::ObtainNonce,
            Self::Mapping => Operation::ExchangeMappingData,
            Self::KeyAgreement => Operation::ExchangeEphemeralPublicKeys,
            Self::MutualAuthentication => Operation::MutualAuthentication,
        }
    }

    /// The tag of the terminal's data object in this round; the first round carries none.
    pub const fn request_tag(&self) -> Option<u8> {
        match self {
            Self::Nonce => None,
            Self::Mapping => Some(0x81),
            Self::KeyAgreement => Some(0x83),
            Self::MutualAuthentication => Some(0x85),
        }
    }

    /// The tag of the data object the card must answer with in this round.
    pub const fn response_tag(&self) -> u8 {
        match self {
            Self::Nonce => 0x80,
            Self::Mapping => 0x82,
            Self::KeyAgreement => 0x84,
            Self::MutualAuthentication => 0x86,
        }
    }

    /// Whether this round ends the command chain.
    pub const fn is_last(&self) -> bool {
        matches!(self, Self::MutualAuthentication)
    }
}
impl TryFrom<u8> for Round {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Nonce),
            2 => Ok(Self::Mapping),
            3 => Ok(Self::KeyAgreement),
            4 => Ok(Self::MutualAuthentication),
            _ => Err(Error::EncodingError {
                operation: Operation::GeneralAuthenticate,
                reason: "General Authenticate round out of range",
            }),
        }
    }
}


/// The single data object of a General Authenticate response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseField {
    /// `80`: the nonce encrypted with the key derived from the secret.
    EncryptedNonce(Zeroizing<Vec<u8>>),

    /// `82`: the card's mapping data.
    MappingData(Zeroizing<Vec<u8>>),

    /// `84`: the card's ephemeral public key.
    EphemeralPublicKey(Zeroizing<Vec<u8>>),

    /// `86`: the card's authentication token.
    AuthenticationToken(Zeroizing<Vec<u8>>),
}
impl ResponseField {
    pub fn round(&self) -> Round {
        match self {
            Self::EncryptedNonce(_) => Round::Nonce,
            Self::MappingData(_) => Round::Mapping,
            Self::EphemeralPublicKey(_) => Round::KeyAgreement,
            Self::AuthenticationToken(_) => Round::MutualAuthentication,
        }
    }

    pub fn value(&self) -> &[u8] {
        match self {
            Self::EncryptedNonce(v) => v,
            Self::MappingData(v) => v,
            Self::EphemeralPublicKey(v) => v,
            Self::AuthenticationToken(v) => v,
        }
    }

    pub fn into_value(self) -> Zeroizing<Vec<u8>> {
        match self {
            Self::EncryptedNonce(v) => v,
            Self::MappingData(v) => v,
            Self::EphemeralPublicKey(v) => v,
            Self::AuthenticationToken(v) => v,
        }
    }

    fn from_tag(tag: u16, value: &[u8]) -> Option<Self> {
        let value = Zeroizing::new(value.to_vec());
        match tag {
            0x80 => Some(Self::EncryptedNonce(value)),
            0x82 => Some(Self::MappingData(value)),
            0x84 => Some(Self::EphemeralPublicKey(value)),
            0x86 => Some(Self::AuthenticationToken(value)),
            _ => None,
        }
    }
}


/// Encodes the data field of MSE:SET AT.
///
/// `80` carries the protocol OID, `83` the password reference and `84` the reference of the
/// terminal's access rights (or key), each as DER contents octets.
pub fn encode_set_at(protocol: &[u32], secret_key_reference: i64, terminal_reference: i64) -> Result<Vec<u8>, Error> {
    let protocol_bytes = der_util::oid_to_der_bytes(protocol)
        .ok_or(Error::EncodingError {
            operation: Operation::SetAuthenticationTemplate,
            reason: "protocol is not a valid object identifier",
        })?;

    let mut request_data = Vec::new();
    encode_tlv(&mut request_data, 0x80, &protocol_bytes);
    encode_tlv(&mut request_data, 0x83, &der_util::integer_to_der_bytes(secret_key_reference));
    encode_tlv(&mut request_data, 0x84, &der_util::integer_to_der_bytes(terminal_reference));
    Ok(request_data)
}


/// Builds the complete MSE:SET AT command.
pub fn set_at_apdu(protocol: &[u32], secret_key_reference: i64, terminal_reference: i64) -> Result<Apdu, Error> {
    let request_data = encode_set_at(protocol, secret_key_reference, terminal_reference)?;
    Ok(Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0x22, // MANAGE SECURITY ENVIRONMENT
            p1: 0b1100_0001, // verify/encrypt/extauth, compute/decrypt/intauth, set
            p2: 0xA4, // control reference template for authentication
        },
        data: Data::RequestDataShort { request_data },
    })
}


/// Encodes the data field of a General Authenticate command.
///
/// The first round sends an empty template; the others wrap `payload` in the round's tag.
pub fn encode_general_authenticate(round: Round, payload: &[u8]) -> Result<Vec<u8>, Error> {
    let mut request_data = vec![DYNAMIC_AUTHENTICATION_DATA];
    match round.request_tag() {
        None => {
            if !payload.is_empty() {
                return Err(Error::EncodingError {
                    operation: round.operation(),
                    reason: "the first round does not carry data",
                });
            }
            request_data.push(0x00);
        },
        Some(tag) => {
            if payload.is_empty() {
                return Err(Error::EncodingError {
                    operation: round.operation(),
                    reason: "payload is empty",
                });
            }
            let mut inner = Zeroizing::new(Vec::with_capacity(payload.len() + 4));
            encode_tlv(&mut inner, tag, payload);
            encode_primitive_length(&mut request_data, inner.len());
            request_data.extend(inner.iter());
        },
    }
    Ok(request_data)
}


/// Builds the complete General Authenticate command for a round.
///
/// All rounds but the last are sent with command chaining. Request data longer than a short
/// command allows (e.g. Diffie-Hellman public keys of 2048 bits) switches to extended length
/// fields. The command is checked to be serializable, so an oversized payload fails here and not
/// in the transport.
pub fn general_authenticate_apdu(round: Round, payload: &[u8]) -> Result<Apdu, Error> {
    let request_data = encode_general_authenticate(round, payload)?;
    let cla = if round.is_last() {
        0b000_0_00_00 // last in a chain, no secure messaging, logical channel 0
    } else {
        0b000_1_00_00 // not the last in a chain, no secure messaging, logical channel 0
    };
    let data = if request_data.len() <= Data::MAX_SHORT_REQUEST_LENGTH {
        Data::BothDataShort {
            request_data,
            // 256 is encoded as 0x00
            response_data_length: (GENERAL_AUTHENTICATE_LE % 0x100) as u8,
        }
    } else {
        Data::BothDataExtended {
            request_data,
            // 65536 is encoded as 0x0000
            response_data_length: (GENERAL_AUTHENTICATE_EXTENDED_LE % 0x1_0000) as u16,
        }
    };
    let apdu = Apdu {
        header: CommandHeader {
            cla,
            ins: 0x86, // GENERAL AUTHENTICATE
            p1: 0x00, // algorithm is known (from MSE:SET AT)
            p2: 0x00, // key index is known (from MSE:SET AT)
        },
        data,
    };
    apdu.check_encodable()
        .map_err(|_| Error::EncodingError {
            operation: round.operation(),
            reason: "command data does not fit into an extended length command",
        })?;
    Ok(apdu)
}


/// Decodes the data of a General Authenticate response.
///
/// The response must be exactly one `7C` template holding exactly one data object, and that object
/// must be the one expected in `round`.
pub fn decode_general_authenticate_response(round: Round, response_data: &[u8]) -> Result<ResponseField, Error> {
    let malformed = |reason: &'static str| Error::MalformedResponse {
        operation: round.operation(),
        reason,
    };

    let (&outer_tag, rest) = response_data.split_first()
        .ok_or(malformed("response is empty"))?;
    if outer_tag != DYNAMIC_AUTHENTICATION_DATA {
        return Err(malformed("response is not dynamic authentication data"));
    }
    let (template_length, template) = try_decode_primitive_length(rest)
        .ok_or(malformed("invalid template length"))?;
    if template_length != template.len() {
        return Err(malformed("template length does not match response length"));
    }

    let (tlv, trailing) = try_split_tlv(template)
        .ok_or(malformed("template does not contain a complete data object"))?;
    if !trailing.is_empty() {
        return Err(malformed("template contains more than one data object"));
    }
    let field = ResponseField::from_tag(tlv.tag, tlv.value)
        .ok_or(malformed("unknown data object in template"))?;
    if field.round() != round {
        return Err(malformed("data object does not belong to this round"));
    }
    Ok(field)
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use crate::pace::oids::PACE_ECDH_GM_AES_CBC_CMAC_128;

    #[test]
    fn test_set_at() {
        let apdu = set_at_apdu(PACE_ECDH_GM_AES_CBC_CMAC_128, 1, 1).unwrap();
        assert_eq!(
            apdu.to_bytes().unwrap(),
            hex!("00 22 C1 A4 12 80 0A 04 00 7F 00 07 02 02 04 02 02 83 01 01 84 01 01"),
        );
        assert!(matches!(
            encode_set_at(&[1], 2, 1),
            Err(Error::EncodingError { operation: Operation::SetAuthenticationTemplate, .. }),
        ));
    }

    #[test]
    fn test_general_authenticate_encoding() {
        let first = general_authenticate_apdu(Round::Nonce, &[]).unwrap();
        assert_eq!(first.to_bytes().unwrap(), hex!("10 86 00 00 02 7C 00 00"));

        // ICAO Doc 9303 Part 11 Appendix G.1
        let token = hex!("C2 B0 BD 78 D9 4B A8 66");
        let last = general_authenticate_apdu(Round::MutualAuthentication, &token).unwrap();
        assert_eq!(last.header.to_be_u32(), 0x00_86_00_00);
        assert_eq!(last.data.request_data(), Some(&hex!("7C 0A 85 08 C2 B0 BD 78 D9 4B A8 66")[..]));
        assert_eq!(last.data.response_data_length(), Some(256));

        let mapping = general_authenticate_apdu(Round::Mapping, &[0x04; 65]).unwrap();
        assert_eq!(mapping.header.cla, 0x10);
        assert_eq!(&mapping.data.request_data().unwrap()[..5], &hex!("7C 43 81 41 04"));

        let key = vec![0xAB; 200];
        let encoded = encode_general_authenticate(Round::KeyAgreement, &key).unwrap();
        assert_eq!(&encoded[..7], &hex!("7C 81 CB 83 81 C8 AB"));
    }

    #[test]
    fn test_general_authenticate_extended() {
        // a 2048-bit Diffie-Hellman public key
        let key = vec![0xAB; 256];
        let apdu = general_authenticate_apdu(Round::KeyAgreement, &key).unwrap();
        let bytes = apdu.to_bytes().unwrap();
        assert_eq!(&bytes[..15], &hex!("10 86 00 00 00 01 08 7C 82 01 04 83 82 01 00"));
        assert_eq!(bytes.len(), 4 + 3 + 264 + 2);
        assert_eq!(&bytes[bytes.len() - 2..], &hex!("00 00"));
        assert_eq!(apdu.data.response_data_length(), Some(GENERAL_AUTHENTICATE_EXTENDED_LE));

        // the largest payload that still fits into a short command
        let apdu = general_authenticate_apdu(Round::Mapping, &[0x04; 249]).unwrap();
        assert_eq!(apdu.data.request_data().map(|d| d.len()), Some(255));
        assert_eq!(&apdu.to_bytes().unwrap()[..5], &hex!("10 86 00 00 FF"));

        let apdu = general_authenticate_apdu(Round::Mapping, &[0x04; 250]).unwrap();
        assert_eq!(&apdu.to_bytes().unwrap()[..7], &hex!("10 86 00 00 00 01 00"));
    }

    #[test]
    fn test_general_authenticate_too_long() {
        assert!(matches!(
            general_authenticate_apdu(Round::KeyAgreement, &vec![0xAB; 65536]),
            Err(Error::EncodingError { operation: Operation::ExchangeEphemeralPublicKeys, .. }),
        ));
    }

    #[test]
    fn test_general_authenticate_encoding_errors() {
        assert!(matches!(Round::try_from(0), Err(Error::EncodingError { .. })));
        assert!(matches!(Round::try_from(5), Err(Error::EncodingError { .. })));
        assert_eq!(Round::try_from(3).unwrap(), Round::KeyAgreement);
        assert!(matches!(
            encode_general_authenticate(Round::Nonce, &[0x01]),
            Err(Error::EncodingError { operation: Operation::ObtainNonce, .. }),
        ));
        assert!(matches!(
            encode_general_authenticate(Round::Mapping, &[]),
            Err(Error::EncodingError { operation: Operation::ExchangeMappingData, .. }),
        ));
    }

    #[test]
    fn test_decode_response() {
        let field = decode_general_authenticate_response(
            Round::Nonce,
            &hex!("7C 12 80 10 95 A3 A0 16 52 2E E9 8D 01 E7 6C B6 B9 8B 42 C3"),
        ).unwrap();
        assert_eq!(field.round(), Round::Nonce);
        assert_eq!(field.value(), hex!("95 A3 A0 16 52 2E E9 8D 01 E7 6C B6 B9 8B 42 C3"));

        let field = decode_general_authenticate_response(
            Round::MutualAuthentication,
            &hex!("7C 0A 86 08 3A BB 96 74 BC E9 3C 08"),
        ).unwrap();
        assert_eq!(&*field.into_value(), &hex!("3A BB 96 74 BC E9 3C 08"));
    }

    #[test]
    fn test_decode_malformed() {
        let cases: &[(Round, &[u8])] = &[
            // empty
            (Round::Nonce, &[]),
            // wrong outer tag
            (Round::Nonce, &hex!("7D 03 80 01 00")),
            // template length too long
            (Round::Nonce, &hex!("7C 04 80 01 00")),
            // trailing bytes after the template
            (Round::Nonce, &hex!("7C 03 80 01 00 00")),
            // empty template
            (Round::Nonce, &hex!("7C 00")),
            // inner length too long
            (Round::Nonce, &hex!("7C 03 80 02 00")),
            // long-form lengths where the short form fits
            (Round::Nonce, &hex!("7C 81 03 80 01 00")),
            (Round::Nonce, &hex!("7C 04 80 81 01 00")),
            (Round::Nonce, &hex!("7C 82 00 03 80 01 00")),
            // two data objects
            (Round::Mapping, &hex!("7C 06 82 01 00 82 01 00")),
            // unknown tag
            (Round::Mapping, &hex!("7C 03 81 01 00")),
            // wrong field for the round
            (Round::KeyAgreement, &hex!("7C 03 82 01 00")),
            (Round::MutualAuthentication, &hex!("7C 03 84 01 00")),
        ];
        for (round, data) in cases {
            assert!(
                matches!(decode_general_authenticate_response(*round, data), Err(Error::MalformedResponse { .. })),
                "{:?} {:02X?} was accepted", round, data,
            );
        }
    }
}
