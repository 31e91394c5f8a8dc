//! ASN.1 structures relevant to PACE.


use rasn::{AsnType, Decode, Decoder, Encode, Encoder};
use rasn::types::{Any, ObjectIdentifier};


/// An item of PACE-related security information in the `EF.CardAccess` file.
///
/// The content of `EF.CardAccess` is a SET OF SecurityInfo; the first item of each is always an
/// OID specifying the protocol, but non-`PaceInfo` items need not adhere to this structure, so it
/// is necessary to ensure that a `PaceInfo` structure is being decoded. It is therefore
/// recommended to first decode `EF.CardAccess` as a `SetOf<Any>`, then each entry as a
/// `Vec<Any>`, then each entry's first member as an `ObjectIdentifier`.
///
/// Specified in ICAO Doc 9303 Part 11 ยง 9.2.1 and BSI TR-03110 Part 3 ยง A.1.1.1.
#[derive(AsnType, Clone, Debug, Decode, Encode, Eq, Hash, PartialEq)]
pub struct PaceInfo {
    pub protocol: ObjectIdentifier,
    pub version: i64,
    pub parameter_id: Option<u32>,
}
impl PaceInfo {
    pub fn new(
        protocol: ObjectIdentifier,
        version: i64,
        parameter_id: Option<u32>,
    ) -> Self {
        Self {
            protocol,
            version,
            parameter_id,
        }
    }
}


/// An item of PACE domain parameter security information in the `EF.CardAccess` file.
///
/// Cards that use proprietary (explicit) domain parameters publish them this way; the protocol is
/// one of the family OIDs such as `id-PACE-ECDH-GM`.
///
/// Specified in ICAO Doc 9303 Part 11 ยง 9.2.2.
#[derive(AsnType, Clone, Debug, Decode, Encode, Eq, Hash, PartialEq)]
pub struct PaceDomainParameterInfo {
    pub protocol: ObjectIdentifier,
    pub domain_parameter: AlgorithmIdentifier,
    pub parameter_id: Option<u32>,
}
impl PaceDomainParameterInfo {
    pub fn new(
        protocol: ObjectIdentifier,
        domain_parameter: AlgorithmIdentifier,
        parameter_id: Option<u32>,
    ) -> Self {
        Self {
            protocol,
            domain_parameter,
            parameter_id,
        }
    }
}


/// An identifier identifying a specific cryptographic algorithm and, optionally, parameters for it.
///
/// The definition of `parameters` is delegated to ANSI X9.42 (Diffie-Hellman) and BSI TR-03111
/// (Elliptic-Curve Diffie-Hellman); it is kept opaque here and handed to the crypto provider.
#[derive(AsnType, Clone, Debug, Decode, Encode, Eq, Hash, PartialEq)]
pub struct AlgorithmIdentifier {
    pub algorithm: ObjectIdentifier,
    pub parameters: Option<Any>,
}
impl AlgorithmIdentifier {
    pub fn new(
        algorithm: ObjectIdentifier,
        parameters: Option<Any>,
    ) -> Self {
        Self {
            algorithm,
            parameters,
        }
    }
}
