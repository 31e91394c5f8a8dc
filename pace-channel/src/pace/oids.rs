//! Object identifiers relevant to PACE.


use rasn::types::Oid;


macro_rules! pace_oid {
    ($name:ident $(, $number:expr)* $(,)?) => {
        pub const $name: &'static Oid = Oid::const_new(&[0, 4, 0, 127, 0, 7, 2, 2, 4 $(, $number)*]);
    };
}

macro_rules! terminal_type_oid {
    ($name:ident, $number:expr) => {
        pub const $name: &'static Oid = Oid::const_new(&[0, 4, 0, 127, 0, 7, 3, 1, 2, $number]);
    };
}

pace_oid!(PACE_OID_PREFIX);

pace_oid!(PACE_DH_GM,                   1);
pace_oid!(PACE_DH_GM_3DES_CBC_CBC,      1, 1);
pace_oid!(PACE_DH_GM_AES_CBC_CMAC_128,  1, 2);
pace_oid!(PACE_DH_GM_AES_CBC_CMAC_192,  1, 3);
pace_oid!(PACE_DH_GM_AES_CBC_CMAC_256,  1, 4);

pace_oid!(PACE_ECDH_GM,                     2);
pace_oid!(PACE_ECDH_GM_3DES_CBC_CBC,        2, 1);
pace_oid!(PACE_ECDH_GM_AES_CBC_CMAC_128,    2, 2);
pace_oid!(PACE_ECDH_GM_AES_CBC_CMAC_192,    2, 3);
pace_oid!(PACE_ECDH_GM_AES_CBC_CMAC_256,    2, 4);

pace_oid!(PACE_DH_IM,                   3);
pace_oid!(PACE_DH_IM_3DES_CBC_CBC,      3, 1);
pace_oid!(PACE_DH_IM_AES_CBC_CMAC_128,  3, 2);
pace_oid!(PACE_DH_IM_AES_CBC_CMAC_192,  3, 3);
pace_oid!(PACE_DH_IM_AES_CBC_CMAC_256,  3, 4);

pace_oid!(PACE_ECDH_IM,                     4);
pace_oid!(PACE_ECDH_IM_3DES_CBC_CBC,        4, 1);
pace_oid!(PACE_ECDH_IM_AES_CBC_CMAC_128,    4, 2);
pace_oid!(PACE_ECDH_IM_AES_CBC_CMAC_192,    4, 3);
pace_oid!(PACE_ECDH_IM_AES_CBC_CMAC_256,    4, 4);

// 5 is unused (theoretically DH-CAM)

pace_oid!(PACE_ECDH_CAM,                    6);
// 6.1 is unused (theoretically ECDH-CAM with 3DES)
pace_oid!(PACE_ECDH_CAM_AES_CBC_CMAC_128,   6, 2);
pace_oid!(PACE_ECDH_CAM_AES_CBC_CMAC_192,   6, 3);
pace_oid!(PACE_ECDH_CAM_AES_CBC_CMAC_256,   6, 4);

// BSI TR-03110 Part 3 ยง D.2: roles of a terminal in a CHAT
terminal_type_oid!(TERMINAL_TYPE_INSPECTION_SYSTEM,         1);
terminal_type_oid!(TERMINAL_TYPE_AUTHENTICATION_TERMINAL,   2);
terminal_type_oid!(TERMINAL_TYPE_SIGNATURE_TERMINAL,        3);


/// The mapping that turns the static domain parameters into ephemeral ones.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Mapping {
    Generic,
    Integrated,
    ChipAuthentication,
}

/// The key agreement family.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum KeyAgreement {
    DiffieHellman,
    EllipticCurveDiffieHellman,
}


/// Decomposes a PACE protocol OID into its mapping and key agreement.
///
/// Returns `None` if the OID is not one of the PACE protocols (the bare family prefixes such as
/// [`PACE_ECDH_GM`] identify domain parameter information, not a protocol, and are rejected too).
pub fn classify_protocol(protocol: &Oid) -> Option<(Mapping, KeyAgreement)> {
    let prefix_len = PACE_OID_PREFIX.len();
    if protocol.len() != prefix_len + 2 || protocol[..prefix_len] != PACE_OID_PREFIX[..] {
        return None;
    }
    let family = protocol[prefix_len];
    let cipher = protocol[prefix_len + 1];
    let (mapping, key_agreement) = match family {
        1 => (Mapping::Generic, KeyAgreement::DiffieHellman),
        2 => (Mapping::Generic, KeyAgreement::EllipticCurveDiffieHellman),
        3 => (Mapping::Integrated, KeyAgreement::DiffieHellman),
        4 => (Mapping::Integrated, KeyAgreement::EllipticCurveDiffieHellman),
        6 => (Mapping::ChipAuthentication, KeyAgreement::EllipticCurveDiffieHellman),
        _ => return None,
    };
    let cipher_valid = match mapping {
        Mapping::ChipAuthentication => (2..=4).contains(&cipher),
        _ => (1..=4).contains(&cipher),
    };
    if cipher_valid {
        Some((mapping, key_agreement))
    } else {
        None
    }
}


/// Whether the OID identifies PACE domain parameters (`id-PACE-DH-GM` etc. without a cipher arc).
pub fn is_domain_parameter_family(protocol: &Oid) -> bool {
    let prefix_len = PACE_OID_PREFIX.len();
    protocol.len() == prefix_len + 1
        && protocol[..prefix_len] == PACE_OID_PREFIX[..]
        && matches!(protocol[prefix_len], 1 | 2 | 3 | 4 | 6)
}
