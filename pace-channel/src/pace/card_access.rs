//! Interpretation of `EF.CardAccess`.


use std::fmt;

use rasn::types::{Any, ObjectIdentifier, SetOf};
use tracing::{debug, trace};

use crate::pace::asn1::{AlgorithmIdentifier, PaceDomainParameterInfo, PaceInfo};
use crate::pace::oids::{classify_protocol, is_domain_parameter_family};


/// The domain parameters PACE starts from.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum StaticDomainParameters {
    /// One of the standardized parameter sets (ICAO Doc 9303 Part 11 ยง 9.5.1).
    Standardized(u32),

    /// Proprietary parameters published in a `PaceDomainParameterInfo`.
    Explicit {
        algorithm: ObjectIdentifier,
        parameters: Option<Any>,
    },
}
impl From<AlgorithmIdentifier> for StaticDomainParameters {
    fn from(value: AlgorithmIdentifier) -> Self {
        Self::Explicit {
            algorithm: value.algorithm,
            parameters: value.parameters,
        }
    }
}


#[derive(Debug)]
pub enum CardAccessError {
    Decoding(rasn::error::DecodeError),
    EntryDecoding {
        entry_index: usize,
        error: rasn::error::DecodeError,
    },
    NoPaceInfo,
    NoDomainParameters { protocol: ObjectIdentifier },
}
impl fmt::Display for CardAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::Decoding(e)
                => write!(f, "failed to decode EF.CardAccess: {}", e),
            Self::EntryDecoding { entry_index, error }
                => write!(f, "failed to decode EF.CardAccess entry {}: {}", entry_index, error),
            Self::NoPaceInfo
                => write!(f, "EF.CardAccess does not announce a supported PACE protocol"),
            Self::NoDomainParameters { protocol }
                => write!(f, "EF.CardAccess announces protocol {} without domain parameters", protocol),
        }
    }
}
impl std::error::Error for CardAccessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decoding(e) => Some(e),
            Self::EntryDecoding { error, .. } => Some(error),
            Self::NoPaceInfo => None,
            Self::NoDomainParameters { .. } => None,
        }
    }
}


/// Turns the contents of `EF.CardAccess` into the protocol to run and its domain parameters.
pub trait CardAccessParser {
    fn parse_card_access(&self, card_access: &[u8]) -> Result<(PaceInfo, StaticDomainParameters), CardAccessError>;
}


/// Parses `EF.CardAccess` as the DER-encoded `SET OF SecurityInfo` it is.
///
/// Entries that are not PACE-related are skipped. The first `PaceInfo` with a known protocol wins;
/// the accompanying `PaceDomainParameterInfo`, if any, supplies explicit domain parameters.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DerCardAccessParser;
impl CardAccessParser for DerCardAccessParser {
    fn parse_card_access(&self, card_access: &[u8]) -> Result<(PaceInfo, StaticDomainParameters), CardAccessError> {
        let security_infos: SetOf<Any> = rasn::der::decode(card_access)
            .map_err(CardAccessError::Decoding)?;

        let mut pace_info_opt: Option<PaceInfo> = None;
        let mut domain_parameter_infos: Vec<PaceDomainParameterInfo> = Vec::new();
        for (entry_index, security_info) in security_infos.to_vec().into_iter().enumerate() {
            let security_info_seq: Vec<Any> = rasn::der::decode(security_info.as_bytes())
                .map_err(|error| CardAccessError::EntryDecoding { entry_index, error })?;
            let Some(first) = security_info_seq.first() else {
                continue;
            };
            let Ok(security_info_oid): Result<ObjectIdentifier, _> = rasn::der::decode(first.as_bytes()) else {
                continue;
            };

            if classify_protocol(&security_info_oid).is_some() {
                if pace_info_opt.is_some() {
                    trace!(entry_index, protocol = %security_info_oid, "skipping additional PaceInfo");
                    continue;
                }
                let pace_info: PaceInfo = rasn::der::decode(security_info.as_bytes())
                    .map_err(|error| CardAccessError::EntryDecoding { entry_index, error })?;
                pace_info_opt = Some(pace_info);
            } else if is_domain_parameter_family(&security_info_oid) {
                let domain_parameter_info: PaceDomainParameterInfo = rasn::der::decode(security_info.as_bytes())
                    .map_err(|error| CardAccessError::EntryDecoding { entry_index, error })?;
                domain_parameter_infos.push(domain_parameter_info);
            } else {
                trace!(entry_index, oid = %security_info_oid, "skipping non-PACE SecurityInfo");
            }
        }

        let pace_info = pace_info_opt
            .ok_or(CardAccessError::NoPaceInfo)?;

        // a PaceDomainParameterInfo belongs to the PaceInfo if its family is a prefix of the
        // protocol and the parameter IDs agree (when both are given)
        let matching_domain_parameters = domain_parameter_infos.into_iter()
            .find(|dpi| {
                pace_info.protocol.starts_with(&dpi.protocol)
                    && match (dpi.parameter_id, pace_info.parameter_id) {
                        (Some(a), Some(b)) => a == b,
                        _ => true,
                    }
            });

        let static_parameters = if let Some(dpi) = matching_domain_parameters {
            debug!(protocol = %pace_info.protocol, algorithm = %dpi.domain_parameter.algorithm, "using explicit domain parameters");
            StaticDomainParameters::from(dpi.domain_parameter)
        } else if let Some(parameter_id) = pace_info.parameter_id {
            debug!(protocol = %pace_info.protocol, parameter_id, "using standardized domain parameters");
            StaticDomainParameters::Standardized(parameter_id)
        } else {
            return Err(CardAccessError::NoDomainParameters { protocol: pace_info.protocol });
        };

        Ok((pace_info, static_parameters))
    }
}
