//! Closed-form Raccoon attack probability modeling over the DH moduli
//! observed during the scan. The probabilities quantify how often a shared
//! secret lands short of a hash-block boundary for each PRF construction the
//! target supports; the binary verdict comes from observed DH key reuse.

use crate::analysis::AfterAnalysis;
use crate::model::{Outcome, Property};
use crate::report::{DhObservation, ReportState};
use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const MAX_CONSIDERED_PSK_LENGTH_BYTES: usize = 128;
const MAX_PSK_CANDIDATES: usize = 7;
/// Guess budget per equation an attacker is assumed to afford (2^56).
const MAX_GUESSES_EXPONENT: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaccoonConstruction {
    TlsLegacyPrf,
    Tls12Sha256Prf,
    Tls12Sha384Prf,
    Ssl3OuterMd5,
    Ssl3InnerSha1A,
    Ssl3InnerSha1Bb,
    Ssl3InnerSha1Ccc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaccoonPskCandidate {
    pub psk_length: usize,
    pub boundary_bits: u64,
    pub probability: BigRational,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaccoonAttackRecord {
    pub construction: RaccoonConstruction,
    pub boundary_bits: u64,
    pub probability: BigRational,
    pub modulus: BigUint,
    pub psk_candidates: Vec<RaccoonPskCandidate>,
}

/// Fixed protocol overhead of one hash construction, in bits.
struct HashLayout {
    block_bits: u64,
    fixed_bits: u64,
    length_field_bits: u64,
}

impl HashLayout {
    /// A padded block always carries at least the trailing 0x80 byte.
    fn min_padding_bits(&self) -> u64 {
        self.block_bits - 8
    }
}

fn layout(construction: RaccoonConstruction) -> HashLayout {
    match construction {
        RaccoonConstruction::TlsLegacyPrf
        | RaccoonConstruction::Tls12Sha256Prf
        | RaccoonConstruction::Tls12Sha384Prf => HashLayout {
            block_bits: if construction == RaccoonConstruction::Tls12Sha384Prf {
                1024
            } else {
                512
            },
            fixed_bits: 0,
            length_field_bits: if construction == RaccoonConstruction::Tls12Sha384Prf {
                128
            } else {
                64
            },
        },
        RaccoonConstruction::Ssl3OuterMd5 => HashLayout {
            block_bits: 512,
            fixed_bits: 160,
            length_field_bits: 64,
        },
        RaccoonConstruction::Ssl3InnerSha1A => HashLayout {
            block_bits: 512,
            fixed_bits: 65,
            length_field_bits: 64,
        },
        RaccoonConstruction::Ssl3InnerSha1Bb => HashLayout {
            block_bits: 512,
            fixed_bits: 66,
            length_field_bits: 64,
        },
        RaccoonConstruction::Ssl3InnerSha1Ccc => HashLayout {
            block_bits: 512,
            fixed_bits: 67,
            length_field_bits: 64,
        },
    }
}

/// Bit length measured from the top of the modulus: an exact power of two
/// counts as its exponent, everything else as its ordinary bit count.
fn effective_bit_length(modulus: &BigUint) -> u64 {
    if modulus <= &BigUint::one() {
        return modulus.bits();
    }
    (modulus - 1u32).bits()
}

/// Distance, in bits, from the hashed input's end to the next smaller
/// compression-block boundary.
fn boundary_bits(layout: &HashLayout, input_bits: u64) -> u64 {
    (input_bits + layout.fixed_bits + layout.min_padding_bits() + layout.length_field_bits)
        % layout.block_bits
}

/// Exact success chance of one guess: 1 over the modulus truncated to its
/// top `boundary_bits` bits. A zero denominator means no advantage at all,
/// not an arithmetic fault.
pub fn success_probability(boundary_bits: u64, modulus: &BigUint) -> BigRational {
    let shift = effective_bit_length(modulus).saturating_sub(boundary_bits);
    let denominator = modulus >> shift;
    if denominator.is_zero() {
        return BigRational::zero();
    }
    BigRational::new(BigInt::one(), BigInt::from(denominator))
}

/// Bits hashed for the pre-master secret under one construction. The legacy
/// PRF halves the secret (rounded up to whole bytes) before hashing.
fn input_bits(construction: RaccoonConstruction, modulus: &BigUint) -> u64 {
    match construction {
        RaccoonConstruction::TlsLegacyPrf => {
            let mut bytes = (effective_bit_length(modulus) + 7) / 8;
            if bytes % 2 == 1 {
                bytes += 1;
            }
            (bytes / 2) * 8
        }
        _ => effective_bit_length(modulus),
    }
}

/// PSK key exchanges prepend two 2-byte length fields and the PSK itself to
/// the hashed secret. Enumerate PSK sizes whose probability stays
/// exploitable within the guess budget, capped at the first candidates in
/// ascending length order.
fn psk_candidates(
    layout: &HashLayout,
    base_input_bits: u64,
    modulus: &BigUint,
) -> Vec<RaccoonPskCandidate> {
    let max_guesses = BigRational::from_integer(BigInt::one() << MAX_GUESSES_EXPONENT);
    let mut candidates = Vec::new();
    for psk_length in 0..MAX_CONSIDERED_PSK_LENGTH_BYTES {
        let bits = base_input_bits + 2 * 8 + 2 * 8 + psk_length as u64 * 8;
        let boundary = boundary_bits(layout, bits);
        let probability = success_probability(boundary, modulus);
        if &probability * &max_guesses > BigRational::one() {
            candidates.push(RaccoonPskCandidate {
                psk_length,
                boundary_bits: boundary,
                probability,
            });
        }
        if candidates.len() >= MAX_PSK_CANDIDATES {
            break;
        }
    }
    candidates
}

pub fn compute_record(
    construction: RaccoonConstruction,
    modulus: &BigUint,
) -> RaccoonAttackRecord {
    let layout = layout(construction);
    let input = input_bits(construction, modulus);
    let boundary = boundary_bits(&layout, input);
    RaccoonAttackRecord {
        construction,
        boundary_bits: boundary,
        probability: success_probability(boundary, modulus),
        modulus: modulus.clone(),
        psk_candidates: psk_candidates(&layout, input, modulus),
    }
}

/// For each observed modulus byte size, keep only the numerically smallest
/// modulus: the smaller the modulus, the larger the attacker's advantage.
pub fn smallest_modulus_per_byte_length(
    observations: &[DhObservation],
) -> BTreeMap<usize, BigUint> {
    let mut map: BTreeMap<usize, BigUint> = BTreeMap::new();
    for observation in observations {
        let byte_length = ((observation.modulus.bits() + 7) / 8) as usize;
        match map.get(&byte_length) {
            Some(existing) if *existing <= observation.modulus => {}
            _ => {
                map.insert(byte_length, observation.modulus.clone());
            }
        }
    }
    map
}

pub struct RaccoonAnalysis;

impl RaccoonAnalysis {
    fn constructions(state: &ReportState) -> Vec<RaccoonConstruction> {
        let supports =
            |property: Property| state.properties.get(&property) == Some(&Outcome::True);
        let mut constructions = Vec::new();
        if supports(Property::SupportsLegacyPrf) {
            constructions.push(RaccoonConstruction::TlsLegacyPrf);
        }
        if supports(Property::SupportsSha256Prf) {
            constructions.push(RaccoonConstruction::Tls12Sha256Prf);
        }
        if supports(Property::SupportsSha384Prf) {
            constructions.push(RaccoonConstruction::Tls12Sha384Prf);
        }
        if supports(Property::SupportsSsl3) {
            constructions.push(RaccoonConstruction::Ssl3OuterMd5);
            constructions.push(RaccoonConstruction::Ssl3InnerSha1A);
            constructions.push(RaccoonConstruction::Ssl3InnerSha1Bb);
            constructions.push(RaccoonConstruction::Ssl3InnerSha1Ccc);
        }
        constructions
    }
}

impl AfterAnalysis for RaccoonAnalysis {
    fn name(&self) -> &'static str {
        "raccoon-attack"
    }

    fn analyze(&self, state: &mut ReportState) {
        let constructions = Self::constructions(state);
        let moduli = smallest_modulus_per_byte_length(&state.dh_observations);
        let mut records = Vec::new();
        for modulus in moduli.values() {
            for construction in &constructions {
                records.push(compute_record(*construction, modulus));
            }
        }
        debug!(records = records.len(), "computed raccoon probabilities");
        state.raccoon = records;

        let verdict = match state.properties.get(&Property::ReusesDhPublicKey).copied() {
            Some(Outcome::True) => Outcome::True,
            Some(Outcome::False) => Outcome::False,
            Some(_) => Outcome::Uncertain,
            None => Outcome::CouldNotTest,
        };
        state.properties.insert(Property::VulnerableToRaccoon, verdict);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::ToPrimitive;

    fn modulus_pow2(exponent: u64) -> BigUint {
        BigUint::one() << exponent
    }

    #[test]
    fn power_of_two_modulus_gives_exact_probability() {
        let probability = success_probability(8, &modulus_pow2(512));
        assert_eq!(
            probability,
            BigRational::new(BigInt::one(), BigInt::from(256))
        );
    }

    #[test]
    fn probability_is_always_a_probability() {
        let moduli = [
            modulus_pow2(512),
            BigUint::from(0xffff_ffffu64),
            BigUint::parse_bytes(b"deadbeefdeadbeefdeadbeefdeadbeef", 16).unwrap(),
        ];
        for modulus in &moduli {
            for boundary in [0, 1, 8, 63, 512] {
                let p = success_probability(boundary, modulus);
                assert!(p >= BigRational::zero(), "negative probability");
                assert!(p <= BigRational::one(), "probability above one");
            }
        }
    }

    #[test]
    fn zero_boundary_yields_zero_probability() {
        // Shifting the full bit length away leaves an empty denominator.
        let modulus = BigUint::parse_bytes(b"deadbeefdeadbeefdeadbeefdeadbeef", 16).unwrap();
        let probability = success_probability(0, &modulus);
        assert_eq!(probability, BigRational::zero());
    }

    #[test]
    fn psk_candidate_list_is_capped() {
        // A tiny modulus keeps every PSK length exploitable, so the cap must
        // bite.
        let modulus = BigUint::from(0xffffu32);
        let record = compute_record(RaccoonConstruction::Tls12Sha256Prf, &modulus);
        assert!(record.psk_candidates.len() <= MAX_PSK_CANDIDATES);
        let lengths: Vec<usize> = record
            .psk_candidates
            .iter()
            .map(|candidate| candidate.psk_length)
            .collect();
        let mut sorted = lengths.clone();
        sorted.sort_unstable();
        assert_eq!(lengths, sorted, "candidates must be in ascending order");
    }

    #[test]
    fn smallest_same_length_modulus_is_retained() {
        let small_hex = format!("0f{}", "ff".repeat(63));
        let small = BigUint::parse_bytes(small_hex.as_bytes(), 16).unwrap();
        let large = BigUint::parse_bytes("ff".repeat(64).as_bytes(), 16).unwrap();
        let observation = |modulus: &BigUint| DhObservation {
            modulus: modulus.clone(),
            generator: BigUint::from(2u32),
            public_key: BigUint::from(4u32),
        };
        let map =
            smallest_modulus_per_byte_length(&[observation(&large), observation(&small)]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.values().next().unwrap(), &small);
    }

    #[test]
    fn legacy_prf_halves_the_input() {
        // 512-bit modulus: 64 bytes, halved to 32 bytes = 256 bits.
        assert_eq!(
            input_bits(RaccoonConstruction::TlsLegacyPrf, &modulus_pow2(512)),
            256
        );
        assert_eq!(
            input_bits(RaccoonConstruction::Tls12Sha256Prf, &modulus_pow2(512)),
            512
        );
    }

    #[test]
    fn analysis_writes_records_and_verdict() {
        use crate::model::{ProbeId, ProbeStatus, TargetView};
        use crate::report::Report;
        use std::time::Duration;

        let report = Report::new(TargetView {
            host: "example".into(),
            addr: "192.0.2.1".into(),
            port: 443,
        });
        report.merge(
            ProbeId::ProtocolVersion,
            &[Property::SupportsSha256Prf],
            crate::probe::ProbeFindings {
                properties: vec![(Property::SupportsSha256Prf, Outcome::True)],
                dh_observations: vec![DhObservation {
                    modulus: modulus_pow2(512),
                    generator: BigUint::from(2u32),
                    public_key: BigUint::from(4u32),
                }],
                ..Default::default()
            },
            ProbeStatus::Completed,
            Duration::ZERO,
        );
        report.merge_outcome(
            ProbeId::DhValue,
            &[Property::ReusesDhPublicKey],
            Outcome::True,
            ProbeStatus::Completed,
            Duration::ZERO,
        );

        report.with_state_mut(|state| RaccoonAnalysis.analyze(state));
        let state = report.to_state();
        assert_eq!(state.raccoon.len(), 1);
        assert_eq!(
            state.raccoon[0].construction,
            RaccoonConstruction::Tls12Sha256Prf
        );
        assert_eq!(
            state.properties[&Property::VulnerableToRaccoon],
            Outcome::True
        );
        // Sanity: probability should be representable and small for a
        // 512-bit modulus.
        assert!(state.raccoon[0].probability.to_f64().unwrap_or(1.0) < 1.0);
    }

    #[test]
    fn no_observations_degrade_to_an_empty_record_list() {
        use crate::model::TargetView;
        use crate::report::Report;

        let report = Report::new(TargetView {
            host: "example".into(),
            addr: "192.0.2.1".into(),
            port: 443,
        });
        report.with_state_mut(|state| RaccoonAnalysis.analyze(state));
        let state = report.to_state();
        assert!(state.raccoon.is_empty());
        assert_eq!(
            state.properties[&Property::VulnerableToRaccoon],
            Outcome::CouldNotTest
        );
    }
}
