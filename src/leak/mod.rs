pub mod stats;

use crate::executor::{CipherOffer, ExecutionOutcome, MessageKind, RecordMalformation};
use crate::model::{ScanDetail, TlsVersion};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Behavior class of one observed response to a malformed exchange.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ResponseClass {
    Alert { level: u8, description: u8 },
    HandshakeMessage,
    ApplicationData,
    ConnectionClosed,
    Timeout,
    IoError,
}

/// Classify what the server did after the handshake flight in response to
/// the injected record.
pub fn classify_response(outcome: &ExecutionOutcome) -> ResponseClass {
    let tail_start = outcome
        .received
        .iter()
        .rposition(|kind| *kind == MessageKind::ServerHelloDone)
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let tail = &outcome.received[tail_start..];

    if let Some(alert) = tail.iter().find_map(|kind| match kind {
        MessageKind::Alert { level, description } => Some(ResponseClass::Alert {
            level: *level,
            description: *description,
        }),
        _ => None,
    }) {
        return alert;
    }
    if tail.is_empty() {
        return ResponseClass::ConnectionClosed;
    }
    if tail
        .iter()
        .any(|kind| *kind == MessageKind::ApplicationData)
    {
        return ResponseClass::ApplicationData;
    }
    ResponseClass::HandshakeMessage
}

/// Which family of malformed vectors a test exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorStrategy {
    ClassicDynamic,
    Finished,
    CloseNotify,
}

/// How aggressively records are shaped within a vector family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStrategy {
    Short,
    VeryShort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingVector {
    pub id: &'static str,
    pub malformation: RecordMalformation,
}

/// The structurally different but semantically equivalent vectors for one
/// strategy pair.
pub fn vectors_for(strategy: VectorStrategy, records: RecordStrategy) -> Vec<PaddingVector> {
    let mut vectors = vec![
        PaddingVector {
            id: "invalid-padding-byte",
            malformation: RecordMalformation::InvalidPaddingByte,
        },
        PaddingVector {
            id: "short-padding",
            malformation: RecordMalformation::ShortPadding,
        },
        PaddingVector {
            id: "invalid-mac",
            malformation: RecordMalformation::InvalidMac,
        },
    ];
    if records == RecordStrategy::Short {
        vectors.push(PaddingVector {
            id: "missing-mac-byte",
            malformation: RecordMalformation::MissingMacByte,
        });
    }
    // The Finished / CloseNotify strategies reuse the same malformations at a
    // different point of the exchange; the vector identities stay distinct.
    let _ = strategy;
    vectors
}

/// Configuration identity of one leak test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakTestInfo {
    pub version: TlsVersion,
    pub offer: CipherOffer,
    pub vector_strategy: VectorStrategy,
    pub record_strategy: RecordStrategy,
}

/// Accumulated response distribution of one vector. Append-only: escalation
/// rounds extend the counts, earlier evidence is never discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorSamples {
    pub vector: String,
    #[serde(with = "count_pairs")]
    pub counts: BTreeMap<ResponseClass, usize>,
}

impl VectorSamples {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InformationLeakTest {
    pub info: LeakTestInfo,
    pub vectors: Vec<VectorSamples>,
}

impl InformationLeakTest {
    pub fn new(info: LeakTestInfo) -> Self {
        Self {
            info,
            vectors: Vec::new(),
        }
    }

    pub fn record(&mut self, vector: &str, class: ResponseClass) {
        let idx = match self.vectors.iter().position(|v| v.vector == vector) {
            Some(idx) => idx,
            None => {
                self.vectors.push(VectorSamples {
                    vector: vector.to_string(),
                    counts: BTreeMap::new(),
                });
                self.vectors.len() - 1
            }
        };
        *self.vectors[idx].counts.entry(class).or_insert(0) += 1;
    }

    /// Fold another run of the same configuration into this test.
    pub fn extend_with(&mut self, other: &InformationLeakTest) {
        for samples in &other.vectors {
            for (class, count) in &samples.counts {
                for _ in 0..*count {
                    self.record(&samples.vector, *class);
                }
            }
        }
    }

    pub fn sample_count(&self) -> usize {
        self.vectors.iter().map(VectorSamples::total).sum()
    }

    /// True iff the per-vector distributions are not all identical, i.e. at
    /// least one vector behaved detectably differently.
    pub fn is_distinct_answers(&self) -> bool {
        let mut iter = self.vectors.iter();
        let Some(first) = iter.next() else {
            return false;
        };
        iter.any(|samples| samples.counts != first.counts)
    }

    /// Chi-squared homogeneity p-value over the accumulated table, when the
    /// table carries enough structure to test.
    pub fn p_value(&self) -> Option<f64> {
        let classes: BTreeSet<ResponseClass> = self
            .vectors
            .iter()
            .flat_map(|samples| samples.counts.keys().copied())
            .collect();
        let table: Vec<Vec<f64>> = self
            .vectors
            .iter()
            .map(|samples| {
                classes
                    .iter()
                    .map(|class| samples.counts.get(class).copied().unwrap_or(0) as f64)
                    .collect()
            })
            .collect();
        stats::chi_squared_homogeneity(&table).map(|result| result.p_value)
    }

    /// Final verdict: distinct behavior that is either structurally obvious
    /// (different response-class support) or statistically significant.
    pub fn is_significant_distinct(&self) -> bool {
        if !self.is_distinct_answers() {
            return false;
        }
        let supports: BTreeSet<Vec<ResponseClass>> = self
            .vectors
            .iter()
            .map(|samples| samples.counts.keys().copied().collect())
            .collect();
        if supports.len() > 1 {
            return true;
        }
        match self.p_value() {
            Some(p) => p < SIGNIFICANCE_LEVEL,
            None => false,
        }
    }
}

/// Round counts mirror the scan thoroughness: a quick scan risks one round
/// and escalates hard, a normal scan starts wider and escalates less.
pub fn initial_rounds(detail: ScanDetail) -> usize {
    if detail.at_least(ScanDetail::Normal) {
        3
    } else {
        1
    }
}

pub fn additional_rounds(detail: ScanDetail) -> usize {
    if detail.at_least(ScanDetail::Normal) {
        7
    } else {
        9
    }
}

/// Run one leak test: a coarse pass across all vectors, then, when the
/// coarse pass already shows distinct answers or the scan detail demands it,
/// an extension pass that appends further rounds to the same sample.
pub async fn run_leak_test<F, Fut>(
    info: LeakTestInfo,
    vectors: &[PaddingVector],
    detail: ScanDetail,
    mut run_round: F,
) -> InformationLeakTest
where
    F: FnMut(PaddingVector) -> Fut,
    Fut: Future<Output = ResponseClass>,
{
    let mut test = InformationLeakTest::new(info);
    for _ in 0..initial_rounds(detail) {
        for vector in vectors {
            let class = run_round(*vector).await;
            test.record(vector.id, class);
        }
    }
    if test.is_distinct_answers() || detail.at_least(ScanDetail::Detailed) {
        for _ in 0..additional_rounds(detail) {
            for vector in vectors {
                let class = run_round(*vector).await;
                test.record(vector.id, class);
            }
        }
    }
    test
}

mod count_pairs {
    use super::ResponseClass;
    use serde::de::Deserializer;
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        counts: &BTreeMap<ResponseClass, usize>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(ResponseClass, usize)> =
            counts.iter().map(|(class, count)| (*class, *count)).collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ResponseClass, usize>, D::Error> {
        let pairs: Vec<(ResponseClass, usize)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
