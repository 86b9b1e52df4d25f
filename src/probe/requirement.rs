use crate::model::{Outcome, ProbeId, Property};
use crate::report::ReportSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Boolean precondition gating when a probe may run, evaluated as a pure
/// function of a report snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Requirement {
    Always,
    Not(Box<Requirement>),
    And(Box<Requirement>, Box<Requirement>),
    PropertyEquals(Property, Outcome),
    ProbeExecuted(ProbeId),
}

impl Requirement {
    pub fn not(inner: Requirement) -> Requirement {
        Requirement::Not(Box::new(inner))
    }

    pub fn and(a: Requirement, b: Requirement) -> Requirement {
        Requirement::And(Box::new(a), Box::new(b))
    }

    /// De Morgan derivation, there is no dedicated `Or` node.
    pub fn or(a: Requirement, b: Requirement) -> Requirement {
        Requirement::not(Requirement::and(Requirement::not(a), Requirement::not(b)))
    }

    pub fn evaluate(&self, snapshot: &ReportSnapshot) -> bool {
        match self {
            Requirement::Always => true,
            Requirement::Not(inner) => !inner.evaluate(snapshot),
            Requirement::And(a, b) => a.evaluate(snapshot) && b.evaluate(snapshot),
            Requirement::PropertyEquals(property, outcome) => {
                snapshot.get(*property) == Some(*outcome)
            }
            Requirement::ProbeExecuted(probe) => snapshot.has_executed(*probe),
        }
    }

    /// The smallest unmet sub-requirement, for "why wasn't probe X run?"
    /// diagnostics. For `And` the first failing operand in declared order is
    /// descended into; a still-true negated requirement is reported as the
    /// `Not` node itself. Returns `Always` when nothing is missing.
    pub fn missing(&self, snapshot: &ReportSnapshot) -> Requirement {
        if self.evaluate(snapshot) {
            return Requirement::Always;
        }
        match self {
            Requirement::Always => Requirement::Always,
            Requirement::Not(_) => self.clone(),
            Requirement::And(a, b) => {
                if !a.evaluate(snapshot) {
                    a.missing(snapshot)
                } else {
                    b.missing(snapshot)
                }
            }
            Requirement::PropertyEquals(..) | Requirement::ProbeExecuted(..) => self.clone(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Always => write!(f, "always"),
            Requirement::Not(inner) => write!(f, "not({})", inner),
            Requirement::And(a, b) => write!(f, "({} and {})", a, b),
            Requirement::PropertyEquals(property, outcome) => {
                write!(f, "{:?} == {}", property, outcome)
            }
            Requirement::ProbeExecuted(probe) => write!(f, "executed({})", probe),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProbeStatus, TargetView};
    use crate::report::Report;
    use std::time::Duration;

    fn snapshot_with(property: Property, outcome: Outcome) -> ReportSnapshot {
        let report = Report::new(TargetView {
            host: "example".into(),
            addr: "192.0.2.1".into(),
            port: 443,
        });
        report.merge_outcome(
            ProbeId::ProtocolVersion,
            &[property],
            outcome,
            ProbeStatus::Completed,
            Duration::ZERO,
        );
        report.snapshot()
    }

    #[test]
    fn and_is_conjunction_and_not_is_negation() {
        let snapshot = snapshot_with(Property::SupportsTls12, Outcome::True);
        let yes = Requirement::PropertyEquals(Property::SupportsTls12, Outcome::True);
        let no = Requirement::PropertyEquals(Property::SupportsTls13, Outcome::True);

        for (a, b) in [(&yes, &yes), (&yes, &no), (&no, &yes), (&no, &no)] {
            assert_eq!(
                Requirement::and(a.clone(), b.clone()).evaluate(&snapshot),
                a.evaluate(&snapshot) && b.evaluate(&snapshot)
            );
        }
        assert_eq!(
            Requirement::not(yes.clone()).evaluate(&snapshot),
            !yes.evaluate(&snapshot)
        );
        assert_eq!(
            Requirement::not(Requirement::not(no.clone())).evaluate(&snapshot),
            no.evaluate(&snapshot)
        );
    }

    #[test]
    fn or_derivation_behaves_like_disjunction() {
        let snapshot = snapshot_with(Property::SupportsTls12, Outcome::True);
        let yes = Requirement::PropertyEquals(Property::SupportsTls12, Outcome::True);
        let no = Requirement::ProbeExecuted(ProbeId::PaddingOracle);
        assert!(Requirement::or(yes.clone(), no.clone()).evaluate(&snapshot));
        assert!(Requirement::or(no.clone(), yes).evaluate(&snapshot));
        assert!(!Requirement::or(no.clone(), no).evaluate(&snapshot));
    }

    #[test]
    fn missing_returns_first_failing_operand_in_declared_order() {
        let snapshot = snapshot_with(Property::SupportsTls12, Outcome::True);
        let met = Requirement::ProbeExecuted(ProbeId::ProtocolVersion);
        let unmet_a = Requirement::PropertyEquals(Property::SupportsSsl3, Outcome::True);
        let unmet_b = Requirement::ProbeExecuted(ProbeId::CipherSuite);

        let requirement = Requirement::and(met.clone(), Requirement::and(unmet_a.clone(), unmet_b));
        assert_eq!(requirement.missing(&snapshot), unmet_a);

        let still_true = Requirement::not(met);
        assert_eq!(still_true.missing(&snapshot), still_true);

        let satisfied = Requirement::PropertyEquals(Property::SupportsTls12, Outcome::True);
        assert_eq!(satisfied.missing(&snapshot), Requirement::Always);
    }

    #[test]
    fn evaluation_is_deterministic_for_a_fixed_snapshot() {
        let snapshot = snapshot_with(Property::SupportsBlockCiphers, Outcome::False);
        let requirement = Requirement::and(
            Requirement::or(
                Requirement::PropertyEquals(Property::SupportsBlockCiphers, Outcome::True),
                Requirement::ProbeExecuted(ProbeId::ProtocolVersion),
            ),
            Requirement::not(Requirement::PropertyEquals(
                Property::SupportsSsl3,
                Outcome::True,
            )),
        );
        let first = requirement.evaluate(&snapshot);
        let second = requirement.evaluate(&snapshot);
        assert_eq!(first, second);
        assert_eq!(requirement.missing(&snapshot), requirement.missing(&snapshot));
    }
}
