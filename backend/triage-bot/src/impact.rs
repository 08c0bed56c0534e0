//! Decides whether a verified proof is worth routing to a project.
//!
//! The checks run in a fixed order and stop at the first failure, so the
//! reported reason tells operators exactly which gate a proof fell through:
//! a sound but worthless exploit (`NotProfitable`) is never confused with a
//! profitable one aimed at somebody else's contracts (`NotAffected`).

use tracing::info;

use crate::project::{Address, FamousSlotRule, Project};
use crate::verifier::VerifierResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactReason {
    VerifierRejected,
    NotProfitable,
    NotAffected,
    Accepted,
}

impl ImpactReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerifierRejected => "verifier_rejected",
            Self::NotProfitable => "not_profitable",
            Self::NotAffected => "not_affected",
            Self::Accepted => "accepted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpactDecision {
    pub accepted: bool,
    pub reason: ImpactReason,
}

impl ImpactDecision {
    fn rejected(reason: ImpactReason) -> Self {
        Self {
            accepted: false,
            reason,
        }
    }

    fn accepted() -> Self {
        Self {
            accepted: true,
            reason: ImpactReason::Accepted,
        }
    }
}

/// Static profitability heuristics.
#[derive(Debug, Clone)]
pub struct ProfitabilityConfig {
    /// Account the exploit pays out to.
    pub default_poc_address: Address,
    pub famous_balance_slots: Vec<FamousSlotRule>,
}

/// Evaluate a verifier run against `project`.
///
/// `result` is only consulted when `verifier_accepted` is true.
pub fn evaluate(
    result: Option<&VerifierResult>,
    verifier_accepted: bool,
    project: &Project,
    profitability: &ProfitabilityConfig,
) -> ImpactDecision {
    let result = match result {
        Some(result) if verifier_accepted => result,
        _ => return ImpactDecision::rejected(ImpactReason::VerifierRejected),
    };

    if !is_profitable(result, profitability) {
        info!("PoC for {} is not profitable", project.domain);
        return ImpactDecision::rejected(ImpactReason::NotProfitable);
    }

    if !is_affected(result, project) {
        info!("Project {} is not affected by the PoC", project.domain);
        return ImpactDecision::rejected(ImpactReason::NotAffected);
    }

    ImpactDecision::accepted()
}

fn is_profitable(result: &VerifierResult, cfg: &ProfitabilityConfig) -> bool {
    result.has_balance(&cfg.default_poc_address)
        || cfg
            .famous_balance_slots
            .iter()
            .any(|rule| result.touches_slot(&rule.token, &rule.slot))
}

fn is_affected(result: &VerifierResult, project: &Project) -> bool {
    project.contracts.iter().any(|c| result.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POC: &str = "0xdef0000000000000000000000000000000000001";
    const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    fn profitability() -> ProfitabilityConfig {
        ProfitabilityConfig {
            default_poc_address: POC.into(),
            famous_balance_slots: vec![FamousSlotRule {
                token: TOKEN.into(),
                slot: "0x09".to_string(),
            }],
        }
    }

    fn project(contracts: &[&str]) -> Project {
        Project {
            owner: "0x01".into(),
            contracts: contracts.iter().map(|c| Address::new(c)).collect(),
            domain: "victim.xyz".to_string(),
            contact: "tg:odesec_bot/-100".to_string(),
        }
    }

    fn result(json: &str) -> VerifierResult {
        VerifierResult::parse(json.as_bytes()).unwrap()
    }

    #[test]
    fn rejected_verifier_short_circuits() {
        let res = result(&format!(r#"{{"{POC}":{{"balance":"100"}}}}"#));
        let decision = evaluate(Some(&res), false, &project(&[POC]), &profitability());
        assert_eq!(
            decision,
            ImpactDecision {
                accepted: false,
                reason: ImpactReason::VerifierRejected
            }
        );
        let decision = evaluate(None, false, &project(&[POC]), &profitability());
        assert_eq!(decision.reason, ImpactReason::VerifierRejected);
    }

    #[test]
    fn case_insensitive_match_is_accepted() {
        let res = result(&format!(r#"{{"{POC}":{{"balance":"100"}}}}"#));
        let upper = POC.to_uppercase().replacen("0X", "0x", 1);
        let decision = evaluate(Some(&res), true, &project(&[&upper]), &profitability());
        assert_eq!(
            decision,
            ImpactDecision {
                accepted: true,
                reason: ImpactReason::Accepted
            }
        );
    }

    #[test]
    fn profitable_but_unrelated_is_not_affected() {
        let res = result(&format!(r#"{{"{POC}":{{"balance":"100"}}}}"#));
        let decision = evaluate(
            Some(&res),
            true,
            &project(&["0xaaa0000000000000000000000000000000000000"]),
            &profitability(),
        );
        assert_eq!(
            decision,
            ImpactDecision {
                accepted: false,
                reason: ImpactReason::NotAffected
            }
        );
    }

    #[test]
    fn no_signal_is_not_profitable() {
        let res = result(r#"{"0xbbb":{"balance":"5"}}"#);
        let decision = evaluate(Some(&res), true, &project(&["0xbbb"]), &profitability());
        assert_eq!(
            decision,
            ImpactDecision {
                accepted: false,
                reason: ImpactReason::NotProfitable
            }
        );
    }

    #[test]
    fn profitability_checked_before_affectedness() {
        // Unprofitable and unrelated: the first failing gate wins.
        let res = result(r#"{"0xccc":{}}"#);
        let decision = evaluate(Some(&res), true, &project(&["0xddd"]), &profitability());
        assert_eq!(decision.reason, ImpactReason::NotProfitable);
    }

    #[test]
    fn zero_poc_balance_is_not_profitable() {
        let res = result(&format!(r#"{{"{POC}":{{"balance":0}},"0xbbb":{{}}}}"#));
        let decision = evaluate(Some(&res), true, &project(&["0xbbb"]), &profitability());
        assert_eq!(decision.reason, ImpactReason::NotProfitable);
    }

    #[test]
    fn famous_slot_counts_as_profitable() {
        let res = result(&format!(
            r#"{{"{}":{{"storage":{{"0x09":"0x1"}}}},"0xbbb":null}}"#,
            TOKEN.to_uppercase().replacen("0X", "0x", 1)
        ));
        let decision = evaluate(Some(&res), true, &project(&["0xBBB"]), &profitability());
        assert!(decision.accepted);
    }

    #[test]
    fn unknown_slot_on_famous_token_is_not_profitable() {
        let res = result(&format!(r#"{{"{TOKEN}":{{"storage":{{"0x01":"0x1"}}}}}}"#));
        let decision = evaluate(Some(&res), true, &project(&[TOKEN]), &profitability());
        assert_eq!(decision.reason, ImpactReason::NotProfitable);
    }

    #[test]
    fn reason_strings() {
        assert_eq!(ImpactReason::NotProfitable.as_str(), "not_profitable");
        assert_eq!(ImpactReason::NotAffected.as_str(), "not_affected");
    }
}
