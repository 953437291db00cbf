use crate::rule::RuleDefinition;
use crate::transaction::Transaction;

/// A loaded ruleset that can evaluate transactions.
///
/// One engine is shared by every test in a run; all per-test state lives in
/// the transactions it hands out.
pub trait InspectionEngine: Send + Sync {
    fn new_transaction(&self) -> Box<dyn Transaction>;

    /// Looks up a chain head by ID.
    fn find_rule_by_id(&self, id: u64) -> Option<&RuleDefinition>;

    fn rule_count(&self) -> usize;
}
