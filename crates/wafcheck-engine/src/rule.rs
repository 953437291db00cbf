//! Loaded rule definitions.

use crate::phase::Phase;
use crate::seclang::Condition;

/// A rule as loaded from a ruleset source.
///
/// Chained rules are owned by their predecessor; only the chain head carries
/// an ID that the engine indexes.
#[derive(Debug, Clone)]
pub struct RuleDefinition {
    pub id: u64,
    pub phase: Phase,
    /// Directive text exactly as written, continuation lines joined.
    pub source_text: String,
    pub file: String,
    pub line: usize,
    pub message: String,
    pub severity: Option<String>,
    pub chain: Option<Box<RuleDefinition>>,
    pub(crate) condition: Condition,
}

impl RuleDefinition {
    pub fn next_in_chain(&self) -> Option<&RuleDefinition> {
        self.chain.as_deref()
    }

    /// Iterates over this rule followed by every chained rule.
    pub fn chain_iter(&self) -> ChainIter<'_> {
        ChainIter { next: Some(self) }
    }
}

/// Iterator over a rule chain, head first.
pub struct ChainIter<'a> {
    next: Option<&'a RuleDefinition>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a RuleDefinition;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.next_in_chain();
        Some(current)
    }
}
