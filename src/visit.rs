use crate::types::{Address, TransactionId};
use std::collections::HashSet;

/// Per-crawl record of expanded transactions and queried addresses.
///
/// Created fresh by every crawl and dropped with it; a later crawl may expand the
/// same transactions again.
#[derive(Debug, Default)]
pub struct VisitTracker {
    transactions: HashSet<TransactionId>,
    addresses: HashSet<Address>,
}

impl VisitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `tx` is seen (and records it), false ever after.
    pub fn should_expand(&mut self, tx: &TransactionId) -> bool {
        if self.transactions.contains(tx) {
            return false;
        }
        self.transactions.insert(tx.clone())
    }

    /// Same contract as `should_expand`, for outgoing-activity lookups of an address.
    pub fn should_query(&mut self, address: &Address) -> bool {
        if self.addresses.contains(address) {
            return false;
        }
        self.addresses.insert(address.clone())
    }

    pub fn is_expanded(&self, tx: &TransactionId) -> bool {
        self.transactions.contains(tx)
    }

    pub fn expanded_count(&self) -> usize {
        self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_each_transaction_once() {
        let mut tracker = VisitTracker::new();
        let tx = TransactionId::from("aa");
        assert!(tracker.should_expand(&tx));
        assert!(!tracker.should_expand(&tx));
        assert!(!tracker.should_expand(&tx));
        assert!(tracker.is_expanded(&tx));
        assert_eq!(tracker.expanded_count(), 1);
    }

    #[test]
    fn addresses_and_transactions_are_tracked_separately() {
        let mut tracker = VisitTracker::new();
        assert!(tracker.should_expand(&TransactionId::from("same")));
        assert!(tracker.should_query(&Address::from("same")));
        assert!(!tracker.should_query(&Address::from("same")));
    }

    #[test]
    fn trackers_are_independent() {
        let tx = TransactionId::from("aa");
        let mut first = VisitTracker::new();
        let mut second = VisitTracker::new();
        assert!(first.should_expand(&tx));
        assert!(second.should_expand(&tx));
    }
}
