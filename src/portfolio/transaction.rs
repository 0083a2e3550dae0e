// =============================================================================
// TradingTransaction — compensating rollback for multi-step mutations
// =============================================================================
//
// Captures a full copy of the accounts (cash, positions, counters, history)
// at entry. Unless `commit()` is called, dropping the guard restores that
// snapshot — so a multi-leg F&O open that fails on leg three leaves no trace
// of legs one and two.
//
// The snapshot is taken under the accounts lock and restored under it; the
// guard itself must not be held across broker I/O by the caller of any
// single portfolio operation (each operation locks internally), only the
// overall begin/commit bracket spans the legs.

use tracing::warn;

use super::{Accounts, Portfolio};

/// RAII rollback guard. Create with [`Portfolio::begin_transaction`].
pub struct TradingTransaction<'p> {
    portfolio: &'p Portfolio,
    snapshot: Option<Accounts>,
    label: &'static str,
}

impl Portfolio {
    /// Begin a transaction bracket around a multi-step mutation.
    pub fn begin_transaction(&self, label: &'static str) -> TradingTransaction<'_> {
        TradingTransaction {
            portfolio: self,
            snapshot: Some(self.snapshot_accounts()),
            label,
        }
    }
}

impl TradingTransaction<'_> {
    /// Keep all mutations made since the bracket opened.
    pub fn commit(mut self) {
        self.snapshot = None;
    }
}

impl Drop for TradingTransaction<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            warn!(label = self.label, "trading transaction rolled back");
            self.portfolio.restore_accounts(snapshot);
        }
    }
}
