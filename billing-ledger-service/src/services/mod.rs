pub mod allocation;
pub mod clock;
pub mod guard;
pub mod import;
pub mod ledger;
pub mod matching;
pub mod metrics;
pub mod notifier;
pub mod penalty;
pub mod period_close;
pub mod receipts;
pub mod registry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use guard::MutationContext;
pub use ledger::BillingLedger;
pub use matching::{MatchOutcome, MatchingPolicy, PlotMatcher, PreparedRegistry};
pub use notifier::{LogNotifier, Notifier, NotifierError};
pub use store::{InMemoryLedgerStore, LedgerState, LedgerStore};
