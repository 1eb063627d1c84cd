pub mod locks;
pub mod service;
pub mod sync;

pub use service::{CreditService, CreditSubmission, ReviewedCredit, SubmittedCredit};
pub use sync::SyncReport;
