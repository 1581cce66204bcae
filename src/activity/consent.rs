//! Microphone consent store scanning
//!
//! Windows keeps one record per application that used the microphone. A
//! record whose `LastUsedTimeStop` is zero belongs to a session that has not
//! ended yet, which is what "in use" means here.

use tracing::{trace, warn};

use crate::state::ActivityStatus;

use super::{ActivityReadError, ActivitySampler};

/// Packaged (store) applications
pub const PACKAGED_ROOT: &str =
    r"Software\Microsoft\Windows\CurrentVersion\CapabilityAccessManager\ConsentStore\microphone";

/// Classic desktop applications
pub const NON_PACKAGED_ROOT: &str =
    r"Software\Microsoft\Windows\CurrentVersion\CapabilityAccessManager\ConsentStore\microphone\NonPackaged";

pub const CONSENT_ROOTS: [&str; 2] = [PACKAGED_ROOT, NON_PACKAGED_ROOT];

/// Read-only view of the usage records
pub trait UsageRecords: Send + Sync {
    /// Names of the records under `location`, `None` if it does not exist
    fn children(&self, location: &str) -> Result<Option<Vec<String>>, ActivityReadError>;

    /// `LastUsedTimeStop` of a record, `None` if the value is absent
    fn last_stopped(&self, record: &str) -> Result<Option<u64>, ActivityReadError>;
}

/// Records on hosts without a consent store; every location is absent
#[derive(Debug, Default)]
pub struct NoUsageRecords;

impl UsageRecords for NoUsageRecords {
    fn children(&self, _location: &str) -> Result<Option<Vec<String>>, ActivityReadError> {
        Ok(None)
    }

    fn last_stopped(&self, _record: &str) -> Result<Option<u64>, ActivityReadError> {
        Ok(None)
    }
}

/// Scan `roots`, stopping at the first open usage session
pub fn scan<R: UsageRecords + ?Sized>(records: &R, roots: &[&str]) -> ActivityStatus {
    for root in roots {
        let children = match records.children(root) {
            Ok(Some(children)) => children,
            Ok(None) => {
                trace!(location = root, "usage location absent");
                continue;
            }
            Err(e) => {
                warn!(location = root, error = %e, "skipping unreadable usage location");
                continue;
            }
        };

        for child in children {
            let record = format!(r"{}\{}", root, child);
            match records.last_stopped(&record) {
                Ok(Some(0)) => {
                    trace!(record = %record, "open microphone session");
                    return ActivityStatus::Active;
                }
                Ok(_) => {}
                Err(e) => warn!(record = %record, error = %e, "skipping unreadable usage record"),
            }
        }
    }

    ActivityStatus::Idle
}

/// Samples the consent store on every call
pub struct ConsentStoreSampler<R> {
    records: R,
}

impl<R: UsageRecords> ConsentStoreSampler<R> {
    pub fn new(records: R) -> Self {
        Self { records }
    }
}

impl<R: UsageRecords> ActivitySampler for ConsentStoreSampler<R> {
    fn sample(&self) -> ActivityStatus {
        scan(&self.records, &CONSENT_ROOTS)
    }
}
