//! Port allocation: lowest free port at or above a base.
//!
//! There is no free list. The set of ports in use is recomputed from the
//! live process table on every launch, so a port becomes reusable as soon
//! as its record is removed.

use std::collections::HashSet;

use crate::{AppError, Result};

/// Return the lowest port `>= base` that does not appear in `used`.
///
/// # Errors
///
/// Returns [`AppError::PortExhausted`] if every port from `base` through
/// `u16::MAX` is taken.
pub fn lowest_free_port(base: u16, used: impl IntoIterator<Item = u16>) -> Result<u16> {
    let used: HashSet<u16> = used.into_iter().collect();
    (base..=u16::MAX)
        .find(|port| !used.contains(port))
        .ok_or_else(|| AppError::PortExhausted(format!("no free port at or above {base}")))
}
