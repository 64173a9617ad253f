//! Runtime-checkable invariants
//!
//! Used by tests and by debug assertions in the runtime kernel.
//!
//! # Invariants
//!
//! 1. **Bounded Table**: a handle table never exceeds its capacity
//! 2. **Unique Handles**: no two live bindings share a handle value
//! 3. **Resolvable**: every live binding resolves to itself

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::handle::HandleTable;

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

/// Check all handle table invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_handle_table<O: Clone>(table: &HandleTable<O>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let live: Vec<u32> = table.iter().map(|(handle, _)| handle.raw()).collect();

    if live.len() != table.len() || table.len() > table.capacity() {
        violations.push(InvariantViolation {
            invariant: "bounded_table",
            description: format!(
                "{} live bindings, count {}, capacity {}",
                live.len(),
                table.len(),
                table.capacity()
            ),
        });
    }

    let mut sorted = live.clone();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != live.len() {
        violations.push(InvariantViolation {
            invariant: "unique_handles",
            description: format!("{} duplicate handle values", live.len() - sorted.len()),
        });
    }

    for (handle, _) in table.iter() {
        if !table.contains(handle) {
            violations.push(InvariantViolation {
                invariant: "resolvable",
                description: format!("handle {:#x} does not resolve", handle.raw()),
            });
        }
    }

    violations
}
