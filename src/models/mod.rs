//! Data models for the toy lending library

pub mod admin;
pub mod archive;
pub mod item;
pub mod reservation;
pub mod waitlist;

// Re-export commonly used types
pub use archive::{ArchiveEntry, ArchiveReason};
pub use item::{Item, ItemStatus};
pub use reservation::{
    FamilyContact, LoanPeriod, ReminderFlag, Reservation, ReservationPhase, ReservationStatus,
};
pub use waitlist::WaitlistEntry;

/// Case-insensitive match of `term` against any of the given fields
pub(crate) fn matches_search(term: Option<&str>, fields: &[&str]) -> bool {
    match term.map(str::trim).filter(|t| !t.is_empty()) {
        None => true,
        Some(term) => {
            let term = term.to_lowercase();
            fields.iter().any(|f| f.to_lowercase().contains(&term))
        }
    }
}
