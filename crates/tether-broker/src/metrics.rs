//! Broker metrics.
//!
//! Counter names and increment helpers; these complement the structured
//! logging rather than replace it. Exposition is left to whatever
//! recorder the embedding deployment installs.

use metrics::{counter, describe_counter};

/// Advertisements accepted (created or overlaid).
pub const ADVERTISEMENTS_ACCEPTED: &str = "tether_advertisements_accepted_total";

/// Reservations that reached phase `Reserved`.
pub const RESERVATIONS_RESERVED: &str = "tether_reservations_reserved_total";

/// Reservations that ended in phase `Failed`.
pub const RESERVATIONS_FAILED: &str = "tether_reservations_failed_total";

/// Compare-and-swap conflicts inside the reservation lock loop.
pub const LOCK_CONFLICTS: &str = "tether_lock_conflicts_total";

/// Reservations released by the lifecycle observer on expiry.
pub const RESERVATIONS_EXPIRED: &str = "tether_reservations_expired_total";

/// Registers metric descriptions. Call once at startup.
pub fn register_metrics() {
    describe_counter!(
        ADVERTISEMENTS_ACCEPTED,
        "Advertisements accepted by the intake endpoint"
    );
    describe_counter!(
        RESERVATIONS_RESERVED,
        "Reservations that locked provider capacity"
    );
    describe_counter!(RESERVATIONS_FAILED, "Reservations that ended in Failed");
    describe_counter!(
        LOCK_CONFLICTS,
        "Version conflicts while locking provider advertisements"
    );
    describe_counter!(
        RESERVATIONS_EXPIRED,
        "Reservations released on duration expiry"
    );
}

/// Records an accepted advertisement.
pub fn advertisement_accepted() {
    counter!(ADVERTISEMENTS_ACCEPTED).increment(1);
}

/// Records a successfully locked reservation.
pub fn reservation_reserved() {
    counter!(RESERVATIONS_RESERVED).increment(1);
}

/// Records a failed reservation.
pub fn reservation_failed() {
    counter!(RESERVATIONS_FAILED).increment(1);
}

/// Records a lock conflict.
pub fn lock_conflict() {
    counter!(LOCK_CONFLICTS).increment(1);
}

/// Records an expiry release.
pub fn reservation_expired() {
    counter!(RESERVATIONS_EXPIRED).increment(1);
}
