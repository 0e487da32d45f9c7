//! Signal routing against a connection's targets.
//!
//! Routing is a pure function over the connection configuration and an
//! incoming signal: echo suppression, topic matching, authorization
//! filtering, then placeholder substitution on target addresses.
//! Targets whose address still contains unresolved placeholders are
//! dropped rather than published with a broken address.

use tracing::{debug, warn};

use conduit_core::{substitute_placeholders, Connection, Signal, Target};

/// Resolves which of `connection`'s targets should receive `signal`.
///
/// Returns resolved targets with placeholders substituted; an empty
/// vector means the signal is dropped for this connection.
pub fn route(connection: &Connection, signal: &Signal) -> Vec<Target> {
    // Never echo a signal back to the connection it originated from.
    if signal
        .origin
        .as_deref()
        .is_some_and(|origin| origin == connection.id.as_str())
    {
        debug!(
            connection_id = %connection.id,
            signal_type = %signal.signal_type,
            "suppressing signal echo to originating connection"
        );
        return Vec::new();
    }

    if connection.subscribed_topics().is_empty() {
        debug!(connection_id = %connection.id, "connection has no subscribed topics");
        return Vec::new();
    }

    let mut resolved = Vec::new();
    let mut dropped_unresolved = 0_usize;
    for target in &connection.targets {
        if !target.topics.contains(&signal.topic) {
            continue;
        }
        let authorized = target
            .authorization_subjects
            .iter()
            .any(|subject| signal.required_subjects.contains(subject));
        if !authorized {
            continue;
        }
        match substitute_placeholders(&target.address, &signal.entity_id) {
            Some(address) => {
                let mut target = target.clone();
                target.address = address;
                resolved.push(target);
            }
            None => dropped_unresolved += 1,
        }
    }

    if dropped_unresolved > 0 {
        warn!(
            connection_id = %connection.id,
            dropped = dropped_unresolved,
            "dropped targets with unresolved address placeholders"
        );
    }
    if resolved.is_empty() {
        debug!(
            connection_id = %connection.id,
            topic = %signal.topic,
            "no authorized target matches signal"
        );
    }
    resolved
}
