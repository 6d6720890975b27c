//! Identifier generation for missions, proposals, and leases.

use chrono::{DateTime, Utc};
use uuid::Uuid;

fn hex6() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}

/// Server-assigned mission id: `M-<YYYYMMDDHHMMSS>-<hex6>`.
pub fn mission_id(now: DateTime<Utc>) -> String {
    format!("M-{}-{}", now.format("%Y%m%d%H%M%S"), hex6())
}

/// Command proposal id: `CP-<YYYYMMDDHHMMSS>-<hex6>`.
pub fn proposal_id(now: DateTime<Utc>) -> String {
    format!("CP-{}-{}", now.format("%Y%m%d%H%M%S"), hex6())
}

/// Opaque short-lived lease token issued on claim.
pub fn lease_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mission_id_embeds_timestamp() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T12:30:45Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = mission_id(now);
        assert!(id.starts_with("M-20260301123045-"));
        assert_eq!(id.len(), "M-20260301123045-".len() + 6);
    }

    #[test]
    fn lease_ids_are_unique() {
        assert_ne!(lease_id(), lease_id());
    }
}
