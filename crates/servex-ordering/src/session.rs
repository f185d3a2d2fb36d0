//! Table session tokens.
//!
//! A scan of the table QR code issues (or rotates) the table's session token.
//! Orders must present a usable token: the session is ACTIVE, the token
//! matches and `expires_at` is still in the future.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use servex_schemas::{SessionStatus, TableSession};

pub const TOKEN_BYTES: usize = 32;

/// 32 random bytes, hex encoded (64 chars).
pub fn new_session_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn expiry_from(now: DateTime<Utc>, ttl_minutes: i64) -> DateTime<Utc> {
    now + Duration::minutes(ttl_minutes)
}

pub fn is_usable(session: &TableSession, token: &str, now: DateTime<Utc>) -> bool {
    session.status == SessionStatus::Active
        && !token.is_empty()
        && session.session_token == token
        && session.expires_at > now
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn session(token: &str, status: SessionStatus, expires_at: DateTime<Utc>) -> TableSession {
        let now = Utc::now();
        TableSession {
            session_id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            session_token: token.to_string(),
            status,
            created_at: now,
            expires_at,
            last_activity_at: now,
        }
    }

    #[test]
    fn tokens_are_64_hex_chars_and_distinct() {
        let a = new_session_token();
        let b = new_session_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn expiry_adds_ttl() {
        let now = Utc::now();
        assert_eq!(expiry_from(now, 30) - now, Duration::minutes(30));
    }

    #[test]
    fn usable_requires_active_matching_unexpired() {
        let now = Utc::now();
        let later = now + Duration::minutes(5);
        let s = session("abc", SessionStatus::Active, later);
        assert!(is_usable(&s, "abc", now));
        assert!(!is_usable(&s, "abd", now));
        assert!(!is_usable(&s, "", now));
        assert!(!is_usable(&s, "abc", later), "expiry instant is exclusive");

        let done = session("abc", SessionStatus::Completed, later);
        assert!(!is_usable(&done, "abc", now));
    }
}
