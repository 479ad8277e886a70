//! Mock implementations for tests.
//!
//! Available to unit tests and, behind the `testkit` feature, to the
//! integration tests under `tests/`.

pub mod notify;
pub mod session;
pub mod tokens;
pub mod viewers;

use crate::token::Credential;

/// A throwaway credential pair.
pub fn credential() -> Credential {
    Credential {
        token: "test-token".into(),
        cookie: "_cfuvid=test".into(),
    }
}
