//! Role names and default lifetimes

use std::time::Duration;

pub const ROLE_ADMINISTRATOR: &str = "Administrator";
pub const ROLE_TEACHER: &str = "Teacher";
pub const ROLE_STUDENT: &str = "Student";

/// Role assigned to identities on first login.
pub const DEFAULT_ROLE: &str = ROLE_STUDENT;

/// Permission carried by refresh tokens (and only by them).
pub const REFRESH_PERMISSION: &str = "refresh";

pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lifetime of a login attempt between redirect and callback.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(5 * 60);

/// Refresh tokens kept per identity; older ones are dropped first.
pub const DEFAULT_MAX_REFRESH_TOKENS: usize = 10;

/// Profile defaults for identities whose provider reports no names
pub const ANONYMOUS_FIRST_NAME: &str = "Anonymous";
pub const ANONYMOUS_LAST_NAME: &str = "User";
pub const ANONYMOUS_LOGIN_PREFIX: &str = "anonymous-";
