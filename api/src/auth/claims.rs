use serde::{Deserialize, Serialize};

/// JWT claim set carried by every authenticated request.
///
/// `sub` is the user id. Program-level roles are not encoded here; guards
/// resolve them from enrollments so a token never goes stale on a role change.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    /// Expiry as a unix timestamp in seconds.
    pub exp: usize,
    /// Site-wide administrator flag.
    pub admin: bool,
}

/// Request extension inserted by the auth extractor and guard layers.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);
