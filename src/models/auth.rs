use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims embedded in the bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: Uuid,
    #[serde(rename = "groupId")]
    pub group_id: Uuid,
    pub exp: usize,
    pub iat: usize,
}

/// Identity extracted from a validated bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    /// Group scope carried by the token; fixed at login time.
    pub group_id: Uuid,
}
