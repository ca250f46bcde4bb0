use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Identity of whoever issued a command. Minted by the chat-platform shim, which
/// resolves the member's roles in the guild the command came from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
pub struct Claims {
    pub sub: String, // chat user id
    pub guild: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: usize,
}
