use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dao::models::PlayerEntity;

/// Payload for registering or renaming a player.
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct PlayerNameRequest {
    /// Display name; must not be blank.
    #[validate(custom(function = "crate::dto::validation::validate_display_name"))]
    pub name: String,
}

/// Public view of a player.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlayerSummary {
    /// Player identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl From<PlayerEntity> for PlayerSummary {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
        }
    }
}
