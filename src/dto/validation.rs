//! Validation helpers for DTOs.

use validator::ValidationError;

/// Length of identifiers handed out by the backend (simple-format UUIDs).
const ENTITY_ID_LENGTH: usize = 32;
/// Upper bound on display names, counted in characters after trimming.
pub const MAX_NAME_CHARS: usize = 32;

/// Validates that an identifier is exactly 32 lowercase hexadecimal characters.
///
/// # Examples
///
/// ```ignore
/// validate_entity_id("0f1e2d3c4b5a69788796a5b4c3d2e1f0") // Ok
/// validate_entity_id("0F1E2D3C4B5A69788796A5B4C3D2E1F0") // Err - uppercase
/// validate_entity_id("0f1e2d3c")                         // Err - too short
/// ```
pub fn validate_entity_id(id: &str) -> Result<(), ValidationError> {
    if id.len() != ENTITY_ID_LENGTH {
        let mut err = ValidationError::new("entity_id_length");
        err.message = Some(
            format!(
                "Identifier must be exactly {ENTITY_ID_LENGTH} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    {
        let mut err = ValidationError::new("entity_id_format");
        err.message = Some("Identifier must contain only lowercase hexadecimal characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a display name is 1 to 32 characters once surrounding whitespace is removed.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let count = name.trim().chars().count();
    if count == 0 || count > MAX_NAME_CHARS {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Name must be between 1 and {MAX_NAME_CHARS} characters (got {count})").into(),
        );
        return Err(err);
    }
    Ok(())
}
