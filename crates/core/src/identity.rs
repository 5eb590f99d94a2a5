// crates/core/src/identity.rs
//! Per-installation client identity sent as `X-User-Id`.

use std::path::Path;

use tracing::{info, warn};

/// Generate a new `user-<uuid>` identifier.
pub fn generate_user_id() -> String {
    format!("user-{}", uuid::Uuid::new_v4())
}

/// Load the persisted user id, creating and saving one on first run.
///
/// Never fails: if the file cannot be read or written the id lives only for
/// this process.
pub fn load_or_create_user_id(path: Option<&Path>) -> String {
    let Some(path) = path else {
        let id = generate_user_id();
        warn!(user_id = %id, "No identity location available, using an ephemeral user id");
        return id;
    };

    if let Ok(existing) = std::fs::read_to_string(path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return existing.to_string();
        }
    }

    let id = generate_user_id();
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %e, "Failed to create identity directory");
            return id;
        }
    }
    match std::fs::write(path, &id) {
        Ok(()) => info!(user_id = %id, "Created new client identity"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to persist client identity"),
    }
    id
}
