// Labels service
// Admin-managed tags. Reads are open to everyone.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthContext;
use crate::db::{BoardDb, Label, DEFAULT_LABEL_BACKGROUND, DEFAULT_LABEL_TEXT};
use crate::error::BoardError;
use crate::util::new_id;
use crate::validation;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLabel {
    pub name: String,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub text_color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLabel {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub text_color: Option<String>,
}

fn color(field: &str, value: Option<&str>, fallback: &str) -> Result<String, BoardError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => validation::hex_color(field, v),
        None => Ok(fallback.to_string()),
    }
}

pub fn create(db: &BoardDb, auth: &AuthContext, input: &CreateLabel) -> Result<Label, BoardError> {
    let user = auth.require_admin()?;
    let now = Utc::now();
    let label = Label {
        id: new_id(),
        name: validation::label_name(&input.name)?,
        background_color: color(
            "Background color",
            input.background_color.as_deref(),
            DEFAULT_LABEL_BACKGROUND,
        )?,
        text_color: color("Text color", input.text_color.as_deref(), DEFAULT_LABEL_TEXT)?,
        created_by: user.uid.clone(),
        created_at: now,
        updated_at: now,
    };
    db.insert_label(&label)?;
    log::info!("Label '{}' created by {}", label.name, user.uid);
    Ok(label)
}

pub fn get(db: &BoardDb, id: &str) -> Result<Option<Label>, BoardError> {
    Ok(db.get_label(id)?)
}

/// All labels, ordered by name.
pub fn list(db: &BoardDb) -> Result<Vec<Label>, BoardError> {
    Ok(db.list_labels()?)
}

pub fn update(
    db: &BoardDb,
    auth: &AuthContext,
    id: &str,
    input: &UpdateLabel,
) -> Result<Label, BoardError> {
    auth.require_admin()?;
    let mut label = db
        .get_label(id)?
        .ok_or_else(|| BoardError::not_found("Label", id))?;

    if let Some(ref name) = input.name {
        label.name = validation::label_name(name)?;
    }
    if let Some(ref background) = input.background_color {
        label.background_color = validation::hex_color("Background color", background)?;
    }
    if let Some(ref text) = input.text_color {
        label.text_color = validation::hex_color("Text color", text)?;
    }
    label.updated_at = Utc::now();

    db.update_label(&label)?;
    Ok(label)
}

/// Delete a label and detach it from every feature request.
pub fn delete(db: &BoardDb, auth: &AuthContext, id: &str) -> Result<(), BoardError> {
    let user = auth.require_admin()?;
    if !db.delete_label(id)? {
        return Err(BoardError::not_found("Label", id));
    }
    log::info!("Label {} deleted by {}", id, user.uid);
    Ok(())
}
