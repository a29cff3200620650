//! Read-only query surface the engine expects from the dashboard's storage
//! layer, plus an in-memory implementation for the CLI and tests.

use crate::models::chat::{ChatTurn, NoteSummary, OwnerProfile, UploadSummary};
use crate::services::workbook::SheetSummary;
use std::collections::BTreeMap;

/// What the engine reads about an account owner when assembling context.
/// Owners are opaque strings; implementations define what they mean.
pub trait ContextStore {
    /// The owner's saved profile, if any.
    fn profile(&self, owner: &str) -> Option<OwnerProfile>;
    /// Up to `limit` notes, most recently updated first.
    fn recent_notes(&self, owner: &str, limit: usize) -> Vec<NoteSummary>;
    /// Up to `limit` uploads, most recently created first.
    fn recent_uploads(&self, owner: &str, limit: usize) -> Vec<UploadSummary>;
    /// The last `limit` conversation turns in creation order, so the oldest
    /// of the returned turns comes first.
    fn recent_turns(&self, owner: &str, limit: usize) -> Vec<ChatTurn>;
    /// Summary of the owner's most recent spreadsheet attachment.
    fn latest_attachment(&self, owner: &str) -> Option<SheetSummary>;
}

#[derive(Debug, Default)]
struct OwnerRecord {
    profile: Option<OwnerProfile>,
    notes: Vec<NoteSummary>,
    uploads: Vec<UploadSummary>,
    turns: Vec<ChatTurn>,
    attachment: Option<SheetSummary>,
}

/// In-memory [`ContextStore`]. The CLI runs with one of these; tests build
/// fixtures with it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    owners: BTreeMap<String, OwnerRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn owner_mut(&mut self, owner: &str) -> &mut OwnerRecord {
        self.owners.entry(owner.to_string()).or_default()
    }

    pub fn set_profile(&mut self, owner: &str, profile: OwnerProfile) {
        self.owner_mut(owner).profile = Some(profile);
    }

    pub fn add_note(&mut self, owner: &str, note: NoteSummary) {
        self.owner_mut(owner).notes.push(note);
    }

    pub fn add_upload(&mut self, owner: &str, upload: UploadSummary) {
        self.owner_mut(owner).uploads.push(upload);
    }

    pub fn push_turn(&mut self, owner: &str, turn: ChatTurn) {
        self.owner_mut(owner).turns.push(turn);
    }

    pub fn set_attachment(&mut self, owner: &str, summary: SheetSummary) {
        self.owner_mut(owner).attachment = Some(summary);
    }
}

impl ContextStore for MemoryStore {
    fn profile(&self, owner: &str) -> Option<OwnerProfile> {
        self.owners.get(owner).and_then(|o| o.profile.clone())
    }

    fn recent_notes(&self, owner: &str, limit: usize) -> Vec<NoteSummary> {
        let Some(record) = self.owners.get(owner) else {
            return Vec::new();
        };
        let mut notes = record.notes.clone();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        notes.truncate(limit);
        notes
    }

    fn recent_uploads(&self, owner: &str, limit: usize) -> Vec<UploadSummary> {
        let Some(record) = self.owners.get(owner) else {
            return Vec::new();
        };
        let mut uploads = record.uploads.clone();
        uploads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        uploads.truncate(limit);
        uploads
    }

    fn recent_turns(&self, owner: &str, limit: usize) -> Vec<ChatTurn> {
        let Some(record) = self.owners.get(owner) else {
            return Vec::new();
        };
        let skip = record.turns.len().saturating_sub(limit);
        record.turns[skip..].to_vec()
    }

    fn latest_attachment(&self, owner: &str) -> Option<SheetSummary> {
        self.owners.get(owner).and_then(|o| o.attachment.clone())
    }
}
