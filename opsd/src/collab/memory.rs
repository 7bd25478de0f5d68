//! Store-backed recall
//!
//! Notes live in the `notes` collection. Search ranks by keyword overlap with
//! the query plus a bonus for notes written by the same department.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

use super::Memory;
use crate::domain::{Filter, MemoryNote};
use crate::error::OpsResult;
use crate::state::StateManager;

/// Score added when a note comes from the asking department
const SAME_DEPT_BONUS: f64 = 1.5;

/// Words shorter than this carry no signal
const MIN_KEYWORD_LEN: usize = 3;

#[derive(Clone)]
pub struct StoreMemory {
    state: StateManager,
}

impl StoreMemory {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .collect()
}

fn score(note: &MemoryNote, dept: &str, query: &HashSet<String>) -> f64 {
    let overlap = keywords(&note.content).intersection(query).count() as f64;
    if overlap == 0.0 {
        return 0.0;
    }
    if note.dept.eq_ignore_ascii_case(dept) {
        overlap + SAME_DEPT_BONUS
    } else {
        overlap
    }
}

#[async_trait]
impl Memory for StoreMemory {
    async fn search(&self, project_id: &str, dept: &str, query: &str, limit: usize) -> OpsResult<Vec<MemoryNote>> {
        debug!(%project_id, %dept, %limit, "StoreMemory::search: called");
        let notes: Vec<MemoryNote> = self.state.list(vec![Filter::eq("project_id", project_id)]).await?;
        let query = keywords(query);

        let mut scored: Vec<(f64, MemoryNote)> = notes
            .into_iter()
            .map(|note| (score(&note, dept, &query), note))
            .filter(|(s, _)| *s > 0.0)
            .collect();
        // Best first; newer wins ties
        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then(b.id.cmp(&a.id)));
        debug!(matches = scored.len(), "StoreMemory::search: ranked");
        Ok(scored.into_iter().take(limit).map(|(_, note)| note).collect())
    }

    async fn timeline(&self, project_id: &str, limit: usize) -> OpsResult<Vec<MemoryNote>> {
        debug!(%project_id, %limit, "StoreMemory::timeline: called");
        let notes: Vec<MemoryNote> = self.state.list(vec![Filter::eq("project_id", project_id)]).await?;
        let skip = notes.len().saturating_sub(limit);
        Ok(notes.into_iter().skip(skip).collect())
    }

    async fn remember(&self, note: MemoryNote) -> OpsResult<i64> {
        debug!(project_id = %note.project_id, dept = %note.dept, "StoreMemory::remember: called");
        Ok(self.state.create(note).await?)
    }
}
