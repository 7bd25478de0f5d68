//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

pub const TASK: &str = include_str!("../../prompts/task.pmt");
pub const TOOL_FOLLOWUP: &str = include_str!("../../prompts/tool_followup.pmt");
pub const RED_TEAM: &str = include_str!("../../prompts/red_team.pmt");
pub const SCOUT: &str = include_str!("../../prompts/scout.pmt");
pub const HISTORY: &str = include_str!("../../prompts/history.pmt");
pub const EXECUTIVE_SUMMARY: &str = include_str!("../../prompts/executive_summary.pmt");
pub const DEBRIEF: &str = include_str!("../../prompts/debrief.pmt");
pub const PERFORMANCE_REVIEW: &str = include_str!("../../prompts/performance_review.pmt");
pub const PERSONA: &str = include_str!("../../prompts/persona.pmt");
pub const CONSENSUS: &str = include_str!("../../prompts/consensus.pmt");
pub const POLISH: &str = include_str!("../../prompts/polish.pmt");
pub const ROUTE: &str = include_str!("../../prompts/route.pmt");
pub const INGEST: &str = include_str!("../../prompts/ingest.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    let found = match name {
        "task" => TASK,
        "tool_followup" => TOOL_FOLLOWUP,
        "red_team" => RED_TEAM,
        "scout" => SCOUT,
        "history" => HISTORY,
        "executive_summary" => EXECUTIVE_SUMMARY,
        "debrief" => DEBRIEF,
        "performance_review" => PERFORMANCE_REVIEW,
        "persona" => PERSONA,
        "consensus" => CONSENSUS,
        "polish" => POLISH,
        "route" => ROUTE,
        "ingest" => INGEST,
        _ => {
            debug!("get_embedded: no match found");
            return None;
        }
    };
    Some(found)
}
