//! Final standings
//!
//! Agents are ordered by highest score, then fewest valid moves, then
//! fewest invalid moves. A full tie for first place means there is no winner.

use std::cmp::Ordering;

use crate::world::AgentRecord;

/// One agent's place in the final ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    /// Roster slot
    pub index: usize,
    pub name: String,
    pub score: u32,
    pub valid_moves: u32,
    pub invalid_moves: u32,
}

fn rank(a: &AgentRecord, b: &AgentRecord) -> Ordering {
    b.score
        .cmp(&a.score)
        .then(a.valid_moves.cmp(&b.valid_moves))
        .then(a.invalid_moves.cmp(&b.invalid_moves))
}

/// All agents, best first; ties keep roster order
pub fn standings(agents: &[AgentRecord]) -> Vec<Standing> {
    let mut order: Vec<usize> = (0..agents.len()).collect();
    order.sort_by(|&a, &b| rank(&agents[a], &agents[b]));
    order
        .into_iter()
        .map(|index| {
            let a = &agents[index];
            Standing {
                index,
                name: a.name(),
                score: a.score,
                valid_moves: a.valid_moves,
                invalid_moves: a.invalid_moves,
            }
        })
        .collect()
}

/// Roster slot of the winner, or None on an empty roster or a full tie for first
pub fn winner(agents: &[AgentRecord]) -> Option<usize> {
    let order = standings(agents);
    let first = order.first()?;
    match order.get(1) {
        Some(second) if rank(&agents[first.index], &agents[second.index]) == Ordering::Equal => None,
        _ => Some(first.index),
    }
}
