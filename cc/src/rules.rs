//! Move validation and application
//!
//! Everything here runs inside the master's write section.

use gamestate::{Board, WorldMut, direction_offset, occupied_marker};
use tracing::debug;

/// What happened to one intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Agent moved and collected `reward`
    Valid { reward: i32 },
    /// Target was off the board or not free; counted against the agent
    Invalid,
    /// Unknown or already blocked agent; nothing changed
    Rejected,
}

impl MoveOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, MoveOutcome::Valid { .. })
    }
}

/// Validate and apply one direction code for agent `idx`
///
/// A valid move collects the target's reward, bumps the valid counter and
/// writes the agent's occupied marker into the target. The cell left behind
/// keeps its marker and is never free again. An invalid move only bumps the
/// invalid counter. Either way the agent's blocked flag is re-evaluated.
pub fn apply_move(world: &mut WorldMut<'_>, idx: usize, code: u8) -> MoveOutcome {
    let Some(agent) = world.agent(idx) else {
        debug!(idx, "apply_move: unknown agent");
        return MoveOutcome::Rejected;
    };
    if agent.is_blocked() {
        debug!(idx, "apply_move: agent already blocked");
        return MoveOutcome::Rejected;
    }

    let (x, y) = agent.position();
    let (dx, dy) = direction_offset(code);
    let (tx, ty) = (x + dx, y + dy);

    if !world.is_free(tx, ty) {
        if let Some(agent) = world.agent_mut(idx) {
            agent.invalid_moves += 1;
        }
        debug!(idx, code, tx, ty, "apply_move: invalid target");
        refresh_blocked(world, idx);
        return MoveOutcome::Invalid;
    }

    let reward = world.cell(tx, ty);
    world.set_cell(tx, ty, occupied_marker(idx));
    if let Some(agent) = world.agent_mut(idx) {
        agent.score += reward as u32;
        agent.valid_moves += 1;
        agent.x = tx as u16;
        agent.y = ty as u16;
    }
    debug!(idx, code, tx, ty, reward, "apply_move: moved");
    refresh_blocked(world, idx);
    MoveOutcome::Valid { reward }
}

/// Mark agent `idx` blocked when none of its neighbours is free; returns the flag
pub fn refresh_blocked(world: &mut WorldMut<'_>, idx: usize) -> bool {
    let Some(agent) = world.agent(idx) else {
        return true;
    };
    if agent.is_blocked() {
        return true;
    }
    let (x, y) = agent.position();
    if world.has_free_neighbor(x, y) {
        return false;
    }
    if let Some(agent) = world.agent_mut(idx) {
        agent.mark_blocked();
    }
    debug!(idx, x, y, "refresh_blocked: agent is blocked");
    true
}

/// Whether some unblocked agent still has a free neighbour
pub fn any_legal_move<B: Board>(board: &B, agents: &[gamestate::AgentRecord]) -> bool {
    agents
        .iter()
        .filter(|a| !a.is_blocked())
        .any(|a| board.has_free_neighbor(a.x as i32, a.y as i32))
}
