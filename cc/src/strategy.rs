//! Player move selection

use gamestate::{AgentRecord, Board, DIRECTIONS};

/// Direction towards the best free neighbour
///
/// Highest reward wins; ties go to the lowest direction code. With no free
/// neighbour the answer is 0, which the master will count as invalid.
pub fn choose_greedy<B: Board>(board: &B, me: &AgentRecord) -> u8 {
    let (x, y) = me.position();
    let mut best: Option<(u8, i32)> = None;
    for direction in DIRECTIONS {
        let (dx, dy) = direction.offset();
        if !board.is_free(x + dx, y + dy) {
            continue;
        }
        let reward = board.cell(x + dx, y + dy);
        if best.is_none_or(|(_, r)| reward > r) {
            best = Some((direction.code(), reward));
        }
    }
    best.map(|(code, _)| code).unwrap_or(0)
}
