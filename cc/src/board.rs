//! Initial board layout

use std::f64::consts::PI;

use gamestate::{AgentRecord, Board, MAX_REWARD, MIN_REWARD, WorldMut, occupied_marker};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Starting cells for `count` agents, spread on an ellipse around the centre
///
/// Positions are distinct and inside the board. A lone agent starts in the
/// middle.
pub fn start_positions(width: u16, height: u16, count: usize) -> Vec<(u16, u16)> {
    let (w, h) = (width as f64, height as f64);
    let (cx, cy) = ((w - 1.0) / 2.0, (h - 1.0) / 2.0);
    let (rx, ry) = (w / 3.0, h / 3.0);

    let mut taken: Vec<(u16, u16)> = Vec::with_capacity(count);
    for i in 0..count {
        let spot = if count == 1 {
            (cx.round() as u16, cy.round() as u16)
        } else {
            let angle = 2.0 * PI * i as f64 / count as f64 - PI / 2.0;
            let x = (cx + rx * angle.cos()).round().clamp(0.0, w - 1.0) as u16;
            let y = (cy + ry * angle.sin()).round().clamp(0.0, h - 1.0) as u16;
            (x, y)
        };
        let spot = if taken.contains(&spot) {
            first_untaken(width, height, &taken).unwrap_or(spot)
        } else {
            spot
        };
        taken.push(spot);
    }
    taken
}

fn first_untaken(width: u16, height: u16, taken: &[(u16, u16)]) -> Option<(u16, u16)> {
    (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .find(|spot| !taken.contains(spot))
}

/// Fill every cell with a reward and place the named agents
///
/// Must run inside the write section before any agent is released. The
/// same seed always yields the same rewards.
pub fn seed_board(world: &mut WorldMut<'_>, seed: u64, names: &[String]) {
    debug!(seed, agents = names.len(), "seed_board: called");
    let mut rng = StdRng::seed_from_u64(seed);
    for cell in world.cells_mut() {
        *cell = rng.random_range(MIN_REWARD..=MAX_REWARD);
    }

    let (width, height) = (world.width(), world.height());
    for (idx, (name, (x, y))) in names
        .iter()
        .zip(start_positions(width, height, names.len()))
        .enumerate()
    {
        let Some(record) = world.agent_mut(idx) else {
            break;
        };
        *record = AgentRecord::new(name, x, y);
        world.set_cell(x as i32, y as i32, occupied_marker(idx));
    }
}

/// Display name for the agent launched from `path`
pub fn agent_name(path: &std::path::Path, idx: usize) -> String {
    let stem = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    if stem.is_empty() {
        format!("player{}", idx)
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamestate::{MAX_AGENTS, SharedSync, SharedWorld, WorldLayout, is_reward, marker_owner};
    use std::collections::HashSet;

    #[test]
    fn test_positions_distinct_and_in_bounds() {
        for (w, h) in [(10u16, 10u16), (10, 40), (57, 13), (1000, 1000)] {
            for count in 1..=MAX_AGENTS {
                let spots = start_positions(w, h, count);
                assert_eq!(spots.len(), count);
                let unique: HashSet<_> = spots.iter().collect();
                assert_eq!(unique.len(), count, "{}x{} with {}", w, h, count);
                assert!(spots.iter().all(|&(x, y)| x < w && y < h));
            }
        }
    }

    #[test]
    fn test_single_agent_starts_centred() {
        assert_eq!(start_positions(11, 11, 1), vec![(5, 5)]);
    }

    #[test]
    fn test_seed_board() {
        let layout = WorldLayout::new(10, 10).unwrap();
        let world = SharedWorld::anonymous(layout, 3).unwrap();
        let sync = SharedSync::anonymous().unwrap();
        let names: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

        let mut section = sync.gate().write().unwrap();
        let mut w = world.write(&mut section).unwrap();
        seed_board(&mut w, 42, &names);

        let markers: Vec<_> = w.cells().iter().filter_map(|&c| marker_owner(c)).collect();
        assert_eq!(markers.len(), 3);
        assert_eq!(w.cells().iter().filter(|&&c| is_reward(c)).count(), 97);
        for (idx, agent) in w.agents().iter().enumerate() {
            assert_eq!(agent.name(), names[idx]);
            assert_eq!(w.cell(agent.x as i32, agent.y as i32), occupied_marker(idx));
            assert_eq!((agent.score, agent.valid_moves, agent.invalid_moves), (0, 0, 0));
            assert!(!agent.is_blocked());
        }
    }

    #[test]
    fn test_same_seed_same_rewards() {
        let layout = WorldLayout::new(12, 10).unwrap();
        let sync = SharedSync::anonymous().unwrap();
        let cells = |seed| {
            let world = SharedWorld::anonymous(layout, 1).unwrap();
            let mut section = sync.gate().write().unwrap();
            let mut w = world.write(&mut section).unwrap();
            seed_board(&mut w, seed, &["x".to_string()]);
            w.cells().to_vec()
        };
        assert_eq!(cells(7), cells(7));
        assert_ne!(cells(7), cells(8));
    }

    #[test]
    fn test_agent_name() {
        assert_eq!(agent_name(std::path::Path::new("./bin/player"), 0), "player");
        assert_eq!(agent_name(std::path::Path::new(""), 3), "player3");
    }
}
