//! Text rendering of a world snapshot for the view

use std::fmt::Write;

use colored::{Color, Colorize};
use gamestate::{AgentRecord, Board, WorldSnapshot, is_reward, marker_owner, winner};

const PALETTE: [Color; 9] = [
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::BrightRed,
    Color::BrightGreen,
    Color::BrightBlue,
];

fn agent_color(idx: usize) -> Color {
    PALETTE[idx % PALETTE.len()]
}

fn cell_text(snapshot: &WorldSnapshot, x: i32, y: i32) -> String {
    let cell = snapshot.cell(x, y);
    if is_reward(cell) {
        return format!(" {} ", cell);
    }
    let Some(owner) = marker_owner(cell) else {
        return " ? ".to_string();
    };
    let label = format!("P{}", owner);
    let head = snapshot
        .agents
        .get(owner)
        .is_some_and(|a| a.position() == (x, y));
    let colored = if head {
        label.color(agent_color(owner)).bold()
    } else {
        label.color(agent_color(owner)).dimmed()
    };
    format!("{} ", colored)
}

fn agent_line(idx: usize, agent: &AgentRecord) -> String {
    let label = format!("P{} {}", idx, agent.name()).color(agent_color(idx));
    let blocked = if agent.is_blocked() {
        " [BLOCKED]".red().to_string()
    } else {
        String::new()
    };
    format!(
        "  {}: Position({},{}) Score={} Valid={} Invalid={}{}",
        label, agent.x, agent.y, agent.score, agent.valid_moves, agent.invalid_moves, blocked
    )
}

/// Full text frame: header, roster, board and, once finished, the result
pub fn render_frame(snapshot: &WorldSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", "=== ChompChamps Game State ===".bold());
    let _ = writeln!(out, "Board Size: {}x{}", snapshot.width, snapshot.height);
    let _ = writeln!(out, "Players: {}", snapshot.agents.len());
    let _ = writeln!(
        out,
        "Game Finished: {}\n",
        if snapshot.finished { "Yes" } else { "No" }
    );

    let _ = writeln!(out, "Players Status:");
    for (idx, agent) in snapshot.agents.iter().enumerate() {
        let _ = writeln!(out, "{}", agent_line(idx, agent));
    }

    let _ = writeln!(out, "\nBoard:");
    out.push_str("   ");
    for x in 0..snapshot.width {
        let _ = write!(out, "{:2} ", x);
    }
    out.push('\n');
    for y in 0..snapshot.height as i32 {
        let _ = write!(out, "{:2} ", y);
        for x in 0..snapshot.width as i32 {
            out.push_str(&cell_text(snapshot, x, y));
        }
        out.push('\n');
    }
    out.push('\n');

    if snapshot.finished {
        let _ = writeln!(out, "{}", "=== GAME FINISHED ===".bold().green());
        match winner(&snapshot.agents).and_then(|idx| snapshot.agents.get(idx)) {
            Some(best) => {
                let _ = writeln!(out, "Winner: {} with score {}", best.name(), best.score);
            }
            None => {
                let _ = writeln!(out, "Game ended with no winner");
            }
        }
    }
    out.push_str("================================\n");
    out
}
