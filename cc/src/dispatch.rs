//! The master's turn loop
//!
//! Each iteration checks whether the game is over, waits for any active
//! agent to send an intent, picks one ready agent round-robin, applies its
//! move under the write section and re-opens that agent's move gate only
//! if it can still move. Every mutation is followed by a view rendezvous
//! and the pacing delay.
//!
//! A signal that cuts a gate wait short ends the game as
//! [`FinishReason::Interrupted`]; the finish sequence then never blocks on
//! the gate again.

use std::time::{Duration, Instant};

use eyre::Result;
use gamestate::{SemError, SharedSync, SharedWorld};
use tracing::{debug, info, warn};

use crate::channel::{Intent, IntentSource};
use crate::rendezvous::Rendezvous;
use crate::rules::{self, MoveOutcome};
use crate::signals;

/// Why the game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Every agent is blocked or withdrew
    NoActiveAgents,
    /// No unblocked agent has a free neighbour
    NoLegalMoves,
    /// No valid move within the configured timeout
    Timeout,
    /// SIGINT or SIGTERM
    Interrupted,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinishReason::NoActiveAgents => "no active players",
            FinishReason::NoLegalMoves => "no legal moves left",
            FinishReason::Timeout => "timeout without a valid move",
            FinishReason::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Dispatcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Running,
    Finished(FinishReason),
}

/// Timing knobs for the turn loop
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Pause after every state update
    pub delay: Duration,
    /// Longest stretch without a valid move
    pub timeout: Duration,
    /// Longest single wait for agent input
    pub poll_interval: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(200),
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Runs one game over a seeded world
pub struct Dispatcher<'a, S, R> {
    world: &'a SharedWorld,
    sync: &'a SharedSync,
    source: S,
    observer: R,
    settings: DispatchSettings,
    phase: GamePhase,
    cursor: usize,
    last_valid: Instant,
    shutdown: fn() -> bool,
}

impl<'a, S: IntentSource, R: Rendezvous> Dispatcher<'a, S, R> {
    pub fn new(world: &'a SharedWorld, sync: &'a SharedSync, source: S, observer: R, settings: DispatchSettings) -> Self {
        debug!(?settings, "Dispatcher::new: called");
        Self {
            world,
            sync,
            source,
            observer,
            settings,
            phase: GamePhase::Running,
            cursor: 0,
            last_valid: Instant::now(),
            shutdown: signals::shutdown_requested,
        }
    }

    /// Replace the shutdown check (defaults to the signal flag)
    pub fn with_shutdown_check(mut self, check: fn() -> bool) -> Self {
        self.shutdown = check;
        self
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn observer(&self) -> &R {
        &self.observer
    }

    /// Play until the game ends, then run the finish sequence
    pub fn run(&mut self) -> Result<FinishReason> {
        info!("Dispatcher::run: game started");
        self.observer.frame()?;
        self.last_valid = Instant::now();
        let reason = loop {
            match self.step() {
                Ok(GamePhase::Running) => {}
                Ok(GamePhase::Finished(reason)) => break reason,
                Err(e) if is_interrupted(&e) => {
                    info!("Dispatcher::run: gate wait interrupted");
                    break FinishReason::Interrupted;
                }
                Err(e) => return Err(e),
            }
        };
        self.finish(reason)?;
        Ok(reason)
    }

    /// One loop iteration; returns the phase afterwards
    pub fn step(&mut self) -> Result<GamePhase> {
        if let Some(reason) = self.evaluate_end()? {
            self.phase = GamePhase::Finished(reason);
            return Ok(self.phase);
        }

        let active = self.active_agents()?;
        let remaining = self.settings.timeout.saturating_sub(self.last_valid.elapsed());
        let wait = remaining.min(self.settings.poll_interval);
        let ready = self.source.wait_ready(&active, wait)?;
        let Some(idx) = self.pick(&ready) else {
            return Ok(self.phase);
        };

        match self.source.read_intent(idx)? {
            Intent::Pending => {}
            Intent::Closed => {
                info!(idx, "Player closed its channel, marking blocked");
                self.source.retire(idx);
                {
                    let mut section = self.sync.gate().write()?;
                    let mut world = self.world.write(&mut section)?;
                    if let Some(agent) = world.agent_mut(idx) {
                        agent.mark_blocked();
                    }
                }
                self.observer.frame()?;
            }
            Intent::Move(code) => {
                self.handle_move(idx, code)?;
                self.observer.frame()?;
                if !self.settings.delay.is_zero() {
                    std::thread::sleep(self.settings.delay);
                }
            }
        }
        Ok(self.phase)
    }

    fn handle_move(&mut self, idx: usize, code: u8) -> Result<()> {
        if code > 7 {
            warn!(idx, code, "Unknown direction code, counting as invalid");
        }
        let (outcome, blocked) = {
            let mut section = self.sync.gate().write()?;
            let mut world = self.world.write(&mut section)?;
            let outcome = rules::apply_move(&mut world, idx, code);
            let blocked = world.agent(idx).is_none_or(|a| a.is_blocked());
            (outcome, blocked)
        };
        debug!(idx, code, ?outcome, blocked, "Dispatcher::handle_move: applied");

        if let MoveOutcome::Valid { .. } = outcome {
            self.last_valid = Instant::now();
        }
        if blocked {
            info!(idx, "Player is blocked");
            self.source.retire(idx);
        } else if let Some(gate) = self.sync.move_gate(idx) {
            gate.post()?;
        }
        Ok(())
    }

    /// Round-robin among ready slots starting at the cursor
    fn pick(&mut self, ready: &[usize]) -> Option<usize> {
        if ready.is_empty() {
            return None;
        }
        let count = self.agent_count()?;
        let idx = (0..count)
            .map(|k| (self.cursor + k) % count)
            .find(|i| ready.contains(i))?;
        self.cursor = (idx + 1) % count;
        Some(idx)
    }

    fn agent_count(&self) -> Option<usize> {
        let section = self.sync.gate().read().ok()?;
        let count = self.world.read(&section).agents().len();
        (count > 0).then_some(count)
    }

    fn active_agents(&self) -> Result<Vec<usize>> {
        let section = self.sync.gate().read()?;
        let world = self.world.read(&section);
        Ok(world
            .agents()
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_blocked())
            .map(|(idx, _)| idx)
            .collect())
    }

    /// Whether the game must end now; once finished, always the same answer
    pub fn evaluate_end(&self) -> Result<Option<FinishReason>> {
        if let GamePhase::Finished(reason) = self.phase {
            return Ok(Some(reason));
        }
        if (self.shutdown)() {
            return Ok(Some(FinishReason::Interrupted));
        }
        {
            let section = self.sync.gate().read()?;
            let world = self.world.read(&section);
            let agents = world.agents();
            if agents.iter().all(|a| a.is_blocked()) {
                return Ok(Some(FinishReason::NoActiveAgents));
            }
            if !rules::any_legal_move(&world, agents) {
                return Ok(Some(FinishReason::NoLegalMoves));
            }
        }
        if self.last_valid.elapsed() >= self.settings.timeout {
            return Ok(Some(FinishReason::Timeout));
        }
        Ok(None)
    }

    /// Mark the world finished, close channels, open every closed move gate
    /// and show the final state
    ///
    /// When interrupted the finished flag is only set if the gate is free
    /// right now. Otherwise the gates stay shut and the children are left to
    /// the SIGTERM sent during teardown.
    pub fn finish(&mut self, reason: FinishReason) -> Result<()> {
        info!(%reason, "Dispatcher::finish: game over");
        self.phase = GamePhase::Finished(reason);
        let marked = self.mark_finished(reason == FinishReason::Interrupted)?;
        self.source.close_all();
        let Some(count) = marked else {
            warn!("Gate busy at shutdown, finished flag not set");
            return self.observer.frame();
        };
        for idx in 0..count {
            // Keep gates binary: one still open already lets its player see the flag
            if let Some(gate) = self.sync.move_gate(idx)
                && gate.value()? == 0
            {
                gate.post()?;
            }
        }
        self.observer.frame()
    }

    /// Set the finished flag; the roster size, or None if the gate could not be taken
    fn mark_finished(&self, interrupted: bool) -> Result<Option<usize>> {
        let gate = self.sync.gate();
        let section = if interrupted {
            gate.try_write()?
        } else {
            match gate.write() {
                Ok(section) => Some(section),
                Err(SemError::Interrupted) => gate.try_write()?,
                Err(e) => return Err(e.into()),
            }
        };
        let Some(mut section) = section else {
            return Ok(None);
        };
        let mut world = self.world.write(&mut section)?;
        world.set_finished();
        Ok(Some(world.agents().len()))
    }
}

/// Whether `err` comes from a semaphore wait cut short by a signal
fn is_interrupted(err: &eyre::Report) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<SemError>().is_some_and(SemError::is_interrupted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamestate::{AgentRecord, Board, WorldLayout, occupied_marker};
    use std::collections::VecDeque;

    /// Intents queued per slot; every read is logged
    #[derive(Default)]
    struct Scripted {
        queues: Vec<VecDeque<Intent>>,
        reads: Vec<usize>,
        closed: bool,
    }

    impl Scripted {
        fn new(queues: Vec<Vec<Intent>>) -> Self {
            Self {
                queues: queues.into_iter().map(VecDeque::from).collect(),
                ..Default::default()
            }
        }
    }

    impl IntentSource for Scripted {
        fn wait_ready(&mut self, agents: &[usize], timeout: Duration) -> Result<Vec<usize>> {
            let ready: Vec<usize> = agents
                .iter()
                .copied()
                .filter(|&i| self.queues.get(i).is_some_and(|q| !q.is_empty()))
                .collect();
            if ready.is_empty() {
                std::thread::sleep(timeout);
            }
            Ok(ready)
        }

        fn read_intent(&mut self, idx: usize) -> Result<Intent> {
            self.reads.push(idx);
            Ok(self.queues[idx].pop_front().unwrap_or(Intent::Pending))
        }

        fn retire(&mut self, idx: usize) {
            self.queues[idx].clear();
        }

        fn close_all(&mut self) {
            self.closed = true;
            self.queues.iter_mut().for_each(VecDeque::clear);
        }
    }

    #[derive(Default)]
    struct Counting {
        frames: usize,
    }

    impl Rendezvous for Counting {
        fn frame(&mut self) -> Result<()> {
            self.frames += 1;
            Ok(())
        }
    }

    fn never() -> bool {
        false
    }

    fn settings(timeout_ms: u64) -> DispatchSettings {
        DispatchSettings {
            delay: Duration::ZERO,
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(20),
        }
    }

    /// 10x10 world filled with `fill`, agents at `spots`
    fn world(fill: i32, spots: &[(u16, u16)]) -> (SharedWorld, SharedSync) {
        let layout = WorldLayout::new(10, 10).unwrap();
        let world = SharedWorld::anonymous(layout, spots.len()).unwrap();
        let sync = SharedSync::anonymous().unwrap();
        {
            let mut section = sync.gate().write().unwrap();
            let mut w = world.write(&mut section).unwrap();
            w.cells_mut().fill(fill);
            for (i, &(x, y)) in spots.iter().enumerate() {
                *w.agent_mut(i).unwrap() = AgentRecord::new(&format!("p{}", i), x, y);
                w.set_cell(x as i32, y as i32, occupied_marker(i));
            }
        }
        (world, sync)
    }

    fn agents(world: &SharedWorld, sync: &SharedSync) -> Vec<AgentRecord> {
        let section = sync.gate().read().unwrap();
        world.read(&section).agents().to_vec()
    }

    #[test]
    fn test_single_move_scenario() {
        let (world, sync) = world(0, &[(0, 0)]);
        {
            let mut section = sync.gate().write().unwrap();
            world.write(&mut section).unwrap().set_cell(1, 0, 5);
        }
        let gate = sync.move_gate(0).unwrap();
        assert!(gate.try_wait().unwrap());

        let mut source = Scripted::new(vec![vec![Intent::Move(2)]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(1000)).with_shutdown_check(never);
        let reason = dispatcher.run().unwrap();

        assert_eq!(reason, FinishReason::NoActiveAgents);
        // initial frame, the move, the final frame
        assert_eq!(dispatcher.observer().frames, 3);
        let a = agents(&world, &sync)[0];
        assert_eq!((a.x, a.y, a.score, a.valid_moves, a.invalid_moves), (1, 0, 5, 1, 0));
        assert!(a.is_blocked());
        let section = sync.gate().read().unwrap();
        assert!(world.read(&section).finished());
    }

    #[test]
    fn test_gate_reopened_only_for_unblocked_agent() {
        let (world, sync) = world(3, &[(5, 5)]);
        let gate = sync.move_gate(0).unwrap();
        assert!(gate.try_wait().unwrap());

        let mut source = Scripted::new(vec![vec![Intent::Move(2)]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(1000)).with_shutdown_check(never);
        assert_eq!(dispatcher.step().unwrap(), GamePhase::Running);
        assert_eq!(gate.value().unwrap(), 1);
    }

    #[test]
    fn test_round_robin_between_ready_agents() {
        let (world, sync) = world(1, &[(2, 2), (7, 7)]);
        let moves = vec![Intent::Move(4); 3];
        let mut source = Scripted::new(vec![moves.clone(), moves]);
        {
            let mut dispatcher = Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(1000))
                .with_shutdown_check(never);
            for _ in 0..6 {
                dispatcher.step().unwrap();
            }
        }
        assert_eq!(source.reads, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_closed_agent_is_blocked_while_other_continues() {
        let (world, sync) = world(2, &[(1, 1), (8, 8)]);
        let mut source = Scripted::new(vec![vec![Intent::Move(2); 4], vec![Intent::Closed]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(100)).with_shutdown_check(never);
        let reason = dispatcher.run().unwrap();
        assert_eq!(reason, FinishReason::Timeout);

        let roster = agents(&world, &sync);
        assert_eq!((roster[0].valid_moves, roster[0].score), (4, 8));
        assert!(!roster[0].is_blocked());
        assert!(roster[1].is_blocked());
        assert_eq!((roster[1].valid_moves, roster[1].invalid_moves), (0, 0));
        assert!(source.closed);
    }

    #[test]
    fn test_timeout_without_valid_moves() {
        let (world, sync) = world(4, &[(0, 0), (9, 9)]);
        // only invalid intents: off the top edge
        let mut source = Scripted::new(vec![vec![Intent::Move(0); 2], vec![]]);
        let started = Instant::now();
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(150)).with_shutdown_check(never);
        let reason = dispatcher.run().unwrap();
        assert_eq!(reason, FinishReason::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(agents(&world, &sync)[0].invalid_moves, 2);
    }

    #[test]
    fn test_silent_agents_time_out() {
        let (world, sync) = world(6, &[(2, 2), (7, 7)]);
        let mut source = Scripted::new(vec![vec![], vec![]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(100)).with_shutdown_check(never);
        assert_eq!(dispatcher.run().unwrap(), FinishReason::Timeout);
        assert!(source.reads.is_empty());
        let roster = agents(&world, &sync);
        assert!(roster.iter().all(|a| !a.is_blocked() && a.valid_moves == 0));
    }

    #[test]
    fn test_no_legal_moves_ends_immediately() {
        let (world, sync) = world(0, &[(3, 3), (6, 6)]);
        let mut source = Scripted::new(vec![vec![], vec![]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(5000)).with_shutdown_check(never);
        assert_eq!(dispatcher.run().unwrap(), FinishReason::NoLegalMoves);
    }

    #[test]
    fn test_finished_is_idempotent() {
        let (world, sync) = world(0, &[(3, 3)]);
        let mut source = Scripted::new(vec![vec![]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(5000)).with_shutdown_check(never);
        let reason = dispatcher.run().unwrap();
        for _ in 0..3 {
            assert_eq!(dispatcher.evaluate_end().unwrap(), Some(reason));
            assert_eq!(dispatcher.step().unwrap(), GamePhase::Finished(reason));
        }
    }

    #[test]
    fn test_blocked_agent_gate_stays_closed() {
        let (world, sync) = world(0, &[(0, 0)]);
        {
            let mut section = sync.gate().write().unwrap();
            world.write(&mut section).unwrap().set_cell(1, 0, 5);
        }
        let gate = sync.move_gate(0).unwrap();
        assert!(gate.try_wait().unwrap());

        let mut source = Scripted::new(vec![vec![Intent::Move(2)]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(1000)).with_shutdown_check(never);
        assert_eq!(dispatcher.step().unwrap(), GamePhase::Running);
        assert!(agents(&world, &sync)[0].is_blocked());
        assert_eq!(gate.value().unwrap(), 0);

        // no more turns for it; only the finish sequence opens the gate
        assert_eq!(dispatcher.step().unwrap(), GamePhase::Finished(FinishReason::NoActiveAgents));
        assert_eq!(gate.value().unwrap(), 0);
        dispatcher.finish(FinishReason::NoActiveAgents).unwrap();
        assert_eq!(gate.value().unwrap(), 1);
    }

    #[test]
    fn test_finish_releases_every_gate() {
        let (world, sync) = world(0, &[(1, 1), (5, 5), (8, 8)]);
        // slot 1 never took its turn, its gate is still open
        for idx in [0, 2] {
            assert!(sync.move_gate(idx).unwrap().try_wait().unwrap());
        }
        let mut source = Scripted::new(vec![vec![], vec![], vec![]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(5000)).with_shutdown_check(never);
        dispatcher.run().unwrap();
        for idx in 0..3 {
            assert_eq!(sync.move_gate(idx).unwrap().value().unwrap(), 1);
        }
        assert!(!sync.gate().is_held());
    }

    #[test]
    fn test_interrupted_finish_does_not_wait_for_stuck_reader() {
        fn always() -> bool {
            true
        }
        let (world, sync) = world(5, &[(3, 3), (6, 6)]);
        for idx in 0..2 {
            assert!(sync.move_gate(idx).unwrap().try_wait().unwrap());
        }
        // a reader that never leaves, like a player killed mid-read
        let stuck = sync.gate().read().unwrap();

        let mut source = Scripted::new(vec![vec![Intent::Move(2)], vec![]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(5000)).with_shutdown_check(always);
        assert_eq!(dispatcher.run().unwrap(), FinishReason::Interrupted);
        assert_eq!(dispatcher.observer().frames, 2);
        drop(dispatcher);
        assert!(source.closed);

        drop(stuck);
        let section = sync.gate().read().unwrap();
        assert!(!world.read(&section).finished());
        for idx in 0..2 {
            assert_eq!(sync.move_gate(idx).unwrap().value().unwrap(), 0);
        }
    }

    #[test]
    fn test_interrupted_finish_marks_world_when_gate_is_free() {
        fn always() -> bool {
            true
        }
        let (world, sync) = world(5, &[(3, 3)]);
        assert!(sync.move_gate(0).unwrap().try_wait().unwrap());
        let mut source = Scripted::new(vec![vec![]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(5000)).with_shutdown_check(always);
        assert_eq!(dispatcher.run().unwrap(), FinishReason::Interrupted);
        drop(dispatcher);

        let section = sync.gate().read().unwrap();
        assert!(world.read(&section).finished());
        assert_eq!(sync.move_gate(0).unwrap().value().unwrap(), 1);
    }

    #[test]
    fn test_interrupted_gate_error_is_recognised() {
        let err = eyre::Report::new(SemError::Interrupted);
        assert!(is_interrupted(&err));
        assert!(is_interrupted(&err.wrap_err("Failed to enter write section")));
        let other = eyre::Report::new(SemError::Os(nix::errno::Errno::EINVAL));
        assert!(!is_interrupted(&other));
    }

    #[test]
    fn test_shutdown_check_interrupts() {
        fn always() -> bool {
            true
        }
        let (world, sync) = world(5, &[(3, 3)]);
        let mut source = Scripted::new(vec![vec![Intent::Move(2)]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(5000)).with_shutdown_check(always);
        assert_eq!(dispatcher.run().unwrap(), FinishReason::Interrupted);
        assert_eq!(agents(&world, &sync)[0].valid_moves, 0);
    }

    #[test]
    fn test_board_is_unchanged_by_invalid_moves() {
        let (world, sync) = world(4, &[(0, 0)]);
        let before = {
            let section = sync.gate().read().unwrap();
            world.read(&section).cells().to_vec()
        };
        let mut source = Scripted::new(vec![vec![Intent::Move(6), Intent::Move(200)]]);
        let mut dispatcher =
            Dispatcher::new(&world, &sync, &mut source, Counting::default(), settings(5000)).with_shutdown_check(never);
        dispatcher.step().unwrap();
        dispatcher.step().unwrap();
        drop(dispatcher);
        let section = sync.gate().read().unwrap();
        assert_eq!(world.read(&section).cells(), &before[..]);
        assert_eq!(world.read(&section).agents()[0].invalid_moves, 2);
    }
}
