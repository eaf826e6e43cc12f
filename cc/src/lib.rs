//! ChompChamps - multi-process grid collection game
//!
//! One master process owns a shared board and a set of player processes,
//! plus an optional view. Players read the board, pick a direction and
//! write a single byte to their stdout pipe; the master validates and
//! applies moves one at a time under the shared writer section, and the
//! view renders a snapshot after every update.
//!
//! # Modules
//!
//! - [`lifecycle`] - creates shared regions, spawns children, tears everything down
//! - [`dispatch`] - the master's turn loop
//! - [`rules`] - move validation and application
//! - [`channel`] - per-player intent pipes and readiness polling
//! - [`rendezvous`] - notify/ack handshake with the view
//! - [`client`] - attach-side sessions used by players and the view
//! - [`config`] / [`cli`] - configuration file and command-line surface

pub mod board;
pub mod channel;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod logging;
pub mod render;
pub mod rendezvous;
pub mod rules;
pub mod signals;
pub mod strategy;

pub use channel::{Intent, IntentSource, PipeChannels};
pub use client::{AgentSession, AttachPolicy, ObserverSession, Turn};
pub use config::Config;
pub use dispatch::{DispatchSettings, Dispatcher, FinishReason, GamePhase};
pub use lifecycle::{ChildExit, GameHost, GameReport};
pub use rendezvous::{NoObserver, ObserverLink, Rendezvous};
pub use rules::{MoveOutcome, apply_move};
