//! # Playback Orchestration
//!
//! The playback controller is the state machine the HTTP layer drives. It owns
//! the last synthesized audio, the shared output sink and the active session.
//!
//! ## Controller States:
//! - **Idle**: Nothing in flight, nothing playing
//! - **Synthesizing**: Waiting for the remote speech call
//! - **Playing**: A session is active on the sink
//! - **Errored**: The last attempt failed; the next play retries
//!
//! ## Concurrency Model:
//! The controller runs as a single tokio task. Everything that happens to it
//! (user intents, synthesis results, sink completions) arrives as a
//! `ControllerEvent` on one channel and is applied by one synchronous function,
//! so no state is ever mutated from two places at once.

pub mod controller;

pub use controller::{ControllerEvent, ControllerHandle, ControllerStatus, PlaybackController, PlaybackState};
