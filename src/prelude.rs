//! Convenient re-exports for common usage.
//!
//! This module provides a "prelude" that re-exports the most commonly used types
//! from Schwimmen Tracker, allowing you to import them all at once.
//!
//! # Usage
//!
//! ```rust
//! use schwimmen_tracker::prelude::*;
//! ```
//!
//! # What's Included
//!
//! The prelude includes:
//!
//! - **Session types**: [`GameSession`], [`GameBuilder`], [`CommitOutcome`], [`NukeOutcome`]
//! - **Store**: [`RoundStore`], [`InMemoryRoundStore`], [`StatusUpdate`], [`StoreError`]
//! - **Fundamental types**: [`GameId`], [`Participant`], [`ParticipantId`], [`RoundNumber`]
//! - **Game state**: [`RoundSnapshot`], [`GameResult`], [`GameStatus`], [`ActionMode`]
//! - **Conflicts**: [`SurvivorPrompt`], [`ChannelPrompt`], [`ConflictRequest`]
//! - **Event handling**: [`TrackerEvent`], [`EventDrain`]
//! - **Error handling**: [`TrackerError`], [`TrackerResult`], [`PreconditionKind`]
//! - **Configuration**: [`TrackerConfig`]
//!
//! # Example
//!
//! ```rust
//! use schwimmen_tracker::prelude::*;
//!
//! # async fn demo() -> TrackerResult<()> {
//! let store = InMemoryRoundStore::new();
//! store.insert_game(GameId::new("g"));
//!
//! let session = GameBuilder::new(GameId::new("g"))
//!     .with_config(TrackerConfig::lan())
//!     .add_participant(Participant::new("a", "Anna"))?
//!     .add_participant(Participant::new("b", "Ben"))?
//!     .start(store)
//!     .await?;
//!
//! for event in session.events() {
//!     if let TrackerEvent::RolledBack { operation, .. } = event {
//!         eprintln!("{operation} failed, local changes were discarded");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Core session types
pub use crate::sessions::builder::GameBuilder;
pub use crate::sessions::game_session::{CommitOutcome, GameSession, NukeOutcome};

// Remote store
pub use crate::store::memory::InMemoryRoundStore;
pub use crate::store::{RoundStore, StatusUpdate, StoreError};

// Fundamental types
pub use crate::{GameId, Participant, ParticipantId, RoundNumber};

// Game state
pub use crate::snapshot::{GameResult, RoundSnapshot};
pub use crate::{ActionMode, GameStatus};

// Swimmer conflicts
pub use crate::conflict::{ChannelPrompt, ConflictRequest, SurvivorPrompt};

// Event handling
pub use crate::sessions::event_drain::EventDrain;
pub use crate::TrackerEvent;

// Error handling
pub use crate::error::{PreconditionKind, TrackerError, TrackerResult};

// Common configuration types
pub use crate::sessions::config::TrackerConfig;
