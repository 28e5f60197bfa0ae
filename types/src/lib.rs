//! Wire types for the realtime event channel.
//!
//! Every message on the channel is a single JSON object with a `type`
//! discriminator. Outbound messages are [`ClientEvent`]s and inbound ones
//! are [`ServerEvent`]s.

pub mod audio;
pub mod events;
pub mod session;

pub use audio::{ServerVadTurnDetection, TurnDetection};
pub use events::{ClientEvent, ServerEvent};
pub use session::{SessionConfig, SessionConfigurator};
