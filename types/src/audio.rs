mod turn_detection;

pub use turn_detection::{ServerVadTurnDetection, TurnDetection};
