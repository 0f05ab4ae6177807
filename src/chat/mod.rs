pub mod controller;
pub mod conversation;

pub use controller::{ChatController, ControllerError, SessionView};
pub use conversation::{Message, GREETING};
