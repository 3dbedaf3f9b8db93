pub mod events;
pub mod terminal;
