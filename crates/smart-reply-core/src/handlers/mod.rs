pub mod events;
pub mod health;
pub mod memory;
pub mod queue;
