pub mod attendance;
pub mod core;
pub mod ordered;
pub mod quests;
pub mod setup;
