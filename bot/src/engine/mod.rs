pub mod bot;
pub mod capabilities;
pub mod discovery;
pub mod events;
pub mod membership;
pub mod presence;
pub mod router;
pub mod stats;
