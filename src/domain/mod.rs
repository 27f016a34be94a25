pub mod clock;
pub mod models;
pub mod recommendation;
