pub mod auth;
pub mod client;
pub mod game;
pub mod leaderboard;
pub mod params;
pub mod protocol;
pub mod server;
