pub mod engine;
pub mod leaderboard;
pub mod pricing;
pub mod prize;
pub mod registry;
pub mod rounds;
pub mod sell_queue;
pub mod settlement;
pub mod types;
