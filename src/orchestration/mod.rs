//! Snapshot refresh coordination and the leaderboard query service.

pub mod leaderboard;
pub mod refresh;

pub use leaderboard::{
    LeaderboardError, LeaderboardPage, LeaderboardRequest, LeaderboardRow, LeaderboardService,
};
pub use refresh::{
    CacheCoordinator, RefreshCoordinator, RefreshError, RefreshOutcome, RefreshStatus,
};
