/// Review Desk
///
/// Moderation workflow for student reflections, images and learning entries.
/// Students propose changes, staff approve or reject them, and only approved
/// changes reach the published content.

pub mod api;
pub mod audit;
pub mod auth;
pub mod comments;
pub mod config;
pub mod content;
pub mod context;
pub mod db;
pub mod error;
pub mod moderation;
pub mod rate_limit;
pub mod roles;
pub mod server;

pub use context::AppContext;
pub use error::{DeskError, DeskResult};
