// Steam Web API match endpoints: client, payload decoding and the shared request throttle.

pub mod client;
pub mod models;
pub mod throttle;

pub use client::{MatchSource, SteamClient, SteamError, DEFAULT_STEAM_API_BASE};
pub use models::{MatchPayload, MatchRef};
pub use throttle::{RateLimitSettings, RequestThrottle};
