pub mod profile_sync;
pub mod realtime;
