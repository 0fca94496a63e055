pub mod audit;
pub mod blacklist;
pub mod federation;
pub mod hooks;
pub mod outbox;
pub mod patch;
pub mod retry;
pub mod thumbnails;
pub mod torrent;
pub mod video_update;
