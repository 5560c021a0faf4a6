//! Portabook - Portable Audiobook Library Builder
//!
//! Decrypts proprietary audiobook containers, recovers author, title and
//! chapters from the container report, and splits each book into tagged
//! per-chapter mp3 files with cover art and a playlist. A sibling batch
//! re-containers dashcam clips.

pub mod audiobook;
pub mod cli;
pub mod config;
pub mod dashcam;
pub mod error;
pub mod fs;
pub mod media;
pub mod metadata;
pub mod process;
pub mod workflow;
