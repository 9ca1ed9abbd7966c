//! Archive infrastructure

pub mod archive_store;
