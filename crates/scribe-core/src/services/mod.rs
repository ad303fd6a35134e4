pub mod audio;
pub mod subtitle;
pub mod summary;
