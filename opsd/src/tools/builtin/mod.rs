//! Built-in read-only tools

mod fetch;
mod list_directory;
mod read_file;

pub use fetch::FetchTool;
pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;
