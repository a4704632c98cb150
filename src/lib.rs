pub mod chunk;
pub mod config;
pub mod convert;
pub mod folder;
pub mod normalize;
pub mod relocate;
pub mod sheet;
pub mod utils;

pub use config::ConvertConfig;
pub use convert::{convert_file, FileOutcome};
pub use folder::{convert_folder, FolderReport};
