pub mod command;
pub mod probe;
pub mod runner;
pub mod settings;
pub mod tool;

pub use command::{ClipInfo, ToolCommand, concat_command, concat_list, merge_command};
pub use probe::{VideoInfo, probe};
pub use runner::run_piped;
pub use settings::MergeSettings;
pub use tool::{ToolVersions, detect_tools};
