//! MCP tool implementations.

mod conversations;
mod export;
mod files;
mod project;

// project
pub use project::{
    execute_project_info, FileStats, ProjectInfoInput, ProjectInfoOutput,
};

// files
pub use files::{
    execute_list_files, ListFilesInput, ListFilesOutput, PriorityGroups, ScoredFileOutput,
};

// conversations
pub use conversations::{
    execute_list_workspaces, execute_recall, execute_search, ListWorkspacesOutput, RecallInput,
    RecallOutput, RecallParameters, SearchInput, SearchOutput, TextFormat,
};

// export
pub use export::{execute_export, ExportFormat, ExportInput, ExportOutput};
