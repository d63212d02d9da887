//! The task descriptor data model (spec §3).

use std::collections::BTreeMap;

use pta_transport::FileUri;
use serde::{Deserialize, Serialize};

/// How task parameters are delivered to the task process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMethod {
    Stdin,
    Environment,
    Both,
    Powershell,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub uri: FileUri,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskDescriptor {
    pub task: String,
    pub files: Vec<FileEntry>,
    pub input: String,
    #[serde(default)]
    pub input_method: Option<InputMethod>,
}

impl TaskDescriptor {
    /// The task's input parsed as a JSON object of string values, used for
    /// `environment`/`both` input methods. Errors if `input` is not a JSON
    /// object of strings.
    pub fn input_as_string_map(&self) -> Result<BTreeMap<String, String>, serde_json::Error> {
        serde_json::from_str(&self.input)
    }
}
