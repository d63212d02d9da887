//! Discovery plugin metadata (spec §6, supplemented feature): the
//! declarative capability advertisement a discovery/RPC layer would read
//! to learn what this subsystem can be asked to do. Not exercised by any
//! other component; kept as a small typed constant so a caller can surface
//! it over whatever protocol it already uses instead of hand-rolling the
//! list elsewhere.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub classes: bool,
    pub facts: bool,
    pub identity: bool,
    pub agents: bool,
    pub compound: bool,
    pub timeout_seconds: u64,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            classes: true,
            facts: true,
            identity: true,
            agents: true,
            compound: true,
            timeout_seconds: 2,
        }
    }
}
