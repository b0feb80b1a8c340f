//! Workspace tuning knobs.
//!
//! # Responsibility
//! - Centralize canvas geometry and default labels used by the workspace.
//! - Stay serde-friendly so hosts can load it from their own settings file.
//!
//! # Invariants
//! - Missing fields fall back to [`WorkspaceConfig::default`].

use crate::model::card::Size;
use serde::{Deserialize, Serialize};

const DEFAULT_CONTAINER: Size = Size {
    width: 1200.0,
    height: 600.0,
};
const DEFAULT_CARD: Size = Size {
    width: 280.0,
    height: 160.0,
};
const DEFAULT_SPAWN_AREA: Size = Size {
    width: 400.0,
    height: 300.0,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Canvas size used to bound drags until the host reports a real one.
    pub container: Size,
    /// Fixed footprint of every card.
    pub card: Size,
    /// Title for cards created from the canvas or the create button.
    pub default_title: String,
    /// Label the host shows for the implicit root crumb.
    pub root_label: String,
    /// Area new cards without an explicit position are spread over.
    pub spawn_area: Size,
    /// Diagonal step between consecutive spawn points.
    pub spawn_step: f64,
    /// Drain repository commands right after every mutation.
    ///
    /// Hosts with their own transport turn this off and drive
    /// `poll_commands`/`complete` themselves.
    pub auto_flush: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            container: DEFAULT_CONTAINER,
            card: DEFAULT_CARD,
            default_title: "新卡片".to_string(),
            root_label: "根目录".to_string(),
            spawn_area: DEFAULT_SPAWN_AREA,
            spawn_step: 24.0,
            auto_flush: true,
        }
    }
}
