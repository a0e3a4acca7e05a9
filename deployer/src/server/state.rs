//! Server state

use std::sync::Arc;

use crate::filesys::dir::Dir;
use crate::registry::Registry;

/// Server state shared across handlers
pub struct ServerState {
    pub registry: Arc<Registry>,

    /// Where `<userId>_<fileId>` uploads are kept
    pub uploads_dir: Dir,
}

impl ServerState {
    pub fn new(registry: Arc<Registry>, uploads_dir: Dir) -> Self {
        Self {
            registry,
            uploads_dir,
        }
    }
}
