//! Display contracts the engine notifies but never depends on

use std::sync::{Arc, Weak};

/// A view of an effect chain that can redraw itself
pub trait DisplaySurface: Send + Sync {
    /// Rebuild the view after bypass or structural changes
    fn rebuild(&self);
}

/// Parent handle passed to an effect when it opens its editor
pub trait EditorSurface: Send + Sync {
    fn title(&self) -> &str;
}

/// How a chain holds its display surface
pub enum SurfaceHandle {
    /// Destroyed together with the chain
    Owned(Box<dyn DisplaySurface>),
    /// Owned elsewhere; silently skipped once dropped
    Shared(Weak<dyn DisplaySurface>),
}

impl SurfaceHandle {
    pub fn shared(surface: &Arc<dyn DisplaySurface>) -> Self {
        Self::Shared(Arc::downgrade(surface))
    }

    pub fn notify_rebuild(&self) {
        match self {
            Self::Owned(surface) => surface.rebuild(),
            Self::Shared(weak) => {
                if let Some(surface) = weak.upgrade() {
                    surface.rebuild();
                }
            }
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl std::fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owned(_) => f.write_str("SurfaceHandle::Owned"),
            Self::Shared(_) => f.write_str("SurfaceHandle::Shared"),
        }
    }
}
