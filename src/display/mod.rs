//! Display-target resources
//!
//! The output surface is owned by the hosting application. A session acquires it
//! once both graphs exist, hands a [`SurfaceHandle`] to the display graph, and
//! releases it before `stop()` returns.

pub mod present_buffer;
pub mod surface;

use std::sync::Arc;

use crate::frame::{MappedFrame, Timestamp};

pub use present_buffer::PresentBuffer;
pub use surface::{HeadlessPresenter, HeadlessSurface, PresentedFrame};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("surface {0} is already in use")]
    Busy(u64),
    #[error("surface is not available: {0}")]
    Unavailable(String),
}

/// Draws frames on a surface
pub trait FramePresenter: Send + Sync {
    fn present(&self, frame: &MappedFrame<'_>, sequence: u64, pts: Timestamp);
}

/// Opaque handle to an acquired surface
#[derive(Clone)]
pub struct SurfaceHandle {
    id: u64,
    presenter: Arc<dyn FramePresenter>,
}

impl SurfaceHandle {
    pub fn new(id: u64, presenter: Arc<dyn FramePresenter>) -> Self {
        Self { id, presenter }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn presenter(&self) -> &Arc<dyn FramePresenter> {
        &self.presenter
    }
}

impl std::fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceHandle").field("id", &self.id).finish()
    }
}

/// Source of the surface a session renders to
pub trait DisplayTarget: Send {
    fn acquire(&mut self) -> Result<SurfaceHandle, SurfaceError>;

    fn release(&mut self, surface: SurfaceHandle);
}
