//! Plan types handed from the ordering strategy to the renderer.

use crate::cache::CacheHints;

/// One resolution level's slot in a [`RenderPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPlan {
    /// The resolution level this entry refers to.
    pub level: u32,
    /// Position in the render pass sequence, 0 renders first.
    pub render_order: u32,
    /// Position in the prefetch sequence, 0 is requested first.
    pub prefetch_order: u32,
    /// Hints for tile requests issued while rendering this level.
    pub render_hints: CacheHints,
    /// Hints for prefetch requests at this level.
    pub prefetch_hints: CacheHints,
}

/// The levels to touch this frame and the order to touch them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPlan {
    /// Planned levels in ascending level order.
    pub levels: Vec<LevelPlan>,
    /// True when the plan must be recomputed before the next frame even
    /// if the view does not change again.
    pub single_frame_only: bool,
}

impl RenderPlan {
    /// Levels in the order render passes should run.
    pub fn render_sequence(&self) -> Vec<&LevelPlan> {
        let mut sequence: Vec<&LevelPlan> = self.levels.iter().collect();
        sequence.sort_by_key(|entry| entry.render_order);
        sequence
    }

    /// Levels in the order prefetch requests should be issued.
    pub fn prefetch_sequence(&self) -> Vec<&LevelPlan> {
        let mut sequence: Vec<&LevelPlan> = self.levels.iter().collect();
        sequence.sort_by_key(|entry| entry.prefetch_order);
        sequence
    }
}
