//! Level selection from the screen transform.

use std::sync::Arc;

use crate::cache::{CacheHints, LoadingStrategy};
use crate::ordering::plan::{LevelPlan, RenderPlan};
use crate::pyramid::{Affine3, PyramidModel};

/// Policy knobs for plan computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingConfig {
    /// Collapse the plan to two levels for one frame after a time point
    /// change. When false, a time point change is planned like any other
    /// frame.
    pub two_pass_on_time_change: bool,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            two_pass_on_time_change: true,
        }
    }
}

impl OrderingConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether a time point change triggers the two-level plan.
    pub fn with_two_pass_on_time_change(mut self, enabled: bool) -> Self {
        self.two_pass_on_time_change = enabled;
        self
    }
}

/// Picks which resolution levels to render and prefetch each frame.
///
/// Holds no mutable state, so identical inputs always produce identical
/// plans.
pub struct MipmapOrdering {
    pyramid: Arc<PyramidModel>,
    config: OrderingConfig,
}

impl MipmapOrdering {
    /// Creates an ordering over `pyramid` with the default configuration.
    pub fn new(pyramid: Arc<PyramidModel>) -> Self {
        Self::with_config(pyramid, OrderingConfig::default())
    }

    /// Creates an ordering with explicit policy knobs.
    pub fn with_config(pyramid: Arc<PyramidModel>, config: OrderingConfig) -> Self {
        Self { pyramid, config }
    }

    /// Finest level whose pixels span at least one screen pixel under
    /// `screen_transform`.
    ///
    /// Finer levels would be oversampled. If even the coarsest level's
    /// pixels fall below one screen pixel, the coarsest level is returned.
    pub fn best_level(&self, screen_transform: &Affine3) -> u32 {
        for descriptor in self.pyramid.levels() {
            if screen_footprint(screen_transform, &descriptor.transform) >= 1.0 {
                return descriptor.level;
            }
        }
        self.pyramid.num_levels() - 1
    }

    /// Computes the render/prefetch plan for one frame.
    ///
    /// Steady viewing (`timepoint == previous_timepoint`) covers every
    /// level from the best to the coarsest: fine levels render first,
    /// coarse levels prefetch first so a full-frame fallback is resident
    /// early. The first frame after a time point change plans only the
    /// best and the coarsest level, since intermediate levels are unlikely
    /// to be resident; such a plan expires after one frame.
    pub fn compute_plan(
        &self,
        screen_transform: &Affine3,
        timepoint: u32,
        previous_timepoint: u32,
    ) -> RenderPlan {
        let best = self.best_level(screen_transform);
        if timepoint != previous_timepoint && self.config.two_pass_on_time_change {
            self.transition_plan(best)
        } else {
            self.steady_plan(best)
        }
    }

    fn steady_plan(&self, best: u32) -> RenderPlan {
        let num_levels = self.pyramid.num_levels();
        let coarsest = num_levels - 1;
        let levels = (best..num_levels)
            .map(|level| {
                let priority = (num_levels - 1 - level) as i32;
                LevelPlan {
                    level,
                    render_order: level - best,
                    prefetch_order: coarsest - level,
                    render_hints: CacheHints::new(
                        LoadingStrategy::Volatile,
                        priority,
                        level == best,
                    ),
                    prefetch_hints: CacheHints::volatile(priority),
                }
            })
            .collect();
        RenderPlan {
            levels,
            single_frame_only: false,
        }
    }

    fn transition_plan(&self, best: u32) -> RenderPlan {
        let num_levels = self.pyramid.num_levels();
        let coarsest = num_levels - 1;
        // The coarsest level jumps to top priority for this one frame.
        let top_priority = (num_levels - 1) as i32;
        let mut levels = Vec::with_capacity(2);
        if best == coarsest {
            levels.push(LevelPlan {
                level: coarsest,
                render_order: 0,
                prefetch_order: 0,
                render_hints: CacheHints::volatile(top_priority),
                prefetch_hints: CacheHints::volatile(top_priority),
            });
        } else {
            let best_priority = (num_levels - 1 - best) as i32;
            levels.push(LevelPlan {
                level: best,
                render_order: 0,
                prefetch_order: 1,
                render_hints: CacheHints::volatile(best_priority),
                prefetch_hints: CacheHints::volatile(best_priority),
            });
            levels.push(LevelPlan {
                level: coarsest,
                render_order: 1,
                prefetch_order: 0,
                render_hints: CacheHints::volatile(top_priority),
                prefetch_hints: CacheHints::volatile(top_priority),
            });
        }
        RenderPlan {
            levels,
            single_frame_only: true,
        }
    }
}

/// Screen-space extent of one of the level's pixels, as the smaller of the
/// projected lengths of its x and y unit vectors.
fn screen_footprint(screen: &Affine3, level_transform: &Affine3) -> f64 {
    let combined = screen.concatenate(level_transform);
    let x = combined.apply_vector([1.0, 0.0, 0.0]);
    let y = combined.apply_vector([0.0, 1.0, 0.0]);
    planar_length(x).min(planar_length(y))
}

fn planar_length(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1]).sqrt()
}
