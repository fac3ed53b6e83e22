//! Mipmap level selection for rendering and prefetch.
//!
//! Each frame the renderer asks [`MipmapOrdering`] which resolution levels
//! to touch. The answer is a [`RenderPlan`]: fine levels render first and
//! coarse levels prefetch first during steady viewing, while the first
//! frame after a time point change plans only the best and the coarsest
//! level. Plans are pure functions of their inputs; no I/O happens here.

mod plan;
mod strategy;

pub use plan::{LevelPlan, RenderPlan};
pub use strategy::{MipmapOrdering, OrderingConfig};
