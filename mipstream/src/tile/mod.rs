//! Resident tile cells and their load lifecycle.
//!
//! A [`Cell`] is one tile's slot in the cache: its geometry, its packed
//! pixel data once loaded, and a small state machine that coordinates the
//! requesters and the fetch workers.
//!
//! # Lifecycle
//!
//! ```text
//!            try_begin_load()           fill()
//!   Empty ───────────────────► Loading ────────► Valid   (terminal)
//!     ▲                           │
//!     │      reset_to_empty()     │ fail()
//!     └───────────────────────────┼────────► Failed
//!                                 │              │
//!                                 └──────────────┘
//!                                  try_begin_load() (retry)
//! ```
//!
//! Pixel data is written exactly once. A `Valid` cell never changes again;
//! invalidation drops the cell from the resident index instead of mutating
//! it, so readers holding an `Arc<Cell>` always see a consistent snapshot.

mod cell;

pub use cell::{Cell, CellState};
