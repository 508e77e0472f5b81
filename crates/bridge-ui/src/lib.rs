//! Diff-based renderer built on top of the bridge core.

mod component;
mod context;
mod diff;
mod renderer;
mod style;

pub use component::{ComponentSpec, ComponentTable};
pub use context::NativeContext;
pub use diff::{diff_against_effective, diff_props, merge_props};
pub use renderer::{Renderer, MEASURE_VIEW_MESSAGE_TYPE};
pub use style::{flatten_style, style_props, StyleCache, StyleCacheStats};
