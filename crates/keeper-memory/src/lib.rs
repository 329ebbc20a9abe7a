pub mod compact;

pub use compact::{compact_candidates, shape_lorebook};
