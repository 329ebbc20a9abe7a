pub mod packet;
pub mod scoring;
pub mod seed;
pub mod select;

pub use packet::{build_packets, BuildOutcome, PacketBudgets};
pub use scoring::{score_file, score_files};
pub use seed::{resolve_seed, SeedInputs};
pub use select::select;
