pub mod detect;
pub mod export;
pub mod import;
pub mod opener;
pub mod stream;
pub mod vendor_a;
pub mod vendor_b;

pub use detect::{detect_format, FormatLock};
pub use import::read_cleaned_messages;
pub use opener::{open_source, OpenedSource};
pub use stream::JsonArrayStreamer;
