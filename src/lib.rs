// Declare the library modules
pub mod error;
pub mod paths;
pub mod persist;
pub mod progress;
pub mod snapshot;

// Re-export the items experiment scripts touch constantly
pub use error::{ChannelError, HardwareUnavailable, RangeError, RangeSide};
pub use persist::{
    load_bin, load_bin_gz, load_json, load_mat, save_bin, save_bin_gz, save_json, save_mat,
    MatFile, MatVar,
};
pub use progress::{monitor_url, print_progress, print_wait, SweepProgress};
pub use snapshot::{HardwareHandle, HardwareReference, JsonSnapshot};
