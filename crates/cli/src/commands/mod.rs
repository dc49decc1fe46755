pub mod binaries;
pub mod run_bin;
pub mod settings;
pub mod util;

pub use binaries::*;
pub use run_bin::*;
pub use settings::*;
pub use util::*;
