pub mod climate;
pub mod history;
pub mod snapshot;
pub mod solar;
pub mod types;

pub use climate::*;
pub use history::*;
pub use snapshot::*;
pub use solar::*;
pub use types::*;
