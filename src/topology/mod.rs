//! Topology Module
//!
//! Raw node reports, the dual-cutoff topology view built from them, and the
//! snapshot store with its refresh driver.

pub mod events;
pub mod node;
pub mod refresh;
pub mod store;
pub mod view;

pub use events::*;
pub use node::*;
pub use refresh::*;
pub use store::*;
pub use view::*;
