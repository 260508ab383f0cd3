//! API route handlers, grouped by resource

mod audit;
mod jobs;
mod patterns;
mod reference;
mod transactions;

pub use audit::*;
pub use jobs::*;
pub use patterns::*;
pub use reference::*;
pub use transactions::*;
