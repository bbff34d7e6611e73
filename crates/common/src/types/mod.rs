mod identity;
mod product;
mod task;
mod worker;

pub use identity::*;
pub use product::*;
pub use task::*;
pub use worker::*;
