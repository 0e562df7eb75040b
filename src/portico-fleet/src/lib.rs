pub mod fleet;
pub mod health;
pub mod provisioner;
pub mod table;

#[cfg(test)]
mod stub;

pub use fleet::*;
pub use health::*;
pub use provisioner::*;
pub use table::*;
