pub mod chain;
pub mod liquid;
pub mod logging;
pub mod nursery;
pub mod swap;
pub mod wallet;
