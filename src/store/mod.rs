//! Rule persistence behind the `RuleStore` trait.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlRuleStore;
pub use memory::MemoryRuleStore;
pub use traits::{ResponseClaim, RuleStore};
