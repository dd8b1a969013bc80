mod driver;
mod error;
mod hold;
mod ledger;
mod money;
mod transaction;
mod wallet;

pub use driver::*;
pub use error::*;
pub use hold::*;
pub use ledger::*;
pub use money::*;
pub use transaction::*;
pub use wallet::*;
