pub mod health;
pub mod ready;
pub mod diagnostics;
pub mod messages;
pub mod publish;
pub mod presence;
pub mod error;

pub use health::*;
pub use ready::*;
pub use diagnostics::*;
pub use messages::*;
pub use publish::*;
pub use presence::*;
pub use error::*;
