pub mod health;
pub mod diagnostics;
pub mod publish;
pub mod presence;

pub use health::*;
pub use diagnostics::*;
pub use publish::*;
pub use presence::*;
