mod account;
mod card;
mod constants;
mod session;

pub use account::*;
pub use card::*;
pub use constants::*;
pub use session::*;
