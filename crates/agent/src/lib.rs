pub mod controller;
pub mod merger;
pub mod reaper;
pub mod session;
pub mod store;
pub mod waiter;

pub use controller::TaskController;
pub use merger::merge;
pub use reaper::SessionReaper;
pub use session::{Phase, RunTicket, Session, SessionId};
pub use store::{SessionRef, SessionStore};
