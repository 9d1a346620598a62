pub mod index;
pub mod session;
pub mod state;

pub use index::Index;
pub use session::IndexSession;
pub use state::UndoState;
