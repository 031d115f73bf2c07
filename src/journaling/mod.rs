mod session;

pub use session::{EditEvent, EditSession, EditStatus};
