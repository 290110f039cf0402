pub mod item;
pub mod notification;
pub mod record;
pub mod status;

pub use item::*;
pub use notification::*;
pub use record::*;
pub use status::*;
