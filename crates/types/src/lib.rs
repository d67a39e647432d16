pub mod accounts;
pub mod metadata;
pub mod reference;
pub mod serde;

pub use accounts::*;
pub use metadata::{EncodingError, ProductMetadata, MAX_FIELD_LEN};
pub use reference::*;
pub use crate::serde::{AccountMetaSer, InstructionSer};
