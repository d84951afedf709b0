pub mod decode;
pub mod evasion;

pub use decode::{decode_body, ContentEncoding};
pub use evasion::{BrowserEvasion, EvasionPolicy, QuietEvasion};
