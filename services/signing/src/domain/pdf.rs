// PDF signing modules

pub mod byte_range;
pub mod placeholder;
pub mod tail;

// Re-exports
pub use placeholder::{CONTENTS_CAPACITY, PlantedDocument, embed_signature, plant};
pub use tail::{ObjRef, PdfError, TrailerInfo, parse_tail};
