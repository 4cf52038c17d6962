//! Option flags that travel with each logical part.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Structural choices for wrapping a part.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CmsOptions: u32 {
        /// Use the legacy unauthenticated content cipher.
        const WITHOUT_AEAD = 0x0002;
        /// Compress when it saves at least 2%.
        const COMPRESS = 0x0100;
        /// The part is XML rather than opaque data.
        const CONTENT_IS_XML = 0x0200;
        /// A missing side file for this part is not an error.
        const FILE_IS_OPTIONAL = 0x0400;
        /// Embed the part in the main object instead of a side file.
        const STORE_IN_MAIN = 0x0800;
    }
}
