//! Documents presentable directly from secure hardware.
//!
//! Some platforms can present a credential from a secure element even when
//! the application is not running. The hardware offers a small, fixed number
//! of slots. A document that wants this feature allocates one slot through
//! [`DirectAccessMetadata::allocate_slot`]; the slot is recorded in the
//! document's persisted metadata and wiped when the document is deleted.
//! A [`SlotManager`] built with [`SlotManager::persistent`] also keeps its own
//! ownership table, so slots survive a restart before their documents are
//! loaded again.

mod metadata;
mod slots;

pub use metadata::{DirectAccessMetadata, DirectAccessMetadataFactory, DirectAccessRecord};
pub use slots::{SlotDevice, SlotId, SlotManager, SlotState};
