//! Business logic sitting between the HTTP layer and persistence.

pub mod documents;
pub mod extraction;
pub mod lead_processor;

pub use documents::{DocumentStore, LocalDocumentStore, MemoryDocumentStore, StoredDocument};
pub use extraction::{DealMemoExtraction, ExtractionService};
pub use lead_processor::{ClientInfo, LeadOutcome, LeadProcessor, LeadSubmission};
