//! Domain model shared by the store, services and API.

pub mod engagement;
pub mod investor;
pub mod property;

pub use engagement::{CallSession, CallStatus, DealMatch, MatchStatus, MatchedDeal};
pub use investor::{
    Consent, InvestorProfile, LeadNote, NewConsent, NewLead, PipelineStage, Qualification,
    StageChange, CHANGED_BY_ADMIN, CHANGED_BY_SYSTEM,
};
pub use property::{
    DealStatus, NewProperty, NewPropertyFeatures, Property, PropertyFeatures, PropertyUpdate,
};
