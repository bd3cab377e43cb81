pub mod attribution;
pub mod bootstrap;
pub mod device;
pub mod domain;
pub mod experiment;
pub mod fingerprint;
pub mod identity;
pub mod ingest;
pub mod memory_store;
pub mod ports;
pub mod report;
pub mod scoring;
pub mod session;
pub mod tracker;

pub use bootstrap::{Bootstrap, BootstrapRequest, BootstrapService};
pub use domain::{
    Attribution, DeviceInfo, DeviceSignature, Event, EventData, EventType, Identity, Lead, Session,
    Visitor,
};
pub use identity::{IdentityResolver, MatchedBy, Resolution};
pub use ingest::{EventIngestor, RetryPolicy, TrackOutcome};
pub use memory_store::MemoryStore;
pub use ports::{EventTransport, PortError, PortResult, VisitorStore};
pub use report::{build_report, Report, ReportWindow};
pub use scoring::{EngagementProfile, ScoringEngine};
pub use session::{SessionManager, SessionSettings, SessionValidation};
