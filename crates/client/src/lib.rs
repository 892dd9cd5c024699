//! Server-facing half of qbridge: transport, tree readers, mirroring, clock
//! sampling, status updates, recommendations and history export.

pub mod api;
pub mod auth;
pub mod clock;
pub mod error_log;
pub mod export;
pub mod hierarchy;
pub mod mirror;
pub mod recommendations;
pub mod status;
pub mod transport;

pub use clock::{estimate, estimate_drift, ClockSample, DriftEstimate, ServerClock, SyncEndpointClock, TransportClock};
pub use error_log::{ErrorEntry, ErrorKind, ErrorLog, ErrorSink, ErrorSummary};
pub use export::{BundleWriter, ExportReport, ExportWindow, Exporter};
pub use hierarchy::{list_projects, DesignTreeReader, ExecutionTreeReader, HierarchyReader};
pub use mirror::{Anchor, AnchorKind, MirrorEngine};
pub use recommendations::{is_actionable, FileRecommendations, RecommendationRequest, RecommendationSource};
pub use status::{RunTarget, StatusApplier, StatusContext, StatusError};
pub use transport::{ApiResponse, HttpTransport, Transport, TransportError};
