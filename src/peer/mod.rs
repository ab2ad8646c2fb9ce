pub mod connection;
pub mod ice;
pub mod types;

pub use connection::RtcPeer;
pub use ice::{analyze_candidates, check_ice_server_availability, CandidateBreakdown, PendingCandidates};
pub use types::{IceCandidate, PeerEvent, ServerConfig};
