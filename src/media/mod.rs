pub mod devices;
pub mod stream;

pub use devices::{MediaDevices, SyntheticMediaDevices};
pub use stream::{LocalStream, LocalTrack, MediaConstraints, RemoteStream, TrackKind};
