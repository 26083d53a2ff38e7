pub mod api;
pub mod fleet;
pub mod parser;
pub mod profiles;
pub mod remote;
pub mod ssh;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use fleet::{DeployError, DeployOutcome, FleetDispatcher};
pub use parser::{parse_output, ParseError};
pub use profiles::{ConnectionProfile, ProfileDirectory, ProfileError};
pub use remote::{
    DispatchConfig, DispatchError, ExecOutput, RemoteDispatcher, RemoteTransport, SshTarget,
    TransportError,
};
pub use ssh::RusshTransport;
