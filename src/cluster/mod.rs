//! Handshake checks run when two nodes attempt to form or rejoin a cluster.
//!
//! A failed check does not raise an error: it yields a [`JoinCheckResult`]
//! telling which node has to step out of the cluster (passivation) or that
//! the link has to be dropped altogether.

pub mod checks;
pub mod protocol;
pub mod registry;
pub mod result;

pub use protocol::{ClusterJoinCheck, JoinRequest, JoinRole, JoinStream};
pub use registry::{JoinCheckRegistry, JoinDecision};
pub use result::{JoinCheckResult, JoinCheckResultBuilder, PassivationTarget};
