pub mod artifact;
pub mod connection;
pub mod restore_target;
pub mod run_outcome;

pub use artifact::{Artifact, ArtifactName};
pub use connection::MySqlConnection;
pub use restore_target::{RegistryError, RestoreTarget, RestoreTargetView, TargetRegistry};
pub use run_outcome::{RunOutcome, RunStatus, StatusLedger};
