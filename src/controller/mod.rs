//! Controller implementation for ImagePullSecret resources
//!
//! Follows the Kubernetes controller pattern: the runtime hands over an object
//! key, [`reconcile`] drives it to the desired state, and [`error_policy`]
//! decides when to look again after a failure.

mod federation;

pub use federation::{
    error_policy, reconcile, Context, FederationOutcome, KubeClient, KubeClientImpl,
    CONTROLLER_NAME,
};
