//! Kubernetes Event recording for the federation controller.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so reconciliation
//! can emit Events on the `ImagePullSecret` being processed, visible via
//! `kubectl describe imagepullsecret`.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Trait for publishing Kubernetes Events.
///
/// Implementations log a warning on failure but never return an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason (see [`reasons`])
    /// * `action` - What was being done (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests and dry runs.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reason strings, shown under REASON in `kubectl get events`.
pub mod reasons {
    /// Registry credential Secret written and status updated
    pub const CREDENTIAL_REFRESHED: &str = "CredentialRefreshed";
    /// The request object could not be read
    pub const FETCH_FAILED: &str = "FetchFailed";
    /// Spec validation failed
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// A hop of the token federation chain failed
    pub const FEDERATION_FAILED: &str = "FederationFailed";
    /// The credential Secret could not be written
    pub const PERSIST_FAILED: &str = "PersistFailed";
    /// The status subresource could not be written
    pub const STATUS_UPDATE_FAILED: &str = "StatusUpdateFailed";
    /// Any other reconciliation failure
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Event action strings, shown under ACTION in `kubectl get events`.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Running the token federation chain
    pub const FEDERATE: &str = "Federate";
    /// Writing the registry credential Secret
    pub const PERSIST: &str = "Persist";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[test]
    fn reason_constants_are_pascal_case() {
        assert_eq!(reasons::CREDENTIAL_REFRESHED, "CredentialRefreshed");
        assert_eq!(reasons::FEDERATION_FAILED, "FederationFailed");
        assert_eq!(reasons::PERSIST_FAILED, "PersistFailed");
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        let publisher = NoopEventPublisher;
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::FEDERATION_FAILED,
                actions::FEDERATE,
                Some("denied".to_string()),
            )
            .await;
    }
}
