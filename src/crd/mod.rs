//! Custom Resource Definitions for the federator

mod image_pull_secret;

pub use image_pull_secret::{
    ImagePullSecret, ImagePullSecretSpec, ImagePullSecretStatus, IAM_AUDIENCE_PREFIX,
};
