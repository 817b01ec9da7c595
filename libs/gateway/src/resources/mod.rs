pub mod configmap;
pub mod deployment;
pub mod secret;
pub mod service;
