//! Business logic services

pub mod broker;
pub mod credentials;
pub mod csr;
pub mod http;
pub mod orchestrator;
pub mod registry;

pub use broker::{HttpBroker, MessageBroker};
pub use credentials::{
    CaCredential, CredentialProvider, CredentialReference, FileObjectStore, HttpObjectStore,
    ObjectStore, StoreCredentialProvider,
};
pub use csr::{CertificateIssuer, Clock, FixedClock, ParsedCsr, SystemClock};
pub use orchestrator::{LifecycleOrchestrator, OrchestratorSettings};
pub use registry::{DeviceRegistry, HttpDeviceRegistry};
