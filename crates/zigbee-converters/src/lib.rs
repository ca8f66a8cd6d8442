//! Zigbee device converters
//!
//! Device definitions are assembled from reusable extend fragments, each
//! contributing inbound converters (ZCL to state), outbound converters
//! (state to ZCL), exposed capabilities and configure steps. A runtime
//! matches interviewed devices against the catalog and drives one session
//! per device.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod configure;
pub mod definition;
pub mod error;
pub mod exposes;
pub mod extend;
pub mod fingerprint;
pub mod fz;
pub mod generate;
pub mod model;
pub mod persistence;
pub mod reporting;
pub mod runtime;
pub mod session;
pub mod state;
pub mod store;
pub mod tz;
pub mod utils;

pub use catalog::{Catalog, DefinitionMatch};
pub use codec::ValueCodec;
pub use config::ConverterConfig;
pub use configure::{ConfigureContext, ConfigureReport, ConfigureStep, RetryPolicy, StepOutcome};
pub use definition::{Definition, DefinitionBuilder, DefinitionMeta, EndpointMap};
pub use error::{AssemblyError, CatalogError, ConvertError};
pub use exposes::{Access, Expose};
pub use extend::Extend;
pub use fingerprint::{Fingerprint, WhiteLabel};
pub use fz::{FromZigbee, FzConverter, FzMeta};
pub use generate::{generate_declaration, generate_definition};
pub use model::{DeclaredDefinition, ExtendSpec};
pub use persistence::{load_definitions, save_definitions};
pub use runtime::ConverterRuntime;
pub use session::{DeviceSession, SessionEvent};
pub use state::{MergePolicy, State};
pub use store::DeviceStore;
pub use tz::{KeyPrecedence, SetResult, ToZigbee, TzMeta};
