//! Model types for the simulation.

mod overlay;
pub use self::overlay::{ContextualPattern, Modification, Overlay, OverlaySnapshot};

mod records;
pub use self::records::{
    AttrValue, Attributes, GeneratedTrace, LogRecord, MetricKind, MetricRecord, NumberValue, Severity, SpanKind,
    SpanRecord, SpanStatus,
};

mod resources;
pub(crate) use self::resources::{hex, random_uuid};
pub use self::resources::{Resource, ResourceCatalog, ResourceKind};

mod topology;
pub use self::topology::{Edge, Target, Topology};

pub mod trace_context;
pub use self::trace_context::TraceContext;
