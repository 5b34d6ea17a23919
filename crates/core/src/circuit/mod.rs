mod builder;
mod onion;
mod path_selection;
mod relay;
mod types;

pub use builder::CircuitBuilder;
pub use onion::{
    split_payload, OnionCodec, OnionEnvelope, OnionError, PeelError, PeelOutcome,
    LAYER_SEPARATOR, PAYLOAD_SEPARATOR,
};
pub use path_selection::{PathSelectionCriteria, PathSelectionError, PathSelector};
pub use relay::{RelayAction, RelayError, RelayHandler};
pub use types::{Circuit, CircuitError, CircuitId, HopDescriptor, HOP_SEPARATOR, TARGET_SEPARATOR};
