//! Wire-protocol vocabulary for Navien NWP500 heat-pump water heaters.
//!
//! This crate knows the cloud MQTT dialect the devices speak: topic shapes,
//! command codes, the JSON command envelope, field encodings, and the pure
//! decoder that turns an inbound `(topic, payload)` pair into a typed
//! [`Inbound`] message. It performs no I/O and holds no connection state;
//! session handling lives in `tanklink-core`.

pub mod command;
pub mod decode;
pub mod device;
pub mod error;
pub mod field;
pub mod topic;

pub use command::{
    CommandBuilder, CommandEnvelope, CommandKind, CommandRequest, CorrelationId, DhwMode,
    ReservationEntry, ReservationPayload, TouPeriod, PROTOCOL_VERSION,
};
pub use decode::{
    decode, AckStatus, EnergyMonth, EnergyUsageDay, EnergyUsageReport, EnergyUsageTotal, Inbound,
    InboundKind, ReservationSchedule,
};
pub use device::{Device, MacAddress, NWP500_DEVICE_TYPE};
pub use error::{DecodeError, ValidationError};
pub use field::{
    decode_fields, Conversion, DecodeContext, FieldId, FieldSpec, FieldValue, TemperatureUnit,
    FEATURE_FIELDS, STATUS_FIELDS,
};
