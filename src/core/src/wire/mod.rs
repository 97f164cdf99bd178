//! Wire messages shared by the agent and executor APIs.
//!
//! The messages are generated from `proto/*.proto` at build time. Every
//! message carries both a protobuf encoding (`prost::Message`) and a JSON
//! encoding (`serde`). JSON follows the protobuf field names, renders enums
//! by name and bytes as base64.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

pub mod agent;
pub mod executor;
pub mod mesos;

/// Adds `Display`, `from_number` and a JSON helper module to generated
/// enumerations. The helper serializes the raw `i32` field by name and
/// accepts either the name or the number.
macro_rules! wire_enums {
    ($( $serde_mod:ident => $name:ty, )+) => {
        $(
            impl $name {
                /// Looks a variant up by its wire number.
                pub fn from_number(value: i32) -> Option<Self> {
                    Self::try_from(value).ok()
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.as_str_name())
                }
            }
        )+

        /// Field helpers referenced by the generated serde attributes.
        pub mod enum_serde {
            $(
                pub mod $serde_mod {
                    type Enum = $name;

                    pub fn serialize<S: serde::Serializer>(
                        value: &i32,
                        serializer: S,
                    ) -> Result<S::Ok, S::Error> {
                        super::super::serialize_enum(
                            *value,
                            |number| Enum::from_number(number).map(|v| v.as_str_name()),
                            serializer,
                        )
                    }

                    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
                        deserializer: D,
                    ) -> Result<i32, D::Error> {
                        super::super::deserialize_enum(deserializer, |text| {
                            Enum::from_str_name(text).map(|v| v as i32)
                        })
                    }
                }
            )+
        }
    };
}

wire_enums! {
    mesos_container_info_type => crate::wire::mesos::container_info::Type,
    mesos_task_state => crate::wire::mesos::TaskState,
    agent_call_type => crate::wire::agent::call::Type,
    agent_call_attach_container_input_type => crate::wire::agent::call::attach_container_input::Type,
    agent_response_type => crate::wire::agent::response::Type,
    agent_process_io_type => crate::wire::agent::process_io::Type,
    agent_process_io_data_type => crate::wire::agent::process_io::data::Type,
    agent_process_io_control_type => crate::wire::agent::process_io::control::Type,
    executor_call_type => crate::wire::executor::call::Type,
    executor_event_type => crate::wire::executor::event::Type,
}

/// Writes an enum field by name, falling back to the raw number for values
/// this build does not know.
pub fn serialize_enum<S: Serializer>(
    value: i32,
    name: fn(i32) -> Option<&'static str>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match name(value) {
        Some(text) => serializer.serialize_str(text),
        None => serializer.serialize_i32(value),
    }
}

/// Reads an enum field given either its name or its number.
pub fn deserialize_enum<'de, D: Deserializer<'de>>(
    deserializer: D,
    lookup: fn(&str) -> Option<i32>,
) -> Result<i32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Name(String),
        Number(i32),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Name(text) => {
            lookup(&text).ok_or_else(|| D::Error::custom(format!("unknown enum value '{}'", text)))
        }
        Repr::Number(number) => Ok(number),
    }
}

/// Base64 encoding for `bytes` fields.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(D::Error::custom)
    }

    /// Same encoding for `optional bytes`.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(bytes) => super::serialize(bytes, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] Vec<u8>);

            Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
        }
    }
}
