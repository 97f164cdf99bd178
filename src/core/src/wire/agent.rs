//! Agent operator API messages: `Call`, `Response` and the `ProcessIO`
//! records streamed by attach calls.

include!(concat!(env!("OUT_DIR"), "/agent.rs"));

use super::mesos::{DurationInfo, TtyInfo};

impl Call {
    /// A call of the given kind with no payload.
    pub fn of(kind: call::Type) -> Self {
        Self {
            r#type: kind as i32,
            ..Default::default()
        }
    }
}

impl ProcessIo {
    /// A data record for one of the standard streams.
    pub fn data(stream: process_io::data::Type, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            r#type: process_io::Type::Data as i32,
            data: Some(process_io::Data {
                r#type: stream as i32,
                data: bytes.into(),
            }),
            control: None,
        }
    }

    /// A heartbeat control record.
    pub fn heartbeat(interval: std::time::Duration) -> Self {
        Self {
            r#type: process_io::Type::Control as i32,
            data: None,
            control: Some(process_io::Control {
                r#type: process_io::control::Type::Heartbeat as i32,
                tty_info: None,
                heartbeat: Some(process_io::control::Heartbeat {
                    interval: Some(DurationInfo::from_duration(interval)),
                }),
            }),
        }
    }

    /// A terminal resize control record.
    pub fn tty_info(tty_info: TtyInfo) -> Self {
        Self {
            r#type: process_io::Type::Control as i32,
            data: None,
            control: Some(process_io::Control {
                r#type: process_io::control::Type::TtyInfo as i32,
                tty_info: Some(tty_info),
                heartbeat: None,
            }),
        }
    }
}
