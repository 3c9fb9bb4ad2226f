//! Event envelope wire types.
//!
//! Every frame read off the firehose connection, and every part of a bulk
//! recent-logs/container-metrics response, is one length-delimited
//! [`Envelope`] encoded with protobuf. The envelope carries a type
//! discriminant plus at most one populated payload; unknown discriminants
//! are passed through untyped.

/// Discriminant for the payload carried by an [`Envelope`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    Unknown = 0,
    LogMessage = 5,
    Error = 8,
    ContainerMetric = 9,
}

/// Whether a log line was written to the app's stdout or stderr.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LogMessageType {
    Out = 1,
    Err = 2,
}

/// One log line emitted by an application instance.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub message: Vec<u8>,
    #[prost(enumeration = "LogMessageType", tag = "2")]
    pub message_type: i32,
    /// Nanoseconds since the Unix epoch.
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(string, tag = "4")]
    pub app_id: String,
    #[prost(string, tag = "5")]
    pub source_type: String,
    #[prost(string, tag = "6")]
    pub source_instance: String,
}

impl LogMessage {
    /// The log line as lossy UTF-8.
    pub fn message_text(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}

/// Resource usage snapshot for one application instance.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerMetric {
    #[prost(string, tag = "1")]
    pub application_id: String,
    #[prost(int32, tag = "2")]
    pub instance_index: i32,
    #[prost(double, tag = "3")]
    pub cpu_percentage: f64,
    #[prost(uint64, tag = "4")]
    pub memory_bytes: u64,
    #[prost(uint64, tag = "5")]
    pub disk_bytes: u64,
}

/// An error event raised by the platform itself.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventError {
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(int32, tag = "2")]
    pub code: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

/// One decoded unit of the event stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    /// Emitting component, e.g. "router" or "rep".
    #[prost(string, tag = "1")]
    pub origin: String,
    #[prost(enumeration = "EventType", tag = "2")]
    pub event_type: i32,
    #[prost(message, optional, tag = "5")]
    pub log_message: Option<LogMessage>,
    #[prost(message, optional, tag = "8")]
    pub error: Option<EventError>,
    #[prost(message, optional, tag = "9")]
    pub container_metric: Option<ContainerMetric>,
}

impl Envelope {
    /// Whether this envelope carries a log message payload. The prost
    /// accessor maps unknown discriminants to [`EventType::Unknown`].
    pub fn is_log_message(&self) -> bool {
        self.event_type() == EventType::LogMessage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn log_envelope(text: &str, timestamp: i64) -> Envelope {
        Envelope {
            origin: "rep".into(),
            event_type: EventType::LogMessage as i32,
            log_message: Some(LogMessage {
                message: text.as_bytes().to_vec(),
                message_type: LogMessageType::Out as i32,
                timestamp,
                app_id: "app-1".into(),
                source_type: "APP".into(),
                source_instance: "0".into(),
            }),
            error: None,
            container_metric: None,
        }
    }

    #[test]
    fn envelope_survives_encode_decode() {
        let envelope = log_envelope("hello", 42);
        let bytes = envelope.encode_to_vec();
        let decoded = Envelope::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, envelope);
        assert!(decoded.is_log_message());
        assert_eq!(decoded.log_message.unwrap().message_text(), "hello");
    }

    #[test]
    fn unknown_discriminant_maps_to_unknown() {
        let envelope = Envelope {
            origin: "future".into(),
            event_type: 77,
            log_message: None,
            error: None,
            container_metric: None,
        };
        assert_eq!(envelope.event_type(), EventType::Unknown);
        assert!(!envelope.is_log_message());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        // A truncated varint field cannot decode into an envelope.
        assert!(Envelope::decode(&[0x0a, 0xff][..]).is_err());
    }
}
