use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// Reserved status fields with dashboard-level meaning.
pub const PROGRESS_KEY: &str = "progress";
pub const HW_CONNECTED_KEY: &str = "hw_connected";

// Daemon-level counter reported alongside per-client status entries.
const NCONNECTED_KEY: &str = "nconnected";

pub type StatusMap = BTreeMap<String, StatusValue>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub status: StatusBlock,
    #[serde(default, deserialize_with = "deserialize_clients")]
    pub clients: Vec<ClientDescriptor>,
}

impl Snapshot {
    pub fn connection_count(&self) -> Option<u64> {
        self.status.connection_count()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusBlock {
    by_client: BTreeMap<String, ClientStatus>,
    nconnected: Option<u64>,
}

impl StatusBlock {
    pub fn get(&self, name: &str) -> Option<&ClientStatus> {
        self.by_client.get(name)
    }

    pub fn connection_count(&self) -> Option<u64> {
        self.nconnected
    }

    pub fn insert(&mut self, name: impl Into<String>, status: ClientStatus) {
        self.by_client.insert(name.into(), status);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ClientStatus)> {
        self.by_client.iter()
    }
}

impl<'de> Deserialize<'de> for StatusBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StatusBlockVisitor;

        impl<'de> Visitor<'de> for StatusBlockVisitor {
            type Value = StatusBlock;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map from client name to status")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StatusBlock::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut block = StatusBlock::default();
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    if key == NCONNECTED_KEY {
                        if let Some(count) = value.as_u64() {
                            block.nconnected = Some(count);
                            continue;
                        }
                    }
                    block.by_client.insert(key, ClientStatus::from_value(&value));
                }
                Ok(block)
            }
        }

        deserializer.deserialize_any(StatusBlockVisitor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientStatus {
    Offline,
    Online(StatusMap),
}

impl ClientStatus {
    // "0" (string or number) is the daemon's offline sentinel; anything
    // else that is not an object coerces to an empty online status so a
    // malformed payload never aborts a reconciliation pass.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(number) => {
                if number.as_f64() == Some(0.0) {
                    ClientStatus::Offline
                } else {
                    ClientStatus::Online(StatusMap::new())
                }
            }
            Value::String(text) if text.trim() == "0" => ClientStatus::Offline,
            Value::Object(fields) => ClientStatus::Online(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), StatusValue::from_value(value)))
                    .collect(),
            ),
            _ => ClientStatus::Online(StatusMap::new()),
        }
    }

    pub fn fields(&self) -> Option<&StatusMap> {
        match self {
            ClientStatus::Offline => None,
            ClientStatus::Online(fields) => Some(fields),
        }
    }
}

impl<'de> Deserialize<'de> for ClientStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(ClientStatus::from_value(&value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusValue {
    Number(f64),
    Text(String),
    Flag(bool),
}

impl StatusValue {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(number) => StatusValue::Number(number.as_f64().unwrap_or(0.0)),
            Value::Bool(flag) => StatusValue::Flag(*flag),
            Value::String(text) => StatusValue::Text(text.clone()),
            other => StatusValue::Text(other.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            StatusValue::Number(number) => Some(*number),
            StatusValue::Text(text) => text.trim().parse().ok(),
            StatusValue::Flag(_) => None,
        }
    }

    // '0' | '1' flag interpretation; any non-affirmative value reads
    // as false.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            StatusValue::Flag(flag) => Some(*flag),
            StatusValue::Number(number) => Some(*number != 0.0),
            StatusValue::Text(text) => Some(matches!(text.trim(), "1" | "true" | "True")),
        }
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Number(number) => {
                if number.fract() == 0.0 && number.abs() < 1e15 {
                    write!(f, "{}", *number as i64)
                } else {
                    write!(f, "{number}")
                }
            }
            StatusValue::Text(text) => f.write_str(text),
            StatusValue::Flag(flag) => f.write_str(if *flag { "1" } else { "0" }),
        }
    }
}

// None hides the indicator: field absent, non-numeric or zero.
pub fn progress_percent(status: &StatusMap) -> Option<u8> {
    let fraction = status.get(PROGRESS_KEY)?.as_number()?;
    if fraction > 0.0 {
        Some((fraction.clamp(0.0, 1.0) * 100.0).round() as u8)
    } else {
        None
    }
}

pub fn hw_connected(status: &StatusMap) -> Option<bool> {
    status.get(HW_CONNECTED_KEY)?.as_flag()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClientDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub plots: BTreeMap<String, PlotConfig>,
}

// Declared either as a bare source string or a {src, title} object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotConfig {
    pub src: String,
    pub title: Option<String>,
}

impl<'de> Deserialize<'de> for PlotConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Bare(String),
            Full {
                src: String,
                #[serde(default)]
                title: Option<String>,
            },
        }

        Ok(match Shape::deserialize(deserializer)? {
            Shape::Bare(src) => PlotConfig { src, title: None },
            Shape::Full { src, title } => PlotConfig { src, title },
        })
    }
}

// Clients arrive either as an array of descriptors or as a name-keyed
// object; both flatten into a Vec preserving wire order, which later
// fixes registry order on rebuild.
fn deserialize_clients<'de, D>(deserializer: D) -> Result<Vec<ClientDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ClientsVisitor;

    impl<'de> Visitor<'de> for ClientsVisitor {
        type Value = Vec<ClientDescriptor>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a client list or a name-keyed client object")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut clients = Vec::new();
            while let Some(descriptor) = seq.next_element::<ClientDescriptor>()? {
                clients.push(descriptor);
            }
            Ok(clients)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: de::MapAccess<'de>,
        {
            let mut clients = Vec::new();
            while let Some((name, mut descriptor)) =
                map.next_entry::<String, ClientDescriptor>()?
            {
                if descriptor.name.is_empty() {
                    descriptor.name = name;
                }
                clients.push(descriptor);
            }
            Ok(clients)
        }
    }

    deserializer.deserialize_any(ClientsVisitor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Message,
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogEvent {
    #[serde(alias = "message")]
    pub msg: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, rename = "type")]
    pub level: LogLevel,
}
