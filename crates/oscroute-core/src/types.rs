//! Packet types: messages, arguments, bundles and time tags

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Argument type tags
pub mod tag {
    pub const INT32: u8 = b'i';
    pub const FLOAT32: u8 = b'f';
    pub const STRING: u8 = b's';
    pub const BLOB: u8 = b'b';
    pub const TRUE: u8 = b'T';
    pub const FALSE: u8 = b'F';
    pub const NIL: u8 = b'N';
    pub const IMPULSE: u8 = b'I';
}

/// A single typed message argument
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Int32(i32),
    Float32(f32),
    String(String),
    Blob(Vec<u8>),
    True,
    False,
    Nil,
    /// Payload-less trigger (a.k.a. "bang")
    Impulse,
}

impl Argument {
    /// Type tag character for this argument
    pub fn type_tag(&self) -> u8 {
        match self {
            Argument::Int32(_) => tag::INT32,
            Argument::Float32(_) => tag::FLOAT32,
            Argument::String(_) => tag::STRING,
            Argument::Blob(_) => tag::BLOB,
            Argument::True => tag::TRUE,
            Argument::False => tag::FALSE,
            Argument::Nil => tag::NIL,
            Argument::Impulse => tag::IMPULSE,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Argument::Int32(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Argument::Float32(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Argument::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// `Some(true)` for `True`, `Some(false)` for `False`
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Argument::True => Some(true),
            Argument::False => Some(false),
            _ => None,
        }
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int32(v)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Float32(v)
    }
}

impl From<bool> for Argument {
    fn from(v: bool) -> Self {
        if v {
            Argument::True
        } else {
            Argument::False
        }
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::String(v.to_string())
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::String(v)
    }
}

impl From<Vec<u8>> for Argument {
    fn from(v: Vec<u8>) -> Self {
        Argument::Blob(v)
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Int32(i) => write!(f, "{}", i),
            Argument::Float32(v) => write!(f, "{}", v),
            Argument::String(s) => write!(f, "{:?}", s),
            Argument::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Argument::True => f.write_str("true"),
            Argument::False => f.write_str("false"),
            Argument::Nil => f.write_str("nil"),
            Argument::Impulse => f.write_str("impulse"),
        }
    }
}

/// An addressed message with an ordered argument list
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub address: String,
    pub args: Vec<Argument>,
}

impl Message {
    /// Create a message with no arguments
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument (builder style)
    pub fn with_arg(mut self, arg: impl Into<Argument>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_int(self, value: i32) -> Self {
        self.with_arg(Argument::Int32(value))
    }

    pub fn with_float(self, value: f32) -> Self {
        self.with_arg(Argument::Float32(value))
    }

    /// Type tag string for the arguments, including the leading ','
    pub fn type_tags(&self) -> String {
        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        tags.extend(self.args.iter().map(|a| a.type_tag() as char));
        tags
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.address)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str("]")
    }
}

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// 64-bit NTP time tag: seconds since 1900 in the high word, fraction in the low word
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeTag(pub u64);

impl TimeTag {
    /// The special value meaning "dispatch immediately"
    pub const IMMEDIATE: TimeTag = TimeTag(1);

    pub fn new(seconds: u32, fraction: u32) -> Self {
        TimeTag(((seconds as u64) << 32) | fraction as u64)
    }

    pub fn seconds(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn fraction(&self) -> u32 {
        self.0 as u32
    }

    pub fn is_immediate(&self) -> bool {
        *self == Self::IMMEDIATE
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert from wall-clock time; times before 1970 saturate to the Unix epoch
    pub fn from_system_time(t: SystemTime) -> Self {
        let since_unix = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let seconds = since_unix.as_secs() + NTP_UNIX_OFFSET;
        let fraction = ((since_unix.subsec_nanos() as u64) << 32) / 1_000_000_000;
        TimeTag::new(seconds as u32, fraction as u32)
    }

    /// Convert to wall-clock time, `None` for times before the Unix epoch
    pub fn to_system_time(&self) -> Option<SystemTime> {
        let seconds = (self.seconds() as u64).checked_sub(NTP_UNIX_OFFSET)?;
        let nanos = ((self.fraction() as u64) * 1_000_000_000) >> 32;
        Some(UNIX_EPOCH + Duration::new(seconds, nanos as u32))
    }
}

impl Default for TimeTag {
    fn default() -> Self {
        Self::IMMEDIATE
    }
}

/// Timestamped container of packets
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub timetag: TimeTag,
    pub content: Vec<Packet>,
}

impl Bundle {
    pub fn new(timetag: TimeTag) -> Self {
        Self {
            timetag,
            content: Vec::new(),
        }
    }

    pub fn with_packet(mut self, packet: impl Into<Packet>) -> Self {
        self.content.push(packet.into());
        self
    }

    /// All contained messages, depth-first in packet order
    pub fn messages(&self) -> Vec<&Message> {
        let mut out = Vec::new();
        for packet in &self.content {
            packet.collect_messages(&mut out);
        }
        out
    }
}

/// Top-level datagram content
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    /// Flatten into messages, preserving bundle ordering
    pub fn into_messages(self) -> Vec<Message> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<Message>) {
        match self {
            Packet::Message(m) => out.push(m),
            Packet::Bundle(b) => {
                for p in b.content {
                    p.flatten_into(out);
                }
            }
        }
    }

    fn collect_messages<'a>(&'a self, out: &mut Vec<&'a Message>) {
        match self {
            Packet::Message(m) => out.push(m),
            Packet::Bundle(b) => {
                for p in &b.content {
                    p.collect_messages(out);
                }
            }
        }
    }
}

impl From<Message> for Packet {
    fn from(m: Message) -> Self {
        Packet::Message(m)
    }
}

impl From<Bundle> for Packet {
    fn from(b: Bundle) -> Self {
        Packet::Bundle(b)
    }
}
