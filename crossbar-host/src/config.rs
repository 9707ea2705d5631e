use clap::{Parser, ValueEnum};
use crossbar_io::MemoryAttribute;

/// Payload caching tag, exposed as a flag because observed device variants
/// disagree on the convention.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PayloadAttr {
    Physical,
    IoCoherent,
}

impl From<PayloadAttr> for MemoryAttribute {
    fn from(attr: PayloadAttr) -> Self {
        match attr {
            PayloadAttr::Physical => MemoryAttribute::Physical,
            PayloadAttr::IoCoherent => MemoryAttribute::IoCoherent,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "CROSSBAR host: probes advertised connector devices and dispatches their shared event line")]
pub struct Args {
    /// Shared-memory name prefix devices are advertised under.
    #[arg(short, long, default_value = "crossbar")]
    pub prefix: String,

    /// Registry capacity.
    #[arg(short, long, default_value_t = 32)]
    pub capacity: usize,

    /// Upper bound on the per-device region walk.
    #[arg(long, default_value_t = 5)]
    pub max_regions: u32,

    /// Byte offset of the doorbell word inside region 0.
    #[arg(long, default_value_t = 0)]
    pub doorbell_offset: usize,

    /// Byte offset of the optional device-name string inside region 0.
    #[arg(long, default_value_t = 8)]
    pub name_offset: usize,

    /// Maximum device-name length decoded from region 0.
    #[arg(long, default_value_t = 64)]
    pub name_max_len: usize,

    /// Caching tag applied to payload regions.
    #[arg(long, value_enum, default_value_t = PayloadAttr::IoCoherent)]
    pub payload_attr: PayloadAttr,

    /// Doorbell poll interval of the line dispatch threads, in microseconds.
    #[arg(long, default_value_t = 500)]
    pub poll_interval_us: u64,
}
