//! Market data: typed quotes and chains, plus the sources that supply them.

pub mod orats;
pub mod snapshot;
pub mod source;
pub mod types;

pub use orats::{ORATSClient, RawStrikeRecord};
pub use snapshot::{SnapshotSource, TickerFixture};
pub use source::{DataSource, SourceError};
pub use types::{OptionQuote, OptionType, OptionsChain, OptionsSnapshot, RawOptionRecord};
