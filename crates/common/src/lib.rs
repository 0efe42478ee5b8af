pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod params;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{with_retry, with_timeout, Error, Result};
pub use exchange::{ExecutionGateway, MarketData};
pub use params::{Bound, ParameterBounds, ScoreBound, StrategyParameters};
pub use store::PositionStore;
pub use types::*;
