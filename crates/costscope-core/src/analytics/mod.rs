//! Output assemblers and the request pipeline that drives them

pub mod entity;
pub mod service;
pub mod sunburst;
pub mod time_series;
pub mod trend;

pub use service::BillingAnalytics;
pub use sunburst::ROOT_PARENT_ID;
pub use time_series::TimeSeriesAssembler;
pub use trend::{TrendAssembler, WindowCosts};
