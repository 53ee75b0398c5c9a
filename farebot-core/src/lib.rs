pub mod browser;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod model;
pub mod probe;

pub use browser::{
    BrowserSession, CdpSurface, Locator, SessionOptions, SurfaceError, SurfaceResult, UiNode,
    UiSurface,
};
pub use config::{BotConfig, CardSection, ContactSection, FlightSection, MarketSection, RunSection};
pub use diagnostics::{DiagnosticRecorder, DiagnosticSink, PageSnapshot};
pub use error::{ConfigError, Result};
pub use flow::{
    FlowController, FlowError, FlowResult, PaymentOutcome, PurchaseDriver, RunOutcome, StageDriver,
    StageOutcome,
};
pub use gateway::{GatewayContext, PaymentGateway};
pub use model::{
    CardDetails, CardExtension, Market, Passenger, PassengerCategory, RunConfig, SeatCounts, Stage,
    TripType, MIN_DAYS_AHEAD,
};
pub use probe::{FillOutcome, PollBudget, Probe, ProbeError, ProbeResult};
