mod error;
mod session;
mod surface;

pub use error::{SurfaceError, SurfaceResult};
pub use session::{BrowserSession, SessionOptions};
pub use surface::{CdpSurface, Locator, UiNode, UiSurface};
