//! Ground-control link manager
//!
//! Connects to a flight controller over a byte transport, decodes MAVLink
//! traffic, dispatches it to listeners and runs the multi-step protocols
//! (parameter fetch/set, reboot-and-reconnect) on top.
//!
//! ```ignore
//! use gcs_link::{codec::MavlinkCodec, link::{Link, LinkConfig}, transport::SerialTransport};
//!
//! let link = Link::new(MavlinkCodec::new(), LinkConfig::default());
//! link.connect(Arc::new(SerialTransport::new("/dev/ttyACM0", 115_200)));
//! let fetch = link.get_parameters(link.config().into());
//! ```

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod link;
pub mod logging;
pub mod periodic;
pub mod transport;

pub use error::{LinkError, Result};
