//! tagnav-core: PN532 tag reader protocol engine for page navigation.
//!
//! Physical pages carry passive NFC tags. Touching a tagged page to a PN532
//! reader resolves the tag to a page number and sends a `goto_page` event to
//! a downstream viewer over UDP.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Frame codec, command constants, PN532 status codes
//! - **Transport**: Serial channel abstraction (serialport, mock)
//! - **Reader / Detect**: Command exchanges, tag detection, block access
//! - **Mapping**: Page ↔ UID index persisted as JSON
//! - **Arbitration**: Multi-tag selection strategies and debouncing
//! - **State**: Learning state machine
//! - **Emitter**: Navigation events over UDP
//! - **Console / Session**: Operator commands and the poll loop
//! - **Writer**: Page markers written into tag memory
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use std::sync::mpsc;
//!
//! use tagnav_core::discovery::connect;
//! use tagnav_core::emitter::UdpEmitter;
//! use tagnav_core::mapping::MappingStore;
//! use tagnav_core::session::{NavigationSession, SessionConfig};
//!
//! let config = SessionConfig::default();
//! let (reader, _firmware) = connect(None, config.baud_rate, config.read_timeout()).unwrap();
//! let mut mappings = MappingStore::new(config.total_pages, &config.mapping_file);
//! mappings.load().unwrap();
//! let sink = UdpEmitter::bind(config.udp_target.clone()).unwrap();
//!
//! let (_tx, rx) = mpsc::channel();
//! let running = AtomicBool::new(true);
//! let mut session = NavigationSession::new(config, reader, sink, mappings);
//! session.run(&rx, &running).unwrap();
//! ```

pub mod arbitration;
pub mod console;
pub mod detect;
pub mod discovery;
pub mod emitter;
pub mod events;
pub mod mapping;
pub mod protocol;
pub mod reader;
pub mod session;
pub mod state;
pub mod stats;
pub mod tag;
pub mod transport;
pub mod writer;

// Re-exports for convenience
pub use arbitration::{Debouncer, Strategy};
pub use console::{ConsoleCommand, run_console};
pub use detect::TagSource;
pub use emitter::{NavigationEvent, NavigationSink, TagData, UdpEmitter};
pub use events::{LogLevel, NavEvent, NavObserver, TracingObserver};
pub use mapping::{MappingError, MappingStore, PersistenceError};
pub use reader::{ExchangeError, FirmwareVersion, Pn532};
pub use session::{NavigationSession, SessionConfig};
pub use state::{LearnOutcome, LearningMachine};
pub use tag::{PageBlock, SignalStrength, TagRecord};
pub use transport::{MockTransport, SerialTransport, Transport, TransportError};
pub use writer::{PageTagWriter, WriteError};
