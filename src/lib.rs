//! A native DBus implementation: the wire codec, an object tree with
//! message dispatch, and a client connection to a message bus.
//!
//! The crate is layered so that each part can be used on its own:
//!
//! * [`signature`] parses type signatures into the closed [`Type`] enum.
//! * [`value`] holds [`Value`], one instance of any wire type, and its
//!   marshalling in either byte order. [`Value::eval`] turns a value into a
//!   plain, JSON-like tree.
//! * [`message`] and [`wire`] describe whole messages and frame them to and
//!   from bytes. Nothing in either module does I/O.
//! * [`interface`] validates interface schemas, given as JSON, and
//!   [`implementation`] binds handlers and property values to them.
//! * [`tree`] indexes objects by path and [`dispatch`] routes method calls
//!   to them, producing the replies the protocol requires, including the
//!   standard `org.freedesktop.DBus.Error.*` names. The
//!   `org.freedesktop.DBus.{Peer, Introspectable, Properties}` interfaces are
//!   provided on every object by [`standard`], as is an opt-in
//!   `ObjectManager`.
//! * [`connection`] authenticates to a bus, says `Hello`, and runs a driver
//!   task that serves the tree, correlates replies with calls and delivers
//!   signals to subscribers. [`config`] finds the bus to connect to.
//!
//! The [`ser`] and [`de`] modules bridge to `serde`: any `Serialize` type can
//! become a [`Value`] with [`to_value`], and any `Deserialize` type can be
//! read back with [`from_value`] or straight from a message body with
//! [`Message::body_as`]. Named-field structs serialize as `a{sv}`
//! dictionaries by default; the [`serializer_policy`] module lets you pick
//! STRUCT layout instead.
//!
//! The library logs through the [`log`] facade and never installs a logger.
//!
//! [DBus]: https://www.freedesktop.org/wiki/Software/dbus/
//! [`Type`]: crate::signature::Type
//! [`Value`]: crate::value::Value
//! [`Value::eval`]: crate::value::Value::eval()
//! [`to_value`]: crate::ser::to_value()
//! [`from_value`]: crate::de::from_value()
//! [`Message::body_as`]: crate::message::Message::body_as()
//! [`serializer_policy`]: crate::ser::serializer_policy
//! [`log`]: https://docs.rs/log

mod align;
pub mod auth;
pub mod config;
pub mod connection;
pub mod de;
pub mod dispatch;
pub mod error;
pub mod implementation;
pub mod interface;
pub mod message;
pub mod names;
pub mod path;
mod primitives;
pub mod ser;
pub mod signature;
pub mod standard;
pub mod tree;
pub mod value;
pub mod wire;

pub use config::{BusAddress, ConnectionConfig};
pub use connection::{Connection, ConnectionState, SignalMatch, Subscription};
pub use de::{from_body, from_value};
pub use dispatch::CallContext;
pub use error::{Error, InterfaceError, MethodError, Result, SignatureError};
pub use implementation::Implementation;
pub use interface::{normalize_interface, Interface};
pub use message::{Flags, Message, MessageKind};
pub use path::ObjectPath;
pub use ser::{to_value, to_value_with_policy};
pub use signature::{Signature, Type};
pub use tree::{Node, ObjectTree, TreeObserver};
pub use value::eval::Plain;
pub use value::{Array, DictEntry, Struct, Value};
